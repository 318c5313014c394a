//! Remote data gateway
//!
//! This module provides:
//! - The `Gateway` trait: typed queries and mutations against the backend
//! - `HttpGateway`: tRPC-over-HTTP client
//! - `MemoryGateway`: in-process backend with the same access rules
//!
//! Queries are never retried; every failure is surfaced to the caller.

pub mod errors;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::sets::{
    EnabledFeatures, EntityKind, RecentEntity, StudyMode, StudySetWithContainer, Term, Whitelist,
};

pub use errors::{GatewayError, GatewayResult};
pub use http::HttpGateway;
pub use memory::{Database, MemoryGateway};

/// Input of `studiableTerms.put`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutStudiableTerm {
    /// Term id
    pub id: String,
    /// Container the session runs in
    pub experience_id: String,
    pub mode: StudyMode,
    pub correctness: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appeared_in_round: Option<i32>,
}

/// Input of `terms.edit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditTerm {
    pub id: String,
    pub study_set_id: String,
    pub word: String,
    pub definition: String,
}

impl From<&Term> for EditTerm {
    fn from(term: &Term) -> Self {
        Self {
            id: term.id.clone(),
            study_set_id: term.study_set_id.clone(),
            word: term.word.clone(),
            definition: term.definition.clone(),
        }
    }
}

/// Typed request/response boundary to the backend.
///
/// Implementations map backend failures onto `GatewayError`:
/// a missing entity is `NotFound`, a private set read by a non-owner is
/// `Forbidden`.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// `studySets.byId` when `authed`, otherwise `studySets.getPublic`
    async fn fetch_study_set(&self, id: &str, authed: bool) -> GatewayResult<StudySetWithContainer>;

    /// `studiableTerms.put`, an upsert keyed by (viewer, term id)
    async fn put_studiable_term(&self, input: PutStudiableTerm) -> GatewayResult<()>;

    /// `folders.recent` / `studySets.recent`
    async fn recent(&self, kind: EntityKind, exclude: &[String]) -> GatewayResult<Vec<RecentEntity>>;

    /// `terms.edit`
    async fn edit_term(&self, input: EditTerm) -> GatewayResult<()>;

    /// `classes.addEntities`
    async fn add_class_entities(
        &self,
        class_id: &str,
        kind: EntityKind,
        entities: &[String],
    ) -> GatewayResult<()>;

    /// `classes.removeEntity`
    async fn remove_class_entity(
        &self,
        class_id: &str,
        kind: EntityKind,
        entity_id: &str,
    ) -> GatewayResult<()>;

    /// `admin.getWhitelist`
    async fn get_whitelist(&self) -> GatewayResult<Whitelist>;

    /// `admin.whitelistEmail`; `delete` removes the address instead
    async fn whitelist_email(&self, email: &str, delete: bool) -> GatewayResult<()>;

    /// `admin.allowFailedLogin`
    async fn allow_failed_login(&self, email: &str, allow: bool) -> GatewayResult<()>;

    /// `admin.setEnabledFlags`
    async fn set_enabled_flags(&self, user_id: &str, flags: EnabledFeatures) -> GatewayResult<()>;

    /// Feature flags of the current viewer (empty when signed out)
    async fn viewer_flags(&self) -> GatewayResult<EnabledFeatures>;
}

/// Check an email address before sending it to the whitelist procedures
pub fn validate_email(email: &str) -> GatewayResult<()> {
    let pattern = regex::Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
        .map_err(|e| GatewayError::Validation(e.to_string()))?;
    if pattern.is_match(email) {
        Ok(())
    } else {
        Err(GatewayError::Validation(format!("Invalid email address: {}", email)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("student@example.com").is_ok());
        assert!(matches!(
            validate_email("not-an-email"),
            Err(GatewayError::Validation(_))
        ));
        assert!(validate_email("two@@example.com").is_err());
        assert!(validate_email("space in@example.com").is_err());
    }

    #[test]
    fn test_put_input_wire_shape() {
        let input = PutStudiableTerm {
            id: "term".into(),
            experience_id: "container".into(),
            mode: StudyMode::Learn,
            correctness: 1,
            appeared_in_round: None,
        };
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["experienceId"], "container");
        assert!(json.get("appearedInRound").is_none());
    }
}
