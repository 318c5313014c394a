//! Data models for study sets, containers and per-term progress

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who may read a study set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    Private,
}

/// A single word/definition pair within a study set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Term {
    pub id: String,
    pub study_set_id: String,
    pub word: String,
    pub definition: String,
    /// Position within the set; the server-provided base order sorts by this
    #[serde(default)]
    pub rank: i32,
}

impl Term {
    pub fn new(study_set_id: &str, word: &str, definition: &str, rank: i32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            study_set_id: study_set_id.to_string(),
            word: word.to_string(),
            definition: definition.to_string(),
            rank,
        }
    }
}

/// A named collection of terms owned by a user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySet {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default = "default_language")]
    pub word_language: String,
    #[serde(default = "default_language")]
    pub definition_language: String,
    #[serde(default)]
    pub terms: Vec<Term>,
}

fn default_language() -> String {
    "en".to_string()
}

impl StudySet {
    pub fn new(id: &str, user_id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            title: title.to_string(),
            description: String::new(),
            tags: Vec::new(),
            visibility: Visibility::default(),
            word_language: default_language(),
            definition_language: default_language(),
            terms: Vec::new(),
        }
    }

    /// Term ids in rank order
    pub fn term_order(&self) -> Vec<String> {
        let mut terms: Vec<&Term> = self.terms.iter().collect();
        terms.sort_by_key(|t| t.rank);
        terms.into_iter().map(|t| t.id.clone()).collect()
    }

    pub fn term(&self, id: &str) -> Option<&Term> {
        self.terms.iter().find(|t| t.id == id)
    }

    /// Private sets are only readable by their owner
    pub fn is_readable_by(&self, viewer: Option<&str>) -> bool {
        self.visibility != Visibility::Private || viewer == Some(self.user_id.as_str())
    }
}

/// Kind of entity a container or recent listing refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    StudySet,
    Folder,
}

/// Which side of a term the learner answers with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AnswerMode {
    Word,
    #[default]
    Definition,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MultipleAnswerMode {
    One,
    All,
    #[default]
    Unknown,
}

/// Study mode a progress record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StudyMode {
    Learn,
    Flashcards,
}

/// Per-(user, term) progress record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudiableTerm {
    pub user_id: String,
    pub term_id: String,
    /// Container the progress was recorded through
    pub experience_id: String,
    pub mode: StudyMode,
    pub correctness: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appeared_in_round: Option<i32>,
}

/// Per-user study configuration and recency record for one entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub id: String,
    pub user_id: String,
    pub entity_id: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub viewed_at: DateTime<Utc>,
    #[serde(default)]
    pub shuffle_flashcards: bool,
    #[serde(default)]
    pub shuffle_learn: bool,
    #[serde(default)]
    pub study_starred: bool,
    #[serde(default)]
    pub answer_with: AnswerMode,
    #[serde(default)]
    pub starred_terms: Vec<String>,
    #[serde(default)]
    pub multiple_answer_mode: MultipleAnswerMode,
    #[serde(default)]
    pub extended_feedback_bank: bool,
    #[serde(default)]
    pub enable_cards_sorting: bool,
    #[serde(default)]
    pub cards_study_starred: bool,
    #[serde(default)]
    pub cards_answer_with: AnswerMode,
    #[serde(default)]
    pub match_study_starred: bool,
    #[serde(default)]
    pub studiable_terms: Vec<StudiableTerm>,
}

impl Container {
    pub fn new(user_id: &str, entity_id: &str, kind: EntityKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            entity_id: entity_id.to_string(),
            kind,
            viewed_at: Utc::now(),
            shuffle_flashcards: false,
            shuffle_learn: false,
            study_starred: false,
            answer_with: AnswerMode::default(),
            starred_terms: Vec::new(),
            multiple_answer_mode: MultipleAnswerMode::default(),
            extended_feedback_bank: false,
            enable_cards_sorting: false,
            cards_study_starred: false,
            cards_answer_with: AnswerMode::default(),
            match_study_starred: false,
            studiable_terms: Vec::new(),
        }
    }
}

/// A study set as returned by `studySets.byId` / `studySets.getPublic`.
///
/// `container` is only present for authenticated viewers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySetWithContainer {
    #[serde(flatten)]
    pub set: StudySet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub study_set_ids: Vec<String>,
}

/// Entry of a "recently viewed" listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentEntity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub user_id: String,
    pub title: String,
    pub viewed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    /// Number of terms for sets, number of sets for folders
    #[serde(default)]
    pub item_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub teacher_ids: Vec<String>,
    #[serde(default)]
    pub study_set_ids: Vec<String>,
    #[serde(default)]
    pub folder_ids: Vec<String>,
}

bitflags! {
    /// Per-user feature switches managed by admins
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct EnabledFeatures: u32 {
        const EXTENDED_FEEDBACK_BANK = 1 << 0;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub flags: EnabledFeatures,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistedEmail {
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// A sign-in that was refused because the address was not whitelisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginAttempt {
    pub email: String,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Whitelist {
    pub whitelist: Vec<WhitelistedEmail>,
    pub attempts: Vec<LoginAttempt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_order_follows_rank() {
        let mut set = StudySet::new("set", "owner", "Verbs");
        let mut late = Term::new("set", "b", "second", 1);
        late.id = "b".into();
        let mut early = Term::new("set", "a", "first", 0);
        early.id = "a".into();
        set.terms = vec![late, early];

        assert_eq!(set.term_order(), vec!["a", "b"]);
    }

    #[test]
    fn test_private_set_readable_only_by_owner() {
        let mut set = StudySet::new("set", "owner", "Secret");
        set.visibility = Visibility::Private;

        assert!(set.is_readable_by(Some("owner")));
        assert!(!set.is_readable_by(Some("someone-else")));
        assert!(!set.is_readable_by(None));
    }

    #[test]
    fn test_container_payload_is_optional() {
        let json = serde_json::json!({
            "id": "set",
            "userId": "owner",
            "createdAt": "2024-01-01T00:00:00Z",
            "title": "Public set",
            "visibility": "Public",
            "terms": []
        });
        let data: StudySetWithContainer = serde_json::from_value(json).unwrap();
        assert!(data.container.is_none());
        assert_eq!(data.set.word_language, "en");
    }
}
