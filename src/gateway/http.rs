//! tRPC-over-HTTP gateway
//!
//! Queries are `GET {base}/api/trpc/{procedure}?input={"json": ...}`,
//! mutations are `POST {base}/api/trpc/{procedure}` with a `{"json": ...}`
//! body. Successful responses wrap the payload in `result.data.json`,
//! failures carry `error.json.data.httpStatus`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{EditTerm, Gateway, GatewayError, GatewayResult, PutStudiableTerm};
use crate::config::ClientConfig;
use crate::sets::{EnabledFeatures, EntityKind, RecentEntity, StudySetWithContainer, Whitelist};

/// Gateway talking to the web backend
pub struct HttpGateway {
    client: Client,
    base_url: String,
    signed_in: bool,
}

#[derive(Debug, Deserialize)]
struct SuccessEnvelope<T> {
    result: ResultData<T>,
}

#[derive(Debug, Deserialize)]
struct ResultData<T> {
    data: JsonData<T>,
}

#[derive(Debug, Deserialize)]
struct JsonData<T> {
    json: T,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: JsonData<ErrorShape>,
}

#[derive(Debug, Deserialize)]
struct ErrorShape {
    message: String,
    #[serde(default)]
    data: Option<ErrorData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorData {
    http_status: Option<u16>,
}

#[derive(Debug, Serialize)]
struct InputEnvelope<'a, T: Serialize> {
    json: &'a T,
}

#[derive(Debug, Deserialize)]
struct SessionUser {
    #[serde(default)]
    flags: EnabledFeatures,
}

impl HttpGateway {
    /// Create a gateway from client configuration
    pub fn new(config: &ClientConfig) -> GatewayResult<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(GatewayError::Validation(
                "URL must start with http:// or https://".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.session_token {
            let cookie_name = if base_url.starts_with("https://") {
                "__Secure-next-auth.session-token"
            } else {
                "next-auth.session-token"
            };
            let value = HeaderValue::from_str(&format!("{}={}", cookie_name, token))
                .map_err(|e| GatewayError::Validation(format!("Invalid session token: {}", e)))?;
            headers.insert(COOKIE, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url,
            signed_in: config.session_token.is_some(),
        })
    }

    fn url(&self, procedure: &str) -> String {
        format!("{}/api/trpc/{}", self.base_url, procedure)
    }

    async fn query<I, O>(&self, procedure: &str, input: &I) -> GatewayResult<O>
    where
        I: Serialize + Sync,
        O: DeserializeOwned,
    {
        let encoded = serde_json::to_string(&InputEnvelope { json: input })?;
        let url = format!("{}?input={}", self.url(procedure), urlencoding::encode(&encoded));

        log::debug!("gateway: query {}", procedure);
        let response = self.client.get(&url).send().await?;
        Self::decode(procedure, response).await
    }

    async fn mutation<I, O>(&self, procedure: &str, input: &I) -> GatewayResult<O>
    where
        I: Serialize + Sync,
        O: DeserializeOwned,
    {
        log::debug!("gateway: mutation {}", procedure);
        let response = self
            .client
            .post(self.url(procedure))
            .json(&InputEnvelope { json: input })
            .send()
            .await?;
        Self::decode(procedure, response).await
    }

    async fn decode<O: DeserializeOwned>(
        procedure: &str,
        response: reqwest::Response,
    ) -> GatewayResult<O> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            let envelope: SuccessEnvelope<O> = serde_json::from_str(&body)?;
            return Ok(envelope.result.data.json);
        }

        let err = error_from_body(status, &body);
        log::warn!("gateway: {} failed: {}", procedure, err);
        Err(err)
    }

    fn kind_procedure(kind: EntityKind) -> &'static str {
        match kind {
            EntityKind::StudySet => "studySets.recent",
            EntityKind::Folder => "folders.recent",
        }
    }
}

/// Map a failed response onto the gateway error taxonomy
fn error_from_body(status: StatusCode, body: &str) -> GatewayError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let shape = envelope.error.json;
            let code = shape
                .data
                .and_then(|d| d.http_status)
                .unwrap_or(status.as_u16());
            GatewayError::from_status(code, shape.message)
        }
        Err(_) => GatewayError::from_status(status.as_u16(), body.to_string()),
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn fetch_study_set(&self, id: &str, authed: bool) -> GatewayResult<StudySetWithContainer> {
        let procedure = if authed { "studySets.byId" } else { "studySets.getPublic" };
        self.query(procedure, &id).await
    }

    async fn put_studiable_term(&self, input: PutStudiableTerm) -> GatewayResult<()> {
        let _: Value = self.mutation("studiableTerms.put", &input).await?;
        Ok(())
    }

    async fn recent(&self, kind: EntityKind, exclude: &[String]) -> GatewayResult<Vec<RecentEntity>> {
        let mut entities: Vec<RecentEntity> = self
            .query(Self::kind_procedure(kind), &json!({ "exclude": exclude }))
            .await?;
        for entity in &mut entities {
            entity.kind = kind;
        }
        Ok(entities)
    }

    async fn edit_term(&self, input: EditTerm) -> GatewayResult<()> {
        let _: Value = self.mutation("terms.edit", &input).await?;
        Ok(())
    }

    async fn add_class_entities(
        &self,
        class_id: &str,
        kind: EntityKind,
        entities: &[String],
    ) -> GatewayResult<()> {
        let input = json!({ "id": class_id, "type": kind, "entities": entities });
        let _: Value = self.mutation("classes.addEntities", &input).await?;
        Ok(())
    }

    async fn remove_class_entity(
        &self,
        class_id: &str,
        kind: EntityKind,
        entity_id: &str,
    ) -> GatewayResult<()> {
        let input = json!({ "id": class_id, "type": kind, "entityId": entity_id });
        let _: Value = self.mutation("classes.removeEntity", &input).await?;
        Ok(())
    }

    async fn get_whitelist(&self) -> GatewayResult<Whitelist> {
        self.query("admin.getWhitelist", &Value::Null).await
    }

    async fn whitelist_email(&self, email: &str, delete: bool) -> GatewayResult<()> {
        super::validate_email(email)?;
        let input = json!({ "email": email, "delete": delete });
        let _: Value = self.mutation("admin.whitelistEmail", &input).await?;
        Ok(())
    }

    async fn allow_failed_login(&self, email: &str, allow: bool) -> GatewayResult<()> {
        let input = json!({ "email": email, "allow": allow });
        let _: Value = self.mutation("admin.allowFailedLogin", &input).await?;
        Ok(())
    }

    async fn set_enabled_flags(&self, user_id: &str, flags: EnabledFeatures) -> GatewayResult<()> {
        let input = json!({ "userId": user_id, "flags": flags.bits() });
        let _: Value = self.mutation("admin.setEnabledFlags", &input).await?;
        Ok(())
    }

    async fn viewer_flags(&self) -> GatewayResult<EnabledFeatures> {
        if !self.signed_in {
            return Ok(EnabledFeatures::empty());
        }
        let user: Option<SessionUser> = self.query("user.me", &Value::Null).await?;
        Ok(user.map(|u| u.flags).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_uses_trpc_status() {
        let body = r#"{"error":{"json":{"message":"Set not found","code":-32004,"data":{"code":"NOT_FOUND","httpStatus":404}}}}"#;
        let err = error_from_body(StatusCode::NOT_FOUND, body);
        assert_eq!(err, GatewayError::NotFound("Set not found".into()));

        let body = r#"{"error":{"json":{"message":"private","code":-32003,"data":{"code":"FORBIDDEN","httpStatus":403}}}}"#;
        let err = error_from_body(StatusCode::OK, body);
        assert_eq!(err, GatewayError::Forbidden("private".into()));
    }

    #[test]
    fn test_error_body_falls_back_to_status() {
        let err = error_from_body(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(
            err,
            GatewayError::Server {
                status: 502,
                message: "upstream down".into()
            }
        );
    }

    #[test]
    fn test_success_envelope_decodes() {
        let body = r#"{"result":{"data":{"json":{"id":"s","userId":"u","createdAt":"2024-01-01T00:00:00Z","title":"T","terms":[]}}}}"#;
        let envelope: SuccessEnvelope<StudySetWithContainer> = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.result.data.json.set.title, "T");
    }

    #[test]
    fn test_rejects_non_http_url() {
        let config = ClientConfig {
            base_url: "ftp://example.com".into(),
            ..ClientConfig::default()
        };
        assert!(matches!(HttpGateway::new(&config), Err(GatewayError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let config = ClientConfig {
            base_url: "http://127.0.0.1:9".into(),
            connect_timeout_secs: 1,
            request_timeout_secs: 1,
            ..ClientConfig::default()
        };
        let gateway = HttpGateway::new(&config).unwrap();
        let err = gateway.fetch_study_set("set", false).await.unwrap_err();
        assert!(matches!(err, GatewayError::Network(_)));
    }
}
