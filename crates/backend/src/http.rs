//! HTTP implementation of the backend collaborator.
//!
//! Talks to the hosted auth/storage service: token grants under `/auth/v1`,
//! table reads/writes under `/rest/v1`.

use chrono::{DateTime, Duration, Utc};
use materna_config::BackendConfig;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::debug;

use crate::error::{BackendError, BackendResult};
use crate::types::{ApiMethod, ApiRequest, AuthSession, ChatMessage, Identity, SessionTokens};
use crate::Backend;

const API_KEY_HEADER: &str = "apikey";

#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> BackendResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent("materna-relay")
            .timeout(std::time::Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|err| BackendError::Network(err.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            if let Ok(value) = HeaderValue::from_str(key) {
                headers.insert(API_KEY_HEADER, value);
            }
        }
        headers
    }

    async fn token_grant(&self, grant_type: &str, body: serde_json::Value) -> BackendResult<AuthSession> {
        let url = format!("{}?grant_type={grant_type}", self.url("auth/v1/token"));
        let response = self
            .http
            .post(&url)
            .headers(self.default_headers())
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, detail));
        }

        let grant: TokenGrantResponse = response.json().await.map_err(network_error)?;
        debug!(user = %grant.user.id, %grant_type, "token grant succeeded");
        Ok(grant.into_session())
    }
}

impl Backend for HttpBackend {
    async fn login(&self, email: &str, password: &str) -> BackendResult<AuthSession> {
        self.token_grant(
            "password",
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    async fn refresh_session(&self, refresh_token: &str) -> BackendResult<AuthSession> {
        self.token_grant(
            "refresh_token",
            serde_json::json!({ "refresh_token": refresh_token }),
        )
        .await
    }

    async fn sign_out(&self, access_token: &str) -> BackendResult<()> {
        let response = self
            .http
            .post(self.url("auth/v1/logout"))
            .headers(self.default_headers())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, detail));
        }
        Ok(())
    }

    async fn verify_token(&self, token: &str) -> BackendResult<Identity> {
        let response = self
            .http
            .get(self.url("auth/v1/user"))
            .headers(self.default_headers())
            .bearer_auth(token)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, detail));
        }

        let user: BackendUser = response.json().await.map_err(network_error)?;
        Ok(user.into_identity())
    }

    async fn persist_message(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> BackendResult<ChatMessage> {
        let response = self
            .http
            .post(self.url("rest/v1/messages"))
            .headers(self.default_headers())
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({
                "room_id": room_id,
                "sender_id": sender_id,
                "content": content,
            }))
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, detail));
        }

        // PostgREST returns the inserted representation as a one-row array.
        let mut rows: Vec<MessageRow> = response.json().await.map_err(network_error)?;
        let row = rows
            .pop()
            .ok_or_else(|| BackendError::Persistence("insert returned no row".to_string()))?;
        Ok(row.into_message())
    }

    async fn execute(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> BackendResult<serde_json::Value> {
        let url = self.url(&request.endpoint);
        let mut builder = match request.method {
            ApiMethod::Get => self.http.get(&url),
            ApiMethod::Post => self.http.post(&url),
            ApiMethod::Patch => self.http.patch(&url),
            ApiMethod::Delete => self.http.delete(&url),
        };

        builder = builder.headers(self.default_headers());
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(network_error)?;

        let status = response.status();
        let text = response.text().await.map_err(network_error)?;
        if !status.is_success() {
            return Err(BackendError::from_status(status, text));
        }

        if text.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|err| BackendError::Validation(format!("malformed response body: {err}")))
    }
}

fn network_error(err: reqwest::Error) -> BackendError {
    BackendError::from(err)
}

#[derive(Debug, Deserialize)]
struct TokenGrantResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    user: BackendUser,
}

impl TokenGrantResponse {
    fn into_session(self) -> AuthSession {
        let expires_at = self
            .expires_in
            .map(|seconds| Utc::now() + Duration::seconds(seconds));
        AuthSession {
            tokens: SessionTokens {
                access_token: self.access_token,
                refresh_token: self.refresh_token,
                expires_at,
            },
            user: self.user.into_identity(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BackendUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    user_metadata: Option<serde_json::Value>,
}

impl BackendUser {
    fn into_identity(self) -> Identity {
        let display_name = self
            .user_metadata
            .as_ref()
            .and_then(|meta| meta.get("display_name"))
            .and_then(|value| value.as_str())
            .map(|value| value.to_string());

        Identity {
            id: self.id,
            email: self.email,
            role: self.role,
            display_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageRow {
    id: String,
    room_id: String,
    sender_id: String,
    content: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    read: bool,
}

impl MessageRow {
    fn into_message(self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            room_id: self.room_id,
            sender_id: self.sender_id,
            content: self.content,
            created_at: self.created_at,
            read: self.read,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HttpBackend {
        HttpBackend::new(&BackendConfig {
            base_url: "https://backend.example.com/".to_string(),
            api_key: Some("anon".to_string()),
            request_timeout_seconds: 5,
        })
        .expect("build backend")
    }

    #[test]
    fn url_join_normalises_slashes() {
        let backend = backend();
        assert_eq!(
            backend.url("/rest/v1/messages"),
            "https://backend.example.com/rest/v1/messages"
        );
        assert_eq!(
            backend.url("auth/v1/user"),
            "https://backend.example.com/auth/v1/user"
        );
    }

    #[test]
    fn api_key_header_is_attached() {
        let backend = backend();
        let headers = backend.default_headers();
        assert_eq!(headers.get(API_KEY_HEADER).unwrap(), "anon");
    }

    #[test]
    fn grant_response_maps_to_session() {
        let grant: TokenGrantResponse = serde_json::from_str(
            r#"{
                "access_token": "acc",
                "refresh_token": "ref",
                "expires_in": 3600,
                "user": {"id": "u1", "email": "m@example.com", "user_metadata": {"display_name": "Mona"}}
            }"#,
        )
        .unwrap();

        let session = grant.into_session();
        assert_eq!(session.tokens.access_token, "acc");
        assert_eq!(session.tokens.refresh_token, "ref");
        assert!(session.tokens.expires_at.is_some());
        assert_eq!(session.user.display_name.as_deref(), Some("Mona"));
    }

    #[test]
    fn message_row_maps_to_chat_message() {
        let row: MessageRow = serde_json::from_str(
            r#"{
                "id": "m1",
                "room_id": "r1",
                "sender_id": "u1",
                "content": "hello",
                "created_at": "2024-05-01T12:00:00Z"
            }"#,
        )
        .unwrap();

        let message = row.into_message();
        assert_eq!(message.id, "m1");
        assert!(!message.read);
    }
}
