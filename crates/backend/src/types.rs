//! Shared data model for the session client and the relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access/refresh token pair. Always replaced as a unit; never partially
/// updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Denormalized view of the authenticated identity. Cached for optimistic UI,
/// always superseded by server responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            role: None,
            display_name: None,
        }
    }
}

/// Outcome of a successful login or refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub tokens: SessionTokens,
    pub user: Identity,
}

/// A persisted chat message. The id and timestamp are assigned by the backend
/// at persistence time, never by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl ApiMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiMethod::Get => "GET",
            ApiMethod::Post => "POST",
            ApiMethod::Patch => "PATCH",
            ApiMethod::Delete => "DELETE",
        }
    }
}

/// A request/response call against the backend's data surface. Callers never
/// supply their own Authorization header; the session client owns that.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub endpoint: String,
    pub method: ApiMethod,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: ApiMethod::Get,
            body: None,
        }
    }

    pub fn post(endpoint: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: ApiMethod::Post,
            body: Some(body),
        }
    }
}
