//! In-memory backend used by tests.
//!
//! Behaviour is scripted per test: register users and tokens, stage refresh
//! outcomes, toggle persistence failures, and inspect call counts afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{BackendError, BackendResult};
use crate::types::{ApiMethod, ApiRequest, AuthSession, ChatMessage, Identity, SessionTokens};
use crate::Backend;

#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<MockInner>,
}

#[derive(Default)]
struct MockInner {
    state: RwLock<MockState>,
    refresh_calls: AtomicUsize,
    persist_calls: AtomicUsize,
}

#[derive(Default)]
struct MockState {
    /// email -> (password, identity)
    users: HashMap<String, (String, Identity)>,
    /// valid access token -> identity
    tokens: HashMap<String, Identity>,
    /// refresh token -> staged outcome; `None` means auto-mint a session for
    /// the identity that logged in with it
    refresh_tokens: HashMap<String, Option<AuthSession>>,
    /// identity behind auto-mint refresh tokens
    refresh_owners: HashMap<String, Identity>,
    /// scripted responses for `execute`
    responses: HashMap<(ApiMethod, String), BackendResult<serde_json::Value>>,
    messages: Vec<ChatMessage>,
    fail_persist: bool,
    persist_delay: Option<Duration>,
    fail_sign_out: bool,
    next_id: u64,
}

impl MockState {
    fn mint_session(&mut self, user: Identity) -> AuthSession {
        self.next_id += 1;
        let access_token = format!("access-{}", self.next_id);
        let refresh_token = format!("refresh-{}", self.next_id);
        self.tokens.insert(access_token.clone(), user.clone());
        self.refresh_tokens.insert(refresh_token.clone(), None);
        self.refresh_owners.insert(refresh_token.clone(), user.clone());
        AuthSession {
            tokens: SessionTokens {
                access_token,
                refresh_token,
                expires_at: None,
            },
            user,
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_user(&self, email: &str, password: &str, identity: Identity) {
        let mut state = self.inner.state.write().await;
        state
            .users
            .insert(email.to_string(), (password.to_string(), identity));
    }

    /// Register an access token as currently valid.
    pub async fn issue_token(&self, token: &str, identity: Identity) {
        let mut state = self.inner.state.write().await;
        state.tokens.insert(token.to_string(), identity);
    }

    pub async fn revoke_token(&self, token: &str) {
        let mut state = self.inner.state.write().await;
        state.tokens.remove(token);
    }

    /// Stage the session a refresh token exchanges into. The new access token
    /// becomes valid once the refresh happens.
    pub async fn stage_refresh(&self, refresh_token: &str, session: AuthSession) {
        let mut state = self.inner.state.write().await;
        state
            .refresh_tokens
            .insert(refresh_token.to_string(), Some(session));
    }

    pub async fn script_response(
        &self,
        method: ApiMethod,
        endpoint: &str,
        result: BackendResult<serde_json::Value>,
    ) {
        let mut state = self.inner.state.write().await;
        state
            .responses
            .insert((method, endpoint.to_string()), result);
    }

    pub async fn set_fail_persist(&self, fail: bool) {
        self.inner.state.write().await.fail_persist = fail;
    }

    pub async fn set_persist_delay(&self, delay: Option<Duration>) {
        self.inner.state.write().await.persist_delay = delay;
    }

    pub async fn set_fail_sign_out(&self, fail: bool) {
        self.inner.state.write().await.fail_sign_out = fail;
    }

    pub fn refresh_calls(&self) -> usize {
        self.inner.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn persist_calls(&self) -> usize {
        self.inner.persist_calls.load(Ordering::SeqCst)
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.inner.state.read().await.messages.clone()
    }

    pub async fn token_is_valid(&self, token: &str) -> bool {
        self.inner.state.read().await.tokens.contains_key(token)
    }
}

impl Backend for MockBackend {
    async fn login(&self, email: &str, password: &str) -> BackendResult<AuthSession> {
        let mut state = self.inner.state.write().await;
        let user = match state.users.get(email) {
            Some((stored, identity)) if stored == password => identity.clone(),
            _ => return Err(BackendError::Unauthorized),
        };
        Ok(state.mint_session(user))
    }

    async fn refresh_session(&self, refresh_token: &str) -> BackendResult<AuthSession> {
        self.inner.refresh_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.inner.state.write().await;
        // Refresh tokens are single use: consume on exchange.
        match state.refresh_tokens.remove(refresh_token) {
            Some(Some(session)) => {
                state
                    .tokens
                    .insert(session.tokens.access_token.clone(), session.user.clone());
                Ok(session)
            }
            Some(None) => {
                let owner = state
                    .refresh_owners
                    .remove(refresh_token)
                    .ok_or(BackendError::Unauthorized)?;
                Ok(state.mint_session(owner))
            }
            None => Err(BackendError::Unauthorized),
        }
    }

    async fn sign_out(&self, access_token: &str) -> BackendResult<()> {
        let mut state = self.inner.state.write().await;
        if state.fail_sign_out {
            return Err(BackendError::Network("connection reset".to_string()));
        }
        state.tokens.remove(access_token);
        Ok(())
    }

    async fn verify_token(&self, token: &str) -> BackendResult<Identity> {
        let state = self.inner.state.read().await;
        state
            .tokens
            .get(token)
            .cloned()
            .ok_or(BackendError::Unauthorized)
    }

    async fn persist_message(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> BackendResult<ChatMessage> {
        self.inner.persist_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.inner.state.read().await.persist_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.state.write().await;
        if state.fail_persist {
            return Err(BackendError::Persistence("write rejected".to_string()));
        }

        state.next_id += 1;
        let message = ChatMessage {
            id: format!("msg-{}", state.next_id),
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            read: false,
        };
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn execute(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> BackendResult<serde_json::Value> {
        let state = self.inner.state.read().await;

        match bearer {
            Some(token) if state.tokens.contains_key(token) => {}
            _ => return Err(BackendError::Unauthorized),
        }

        match state
            .responses
            .get(&(request.method, request.endpoint.clone()))
        {
            Some(result) => result.clone(),
            None => Ok(serde_json::json!({ "ok": true })),
        }
    }
}
