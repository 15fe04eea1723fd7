//! Backend collaborator surface.
//!
//! The hosted auth/storage backend is consumed, never implemented, by this
//! workspace. The [`Backend`] trait is the seam: [`http::HttpBackend`] talks
//! to the real service, [`mock::MockBackend`] drives tests.

use std::future::Future;

pub mod error;
pub mod http;
pub mod mock;
pub mod types;

pub use error::{BackendError, BackendResult};
pub use http::HttpBackend;
pub use mock::MockBackend;
pub use types::{ApiMethod, ApiRequest, AuthSession, ChatMessage, Identity, SessionTokens};

/// Operations the core depends on. Futures are required to be `Send` so
/// callers generic over the backend can run inside spawned tasks.
pub trait Backend: Send + Sync + 'static {
    /// Exchange credentials for a fresh token pair plus the user snapshot.
    fn login(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = BackendResult<AuthSession>> + Send;

    /// Trade a refresh token for a new token pair. Most token schemes revoke
    /// the old refresh token on use, so this must be called at most once per
    /// stored pair.
    fn refresh_session(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = BackendResult<AuthSession>> + Send;

    /// Invalidate the session server-side.
    fn sign_out(&self, access_token: &str) -> impl Future<Output = BackendResult<()>> + Send;

    /// Resolve a bearer token to the identity it authorizes.
    fn verify_token(&self, token: &str) -> impl Future<Output = BackendResult<Identity>> + Send;

    /// Durably store a chat message; the backend assigns id and timestamp.
    fn persist_message(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> impl Future<Output = BackendResult<ChatMessage>> + Send;

    /// Issue an arbitrary request/response call, optionally authenticated.
    fn execute(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> impl Future<Output = BackendResult<serde_json::Value>> + Send;
}
