//! Session client: bearer attachment and one-shot refresh-and-retry.

use materna_backend::{ApiRequest, Backend, BackendError, Identity, SessionTokens};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::store::TokenStore;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("token storage error: {0}")]
    Storage(#[from] std::io::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Wraps outbound calls to the backend. Owns the Authorization header: a
/// caller never supplies its own bearer token.
///
/// A call that comes back unauthorized triggers at most one refresh of the
/// stored token pair; concurrent unauthorized calls collapse into a single
/// refresh through `refresh_gate` and then retry (or fail) together.
pub struct SessionClient<B> {
    backend: B,
    store: TokenStore,
    refresh_gate: Mutex<()>,
}

impl<B: Backend> SessionClient<B> {
    pub fn new(backend: B, store: TokenStore) -> Self {
        Self {
            backend,
            store,
            refresh_gate: Mutex::new(()),
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.store.tokens().await.is_some()
    }

    /// The cached identity snapshot. Optimistic-UI data only; superseded by
    /// any server response.
    pub async fn current_user(&self) -> Option<Identity> {
        self.store.user().await
    }

    /// Exchange credentials for a session. Tokens are persisted before they
    /// are used for any subsequent call.
    pub async fn login(&self, email: &str, password: &str) -> SessionResult<Identity> {
        let session = self.backend.login(email, password).await?;
        self.store
            .replace(session.tokens, session.user.clone())
            .await?;
        debug!(user = %session.user.id, "login succeeded");
        Ok(session.user)
    }

    /// Invalidate the session server-side (best effort) and clear local
    /// storage. Storage is cleared even when the backend call fails.
    pub async fn logout(&self) -> SessionResult<()> {
        if let Some(tokens) = self.store.tokens().await {
            if let Err(err) = self.backend.sign_out(&tokens.access_token).await {
                warn!(%err, "server-side sign-out failed, clearing local session anyway");
            }
        }
        self.store.clear().await?;
        Ok(())
    }

    /// Issue a request with the current bearer token. On an unauthorized
    /// response with a refresh token present, refresh once and retry the
    /// original request exactly once; the retry's outcome is final.
    pub async fn request(&self, request: ApiRequest) -> SessionResult<serde_json::Value> {
        let tokens = self.store.tokens().await;
        let bearer = tokens.as_ref().map(|t| t.access_token.as_str());

        match self.backend.execute(&request, bearer).await {
            Ok(value) => Ok(value),
            Err(BackendError::Unauthorized) => match tokens {
                Some(stale) => self.retry_after_refresh(&request, &stale).await,
                None => Err(BackendError::Unauthorized.into()),
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Single-flight refresh. The first caller through the gate performs the
    /// refresh; everyone queued behind it observes the replaced (or cleared)
    /// token pair and retries or fails without touching the backend again.
    async fn retry_after_refresh(
        &self,
        request: &ApiRequest,
        stale: &SessionTokens,
    ) -> SessionResult<serde_json::Value> {
        let gate = self.refresh_gate.lock().await;

        let fresh = match self.store.tokens().await {
            // A refresh already failed and cleared the session.
            None => return Err(BackendError::Unauthorized.into()),
            // Another caller refreshed while we waited for the gate.
            Some(current) if current.access_token != stale.access_token => current,
            Some(current) => match self.backend.refresh_session(&current.refresh_token).await {
                Ok(session) => {
                    self.store
                        .replace(session.tokens.clone(), session.user)
                        .await?;
                    debug!("session refreshed after unauthorized response");
                    session.tokens
                }
                Err(err) => {
                    warn!(%err, "token refresh failed, clearing session");
                    self.store.clear().await?;
                    return Err(BackendError::Unauthorized.into());
                }
            },
        };
        drop(gate);

        self.backend
            .execute(request, Some(&fresh.access_token))
            .await
            .map_err(Into::into)
    }
}
