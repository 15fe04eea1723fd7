//! Session client behaviour against a scripted mock backend: bearer
//! attachment, refresh-and-retry, single-flight collapsing, and storage side
//! effects.

use std::sync::Arc;

use materna_backend::{
    ApiMethod, ApiRequest, AuthSession, BackendError, Identity, MockBackend, SessionTokens,
};
use materna_session::{SessionClient, SessionError, TokenStore};
use tempfile::TempDir;

fn tokens(access: &str, refresh: &str) -> SessionTokens {
    SessionTokens {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        expires_at: None,
    }
}

fn session(access: &str, refresh: &str, user: &str) -> AuthSession {
    AuthSession {
        tokens: tokens(access, refresh),
        user: Identity::new(user),
    }
}

async fn client_with_tokens(
    backend: &MockBackend,
    access: &str,
    refresh: &str,
) -> (SessionClient<MockBackend>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = TokenStore::open(dir.path().join("session.json"));
    store
        .replace(tokens(access, refresh), Identity::new("u1"))
        .await
        .unwrap();
    (SessionClient::new(backend.clone(), store), dir)
}

#[tokio::test]
async fn request_attaches_bearer_token() {
    let backend = MockBackend::new();
    backend.issue_token("valid", Identity::new("u1")).await;
    let (client, _dir) = client_with_tokens(&backend, "valid", "r0").await;

    let value = client
        .request(ApiRequest::get("rest/v1/profiles"))
        .await
        .unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(backend.refresh_calls(), 0);
}

#[tokio::test]
async fn unauthorized_refreshes_once_and_retries() {
    let backend = MockBackend::new();
    backend
        .stage_refresh("r0", session("fresh", "r1", "u1"))
        .await;
    let (client, _dir) = client_with_tokens(&backend, "stale", "r0").await;

    let value = client
        .request(ApiRequest::get("rest/v1/profiles"))
        .await
        .unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(backend.refresh_calls(), 1);
}

#[tokio::test]
async fn refresh_replaces_both_tokens_and_persists() {
    let backend = MockBackend::new();
    backend
        .stage_refresh("r0", session("fresh", "r1", "u1"))
        .await;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("session.json");
    let store = TokenStore::open(&path);
    store
        .replace(tokens("stale", "r0"), Identity::new("u1"))
        .await
        .unwrap();
    let client = SessionClient::new(backend.clone(), store);

    client
        .request(ApiRequest::get("rest/v1/profiles"))
        .await
        .unwrap();

    // Both tokens replaced as a unit, and durable across a restart.
    let reopened = TokenStore::open(&path);
    let restored = reopened.tokens().await.unwrap();
    assert_eq!(restored.access_token, "fresh");
    assert_eq!(restored.refresh_token, "r1");
}

#[tokio::test]
async fn failed_refresh_clears_session_and_reports_unauthorized() {
    let backend = MockBackend::new();
    // No staged refresh: the exchange is rejected.
    let (client, _dir) = client_with_tokens(&backend, "stale", "r0").await;

    let err = client
        .request(ApiRequest::get("rest/v1/profiles"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Backend(BackendError::Unauthorized)
    ));
    assert!(!client.is_authenticated().await);
    assert!(client.current_user().await.is_none());
    assert_eq!(backend.refresh_calls(), 1);
}

#[tokio::test]
async fn concurrent_unauthorized_calls_share_one_refresh() {
    let backend = MockBackend::new();
    backend
        .stage_refresh("r0", session("fresh", "r1", "u1"))
        .await;
    let (client, _dir) = client_with_tokens(&backend, "stale", "r0").await;
    let client = Arc::new(client);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            client.request(ApiRequest::get("rest/v1/profiles")).await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }
    assert_eq!(backend.refresh_calls(), 1);
}

#[tokio::test]
async fn concurrent_calls_all_fail_when_refresh_fails() {
    let backend = MockBackend::new();
    let (client, _dir) = client_with_tokens(&backend, "stale", "r0").await;
    let client = Arc::new(client);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            client.request(ApiRequest::get("rest/v1/profiles")).await
        }));
    }

    // Never a mix: every call reports the original unauthorized failure.
    for handle in handles {
        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(SessionError::Backend(BackendError::Unauthorized))
        ));
    }
    assert_eq!(backend.refresh_calls(), 1);
}

#[tokio::test]
async fn network_errors_are_not_conflated_with_unauthorized() {
    let backend = MockBackend::new();
    backend.issue_token("valid", Identity::new("u1")).await;
    backend
        .script_response(
            ApiMethod::Get,
            "rest/v1/profiles",
            Err(BackendError::Network("connection refused".to_string())),
        )
        .await;
    let (client, _dir) = client_with_tokens(&backend, "valid", "r0").await;

    let err = client
        .request(ApiRequest::get("rest/v1/profiles"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Backend(BackendError::Network(_))
    ));
    // A transport failure must not consume the refresh token.
    assert_eq!(backend.refresh_calls(), 0);
    assert!(client.is_authenticated().await);
}

#[tokio::test]
async fn unauthenticated_request_fails_without_refresh() {
    let backend = MockBackend::new();
    let dir = TempDir::new().unwrap();
    let store = TokenStore::open(dir.path().join("session.json"));
    let client = SessionClient::new(backend.clone(), store);

    let err = client
        .request(ApiRequest::get("rest/v1/profiles"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Backend(BackendError::Unauthorized)
    ));
    assert_eq!(backend.refresh_calls(), 0);
}

#[tokio::test]
async fn login_persists_session_before_use() {
    let backend = MockBackend::new();
    backend
        .register_user("m@example.com", "pw", Identity::new("u1"))
        .await;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("session.json");
    let client = SessionClient::new(backend.clone(), TokenStore::open(&path));

    let user = client.login("m@example.com", "pw").await.unwrap();
    assert_eq!(user.id, "u1");
    assert!(client.is_authenticated().await);
    assert_eq!(client.current_user().await.unwrap().id, "u1");

    // A second client sees the persisted session.
    let restarted = SessionClient::new(backend.clone(), TokenStore::open(&path));
    assert!(restarted.is_authenticated().await);
}

#[tokio::test]
async fn login_with_bad_credentials_does_not_create_session() {
    let backend = MockBackend::new();
    backend
        .register_user("m@example.com", "pw", Identity::new("u1"))
        .await;

    let dir = TempDir::new().unwrap();
    let client = SessionClient::new(backend.clone(), TokenStore::open(dir.path().join("s.json")));

    let err = client.login("m@example.com", "wrong").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Backend(BackendError::Unauthorized)
    ));
    assert!(!client.is_authenticated().await);
}

#[tokio::test]
async fn logout_clears_storage_even_when_backend_fails() {
    let backend = MockBackend::new();
    backend.set_fail_sign_out(true).await;
    let (client, dir) = client_with_tokens(&backend, "valid", "r0").await;

    client.logout().await.unwrap();
    assert!(!client.is_authenticated().await);
    assert!(!dir.path().join("session.json").exists());
}
