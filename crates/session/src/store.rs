//! Durable token storage.
//!
//! A versioned JSON file with owner-only permissions. An unreadable or
//! version-mismatched file is treated as "no session", never as an error.

use std::io;
use std::path::{Path, PathBuf};

use materna_backend::{Identity, SessionTokens};
use materna_config::SessionConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSession {
    version: u32,
    tokens: SessionTokens,
    #[serde(default)]
    user: Option<Identity>,
}

pub struct TokenStore {
    path: PathBuf,
    state: RwLock<Option<StoredSession>>,
}

impl TokenStore {
    /// Open a store at `path`, loading any session persisted by a previous
    /// run.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = RwLock::new(load_session(&path));
        Self { path, state }
    }

    /// Open the store at the configured path.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::open(&config.store_path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn tokens(&self) -> Option<SessionTokens> {
        self.state.read().await.as_ref().map(|s| s.tokens.clone())
    }

    pub async fn user(&self) -> Option<Identity> {
        self.state.read().await.as_ref().and_then(|s| s.user.clone())
    }

    /// Replace both tokens and the cached user as a unit. The file is written
    /// before the in-memory copy is swapped, so a crash between the two never
    /// leaves newer tokens only in memory.
    pub async fn replace(&self, tokens: SessionTokens, user: Identity) -> io::Result<()> {
        let session = StoredSession {
            version: STORE_VERSION,
            tokens,
            user: Some(user),
        };

        let mut state = self.state.write().await;
        write_session(&self.path, &session)?;
        *state = Some(session);
        Ok(())
    }

    /// Drop the session from disk and memory.
    pub async fn clear(&self) -> io::Result<()> {
        let mut state = self.state.write().await;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        *state = None;
        Ok(())
    }
}

fn load_session(path: &Path) -> Option<StoredSession> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to read session store");
            return None;
        }
    };

    match serde_json::from_str::<StoredSession>(&data) {
        Ok(session) if session.version == STORE_VERSION => Some(session),
        Ok(session) => {
            warn!(version = session.version, "unsupported session store version");
            None
        }
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to parse session store");
            None
        }
    }
}

fn write_session(path: &Path, session: &StoredSession) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(session)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    std::fs::write(path, &json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        let _ = std::fs::set_permissions(path, perms);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tokens(access: &str, refresh: &str) -> SessionTokens {
        SessionTokens {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn replace_then_reopen_restores_session() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");

        let store = TokenStore::open(&path);
        assert!(store.tokens().await.is_none());

        store
            .replace(tokens("acc", "ref"), Identity::new("u1"))
            .await
            .unwrap();

        let reopened = TokenStore::open(&path);
        let restored = reopened.tokens().await.unwrap();
        assert_eq!(restored.access_token, "acc");
        assert_eq!(restored.refresh_token, "ref");
        assert_eq!(reopened.user().await.unwrap().id, "u1");
    }

    #[tokio::test]
    async fn clear_removes_file_and_memory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");

        let store = TokenStore::open(&path);
        store
            .replace(tokens("acc", "ref"), Identity::new("u1"))
            .await
            .unwrap();
        assert!(path.exists());

        store.clear().await.unwrap();
        assert!(!path.exists());
        assert!(store.tokens().await.is_none());

        // Clearing an already-empty store is a no-op.
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_is_treated_as_no_session() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();

        let store = TokenStore::open(&path);
        assert!(store.tokens().await.is_none());
    }

    #[tokio::test]
    async fn version_mismatch_is_treated_as_no_session() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(
            &path,
            r#"{"version":99,"tokens":{"accessToken":"a","refreshToken":"r"}}"#,
        )
        .unwrap();

        let store = TokenStore::open(&path);
        assert!(store.tokens().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn store_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");

        let store = TokenStore::open(&path);
        store
            .replace(tokens("acc", "ref"), Identity::new("u1"))
            .await
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn opens_at_the_configured_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let config = SessionConfig {
            store_path: path.display().to_string(),
        };

        let store = TokenStore::from_config(&config);
        store
            .replace(tokens("acc", "ref"), Identity::new("u1"))
            .await
            .unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path);
    }

    #[tokio::test]
    async fn parent_directories_are_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("dir").join("session.json");

        let store = TokenStore::open(&path);
        store
            .replace(tokens("acc", "ref"), Identity::new("u1"))
            .await
            .unwrap();
        assert!(path.exists());
    }
}
