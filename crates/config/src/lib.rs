use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "materna.toml",
    "config/materna.toml",
    "crates/config/materna.toml",
    "../materna.toml",
    "../config/materna.toml",
    "../crates/config/materna.toml",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub backend: BackendConfig,
    pub relay: RelayConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

/// Connection settings for the hosted auth/storage backend the relay and
/// session client talk to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "BackendConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl BackendConfig {
    const fn default_request_timeout() -> u64 {
        30
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:54321".to_string(),
            api_key: None,
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Upper bound on a single message-persistence call. A write that has not
    /// completed within this window is reported to the sender as failed.
    #[serde(default = "RelayConfig::default_persist_timeout")]
    pub persist_timeout_seconds: u64,
    /// Depth of each connection's outbound event queue.
    #[serde(default = "RelayConfig::default_send_queue_depth")]
    pub send_queue_depth: usize,
}

impl RelayConfig {
    const fn default_persist_timeout() -> u64 {
        10
    }

    const fn default_send_queue_depth() -> usize {
        100
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            persist_timeout_seconds: Self::default_persist_timeout(),
            send_queue_depth: Self::default_send_queue_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Where the session client persists its token pair between restarts.
    pub store_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_path: ".materna/session.json".to_string(),
        }
    }
}

/// Load the application configuration by combining defaults, an optional TOML
/// file, and environment overrides.
///
/// ```
/// use materna_config::load;
///
/// std::env::remove_var("MATERNA_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.http.address.is_empty());
/// assert_eq!(config.relay.persist_timeout_seconds, 10);
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder();
    builder = builder
        .set_default("http.address", defaults.http.address.clone())
        .unwrap()
        .set_default("http.port", i64::from(defaults.http.port))
        .unwrap()
        .set_default("backend.base_url", defaults.backend.base_url.clone())
        .unwrap()
        .set_default(
            "backend.request_timeout_seconds",
            i64::try_from(defaults.backend.request_timeout_seconds).unwrap_or(i64::MAX),
        )
        .unwrap()
        .set_default(
            "relay.persist_timeout_seconds",
            i64::try_from(defaults.relay.persist_timeout_seconds).unwrap_or(i64::MAX),
        )
        .unwrap()
        .set_default(
            "relay.send_queue_depth",
            i64::try_from(defaults.relay.send_queue_depth).unwrap_or(i64::MAX),
        )
        .unwrap()
        .set_default("session.store_path", defaults.session.store_path.clone())
        .unwrap();

    let environment_overrides = config::Environment::with_prefix("MATERNA").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("MATERNA_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via MATERNA_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    debug!(?config, "loaded relay configuration");
    Ok(config)
}
