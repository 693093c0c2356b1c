//! Application-level configuration loading, including session timing knobs.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PINQUIZ_BACK_CONFIG_PATH";

/// Number of digits in a session PIN.
pub const PIN_LENGTH: u32 = 6;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// How many random PINs to try before giving up on allocation.
    pub pin_allocation_retries: u32,
    /// Time-to-live applied to session state in the store.
    pub session_ttl: Duration,
    /// How long the host may stay silent before the session is torn down.
    pub host_idle_timeout: Duration,
    /// How long a finished session lingers before its PIN is released.
    pub finished_grace: Duration,
    /// Interval of the per-session housekeeping tick.
    pub engine_tick: Duration,
    /// Upper bound on joined players per session.
    pub max_players: usize,
    /// Bearer keys accepted for session creation. Empty disables the check.
    pub host_api_keys: Vec<String>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded configuration");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Whether the supplied bearer key authorizes session creation.
    pub fn accepts_host_key(&self, key: Option<&str>) -> bool {
        if self.host_api_keys.is_empty() {
            return true;
        }
        key.is_some_and(|candidate| self.host_api_keys.iter().any(|known| known == candidate))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pin_allocation_retries: 32,
            session_ttl: Duration::from_secs(2 * 60 * 60),
            host_idle_timeout: Duration::from_secs(90),
            finished_grace: Duration::from_secs(60),
            engine_tick: Duration::from_secs(15),
            max_players: 200,
            host_api_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    pin_allocation_retries: Option<u32>,
    session_ttl_secs: Option<u64>,
    host_idle_timeout_secs: Option<u64>,
    finished_grace_secs: Option<u64>,
    engine_tick_secs: Option<u64>,
    max_players: Option<usize>,
    #[serde(default)]
    host_api_keys: Vec<String>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            pin_allocation_retries: value
                .pin_allocation_retries
                .unwrap_or(defaults.pin_allocation_retries),
            session_ttl: value
                .session_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_ttl),
            host_idle_timeout: value
                .host_idle_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.host_idle_timeout),
            finished_grace: value
                .finished_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.finished_grace),
            engine_tick: value
                .engine_tick_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.engine_tick),
            max_players: value.max_players.unwrap_or(defaults.max_players),
            host_api_keys: value.host_api_keys,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert!(config.pin_allocation_retries > 0);
        assert!(config.host_idle_timeout < config.session_ttl);
        assert!(config.accepts_host_key(None));
    }

    #[test]
    fn host_key_check_enforced_when_configured() {
        let config = AppConfig {
            host_api_keys: vec!["sekrit".into()],
            ..AppConfig::default()
        };
        assert!(config.accepts_host_key(Some("sekrit")));
        assert!(!config.accepts_host_key(Some("other")));
        assert!(!config.accepts_host_key(None));
    }

    #[test]
    fn partial_raw_config_keeps_defaults() {
        let raw: RawConfig = serde_json::from_str(r#"{"session_ttl_secs": 600}"#).unwrap();
        let config: AppConfig = raw.into();
        assert_eq!(config.session_ttl, Duration::from_secs(600));
        assert_eq!(config.max_players, AppConfig::default().max_players);
    }
}
