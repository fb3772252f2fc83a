//! Configuration loaded from environment variables, and candidate lists.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use outbox_core::normalize_relay_url;

use crate::discovery::DiscoveryConfig;
use crate::error::{Error, Result};
use crate::relay::OrchestratorConfig;

/// Well-known indexer relays queried when no candidates are given.
pub const DEFAULT_INDEXERS: &[&str] = &[
    "wss://purplepag.es",
    "wss://relay.nostr.band",
    "wss://user.kindpag.es",
    "wss://indexer.coracle.social",
    "wss://relay.damus.io",
    "wss://relay.primal.net",
    "wss://nos.lol",
];

/// Parse an optional environment variable.
fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={:?}: {}", key, value, e))),
        _ => Ok(None),
    }
}

fn env_secs(key: &str) -> Result<Option<Duration>> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_secs))
}

fn env_flag(key: &str) -> Result<Option<bool>> {
    match std::env::var(key) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
            other => Err(Error::Config(format!("{}={:?}: not a boolean", key, other))),
        },
        Err(_) => Ok(None),
    }
}

impl DiscoveryConfig {
    /// Load configuration from environment variables over the defaults.
    ///
    /// Optional:
    /// - `OUTBOX_BATCH_SIZE`: Endpoints per batch (default: 5)
    /// - `OUTBOX_ATTEMPT_TIMEOUT_SECS`: Per-endpoint deadline (default: 8)
    /// - `OUTBOX_SESSION_TIMEOUT_SECS`: Ceiling for a whole session (default: 60)
    /// - `OUTBOX_PUBLISH_TIMEOUT_SECS`: Per-endpoint republish deadline (default: 8)
    /// - `OUTBOX_MIN_LATEST_SUPPORT`: Outlier rule, latest group support (default: 2)
    /// - `OUTBOX_MAX_OUTLIER_SUPPORT`: Outlier rule, group support (default: 1)
    /// - `OUTBOX_ALLOW_ONION`: Accept .onion candidates (default: false)
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(batch_size) = env_parse::<usize>("OUTBOX_BATCH_SIZE")? {
            if batch_size == 0 {
                return Err(Error::Config("OUTBOX_BATCH_SIZE must be at least 1".to_string()));
            }
            config.batch_size = batch_size;
        }
        if let Some(timeout) = env_secs("OUTBOX_ATTEMPT_TIMEOUT_SECS")? {
            config.attempt_timeout = timeout;
        }
        if let Some(timeout) = env_secs("OUTBOX_SESSION_TIMEOUT_SECS")? {
            config.session_timeout = timeout;
        }
        if let Some(timeout) = env_secs("OUTBOX_PUBLISH_TIMEOUT_SECS")? {
            config.publish_timeout = timeout;
        }
        if let Some(n) = env_parse("OUTBOX_MIN_LATEST_SUPPORT")? {
            config.outliers.min_latest_support = n;
        }
        if let Some(n) = env_parse("OUTBOX_MAX_OUTLIER_SUPPORT")? {
            config.outliers.max_outlier_support = n;
        }
        if let Some(allow) = env_flag("OUTBOX_ALLOW_ONION")? {
            config.normalize.allow_onion = allow;
        }

        tracing::debug!(
            batch_size = config.batch_size,
            attempt_timeout = ?config.attempt_timeout,
            session_timeout = ?config.session_timeout,
            "discovery configuration loaded"
        );
        Ok(config)
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables over the defaults.
    ///
    /// Optional:
    /// - `OUTBOX_CONNECT_TIMEOUT_SECS`: Connect/handshake deadline (default: 10)
    /// - `OUTBOX_IDLE_TIMEOUT_SECS`: Idle link cutoff (default: 300)
    /// - `OUTBOX_STATUS_CHANNEL_CAPACITY`: Status feed buffer (default: 1024)
    /// - `OUTBOX_ALLOW_ONION`: Accept .onion endpoints (default: false)
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(timeout) = env_secs("OUTBOX_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = timeout;
        }
        if let Some(timeout) = env_secs("OUTBOX_IDLE_TIMEOUT_SECS")? {
            config.idle_timeout = timeout;
        }
        if let Some(capacity) = env_parse::<usize>("OUTBOX_STATUS_CHANNEL_CAPACITY")? {
            config.status_channel_capacity = capacity.max(1);
        }
        if let Some(allow) = env_flag("OUTBOX_ALLOW_ONION")? {
            config.normalize.allow_onion = allow;
        }

        Ok(config)
    }
}

/// Split a comma-separated candidate list, skipping blanks.
pub fn parse_candidate_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load candidate URLs from a JSON file with a `functioning_relays` array.
///
/// Invalid and blocked URLs are skipped; order is preserved.
pub fn load_candidates_from_json(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        Error::Io(std::io::Error::other(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        )))
    })?;

    let json: serde_json::Value = serde_json::from_str(&contents)?;
    let relays = json
        .get("functioning_relays")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::Config("JSON missing 'functioning_relays' array".to_string()))?;

    let urls: Vec<String> = relays
        .iter()
        .filter_map(|relay| relay.as_str())
        .filter_map(|url| normalize_relay_url(url).ok())
        .collect();

    tracing::info!("Loaded {} candidate relays from {}", urls.len(), path.display());
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    /// Mutex to serialize config tests that manipulate env vars.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "OUTBOX_BATCH_SIZE",
        "OUTBOX_ATTEMPT_TIMEOUT_SECS",
        "OUTBOX_SESSION_TIMEOUT_SECS",
        "OUTBOX_PUBLISH_TIMEOUT_SECS",
        "OUTBOX_MIN_LATEST_SUPPORT",
        "OUTBOX_MAX_OUTLIER_SUPPORT",
        "OUTBOX_ALLOW_ONION",
        "OUTBOX_CONNECT_TIMEOUT_SECS",
        "OUTBOX_IDLE_TIMEOUT_SECS",
        "OUTBOX_STATUS_CHANNEL_CAPACITY",
    ];

    /// Helper to run config tests with isolated env vars.
    fn with_env_vars<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());

        let saved: Vec<_> = ENV_KEYS
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        // SAFETY: Serialized by mutex; only test code touches these vars.
        unsafe {
            for k in ENV_KEYS {
                std::env::remove_var(k);
            }
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
        }

        f();

        // SAFETY: Restoring original env state.
        unsafe {
            for (k, v) in &saved {
                match v {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    // =========================================================================
    // Environment
    // =========================================================================

    #[test]
    fn discovery_defaults() {
        with_env_vars(&[], || {
            let config = DiscoveryConfig::from_env().unwrap();
            assert_eq!(config.batch_size, 5);
            assert_eq!(config.attempt_timeout, Duration::from_secs(8));
            assert_eq!(config.session_timeout, Duration::from_secs(60));
            assert_eq!(config.outliers.min_latest_support, 2);
            assert_eq!(config.outliers.max_outlier_support, 1);
            assert!(!config.normalize.allow_onion);
        });
    }

    #[test]
    fn discovery_overrides() {
        with_env_vars(
            &[
                ("OUTBOX_BATCH_SIZE", "10"),
                ("OUTBOX_ATTEMPT_TIMEOUT_SECS", "3"),
                ("OUTBOX_SESSION_TIMEOUT_SECS", " 30 "),
                ("OUTBOX_MAX_OUTLIER_SUPPORT", "2"),
                ("OUTBOX_ALLOW_ONION", "yes"),
            ],
            || {
                let config = DiscoveryConfig::from_env().unwrap();
                assert_eq!(config.batch_size, 10);
                assert_eq!(config.attempt_timeout, Duration::from_secs(3));
                assert_eq!(config.session_timeout, Duration::from_secs(30));
                assert_eq!(config.outliers.max_outlier_support, 2);
                assert!(config.normalize.allow_onion);
            },
        );
    }

    #[test]
    fn discovery_rejects_bad_values() {
        with_env_vars(&[("OUTBOX_BATCH_SIZE", "0")], || {
            assert!(matches!(DiscoveryConfig::from_env(), Err(Error::Config(_))));
        });
        with_env_vars(&[("OUTBOX_ATTEMPT_TIMEOUT_SECS", "soon")], || {
            assert!(matches!(DiscoveryConfig::from_env(), Err(Error::Config(_))));
        });
        with_env_vars(&[("OUTBOX_ALLOW_ONION", "maybe")], || {
            assert!(matches!(DiscoveryConfig::from_env(), Err(Error::Config(_))));
        });
    }

    #[test]
    fn orchestrator_overrides() {
        with_env_vars(
            &[
                ("OUTBOX_CONNECT_TIMEOUT_SECS", "4"),
                ("OUTBOX_IDLE_TIMEOUT_SECS", "60"),
            ],
            || {
                let config = OrchestratorConfig::from_env().unwrap();
                assert_eq!(config.connect_timeout, Duration::from_secs(4));
                assert_eq!(config.idle_timeout, Duration::from_secs(60));
                assert_eq!(config.status_channel_capacity, 1024);
            },
        );
    }

    // =========================================================================
    // Candidate lists
    // =========================================================================

    #[test]
    fn candidate_list_parsing() {
        assert_eq!(
            parse_candidate_list(" wss://a.example.com, ,wss://b.example.com,"),
            vec!["wss://a.example.com", "wss://b.example.com"]
        );
        assert!(parse_candidate_list("").is_empty());
    }

    #[test]
    fn candidates_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"functioning_relays": ["wss://a.example.com/", "ws://localhost", "relay.b.example.com", 7]}}"#
        )
        .unwrap();

        let urls = load_candidates_from_json(file.path()).unwrap();
        assert_eq!(urls, vec!["wss://a.example.com", "wss://relay.b.example.com"]);
    }

    #[test]
    fn candidates_from_json_missing_array() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"relays": []}}"#).unwrap();
        assert!(matches!(
            load_candidates_from_json(file.path()),
            Err(Error::Config(_))
        ));

        assert!(matches!(
            load_candidates_from_json(Path::new("/nonexistent/relays.json")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn default_indexers_normalize() {
        for url in DEFAULT_INDEXERS {
            assert_eq!(normalize_relay_url(url).ok().as_deref(), Some(*url));
        }
    }
}
