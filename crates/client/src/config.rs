//! Client configuration loaded from environment variables.

use std::time::Duration;

use crate::realtime::reconnect::{ReconnectConfig, ReconnectPolicy};

const DEV_API_URL: &str = "http://social-todo-list.test/api";
const PROD_API_URL: &str = "https://social-todo-2bfe3f41e8ff.herokuapp.com/api";
const DEFAULT_PUSHER_KEY: &str = "45d2b49aa337f102cfe1";
const DEFAULT_PUSHER_CLUSTER: &str = "eu";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Pusher protocol revision spoken by [`crate::realtime::client`].
pub const PUSHER_PROTOCOL: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Everything needed to reach the REST API and the channel provider.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub environment: Environment,
    /// REST base URL, e.g. `http://social-todo-list.test/api`.
    pub api_url: String,
    pub request_timeout: Duration,
    pub realtime: RealtimeConfig,
}

/// Channel provider settings.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub key: String,
    pub cluster: String,
    pub force_tls: bool,
    /// Explicit `ws://host:port` base, for self-hosted Pusher-compatible
    /// servers. Overrides the cluster host when set.
    pub ws_base_override: Option<String>,
    pub reconnect: ReconnectPolicy,
}

impl RealtimeConfig {
    /// Full WebSocket URL including the app key and protocol query.
    pub fn ws_url(&self) -> String {
        let base = match &self.ws_base_override {
            Some(base) => base.trim_end_matches('/').to_string(),
            None if self.force_tls => format!("wss://ws-{}.pusher.com:443", self.cluster),
            None => format!("ws://ws-{}.pusher.com:80", self.cluster),
        };
        format!(
            "{base}/app/{}?protocol={PUSHER_PROTOCOL}&client=socialtodo-rs&version={}&flash=false",
            self.key,
            env!("CARGO_PKG_VERSION"),
        )
    }
}

impl ClientConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                 | Default                                   |
    /// |-------------------------|-------------------------------------------|
    /// | `SOCIAL_TODO_ENV`       | `development`                             |
    /// | `SOCIAL_TODO_API_URL`   | per environment                           |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                                      |
    /// | `PUSHER_KEY`            | `45d2b49aa337f102cfe1`                    |
    /// | `PUSHER_CLUSTER`        | `eu`                                      |
    /// | `PUSHER_FORCE_TLS`      | `false`                                   |
    /// | `PUSHER_WS_URL`         | unset                                     |
    /// | `REALTIME_RECONNECT`    | `backoff` (`off` disables reconnection)   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = match lookup("SOCIAL_TODO_ENV").as_deref() {
            None | Some("development") | Some("dev") => Environment::Development,
            Some("production") | Some("prod") => Environment::Production,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "SOCIAL_TODO_ENV",
                    expected: "development or production",
                    value: other.to_string(),
                })
            }
        };

        let api_url = lookup("SOCIAL_TODO_API_URL").unwrap_or_else(|| {
            match environment {
                Environment::Development => DEV_API_URL,
                Environment::Production => PROD_API_URL,
            }
            .to_string()
        });

        let request_timeout_secs = match lookup("REQUEST_TIMEOUT_SECS") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                var: "REQUEST_TIMEOUT_SECS",
                expected: "a whole number of seconds",
                value: raw,
            })?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        let force_tls = match lookup("PUSHER_FORCE_TLS").as_deref() {
            None | Some("false") | Some("0") => false,
            Some("true") | Some("1") => true,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "PUSHER_FORCE_TLS",
                    expected: "true or false",
                    value: other.to_string(),
                })
            }
        };

        let reconnect = match lookup("REALTIME_RECONNECT").as_deref() {
            None | Some("backoff") => ReconnectPolicy::Backoff(ReconnectConfig::default()),
            Some("off") | Some("none") => ReconnectPolicy::Disabled,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "REALTIME_RECONNECT",
                    expected: "backoff or off",
                    value: other.to_string(),
                })
            }
        };

        let realtime = RealtimeConfig {
            key: lookup("PUSHER_KEY").unwrap_or_else(|| DEFAULT_PUSHER_KEY.into()),
            cluster: lookup("PUSHER_CLUSTER").unwrap_or_else(|| DEFAULT_PUSHER_CLUSTER.into()),
            force_tls,
            ws_base_override: lookup("PUSHER_WS_URL").filter(|v| !v.is_empty()),
            reconnect,
        };

        Ok(Self {
            environment,
            api_url,
            request_timeout: Duration::from_secs(request_timeout_secs),
            realtime,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use assert_matches::assert_matches;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_target_development() {
        let config = ClientConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.api_url, DEV_API_URL);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_matches!(config.realtime.reconnect, ReconnectPolicy::Backoff(_));
        assert!(config
            .realtime
            .ws_url()
            .starts_with("ws://ws-eu.pusher.com:80/app/45d2b49aa337f102cfe1?protocol=7"));
    }

    #[test]
    fn production_uses_hosted_api() {
        let config =
            ClientConfig::from_lookup(lookup_from(&[("SOCIAL_TODO_ENV", "production")])).unwrap();
        assert_eq!(config.api_url, PROD_API_URL);
    }

    #[test]
    fn explicit_overrides() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("SOCIAL_TODO_API_URL", "http://localhost:8000/api"),
            ("PUSHER_WS_URL", "ws://127.0.0.1:6001/"),
            ("PUSHER_KEY", "local"),
            ("REALTIME_RECONNECT", "off"),
        ]))
        .unwrap();
        assert_eq!(config.api_url, "http://localhost:8000/api");
        assert!(config.realtime.ws_url().starts_with("ws://127.0.0.1:6001/app/local?"));
        assert_matches!(config.realtime.reconnect, ReconnectPolicy::Disabled);
    }

    #[test]
    fn tls_uses_secure_cluster_host() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("PUSHER_FORCE_TLS", "true"),
            ("PUSHER_CLUSTER", "us2"),
        ]))
        .unwrap();
        assert!(config.realtime.ws_url().starts_with("wss://ws-us2.pusher.com:443/"));
    }

    #[test]
    fn invalid_values_are_reported() {
        assert_matches!(
            ClientConfig::from_lookup(lookup_from(&[("REQUEST_TIMEOUT_SECS", "soon")])),
            Err(ConfigError::Invalid { var: "REQUEST_TIMEOUT_SECS", .. })
        );
        assert_matches!(
            ClientConfig::from_lookup(lookup_from(&[("REALTIME_RECONNECT", "maybe")])),
            Err(ConfigError::Invalid { var: "REALTIME_RECONNECT", .. })
        );
    }
}
