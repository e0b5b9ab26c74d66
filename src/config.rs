//! Server Configuration
//!
//! Loaded once at startup from environment variables. Every field has a
//! default; malformed values are a startup error.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::core::codec::DEFAULT_MAX_DECODED_BYTES;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Environment variable name.
        key: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Socket timing.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Idle time after which a silent connection is dropped.
    pub read_timeout: Duration,
    /// Interval between liveness pings.
    pub ping_interval: Duration,
    /// Deadline for a single frame write.
    pub write_timeout: Duration,
    /// Deadline for the game lookup behind a chat message.
    pub lookup_timeout: Duration,
    /// Largest accepted inbound frame.
    pub max_message_bytes: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
            lookup_timeout: Duration::from_secs(5),
            max_message_bytes: 512 * 1024,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Failed logins before an address is locked out.
    pub max_attempts: u32,
    /// Lockout length.
    pub lock_duration: Duration,
    /// Fixed lifetime of console sessions.
    pub session_duration: Duration,
    /// Hard cap on upload body size, checked before decoding.
    pub max_upload_bytes: usize,
    /// Cap on the inflated size of a save.
    pub max_decoded_bytes: usize,
    /// Console admin username.
    pub admin_username: String,
    /// Console admin password.
    pub admin_password: String,
    /// Required `User-Agent` prefix on `/files`. `None` disables the check.
    pub client_ua_prefix: Option<String>,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only safe behind a proxy that overwrites those headers.
    pub trust_proxy_headers: bool,
    /// Socket timing.
    pub socket: SocketConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 11451)),
            max_attempts: 5,
            lock_duration: Duration::from_secs(5 * 60),
            session_duration: Duration::from_secs(24 * 60 * 60),
            max_upload_bytes: 10 * 1024 * 1024,
            max_decoded_bytes: DEFAULT_MAX_DECODED_BYTES,
            admin_username: "admin".to_string(),
            admin_password: "admin123".to_string(),
            client_ua_prefix: Some("Unciv".to_string()),
            trust_proxy_headers: true,
            socket: SocketConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let minutes = |m: u64| Duration::from_secs(m * 60);
        let hours = |h: u64| Duration::from_secs(h * 60 * 60);

        let max_attempts = match parse::<u32, _>(&get, "MAX_ATTEMPTS")? {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    key: "MAX_ATTEMPTS",
                    value: "0".to_string(),
                })
            }
            Some(n) => n,
            None => defaults.max_attempts,
        };

        Ok(Self {
            bind_addr: parse(&get, "BIND_ADDR")?.unwrap_or(defaults.bind_addr),
            max_attempts,
            lock_duration: parse(&get, "LOCK_TIME_MINUTES")?
                .map(minutes)
                .unwrap_or(defaults.lock_duration),
            session_duration: parse(&get, "SESSION_HOURS")?
                .map(hours)
                .unwrap_or(defaults.session_duration),
            max_upload_bytes: parse(&get, "MAX_UPLOAD_BYTES")?.unwrap_or(defaults.max_upload_bytes),
            max_decoded_bytes: parse(&get, "MAX_DECODED_BYTES")?.unwrap_or(defaults.max_decoded_bytes),
            admin_username: get("ADMIN_USERNAME").unwrap_or(defaults.admin_username),
            admin_password: get("ADMIN_PASSWORD").unwrap_or(defaults.admin_password),
            // Set-but-empty disables the check
            client_ua_prefix: match lookup("CLIENT_UA_PREFIX") {
                Some(v) if v.trim().is_empty() => None,
                Some(v) => Some(v),
                None => defaults.client_ua_prefix,
            },
            trust_proxy_headers: parse(&get, "TRUST_PROXY_HEADERS")?
                .unwrap_or(defaults.trust_proxy_headers),
            socket: defaults.socket,
        })
    }
}

fn parse<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.lock_duration, Duration::from_secs(300));
        assert_eq!(config.session_duration, Duration::from_secs(86_400));
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.bind_addr.port(), 11451);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("MAX_ATTEMPTS", "3"),
            ("LOCK_TIME_MINUTES", "10"),
            ("SESSION_HOURS", "2"),
            ("ADMIN_USERNAME", "root"),
            ("CLIENT_UA_PREFIX", ""),
        ])
        .unwrap();

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.lock_duration, Duration::from_secs(600));
        assert_eq!(config.session_duration, Duration::from_secs(7200));
        assert_eq!(config.admin_username, "root");
        assert_eq!(config.admin_password, "admin123");
        assert!(config.client_ua_prefix.is_none());
        assert!(config.trust_proxy_headers);

        let direct = from_pairs(&[("TRUST_PROXY_HEADERS", "false")]).unwrap();
        assert!(!direct.trust_proxy_headers);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            from_pairs(&[("MAX_ATTEMPTS", "many")]),
            Err(ConfigError::Invalid { key: "MAX_ATTEMPTS", .. })
        ));
        assert!(from_pairs(&[("MAX_ATTEMPTS", "0")]).is_err());
        assert!(from_pairs(&[("BIND_ADDR", "nowhere")]).is_err());
        assert!(from_pairs(&[("MAX_UPLOAD_BYTES", "-1")]).is_err());
        assert!(from_pairs(&[("TRUST_PROXY_HEADERS", "maybe")]).is_err());
    }
}
