//! Configuration loading and validation.
//!
//! The core is configured entirely through the environment (it runs
//! containerized behind a reverse proxy). `Config::from_env` reads every
//! recognized key once at startup; malformed values are startup errors, not
//! silent defaults.

use nexus_proto::model::IceServerWire;
use std::time::Duration;
use thiserror::Error;

/// Default avatar/icon upload cap: 2 MiB of decoded data URL.
const DEFAULT_MAX_UPLOAD_BYTES: usize = 2 * 1024 * 1024;

/// Default session token lifetime: 30 days.
const DEFAULT_TOKEN_TTL_SECS: u64 = 30 * 86_400;

/// Public STUN servers used when no TURN configuration is present.
const DEFAULT_STUN_URLS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// One sliding-window bucket: `limit` events per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub limit: u32,
    pub window: Duration,
}

impl Bucket {
    pub const fn new(limit: u32, window_secs: u64) -> Self {
        Self {
            limit,
            window: Duration::from_secs(window_secs),
        }
    }
}

/// Rate-limit buckets. Defaults follow the design limits; each is
/// overridable with `RATE_LIMIT_<BUCKET>=<limit>/<window-seconds>`.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// `message.send`, per user.
    pub message_send: Bucket,
    /// `webhook.post`, per webhook id.
    pub webhook_post: Bucket,
    /// `friend.request`, per user.
    pub friend_request: Bucket,
    /// `invite.create`, per user.
    pub invite_create: Bucket,
    /// `auth.login`, per IP.
    pub auth_login: Bucket,
    /// `ws.event.any`, per socket (soft).
    pub ws_event: Bucket,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            message_send: Bucket::new(10, 10),
            webhook_post: Bucket::new(10, 10),
            friend_request: Bucket::new(20, 3_600),
            invite_create: Bucket::new(30, 3_600),
            auth_login: Bucket::new(10, 10),
            ws_event: Bucket::new(60, 1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Listen port for the combined HTTP/WS server.
    pub port: u16,
    /// Store DSN. `:memory:` or a SQLite file path.
    pub store_url: String,
    pub token_ttl: Duration,
    /// ICE servers handed to voice clients. STUN defaults unless
    /// `TURN_SERVERS` injects more.
    pub ice_servers: Vec<IceServerWire>,
    pub giphy_api_key: Option<String>,
    pub rate_limits: RateLimitConfig,
    pub max_upload_bytes: usize,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            store_url: "nexus.db".to_string(),
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_SECS),
            ice_servers: default_ice_servers(),
            giphy_api_key: None,
            rate_limits: RateLimitConfig::default(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("PORT") {
            config.port = port.parse().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                value: port.clone(),
            })?;
        }
        if let Ok(url) = std::env::var("STORE_URL") {
            config.store_url = url;
        }
        if let Ok(ttl) = std::env::var("TOKEN_TTL_SECS") {
            let secs: u64 = ttl.parse().map_err(|_| ConfigError::Invalid {
                key: "TOKEN_TTL_SECS",
                value: ttl.clone(),
            })?;
            config.token_ttl = Duration::from_secs(secs);
        }
        if let Ok(raw) = std::env::var("TURN_SERVERS") {
            let turn: Vec<IceServerWire> =
                serde_json::from_str(&raw).map_err(|_| ConfigError::Invalid {
                    key: "TURN_SERVERS",
                    value: raw.clone(),
                })?;
            config.ice_servers.extend(turn);
        }
        if let Ok(key) = std::env::var("GIPHY_API_KEY") {
            if !key.is_empty() {
                config.giphy_api_key = Some(key);
            }
        }
        if let Ok(raw) = std::env::var("MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = raw.parse().map_err(|_| ConfigError::Invalid {
                key: "MAX_UPLOAD_BYTES",
                value: raw.clone(),
            })?;
        }
        if let Ok(raw) = std::env::var("LOG_FORMAT") {
            config.log_format = match raw.as_str() {
                "json" => LogFormat::Json,
                "pretty" | "" => LogFormat::Pretty,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "LOG_FORMAT",
                        value: raw,
                    });
                }
            };
        }

        config.rate_limits = RateLimitConfig {
            message_send: bucket_from_env("RATE_LIMIT_MESSAGE_SEND", config.rate_limits.message_send)?,
            webhook_post: bucket_from_env("RATE_LIMIT_WEBHOOK_POST", config.rate_limits.webhook_post)?,
            friend_request: bucket_from_env(
                "RATE_LIMIT_FRIEND_REQUEST",
                config.rate_limits.friend_request,
            )?,
            invite_create: bucket_from_env("RATE_LIMIT_INVITE_CREATE", config.rate_limits.invite_create)?,
            auth_login: bucket_from_env("RATE_LIMIT_AUTH_LOGIN", config.rate_limits.auth_login)?,
            ws_event: bucket_from_env("RATE_LIMIT_WS_EVENT", config.rate_limits.ws_event)?,
        };

        Ok(config)
    }
}

fn default_ice_servers() -> Vec<IceServerWire> {
    vec![IceServerWire {
        urls: DEFAULT_STUN_URLS.iter().map(|s| s.to_string()).collect(),
        username: None,
        credential: None,
    }]
}

/// Parse `<limit>/<window-seconds>` from the environment, keeping the
/// default when the key is unset.
fn bucket_from_env(key: &'static str, default: Bucket) -> Result<Bucket, ConfigError> {
    let Ok(raw) = std::env::var(key) else {
        return Ok(default);
    };
    parse_bucket(&raw).ok_or(ConfigError::Invalid { key, value: raw })
}

fn parse_bucket(raw: &str) -> Option<Bucket> {
    let (limit, window) = raw.split_once('/')?;
    let limit: u32 = limit.trim().parse().ok()?;
    let window_secs: u64 = window.trim().parse().ok()?;
    if limit == 0 || window_secs == 0 {
        return None;
    }
    Some(Bucket::new(limit, window_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_parsing() {
        assert_eq!(parse_bucket("10/10"), Some(Bucket::new(10, 10)));
        assert_eq!(parse_bucket("20 / 3600"), Some(Bucket::new(20, 3600)));
        assert_eq!(parse_bucket("10"), None);
        assert_eq!(parse_bucket("0/10"), None);
        assert_eq!(parse_bucket("ten/10"), None);
    }

    #[test]
    fn default_limits_match_design() {
        let limits = RateLimitConfig::default();
        assert_eq!(limits.message_send, Bucket::new(10, 10));
        assert_eq!(limits.friend_request, Bucket::new(20, 3_600));
        assert_eq!(limits.ws_event, Bucket::new(60, 1));
    }

    #[test]
    fn stun_defaults_present_without_turn() {
        let config = Config::default();
        assert_eq!(config.ice_servers.len(), 1);
        assert!(config.ice_servers[0].urls[0].starts_with("stun:"));
    }
}
