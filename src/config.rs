use crate::error::{PresenceError, Result};
use std::env;
use std::time::Duration;
use url::Url;

/// Default real-time endpoint
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:3000/ws";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Connection manager configuration
    pub connection: ConnectionConfig,
    /// Online-status consumer configuration
    pub presence: PresenceConfig,
    /// Identity provider configuration
    pub auth: AuthConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Real-time endpoint, without the token query parameter
    pub endpoint: Url,
    /// Delay before the automatic retry after an unclean close
    pub retry_delay: Duration,
    /// Consecutive automatic retries allowed (0 = unbounded)
    pub max_retries: u32,
    /// Bound on a single socket-open attempt
    pub connect_timeout: Duration,
    /// How long a close waits for the socket to finish its handshake
    pub close_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid URL"),
            retry_delay: Duration::from_millis(3000),
            max_retries: 0,
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Period of the liveness timer
    pub liveness_interval: Duration,
    /// Idle time after which a connected socket is considered stale
    pub stale_after: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            liveness_interval: Duration::from_millis(5000),
            stale_after: Duration::from_millis(30000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Locally signed HS256 ID tokens
    Local,
    /// A fixed bearer token
    Static,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub mode: AuthMode,
    /// Bearer token used in static mode
    pub token: String,
    /// Username for sign-in
    pub username: String,
    /// Password for sign-in
    pub password: String,
    /// HS256 secret (empty = random per process)
    pub jwt_secret: String,
    /// Lifetime of minted ID tokens in seconds
    pub token_ttl_secs: i64,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            connection: ConnectionConfig {
                endpoint: parse_endpoint(&get_env_or("PRESENCE_ENDPOINT", DEFAULT_ENDPOINT))?,
                retry_delay: parse_millis("PRESENCE_RETRY_DELAY_MS", "3000")?,
                max_retries: get_env_or("PRESENCE_MAX_RETRIES", "0").parse().map_err(|_| {
                    PresenceError::InvalidConfig(
                        "PRESENCE_MAX_RETRIES must be a valid number".into(),
                    )
                })?,
                connect_timeout: parse_millis("PRESENCE_CONNECT_TIMEOUT_MS", "10000")?,
                close_timeout: parse_millis("PRESENCE_CLOSE_TIMEOUT_MS", "5000")?,
            },
            presence: PresenceConfig {
                liveness_interval: parse_millis("PRESENCE_LIVENESS_INTERVAL_MS", "5000")?,
                stale_after: parse_millis("PRESENCE_STALE_AFTER_MS", "30000")?,
            },
            auth: AuthConfig {
                mode: parse_auth_mode(&get_env_or("PRESENCE_AUTH_MODE", "local"))?,
                token: get_env_or("PRESENCE_TOKEN", ""),
                username: get_env_or("PRESENCE_USERNAME", "demo"),
                password: get_env_or("PRESENCE_PASSWORD", "demo"),
                jwt_secret: get_env_or("PRESENCE_JWT_SECRET", ""),
                token_ttl_secs: get_env_or("PRESENCE_TOKEN_TTL_SECS", "3600")
                    .parse()
                    .unwrap_or(3600),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }
}

/// Validate the real-time endpoint URL
pub fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| {
        PresenceError::InvalidConfig(format!("PRESENCE_ENDPOINT must be a valid URL: {}", e))
    })?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(PresenceError::InvalidConfig(format!(
                "PRESENCE_ENDPOINT has unsupported scheme: {}",
                other
            )))
        }
    }

    // The token query parameter is appended per attempt.
    if url.query().is_some() || url.fragment().is_some() {
        return Err(PresenceError::InvalidConfig(
            "PRESENCE_ENDPOINT must not include query/fragment".into(),
        ));
    }

    if url.host_str().is_none() {
        return Err(PresenceError::InvalidConfig(
            "PRESENCE_ENDPOINT must include a host".into(),
        ));
    }

    Ok(url)
}

fn parse_auth_mode(raw: &str) -> Result<AuthMode> {
    match raw.trim().to_lowercase().as_str() {
        "local" | "jwt" => Ok(AuthMode::Local),
        "static" | "token" => Ok(AuthMode::Static),
        other => Err(PresenceError::InvalidConfig(format!(
            "PRESENCE_AUTH_MODE has unsupported value: {}",
            other
        ))),
    }
}

fn parse_millis(key: &str, default: &str) -> Result<Duration> {
    get_env_or(key, default)
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| PresenceError::InvalidConfig(format!("{} must be a valid number", key)))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const CONFIG_ENV_KEYS: &[&str] = &[
        "PRESENCE_ENDPOINT",
        "PRESENCE_RETRY_DELAY_MS",
        "PRESENCE_MAX_RETRIES",
        "PRESENCE_CONNECT_TIMEOUT_MS",
        "PRESENCE_CLOSE_TIMEOUT_MS",
        "PRESENCE_LIVENESS_INTERVAL_MS",
        "PRESENCE_STALE_AFTER_MS",
        "PRESENCE_AUTH_MODE",
        "PRESENCE_TOKEN",
        "PRESENCE_USERNAME",
        "PRESENCE_PASSWORD",
        "PRESENCE_JWT_SECRET",
        "PRESENCE_TOKEN_TTL_SECS",
        "LOG_LEVEL",
        "LOG_FORMAT",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();

        assert_eq!(config.connection.endpoint.as_str(), DEFAULT_ENDPOINT);
        assert_eq!(config.connection.retry_delay, Duration::from_millis(3000));
        assert_eq!(config.connection.max_retries, 0);
        assert_eq!(config.presence.liveness_interval, Duration::from_millis(5000));
        assert_eq!(config.presence.stale_after, Duration::from_millis(30000));
        assert_eq!(config.auth.mode, AuthMode::Local);
        assert_eq!(config.log.format, "pretty");
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("PRESENCE_ENDPOINT", "wss://presence.example:8443/ws");
        env::set_var("PRESENCE_RETRY_DELAY_MS", "1500");
        env::set_var("PRESENCE_MAX_RETRIES", "5");
        env::set_var("PRESENCE_AUTH_MODE", "static");
        env::set_var("PRESENCE_TOKEN", "abc");

        let config = Config::from_env().unwrap();

        assert_eq!(config.connection.endpoint.host_str(), Some("presence.example"));
        assert_eq!(config.connection.endpoint.port(), Some(8443));
        assert_eq!(config.connection.retry_delay, Duration::from_millis(1500));
        assert_eq!(config.connection.max_retries, 5);
        assert_eq!(config.auth.mode, AuthMode::Static);
        assert_eq!(config.auth.token, "abc");
    }

    #[test]
    fn test_config_rejects_bad_numbers() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("PRESENCE_RETRY_DELAY_MS", "soon");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, PresenceError::InvalidConfig(_)));
    }

    #[test]
    fn test_parse_endpoint_rejects_http_and_query() {
        assert!(parse_endpoint("http://host/ws").is_err());
        assert!(parse_endpoint("ws://host/ws?token=x").is_err());
        assert!(parse_endpoint("ws://host/ws#frag").is_err());
        assert!(parse_endpoint("ws://host:3000/ws").is_ok());
    }

    #[test]
    fn test_parse_auth_mode() {
        assert_eq!(parse_auth_mode("LOCAL").unwrap(), AuthMode::Local);
        assert_eq!(parse_auth_mode("token").unwrap(), AuthMode::Static);
        assert!(parse_auth_mode("cognito").is_err());
    }
}
