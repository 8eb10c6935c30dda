use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::{dispatch::rate_limiter::RateLimitConfig, session::SessionSettings};

pub const DEFAULT_CRM_BASE_URL: &str = "https://api.apollo.io/api/v1";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_token: String,
    pub bind_addr: String,
    pub bind_port: u16,
    pub rate_limit: RateLimitConfig,
    pub heartbeat_interval: Duration,
    /// `None` disables idle session expiry.
    pub session_idle_timeout: Option<Duration>,
    /// Upstream CRM key. Without one every tool runs against sample data.
    pub crm_api_key: Option<String>,
    pub crm_base_url: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MCP_API_TOKEN is required and must not be empty")]
    MissingApiToken,
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("{0} must be a positive integer")]
    InvalidPositive(&'static str),
    #[error("{0} must be a non-negative integer")]
    InvalidDuration(&'static str),
    #[error("CRM_BASE_URL must start with http:// or https://")]
    InvalidBaseUrl,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_token = value("MCP_API_TOKEN").ok_or(ConfigError::MissingApiToken)?;

        let bind_addr = value("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = value("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);

        let max_calls = positive(value("RATE_LIMIT_MAX_CALLS"), "RATE_LIMIT_MAX_CALLS", 60)?;
        let window_secs = positive(value("RATE_LIMIT_WINDOW_SECS"), "RATE_LIMIT_WINDOW_SECS", 60)?;
        let heartbeat_secs = positive(
            value("HEARTBEAT_INTERVAL_SECS"),
            "HEARTBEAT_INTERVAL_SECS",
            30,
        )?;
        let idle_secs = value("SESSION_IDLE_TIMEOUT_SECS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidDuration("SESSION_IDLE_TIMEOUT_SECS"))
            })
            .transpose()?
            .unwrap_or(1800);

        let crm_base_url = value("CRM_BASE_URL")
            .unwrap_or_else(|| DEFAULT_CRM_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        if !(crm_base_url.starts_with("http://") || crm_base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl);
        }

        let config = Self {
            api_token,
            bind_addr,
            bind_port,
            rate_limit: RateLimitConfig {
                max_calls: usize::try_from(max_calls)
                    .map_err(|_| ConfigError::InvalidPositive("RATE_LIMIT_MAX_CALLS"))?,
                window: Duration::from_secs(window_secs),
            },
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            session_idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            crm_api_key: value("CRM_API_KEY"),
            crm_base_url,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    /// Applies `--port <n>` or `--port=<n>` from the command line.
    pub fn apply_port_override<I, S>(&mut self, args: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let arg = arg.as_ref();
            let port = if arg == "--port" {
                args.next().map(|next| next.as_ref().to_string())
            } else if let Some(value) = arg.strip_prefix("--port=") {
                Some(value.to_string())
            } else {
                continue;
            };

            self.bind_port = port
                .as_deref()
                .and_then(|value| value.trim().parse::<u16>().ok())
                .ok_or(ConfigError::InvalidPort)?;
        }
        Ok(())
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            heartbeat_interval: self.heartbeat_interval,
            idle_timeout: self.session_idle_timeout,
        }
    }

    pub fn mock_mode(&self) -> bool {
        self.crm_api_key.is_none()
    }
}

fn positive(raw: Option<String>, key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse::<u64>()
            .ok()
            .filter(|parsed| *parsed > 0)
            .ok_or(ConfigError::InvalidPositive(key)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let values = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        Config::from_lookup(|key| values.get(key).cloned())
    }

    #[test]
    fn parse_defaults() {
        let config = config_from(&[("MCP_API_TOKEN", "abc")]).expect("config should parse");

        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.bind_port, 8080);
        assert_eq!(config.rate_limit, RateLimitConfig::default());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.session_idle_timeout, Some(Duration::from_secs(1800)));
        assert_eq!(config.crm_base_url, DEFAULT_CRM_BASE_URL);
        assert!(config.mock_mode());
    }

    #[test]
    fn missing_token_fails() {
        let err = config_from(&[("MCP_API_TOKEN", "   ")]).expect_err("expected missing token error");
        assert!(matches!(err, ConfigError::MissingApiToken));
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        let err = config_from(&[("MCP_API_TOKEN", "abc"), ("RATE_LIMIT_MAX_CALLS", "0")])
            .expect_err("zero quota");
        assert!(matches!(err, ConfigError::InvalidPositive("RATE_LIMIT_MAX_CALLS")));

        let err = config_from(&[("MCP_API_TOKEN", "abc"), ("RATE_LIMIT_WINDOW_SECS", "soon")])
            .expect_err("non-numeric window");
        assert!(matches!(err, ConfigError::InvalidPositive("RATE_LIMIT_WINDOW_SECS")));
    }

    #[test]
    fn zero_idle_timeout_disables_expiry() {
        let config = config_from(&[("MCP_API_TOKEN", "abc"), ("SESSION_IDLE_TIMEOUT_SECS", "0")])
            .expect("config should parse");
        assert_eq!(config.session_idle_timeout, None);
    }

    #[test]
    fn crm_key_enables_live_mode() {
        let config = config_from(&[
            ("MCP_API_TOKEN", "abc"),
            ("CRM_API_KEY", "key-123"),
            ("CRM_BASE_URL", "https://crm.example.com/v1/"),
        ])
        .expect("config should parse");

        assert!(!config.mock_mode());
        assert_eq!(config.crm_base_url, "https://crm.example.com/v1");
    }

    #[test]
    fn invalid_base_url_fails() {
        let err = config_from(&[("MCP_API_TOKEN", "abc"), ("CRM_BASE_URL", "ftp://crm")])
            .expect_err("scheme");
        assert!(matches!(err, ConfigError::InvalidBaseUrl));
    }

    #[test]
    fn port_override_accepts_both_forms() {
        let mut config = config_from(&[("MCP_API_TOKEN", "abc")]).expect("config should parse");

        config
            .apply_port_override(["crm-gateway-mcp", "--port", "9090"])
            .expect("separate value");
        assert_eq!(config.bind_port, 9090);

        config
            .apply_port_override(["crm-gateway-mcp", "--port=9191"])
            .expect("inline value");
        assert_eq!(config.bind_port, 9191);

        let err = config
            .apply_port_override(["--port"])
            .expect_err("missing value");
        assert!(matches!(err, ConfigError::InvalidPort));
    }

    #[test]
    fn invalid_bind_address_fails() {
        let err = config_from(&[("MCP_API_TOKEN", "abc"), ("BIND_ADDR", "not an ip")])
            .expect_err("bad address");
        assert!(matches!(err, ConfigError::InvalidSocket));
    }
}
