//! Service configuration from environment variables

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BACKEND_URL: &str = "http://localhost:8010";
const DEFAULT_APP_NAME: &str = "movie_pitch_agent";
const DEFAULT_USER_ID: &str = "user";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_SESSION_IDLE_TIMEOUT_SECS: u64 = 1800;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: &'static str) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::invalid(
                "ENVIRONMENT",
                s,
                "expected development or production",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            _ => Err(ConfigError::invalid("LOG_FORMAT", s, "expected json or pretty")),
        }
    }
}

/// CORS origins; `*` anywhere in the list allows any origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

impl AllowedOrigins {
    fn parse(raw: &str) -> Self {
        let origins: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();
        if origins.is_empty() || origins.iter().any(|o| o == "*") {
            AllowedOrigins::Any
        } else {
            AllowedOrigins::List(origins)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend_url: String,
    pub app_name: String,
    pub user_id: String,
    pub host: IpAddr,
    pub port: u16,
    pub environment: Environment,
    pub allowed_origins: AllowedOrigins,
    pub request_timeout: Duration,
    pub session_idle_timeout: Duration,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; unset and blank values fall
    /// back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match var("ENVIRONMENT") {
            Some(raw) => raw.parse()?,
            None => Environment::default(),
        };

        let host = match var("HOST") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("HOST", &raw, "expected an IP address"))?,
            None => IpAddr::from([0, 0, 0, 0]),
        };

        let port = match var("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("PORT", &raw, "expected a port number"))?,
            None => DEFAULT_PORT,
        };

        let request_timeout = seconds(
            "REQUEST_TIMEOUT_SECS",
            var("REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        let session_idle_timeout = seconds(
            "SESSION_IDLE_TIMEOUT_SECS",
            var("SESSION_IDLE_TIMEOUT_SECS"),
            DEFAULT_SESSION_IDLE_TIMEOUT_SECS,
        )?;

        let log_format = match var("LOG_FORMAT") {
            Some(raw) => raw.parse()?,
            None if environment == Environment::Production => LogFormat::Json,
            None => LogFormat::Pretty,
        };

        Ok(Self {
            backend_url: var("BACKEND_URL")
                .map_or_else(|| DEFAULT_BACKEND_URL.to_string(), |u| u.trim().to_string()),
            app_name: var("APP_NAME").unwrap_or_else(|| DEFAULT_APP_NAME.to_string()),
            user_id: var("USER_ID").unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            host,
            port,
            environment,
            allowed_origins: AllowedOrigins::parse(&var("ALLOWED_ORIGINS").unwrap_or_default()),
            request_timeout,
            session_idle_timeout,
            log_format,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn seconds(var: &'static str, raw: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Duration::from_secs(default));
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::invalid(
            var,
            &raw,
            "expected a positive number of seconds",
        )),
    }
}
