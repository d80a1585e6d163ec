use crate::error::{ExecutorError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TOKEN_HEADER: &str = "Approov-Token";
pub const DEFAULT_SENTINEL_TOKEN: &str = "NOTOKEN";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 500;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Settings shared by the executor, the request decorator and the transports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Header carrying the attestation token
    pub token_header: String,
    /// Value sent in place of a token when the provider could not issue one
    pub sentinel_token: String,
    /// TCP connect timeout
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Upper bound for TLS handshake, request write and response read
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            sentinel_token: DEFAULT_SENTINEL_TOKEN.to_string(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            user_agent: format!("attested-executor/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ExecutorConfig {
    /// Build a configuration from environment variables, falling back to defaults
    ///
    /// - `ATTESTATION_TOKEN_HEADER`
    /// - `ATTESTATION_SENTINEL_TOKEN`
    /// - `CONNECT_TIMEOUT_MS`
    /// - `REQUEST_TIMEOUT_MS`
    /// - `HTTP_USER_AGENT`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(header) = lookup("ATTESTATION_TOKEN_HEADER") {
            config.token_header = header;
        }
        if let Some(sentinel) = lookup("ATTESTATION_SENTINEL_TOKEN") {
            config.sentinel_token = sentinel;
        }
        if let Some(ms) = lookup("CONNECT_TIMEOUT_MS") {
            config.connect_timeout = parse_millis("CONNECT_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = lookup("REQUEST_TIMEOUT_MS") {
            config.request_timeout = parse_millis("REQUEST_TIMEOUT_MS", &ms)?;
        }
        if let Some(agent) = lookup("HTTP_USER_AGENT") {
            config.user_agent = agent;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every request fail
    pub fn validate(&self) -> Result<()> {
        reqwest::header::HeaderName::from_bytes(self.token_header.as_bytes()).map_err(|e| {
            ExecutorError::Config(format!(
                "Invalid token header name '{}': {}",
                self.token_header, e
            ))
        })?;

        reqwest::header::HeaderValue::from_str(&self.sentinel_token).map_err(|e| {
            ExecutorError::Config(format!("Invalid sentinel token: {}", e))
        })?;

        if self.sentinel_token.is_empty() {
            return Err(ExecutorError::Config(
                "Sentinel token must not be empty".to_string(),
            ));
        }

        if self.connect_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(ExecutorError::Config(
                "Timeouts must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ExecutorError::Config(format!("{} must be milliseconds: {}", key, e)))
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
