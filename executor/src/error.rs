use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

impl From<rustls::Error> for ExecutorError {
    fn from(err: rustls::Error) -> Self {
        ExecutorError::Tls(err.to_string())
    }
}

impl From<reqwest::Error> for ExecutorError {
    fn from(err: reqwest::Error) -> Self {
        ExecutorError::Tls(format!("HTTP client setup failed: {}", err))
    }
}
