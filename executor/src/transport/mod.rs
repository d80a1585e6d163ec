//! HTTPS transports
//!
//! A transport sends one decorated request and reports the raw response. It
//! never retries. Pin-check failures raised by the TLS verifier are reported
//! as [`TransportError::PinRejected`] so the executor can apply its retry
//! policy regardless of which transport is plugged in.

mod http1;
mod reqwest_client;
mod stream;

pub use reqwest_client::ReqwestTransport;
pub use stream::StreamTransport;

use crate::pinning::PinError;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use thiserror::Error;
use url::{Host, Url};

/// Hostname as TLS sees it: IPv6 literals without brackets
pub(crate) fn tls_host(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Ipv6(addr) => Some(addr.to_string()),
        host => Some(host.to_string()),
    }
}

/// Request handed to a transport, after decoration
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl OutboundRequest {
    pub fn new(method: Method, url: Url, headers: HeaderMap) -> Self {
        Self {
            method,
            url,
            headers,
            body: None,
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// Status and body of a completed exchange
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Dynamic pin check failed: {0}")]
    PinRejected(PinError),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl TransportError {
    pub fn is_pin_rejection(&self) -> bool {
        matches!(self, TransportError::PinRejected(_))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in log lines
    fn name(&self) -> &'static str;

    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError>;
}
