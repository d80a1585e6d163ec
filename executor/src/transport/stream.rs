//! Native HTTPS transport: TCP + TLS (rustls) + hand-written HTTP/1.1
//!
//! TLS is negotiated with the shared pinned `ClientConfig`, so the dynamic pin
//! check runs inside the handshake before any request bytes are written.

use super::http1::{encode_request, parse_response};
use super::{tls_host, OutboundRequest, Transport, TransportError, TransportResponse};
use crate::config::ExecutorConfig;
use crate::pinning::find_pin_rejection;
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use url::Url;

const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// HTTPS transport over a plain TCP connection
#[derive(Clone)]
pub struct StreamTransport {
    tls_connector: TlsConnector,
    connect_timeout: Duration,
    request_timeout: Duration,
    user_agent: String,
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("tls_connector", &"<TlsConnector>")
            .finish()
    }
}

impl StreamTransport {
    pub fn new(tls_config: Arc<ClientConfig>, config: &ExecutorConfig) -> Self {
        Self {
            tls_connector: TlsConnector::from(tls_config),
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            user_agent: config.user_agent.clone(),
        }
    }

    /// Open TCP and complete the TLS handshake (including the pin check)
    async fn connect(&self, url: &Url) -> Result<TlsStream<TcpStream>, TransportError> {
        if url.scheme() != "https" {
            return Err(TransportError::InvalidRequest(format!(
                "Unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidRequest("Missing host in URL".to_string()))?;
        let port = url.port().unwrap_or(443);
        let destination = format!("{}:{}", host, port);

        tracing::debug!("Connecting to {}", destination);

        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&destination))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))?
            .map_err(|e| TransportError::Connect(format!("{}: {}", destination, e)))?;

        let tls_host = tls_host(url)
            .ok_or_else(|| TransportError::InvalidRequest("Missing host in URL".to_string()))?;
        let server_name = ServerName::try_from(tls_host)
            .map_err(|e| TransportError::InvalidRequest(format!("Invalid server name: {}", e)))?;

        let tls_stream = self
            .tls_connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| match find_pin_rejection(&e) {
                Some(pin) => TransportError::PinRejected(pin),
                None => TransportError::Tls(e.to_string()),
            })?;

        tracing::debug!("TLS connection established with {}", host);
        Ok(tls_stream)
    }

    async fn exchange(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError> {
        let request_bytes = encode_request(request, &self.user_agent)?;

        let mut stream = self.connect(&request.url).await?;

        tracing::trace!(
            "Sending HTTP request:\n{}",
            String::from_utf8_lossy(&request_bytes)
        );

        stream.write_all(&request_bytes).await?;
        stream.flush().await?;

        let mut response_buf = Vec::new();
        let read = (&mut stream)
            .take(MAX_RESPONSE_SIZE as u64 + 1)
            .read_to_end(&mut response_buf)
            .await;

        match read {
            Ok(_) => {}
            // Some servers close without close_notify once the body is sent
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && !response_buf.is_empty() => {
                tracing::debug!("Peer closed without close_notify after {} bytes", response_buf.len());
            }
            Err(e) => return Err(e.into()),
        }

        if response_buf.len() > MAX_RESPONSE_SIZE {
            return Err(TransportError::InvalidResponse(format!(
                "Response larger than {} bytes",
                MAX_RESPONSE_SIZE
            )));
        }

        tracing::trace!("Received {} response bytes", response_buf.len());
        parse_response(&response_buf)
    }
}

#[async_trait]
impl Transport for StreamTransport {
    fn name(&self) -> &'static str {
        "stream"
    }

    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        tokio::time::timeout(self.request_timeout, self.exchange(&request))
            .await
            .map_err(|_| TransportError::Timeout(self.request_timeout))?
    }
}
