//! Attested request execution with a single retry on pin mismatch

use crate::config::ExecutorConfig;
use crate::decorator::{AttestationHeader, RequestDecorator};
use crate::error::{ExecutorError, Result};
use crate::pinning::PinChecker;
use crate::provider::AttestationProvider;
use crate::tls::{pinned_client_config, webpki_root_store};
use crate::token::acquire_token;
use crate::transport::{
    tls_host, OutboundRequest, ReqwestTransport, StreamTransport, Transport, TransportError,
    TransportResponse,
};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use rustls::RootCertStore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use url::Url;

pub const SERVER_DECLINED_MESSAGE: &str = "The server declined to respond to this request";
pub const UNKNOWN_SERVER_MESSAGE: &str = "Unknown server error";

/// Final result of an attested request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// 2xx from the server
    Success { status: StatusCode, body: Vec<u8> },
    /// 400: the server refused the attestation token
    ServerRejected(StatusCode),
    /// Any other non-2xx status
    ServerError(StatusCode),
    /// The pin check failed on both attempts
    PinMismatch,
    /// Connect, TLS, I/O or protocol failure
    TransportError(String),
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Success { .. })
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RequestOutcome::Success { status, .. }
            | RequestOutcome::ServerRejected(status)
            | RequestOutcome::ServerError(status) => Some(*status),
            RequestOutcome::PinMismatch | RequestOutcome::TransportError(_) => None,
        }
    }

    /// Response body as text, for successful outcomes only
    pub fn body_text(&self) -> Option<String> {
        match self {
            RequestOutcome::Success { body, .. } => Some(String::from_utf8_lossy(body).trim().to_string()),
            _ => None,
        }
    }

    /// Message to show an end user for a server-side failure
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            RequestOutcome::ServerRejected(_) => Some(SERVER_DECLINED_MESSAGE),
            RequestOutcome::ServerError(_) => Some(UNKNOWN_SERVER_MESSAGE),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retry,
}

/// Which transport [`ExecutorBuilder`] wires up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    #[default]
    Stream,
    Reqwest,
}

/// Executes HTTPS requests carrying an attestation token over a pinned channel
///
/// A pin rejection during the handshake is retried exactly once with a
/// freshly fetched token. Every other failure is final.
pub struct AttestedRequestExecutor {
    provider: Arc<dyn AttestationProvider>,
    transport: Arc<dyn Transport>,
    decorator: Arc<dyn RequestDecorator>,
}

impl std::fmt::Debug for AttestedRequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestedRequestExecutor")
            .field("transport", &self.transport.name())
            .finish()
    }
}

impl AttestedRequestExecutor {
    /// Assemble an executor from its parts
    ///
    /// The transport must already verify certificates through a
    /// [`PinChecker`] backed by the same `provider`.
    pub fn new(
        provider: Arc<dyn AttestationProvider>,
        transport: Arc<dyn Transport>,
        decorator: Arc<dyn RequestDecorator>,
    ) -> Self {
        Self {
            provider,
            transport,
            decorator,
        }
    }

    pub fn builder(provider: Arc<dyn AttestationProvider>) -> ExecutorBuilder {
        ExecutorBuilder::new(provider)
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// GET `https://{host}{path}`
    pub async fn execute(&self, host: &str, path: &str, headers: HeaderMap) -> RequestOutcome {
        self.execute_method(Method::GET, host, path, headers, None)
            .await
    }

    pub async fn execute_method(
        &self,
        method: Method,
        host: &str,
        path: &str,
        headers: HeaderMap,
        body: Option<Vec<u8>>,
    ) -> RequestOutcome {
        let url = match build_url(host, path) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!("Rejected request target {}{}: {}", host, path, e);
                return RequestOutcome::TransportError(e.to_string());
            }
        };
        // Key the token fetch the same way the verifier keys the pin
        let hostname = tls_host(&url).unwrap_or_else(|| host.to_string());

        let mut attempt = Attempt::First;
        loop {
            let token = acquire_token(&self.provider, &hostname).await;

            let mut request = OutboundRequest::new(method.clone(), url.clone(), headers.clone());
            request.body = body.clone();

            if let Err(e) = self.decorator.decorate(&mut request, &token) {
                tracing::error!("Failed to prepare request to {}: {}", url, e);
                return RequestOutcome::TransportError(e.to_string());
            }

            tracing::debug!(
                "{} {} via {} transport ({:?} attempt)",
                method,
                url,
                self.transport.name(),
                attempt
            );

            match self.transport.send(request).await {
                Ok(response) => return classify_response(&url, response),
                Err(TransportError::PinRejected(reason)) => match attempt {
                    Attempt::First => {
                        tracing::warn!("Pin check failed for {}, retrying once: {}", hostname, reason);
                        attempt = Attempt::Retry;
                    }
                    Attempt::Retry => {
                        tracing::error!("Pin check failed again for {}: {}", hostname, reason);
                        return RequestOutcome::PinMismatch;
                    }
                },
                Err(e) => {
                    tracing::error!("Request to {} failed: {}", url, e);
                    return RequestOutcome::TransportError(e.to_string());
                }
            }
        }
    }

    /// Run a GET on the runtime and hand back the join handle
    pub fn spawn(
        self: &Arc<Self>,
        host: impl Into<String>,
        path: impl Into<String>,
        headers: HeaderMap,
    ) -> JoinHandle<RequestOutcome> {
        let executor = Arc::clone(self);
        let host = host.into();
        let path = path.into();

        tokio::spawn(async move { executor.execute(&host, &path, headers).await })
    }
}

/// Wires provider, pinned TLS config, transport and decorator together
pub struct ExecutorBuilder {
    provider: Arc<dyn AttestationProvider>,
    config: ExecutorConfig,
    roots: Option<RootCertStore>,
    transport: TransportKind,
}

impl ExecutorBuilder {
    pub fn new(provider: Arc<dyn AttestationProvider>) -> Self {
        Self {
            provider,
            config: ExecutorConfig::default(),
            roots: None,
            transport: TransportKind::default(),
        }
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Trust anchors for WebPKI validation, Mozilla's roots when unset
    pub fn roots(mut self, roots: RootCertStore) -> Self {
        self.roots = Some(roots);
        self
    }

    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.transport = kind;
        self
    }

    pub fn build(self) -> Result<AttestedRequestExecutor> {
        self.config.validate()?;

        let checker = Arc::new(PinChecker::new(self.provider.clone()));
        let roots = self.roots.unwrap_or_else(webpki_root_store);
        let tls_config = pinned_client_config(roots, checker)?;

        let transport: Arc<dyn Transport> = match self.transport {
            TransportKind::Stream => Arc::new(StreamTransport::new(tls_config, &self.config)),
            TransportKind::Reqwest => Arc::new(ReqwestTransport::new(tls_config, &self.config)?),
        };
        let decorator = Arc::new(AttestationHeader::from_config(&self.config)?);

        tracing::info!("Attested executor ready ({} transport)", transport.name());

        Ok(AttestedRequestExecutor::new(
            self.provider,
            transport,
            decorator,
        ))
    }
}

fn build_url(host: &str, path: &str) -> Result<Url> {
    if host.is_empty() || host.contains('/') {
        return Err(ExecutorError::InvalidRequest(format!("Invalid host '{}'", host)));
    }

    let url = if path.starts_with('/') {
        Url::parse(&format!("https://{}{}", host, path))?
    } else {
        Url::parse(&format!("https://{}/{}", host, path))?
    };

    if url.host_str().is_none() {
        return Err(ExecutorError::InvalidRequest(format!("Invalid host '{}'", host)));
    }
    Ok(url)
}

fn classify_response(url: &Url, response: TransportResponse) -> RequestOutcome {
    let status = response.status;

    if status.is_success() {
        tracing::info!("Received {} from {} ({} bytes)", status, url, response.body.len());
        RequestOutcome::Success {
            status,
            body: response.body,
        }
    } else if status == StatusCode::BAD_REQUEST {
        tracing::error!(
            "Server declined {} with {}; the attestation token was not accepted",
            url,
            status
        );
        RequestOutcome::ServerRejected(status)
    } else {
        tracing::error!("Unexpected status {} from {}", status, url);
        RequestOutcome::ServerError(status)
    }
}
