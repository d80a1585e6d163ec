//! Client-library HTTPS transport backed by `reqwest`

use super::{OutboundRequest, Transport, TransportError, TransportResponse};
use crate::config::ExecutorConfig;
use crate::error::Result;
use crate::pinning::find_pin_rejection;
use async_trait::async_trait;
use rustls::ClientConfig;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

/// HTTPS transport delegating to a `reqwest::Client`
///
/// Pooling is disabled so every request performs a fresh handshake and
/// therefore a fresh pin check. Redirects are returned to the caller, never
/// followed, so the host-scoped token stays with its host.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(tls_config: Arc<ClientConfig>, config: &ExecutorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .use_preconfigured_tls((*tls_config).clone())
            .https_only(true)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(0)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
        })
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if let Some(pin) = find_pin_rejection(&err) {
            return TransportError::PinRejected(pin);
        }

        let message = error_chain(&err);
        if err.is_timeout() {
            if err.is_connect() {
                TransportError::Timeout(self.connect_timeout)
            } else {
                TransportError::Timeout(self.request_timeout)
            }
        } else if err.is_connect() {
            TransportError::Connect(message)
        } else if err.is_builder() {
            TransportError::InvalidRequest(message)
        } else {
            TransportError::Client(message)
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    fn name(&self) -> &'static str {
        "reqwest"
    }

    async fn send(&self, request: OutboundRequest) -> std::result::Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.classify(e))?
            .to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

/// reqwest's top-level message rarely names the cause; join the chain
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
