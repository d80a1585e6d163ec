use crate::provider::AttestationProvider;
use std::fmt;
use std::sync::Arc;

/// Token attached to an outbound request
///
/// `Unavailable` marks a failed fetch. It is rendered on the wire as the
/// configured sentinel so the header is never omitted, while staying
/// distinguishable from any real token inside the process.
#[derive(Clone, PartialEq, Eq)]
pub enum AttestationToken {
    Issued(String),
    Unavailable,
}

impl AttestationToken {
    pub fn is_issued(&self) -> bool {
        matches!(self, AttestationToken::Issued(_))
    }

    /// Header value for this token
    pub fn header_value<'a>(&'a self, sentinel: &'a str) -> &'a str {
        match self {
            AttestationToken::Issued(token) => token,
            AttestationToken::Unavailable => sentinel,
        }
    }
}

impl fmt::Debug for AttestationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttestationToken::Issued(token) => write!(f, "Issued({}...)", token_prefix(token)),
            AttestationToken::Unavailable => write!(f, "Unavailable"),
        }
    }
}

fn token_prefix(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(idx, _)| idx)
        .unwrap_or(token.len());
    &token[..end]
}

/// Fetch a token for `hostname`, degrading to [`AttestationToken::Unavailable`]
///
/// Runs the blocking provider call on the blocking pool. No retry happens
/// here; the caller's retry policy decides what to do next.
pub async fn acquire_token(
    provider: &Arc<dyn AttestationProvider>,
    hostname: &str,
) -> AttestationToken {
    let provider = provider.clone();
    let host = hostname.to_string();

    let fetch = tokio::task::spawn_blocking(move || provider.fetch_token_and_wait(&host)).await;

    match fetch {
        Ok(result) if result.is_success() => {
            tracing::info!(
                "Received a token for {}: {}...",
                hostname,
                token_prefix(&result.token)
            );
            AttestationToken::Issued(result.token)
        }
        Ok(_) => {
            tracing::warn!("Attestation token fetch failed for {}", hostname);
            AttestationToken::Unavailable
        }
        Err(e) => {
            tracing::error!("Attestation token fetch for {} did not complete: {}", hostname, e);
            AttestationToken::Unavailable
        }
    }
}
