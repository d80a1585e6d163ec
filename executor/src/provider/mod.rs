//! Attestation provider seam
//!
//! The provider owns the process-wide token and pin cache. The executor only
//! ever asks it to fetch (which caches the host's pin as a side effect), to
//! read a cached pin, or to flush every cached pin.

mod local;

pub use local::{LocalDevProvider, LocalDevProviderFile};

/// Result of a blocking token fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Success,
    Failure,
}

/// Data returned by [`AttestationProvider::fetch_token_and_wait`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenFetch {
    pub status: FetchStatus,
    /// Issued token; empty when `status` is `Failure`
    pub token: String,
}

impl TokenFetch {
    pub fn success(token: impl Into<String>) -> Self {
        Self {
            status: FetchStatus::Success,
            token: token.into(),
        }
    }

    pub fn failure() -> Self {
        Self {
            status: FetchStatus::Failure,
            token: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }
}

/// External attestation service holding the token and pin cache
///
/// All methods may block. `fetch_token_and_wait` is bounded by a timeout the
/// provider owns.
pub trait AttestationProvider: Send + Sync {
    /// Attest the app for `hostname` and return a short-lived token.
    /// Caches the pin for `hostname` as a side effect when none is cached.
    fn fetch_token_and_wait(&self, hostname: &str) -> TokenFetch;

    /// Certificate bytes cached for `hostname`, if any
    fn cached_pin(&self, hostname: &str) -> Option<Vec<u8>>;

    /// Drop every cached pin
    fn flush_pin_cache(&self);
}
