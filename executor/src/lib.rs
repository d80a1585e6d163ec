//! Attested, dynamically-pinned HTTPS request execution
//!
//! Each request carries a short-lived attestation token from an
//! [`AttestationProvider`]. The server's TLS certificate must additionally
//! match a certificate the provider fetched out-of-band for that host. A
//! stale pin is flushed and the request retried once with a fresh token.
//!
//! ```no_run
//! use attested_executor::{AttestedRequestExecutor, LocalDevProvider};
//! use std::sync::Arc;
//!
//! # async fn demo() -> attested_executor::Result<()> {
//! let provider = Arc::new(LocalDevProvider::from_file("provider.json")?);
//! let executor = AttestedRequestExecutor::builder(provider).build()?;
//!
//! let outcome = executor
//!     .execute("shapes.example.com", "/shapes", Default::default())
//!     .await;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod decorator;
pub mod error;
pub mod executor;
pub mod pinning;
pub mod provider;
pub mod tls;
pub mod token;
pub mod transport;

pub use config::ExecutorConfig;
pub use decorator::{AttestationHeader, RequestDecorator};
pub use error::{ExecutorError, Result};
pub use executor::{AttestedRequestExecutor, ExecutorBuilder, RequestOutcome, TransportKind};
pub use pinning::{PinChecker, PinError};
pub use provider::{AttestationProvider, FetchStatus, LocalDevProvider, TokenFetch};
pub use token::AttestationToken;
pub use transport::{ReqwestTransport, StreamTransport, Transport, TransportError};

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
