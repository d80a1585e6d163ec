//! Dynamic certificate pinning
//!
//! The server's leaf certificate is compared against a certificate the
//! attestation provider fetched out-of-band and cached per hostname.
//!
//! ```text
//!   NoCachedPin ──fetch──▶ Fetching ──pin cached──▶ Cached ──equal──▶ Verified
//!        │                    │                       │
//!        │                    └─fetch failed/no pin──▶ Rejected ◀──mismatch/undecodable (flush)
//!        └──────────── pin already cached ──────────▶ Cached
//! ```

mod cert;
mod verifier;

pub use cert::{decode_pin, fingerprint, pin_fingerprint, short_fingerprint};
pub use verifier::DynamicPinningVerifier;

use crate::lock;
use crate::provider::AttestationProvider;
use der::Encode;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Reasons a dynamic pin check rejected a connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PinError {
    #[error("token fetch for {host} failed, no pin available")]
    FetchFailed { host: String },

    #[error("no pin cached for {host}")]
    Missing { host: String },

    #[error("cached pin for {host} is not a certificate: {reason}")]
    Undecodable { host: String, reason: String },

    #[error("server certificate for {host} does not match the pinned certificate")]
    Mismatch { host: String },
}

impl PinError {
    pub fn host(&self) -> &str {
        match self {
            PinError::FetchFailed { host }
            | PinError::Missing { host }
            | PinError::Undecodable { host, .. }
            | PinError::Mismatch { host } => host,
        }
    }
}

#[derive(Debug)]
enum PinState {
    NoCachedPin,
    Fetching,
    Cached(Vec<u8>),
    Verified,
    Rejected(PinError),
}

/// Runs the dynamic pin check against a provider's cache
///
/// Checks for the same hostname are serialized so a flush triggered by one
/// check cannot land in the middle of another.
pub struct PinChecker {
    provider: Arc<dyn AttestationProvider>,
    host_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for PinChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinChecker")
            .field("provider", &"<AttestationProvider>")
            .field("tracked_hosts", &self.tracked_hosts())
            .finish()
    }
}

impl PinChecker {
    pub fn new(provider: Arc<dyn AttestationProvider>) -> Self {
        Self {
            provider,
            host_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Verify `leaf_der` against the pin cached for `hostname`
    ///
    /// Blocks while the provider fetches a missing pin.
    pub fn verify(&self, hostname: &str, leaf_der: &[u8]) -> Result<(), PinError> {
        let host_lock = self.host_lock(hostname);
        let result = {
            let _guard = lock(&host_lock);
            self.check(hostname, leaf_der)
        };
        drop(host_lock);
        self.release_host_lock(hostname);
        result
    }

    fn check(&self, hostname: &str, leaf_der: &[u8]) -> Result<(), PinError> {
        let mut state = match self.provider.cached_pin(hostname) {
            Some(pin) => PinState::Cached(pin),
            None => PinState::NoCachedPin,
        };

        loop {
            state = match state {
                PinState::NoCachedPin => {
                    tracing::warn!("Provider does not have a cached pin for {}", hostname);
                    PinState::Fetching
                }
                PinState::Fetching => self.fetch_pin(hostname),
                PinState::Cached(pin) => self.compare(hostname, &pin, leaf_der),
                PinState::Verified => return Ok(()),
                PinState::Rejected(err) => return Err(err),
            };
        }
    }

    fn host_lock(&self, hostname: &str) -> Arc<Mutex<()>> {
        lock(&self.host_locks)
            .entry(hostname.to_string())
            .or_default()
            .clone()
    }

    /// Drop the host's lock once no check holds or waits on it. Clones are
    /// only taken under the map lock, so a count of one means unused.
    fn release_host_lock(&self, hostname: &str) {
        let mut locks = lock(&self.host_locks);
        if locks
            .get(hostname)
            .is_some_and(|host_lock| Arc::strong_count(host_lock) == 1)
        {
            locks.remove(hostname);
        }
    }

    fn tracked_hosts(&self) -> usize {
        lock(&self.host_locks).len()
    }

    fn fetch_pin(&self, hostname: &str) -> PinState {
        tracing::info!("Running token fetch to get pin for {}", hostname);

        let fetch = self.provider.fetch_token_and_wait(hostname);
        if !fetch.is_success() {
            tracing::error!("Cannot fetch a pin for {}", hostname);
            return PinState::Rejected(PinError::FetchFailed {
                host: hostname.to_string(),
            });
        }

        match self.provider.cached_pin(hostname) {
            Some(pin) => PinState::Cached(pin),
            None => {
                tracing::error!("Token fetch succeeded but no pin is cached for {}", hostname);
                PinState::Rejected(PinError::Missing {
                    host: hostname.to_string(),
                })
            }
        }
    }

    fn compare(&self, hostname: &str, pin: &[u8], leaf_der: &[u8]) -> PinState {
        let pinned = match decode_pin(pin) {
            Ok(cert) => cert,
            Err(e) => {
                tracing::warn!(
                    "Failed to decode cached pin for {} - flushing pin cache: {}",
                    hostname,
                    e
                );
                self.provider.flush_pin_cache();
                return PinState::Rejected(PinError::Undecodable {
                    host: hostname.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let matches = match cert::decode_leaf(leaf_der) {
            Ok(leaf) => leaf == pinned,
            Err(e) => {
                tracing::warn!("Server leaf certificate for {} did not parse: {}", hostname, e);
                false
            }
        };

        if matches {
            tracing::info!(
                "Pinning check passed for {} ({})",
                hostname,
                short_fingerprint(leaf_der)
            );
            PinState::Verified
        } else {
            let pinned_fp = pinned
                .to_der()
                .map(|der| short_fingerprint(&der))
                .unwrap_or_default();
            tracing::warn!(
                "Certificates do not match for {} (server {}, pinned {}) - flushing pin cache",
                hostname,
                short_fingerprint(leaf_der),
                pinned_fp
            );
            self.provider.flush_pin_cache();
            PinState::Rejected(PinError::Mismatch {
                host: hostname.to_string(),
            })
        }
    }
}

/// Find a pin rejection anywhere in an error's source chain
///
/// Transports surface the verifier's failure wrapped in `rustls::Error`,
/// usually inside one or more `io::Error`s, sometimes under further
/// client-library layers.
pub fn find_pin_rejection(err: &(dyn StdError + 'static)) -> Option<PinError> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);

    while let Some(e) = current {
        if let Some(pin) = e.downcast_ref::<PinError>() {
            return Some(pin.clone());
        }
        if let Some(tls) = e.downcast_ref::<rustls::Error>() {
            if let Some(pin) = from_tls_error(tls) {
                return Some(pin);
            }
        }
        // io::Error::source() skips the wrapped error itself
        if let Some(inner) = e.downcast_ref::<std::io::Error>().and_then(|io| io.get_ref()) {
            let inner: &(dyn StdError + 'static) = inner;
            if let Some(pin) = find_pin_rejection(inner) {
                return Some(pin);
            }
        }
        current = e.source();
    }

    None
}

fn from_tls_error(err: &rustls::Error) -> Option<PinError> {
    match err {
        rustls::Error::InvalidCertificate(rustls::CertificateError::Other(other)) => {
            other.0.downcast_ref::<PinError>().cloned()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::TokenFetch;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    /// Provider double with a scripted remote pin and call counters
    struct ScriptedProvider {
        fetch_ok: bool,
        remote: Mutex<Option<Vec<u8>>>,
        cache: Mutex<Option<Vec<u8>>>,
        fetches: AtomicUsize,
        flushes: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(fetch_ok: bool, remote: Option<Vec<u8>>, cached: Option<Vec<u8>>) -> Self {
            Self {
                fetch_ok,
                remote: Mutex::new(remote),
                cache: Mutex::new(cached),
                fetches: AtomicUsize::new(0),
                flushes: AtomicUsize::new(0),
            }
        }
    }

    impl AttestationProvider for ScriptedProvider {
        fn fetch_token_and_wait(&self, _hostname: &str) -> TokenFetch {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.fetch_ok {
                return TokenFetch::failure();
            }
            *self.cache.lock().unwrap() = self.remote.lock().unwrap().clone();
            TokenFetch::success("token")
        }

        fn cached_pin(&self, _hostname: &str) -> Option<Vec<u8>> {
            self.cache.lock().unwrap().clone()
        }

        fn flush_pin_cache(&self) {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            *self.cache.lock().unwrap() = None;
        }
    }

    fn cert(name: &str) -> Vec<u8> {
        rcgen::generate_simple_self_signed(vec![name.to_string()])
            .unwrap()
            .cert
            .der()
            .to_vec()
    }

    fn checker(provider: &Arc<ScriptedProvider>) -> PinChecker {
        PinChecker::new(provider.clone())
    }

    #[test]
    fn test_cache_miss_triggers_exactly_one_fetch() {
        let leaf = cert("a.example");
        let provider = Arc::new(ScriptedProvider::new(true, Some(leaf.clone()), None));

        assert!(checker(&provider).verify("a.example", &leaf).is_ok());
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(provider.flushes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cache_miss_with_mismatch_still_fetches_once() {
        let leaf = cert("a.example");
        let provider = Arc::new(ScriptedProvider::new(true, Some(cert("other.example")), None));

        let err = checker(&provider).verify("a.example", &leaf).unwrap_err();
        assert!(matches!(err, PinError::Mismatch { .. }));
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cached_pin_skips_fetch() {
        let leaf = cert("a.example");
        let provider = Arc::new(ScriptedProvider::new(true, None, Some(leaf.clone())));

        assert!(checker(&provider).verify("a.example", &leaf).is_ok());
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reflexive_match() {
        let leaf = cert("self.example");
        let provider = Arc::new(ScriptedProvider::new(true, None, Some(leaf.clone())));
        let checker = checker(&provider);

        for _ in 0..3 {
            assert!(checker.verify("self.example", &leaf).is_ok());
        }
    }

    #[test]
    fn test_mismatch_flushes_once() {
        let provider = Arc::new(ScriptedProvider::new(true, None, Some(cert("stale.example"))));

        let err = checker(&provider)
            .verify("a.example", &cert("a.example"))
            .unwrap_err();

        assert_eq!(
            err,
            PinError::Mismatch {
                host: "a.example".to_string()
            }
        );
        assert_eq!(provider.flushes.load(Ordering::SeqCst), 1);
        assert!(provider.cached_pin("a.example").is_none());
    }

    #[test]
    fn test_fetch_failure_rejects_without_flush() {
        let provider = Arc::new(ScriptedProvider::new(false, None, None));

        let err = checker(&provider)
            .verify("a.example", &cert("a.example"))
            .unwrap_err();

        assert!(matches!(err, PinError::FetchFailed { .. }));
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(provider.flushes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fetch_success_without_pin_rejects() {
        let provider = Arc::new(ScriptedProvider::new(true, None, None));

        let err = checker(&provider)
            .verify("a.example", &cert("a.example"))
            .unwrap_err();
        assert!(matches!(err, PinError::Missing { .. }));
    }

    #[test]
    fn test_undecodable_pin_flushes() {
        let provider = Arc::new(ScriptedProvider::new(true, None, Some(b"garbage".to_vec())));

        let err = checker(&provider)
            .verify("a.example", &cert("a.example"))
            .unwrap_err();

        assert!(matches!(err, PinError::Undecodable { .. }));
        assert_eq!(provider.flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unparseable_leaf_is_mismatch() {
        let provider = Arc::new(ScriptedProvider::new(true, None, Some(cert("a.example"))));

        let err = checker(&provider).verify("a.example", b"junk").unwrap_err();
        assert!(matches!(err, PinError::Mismatch { .. }));
        assert_eq!(provider.flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_host_locks_released_after_check() {
        let leaf = cert("a.example");
        let provider = Arc::new(ScriptedProvider::new(true, Some(leaf.clone()), None));
        let checker = checker(&provider);

        checker.verify("a.example", &leaf).unwrap();
        let _ = checker.verify("b.example", &leaf);

        assert_eq!(checker.tracked_hosts(), 0);
    }

    /// Provider whose fetch parks until released, counting cache reads
    struct GatedProvider {
        pin: Vec<u8>,
        cache: Mutex<Option<Vec<u8>>>,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
        reads: AtomicUsize,
        fetches: AtomicUsize,
        flushes: AtomicUsize,
    }

    impl AttestationProvider for GatedProvider {
        fn fetch_token_and_wait(&self, _hostname: &str) -> TokenFetch {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            *self.cache.lock().unwrap() = Some(self.pin.clone());
            TokenFetch::success("token")
        }

        fn cached_pin(&self, _hostname: &str) -> Option<Vec<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.cache.lock().unwrap().clone()
        }

        fn flush_pin_cache(&self) {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            *self.cache.lock().unwrap() = None;
        }
    }

    #[test]
    fn test_checks_for_same_host_are_serialized() {
        let leaf = cert("a.example");
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let provider = Arc::new(GatedProvider {
            pin: leaf.clone(),
            cache: Mutex::new(None),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
            reads: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
        });
        let checker = Arc::new(PinChecker::new(provider.clone()));

        let first = {
            let (checker, leaf) = (checker.clone(), leaf.clone());
            thread::spawn(move || checker.verify("a.example", &leaf))
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let second = {
            let (checker, leaf) = (checker.clone(), leaf.clone());
            thread::spawn(move || checker.verify("a.example", &leaf))
        };
        thread::sleep(Duration::from_millis(200));

        // The second check is parked on the host lock behind the first fetch
        assert_eq!(provider.reads.load(Ordering::SeqCst), 1);
        assert_eq!(provider.flushes.load(Ordering::SeqCst), 0);

        release_tx.send(()).unwrap();
        assert!(first.join().unwrap().is_ok());
        assert!(second.join().unwrap().is_ok());

        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(provider.flushes.load(Ordering::SeqCst), 0);
        assert_eq!(checker.tracked_hosts(), 0);
    }

    #[test]
    fn test_find_pin_rejection_through_io_error() {
        let pin = PinError::Mismatch {
            host: "a.example".to_string(),
        };
        let tls = rustls::Error::InvalidCertificate(rustls::CertificateError::Other(
            rustls::OtherError(Arc::new(pin.clone())),
        ));
        let io = std::io::Error::new(std::io::ErrorKind::InvalidData, tls);

        assert_eq!(find_pin_rejection(&io), Some(pin));

        let unrelated = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(find_pin_rejection(&unrelated), None);
    }

    /// Client-library error whose source is a boxed connector error
    #[derive(Debug)]
    struct ConnectError(Box<dyn StdError + Send + Sync>);

    impl std::fmt::Display for ConnectError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "client error (Connect)")
        }
    }

    impl StdError for ConnectError {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&*self.0)
        }
    }

    #[test]
    fn test_find_pin_rejection_through_nested_io_errors() {
        let pin = PinError::FetchFailed {
            host: "a.example".to_string(),
        };
        let tls = rustls::Error::InvalidCertificate(rustls::CertificateError::Other(
            rustls::OtherError(Arc::new(pin.clone())),
        ));
        let handshake = std::io::Error::new(std::io::ErrorKind::InvalidData, tls);
        let connector = std::io::Error::new(std::io::ErrorKind::Other, handshake);
        let client = ConnectError(Box::new(connector));

        assert_eq!(find_pin_rejection(&client), Some(pin));
    }
}
