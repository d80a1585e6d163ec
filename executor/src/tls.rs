//! TLS client configuration with dynamic pinning
//!
//! Every transport shares one `ClientConfig` whose certificate verifier runs
//! WebPKI validation followed by the dynamic pin check.

use crate::error::{ExecutorError, Result};
use crate::pinning::{DynamicPinningVerifier, PinChecker};
use rustls::client::{Resumption, WebPkiServerVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;

/// Crypto backend used for every TLS object built here
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Mozilla's root certificates
pub fn webpki_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    root_store
}

/// Root store holding only the given DER certificates
pub fn custom_root_store<'a, I>(roots: I) -> Result<RootCertStore>
where
    I: IntoIterator<Item = CertificateDer<'a>>,
{
    let mut root_store = RootCertStore::empty();
    for root in roots {
        root_store
            .add(root.into_owned())
            .map_err(|e| ExecutorError::Certificate(format!("Invalid root certificate: {}", e)))?;
    }
    Ok(root_store)
}

/// Build a client config whose verifier enforces the dynamic pin
pub fn pinned_client_config(
    roots: RootCertStore,
    checker: Arc<PinChecker>,
) -> Result<Arc<ClientConfig>> {
    let provider = crypto_provider();

    let delegate = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .map_err(|e| ExecutorError::Tls(format!("Failed to build certificate verifier: {}", e)))?;

    let verifier = DynamicPinningVerifier::new(delegate, checker);

    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    // Resumed sessions skip certificate verification, and with it the pin
    config.resumption = Resumption::disabled();

    Ok(Arc::new(config))
}
