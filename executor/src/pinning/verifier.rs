use super::PinChecker;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, OtherError, SignatureScheme};
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};

/// Certificate verifier enforcing WebPKI validation and then the dynamic pin
///
/// The pin check only runs once the usual chain and hostname verification
/// has passed, so it can only tighten what the delegate accepts.
#[derive(Debug)]
pub struct DynamicPinningVerifier {
    delegate: Arc<WebPkiServerVerifier>,
    checker: Arc<PinChecker>,
}

impl DynamicPinningVerifier {
    pub fn new(delegate: Arc<WebPkiServerVerifier>, checker: Arc<PinChecker>) -> Self {
        Self { delegate, checker }
    }
}

impl ServerCertVerifier for DynamicPinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.delegate
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
            .inspect_err(|e| tracing::warn!("Delegate verification failed for {:?}: {}", server_name, e))?;

        let hostname = server_name.to_str();
        let leaf = end_entity.as_ref();

        run_blocking(|| self.checker.verify(&hostname, leaf)).map_err(|e| {
            rustls::Error::InvalidCertificate(CertificateError::Other(OtherError(Arc::new(e))))
        })?;

        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.delegate.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.delegate.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.delegate.supported_verify_schemes()
    }
}

/// The pin check may block on a provider fetch. On a multi-threaded runtime
/// hand the worker thread over while it does; elsewhere just run it.
fn run_blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}
