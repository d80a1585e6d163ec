use super::{AttestationProvider, TokenFetch};
use crate::error::{ExecutorError, Result};
use crate::lock;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// On-disk format for [`LocalDevProvider`]
///
/// ```json
/// {
///   "token": "eyJ0eXAiOiJKV1Qi...",
///   "pins": { "demo-server.example.com": "<base64 DER or PEM>" }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalDevProviderFile {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub pins: HashMap<String, String>,
}

/// Stand-in for a remote attestation service during local development
///
/// Holds a fixed token and the certificates the "remote" service would hand
/// out per host. Fetching copies the host's remote pin into the shared cache,
/// so the cache behaves as a read-through side effect of token fetches.
pub struct LocalDevProvider {
    token: Option<String>,
    remote_pins: Mutex<HashMap<String, Vec<u8>>>,
    cache: Mutex<HashMap<String, Vec<u8>>>,
}

impl std::fmt::Debug for LocalDevProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDevProvider")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("remote_hosts", &lock(&self.remote_pins).keys().collect::<Vec<_>>())
            .field("cached_hosts", &lock(&self.cache).keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LocalDevProvider {
    /// Provider that issues `token` for every host
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            remote_pins: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Provider whose token fetches always fail
    pub fn unavailable() -> Self {
        Self {
            token: None,
            remote_pins: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Add the certificate the remote service hands out for `hostname`
    pub fn with_remote_pin(self, hostname: impl Into<String>, cert: Vec<u8>) -> Self {
        self.set_remote_pin(hostname, cert);
        self
    }

    /// Replace the remote certificate for `hostname`, e.g. after a rotation.
    /// A pin already cached for the host is kept until the cache is flushed.
    pub fn set_remote_pin(&self, hostname: impl Into<String>, cert: Vec<u8>) {
        lock(&self.remote_pins).insert(hostname.into(), cert);
    }

    /// Load a provider from a JSON file in the [`LocalDevProviderFile`] format
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ExecutorError::Provider(format!(
                "Failed to read provider file {}: {}",
                path.display(),
                e
            ))
        })?;

        let file: LocalDevProviderFile = serde_json::from_str(&contents)?;
        Self::from_parts(file)
    }

    pub fn from_parts(file: LocalDevProviderFile) -> Result<Self> {
        let provider = match file.token {
            Some(token) => Self::new(token),
            None => Self::unavailable(),
        };

        for (host, encoded) in file.pins {
            let cert = BASE64.decode(encoded.trim())?;
            tracing::debug!("Loaded remote pin for {} ({} bytes)", host, cert.len());
            provider.set_remote_pin(host, cert);
        }

        Ok(provider)
    }
}

impl AttestationProvider for LocalDevProvider {
    fn fetch_token_and_wait(&self, hostname: &str) -> TokenFetch {
        let Some(token) = &self.token else {
            tracing::warn!("LOCAL DEV MODE: no token configured, failing fetch for {}", hostname);
            return TokenFetch::failure();
        };

        // Read-through: a pin already cached stays until flushed
        if let Some(cert) = lock(&self.remote_pins).get(hostname).cloned() {
            lock(&self.cache).entry(hostname.to_string()).or_insert(cert);
        }

        TokenFetch::success(token.clone())
    }

    fn cached_pin(&self, hostname: &str) -> Option<Vec<u8>> {
        lock(&self.cache).get(hostname).cloned()
    }

    fn flush_pin_cache(&self) {
        let mut cache = lock(&self.cache);
        tracing::debug!("Flushing {} cached pins", cache.len());
        cache.clear();
    }
}
