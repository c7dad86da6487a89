//! Hot-reloading TLS identity for the webhook listener.
//!
//! The loader is installed as the rustls certificate resolver, so it runs on
//! every new handshake. It stats the certificate and key files and rebuilds
//! the identity when either modification time has advanced past the one
//! recorded at the last load. Rotating the mounted secret on disk is enough
//! for the next handshake to serve the new certificate.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use prometheus_client::metrics::counter::Counter;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use tracing::{debug, error, info};

use crate::error::CertError;
use crate::health::Metrics;

/// Modification times of the identity files at load time
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FileStamp {
    cert_modified: SystemTime,
    key_modified: SystemTime,
}

impl FileStamp {
    fn read(cert_path: &Path, key_path: &Path) -> Result<Self, CertError> {
        Ok(Self {
            cert_modified: modified(cert_path)?,
            key_modified: modified(key_path)?,
        })
    }

    /// True if either file changed after `other` was taken
    fn is_newer_than(&self, other: &FileStamp) -> bool {
        self.cert_modified > other.cert_modified || self.key_modified > other.key_modified
    }
}

/// Identity plus the stamp it was built from. Replaced wholesale on reload.
struct CachedIdentity {
    key: Arc<CertifiedKey>,
    stamp: FileStamp,
}

/// Counters fed into the Prometheus registry
struct LoaderMetrics {
    loads: Counter,
    errors: Counter,
}

/// Lazily loads and caches the webhook's TLS identity
pub struct CertLoader {
    cert_path: PathBuf,
    key_path: PathBuf,
    cache: RwLock<Option<CachedIdentity>>,
    loads: AtomicU64,
    metrics: Option<LoaderMetrics>,
}

impl fmt::Debug for CertLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertLoader")
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .field("loads", &self.load_count())
            .finish()
    }
}

impl CertLoader {
    /// Create a loader; nothing is read until the first handshake
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            cache: RwLock::new(None),
            loads: AtomicU64::new(0),
            metrics: None,
        }
    }

    /// Report loads and load failures to the given metrics
    pub fn with_metrics(mut self, metrics: &Metrics) -> Self {
        self.metrics = Some(LoaderMetrics {
            loads: metrics.certificate_loads.clone(),
            errors: metrics.certificate_load_errors.clone(),
        });
        self
    }

    /// Number of times the identity has been successfully read from disk
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Return the current identity, reloading it if the files changed.
    ///
    /// A failed reload leaves the previously cached identity in place and
    /// returns the error; the next call tries again.
    pub fn get_certificate(&self) -> Result<Arc<CertifiedKey>, CertError> {
        let stamp = FileStamp::read(&self.cert_path, &self.key_path)?;

        {
            let cache = self.cache.read().map_err(|_| CertError::LockPoisoned)?;
            if let Some(cached) = cache.as_ref() {
                if !stamp.is_newer_than(&cached.stamp) {
                    return Ok(Arc::clone(&cached.key));
                }
            }
        }

        let mut cache = self.cache.write().map_err(|_| CertError::LockPoisoned)?;
        // Another handshake may have reloaded while we waited for the lock
        if let Some(cached) = cache.as_ref() {
            if !stamp.is_newer_than(&cached.stamp) {
                return Ok(Arc::clone(&cached.key));
            }
        }

        match load_identity(&self.cert_path, &self.key_path) {
            Ok(key) => {
                let key = Arc::new(key);
                *cache = Some(CachedIdentity {
                    key: Arc::clone(&key),
                    stamp,
                });
                self.loads.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.loads.inc();
                }
                info!(
                    cert = %self.cert_path.display(),
                    key = %self.key_path.display(),
                    chain_len = key.cert.len(),
                    "Loaded TLS identity"
                );
                Ok(key)
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.errors.inc();
                }
                Err(e)
            }
        }
    }
}

impl ResolvesServerCert for CertLoader {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        match self.get_certificate() {
            Ok(key) => {
                debug!(sni = ?client_hello.server_name(), "Resolved TLS identity");
                Some(key)
            }
            Err(e) => {
                error!(error = %e, "Refusing TLS handshake");
                None
            }
        }
    }
}

fn modified(path: &Path) -> Result<SystemTime, CertError> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|source| CertError::Stat {
            path: path.to_path_buf(),
            source,
        })
}

fn read(path: &Path) -> Result<Vec<u8>, CertError> {
    fs::read(path).map_err(|source| CertError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a PEM certificate chain and private key into a signing identity.
///
/// The key must match the public key of the leaf certificate.
fn load_identity(cert_path: &Path, key_path: &Path) -> Result<CertifiedKey, CertError> {
    let cert_pem = read(cert_path)?;
    let chain = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CertError::Parse {
            path: cert_path.to_path_buf(),
            message: e.to_string(),
        })?;
    if chain.is_empty() {
        return Err(CertError::Parse {
            path: cert_path.to_path_buf(),
            message: "no certificate found".to_string(),
        });
    }

    let key_pem = read(key_path)?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|e| CertError::Parse {
            path: key_path.to_path_buf(),
            message: e.to_string(),
        })?
        .ok_or_else(|| CertError::Parse {
            path: key_path.to_path_buf(),
            message: "no private key found".to_string(),
        })?;

    let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key).map_err(
        |source| CertError::UnsupportedKey {
            path: key_path.to_path_buf(),
            source,
        },
    )?;

    let identity = CertifiedKey::new(chain, signing_key);
    match identity.keys_match() {
        // Key types without a derivable public key cannot be compared
        Ok(()) | Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => {
            Ok(identity)
        }
        Err(source) => Err(CertError::KeyMismatch {
            cert_path: cert_path.to_path_buf(),
            key_path: key_path.to_path_buf(),
            source,
        }),
    }
}
