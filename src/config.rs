//! Process-wide webhook configuration.
//!
//! Built once in `main` and handed to the webhook and health servers.

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::Result;

/// Default path to the webhook TLS certificate
pub const DEFAULT_CERT_PATH: &str = "/etc/certs/tls.crt";
/// Default path to the webhook TLS private key
pub const DEFAULT_KEY_PATH: &str = "/etc/certs/tls.key";
/// Webhook server port
pub const WEBHOOK_PORT: u16 = 8443;
/// Health and metrics server port
pub const HEALTH_PORT: u16 = 8080;
/// Route serving the admission review protocol
pub const MUTATE_PATH: &str = "/mutate";

/// Immutable configuration shared by the servers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookConfig {
    /// PEM certificate chain served on every handshake
    pub cert_path: PathBuf,
    /// PEM private key matching `cert_path`
    pub key_path: PathBuf,
    /// TLS listener address
    pub addr: SocketAddr,
    /// Plain HTTP listener for probes and metrics
    pub health_addr: SocketAddr,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from(DEFAULT_CERT_PATH),
            key_path: PathBuf::from(DEFAULT_KEY_PATH),
            addr: SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT)),
            health_addr: SocketAddr::from(([0, 0, 0, 0], HEALTH_PORT)),
        }
    }
}

impl WebhookConfig {
    /// Configuration with custom certificate paths and default listeners
    pub fn with_certs(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ..Default::default()
        }
    }
}

/// Load the pod's service account credentials.
///
/// Only the in-cluster identity is accepted; a local kubeconfig is never
/// consulted, so running outside a pod fails.
pub fn cluster_credentials() -> Result<kube::Config> {
    Ok(kube::Config::incluster()?)
}
