//! kube-resourceless library crate
//!
//! A mutating admission webhook that removes resource requests and limits
//! from every container of newly created pods. The TLS identity is reloaded
//! from disk whenever the mounted certificate files change.

pub mod certs;
pub mod config;
pub mod error;
pub mod health;
pub mod webhooks;

pub use certs::CertLoader;
pub use config::{
    DEFAULT_CERT_PATH, DEFAULT_KEY_PATH, HEALTH_PORT, MUTATE_PATH, WEBHOOK_PORT, WebhookConfig,
    cluster_credentials,
};
pub use error::{CertError, Error, ProtocolError, Result};
pub use health::{HealthState, run_health_server};
pub use webhooks::{
    AdmissionPolicy, AdmissionRequest, AdmissionResponse, AdmissionReview, RemoveResources,
    run_webhook_server,
};
