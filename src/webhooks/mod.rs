//! Mutating admission webhook.
//!
//! - `review`: admission.k8s.io/v1 wire types
//! - `policies`: decision logic plugged into the handler
//! - `server`: review protocol handler and TLS transport

pub mod policies;
pub mod review;
mod server;

pub use policies::{AdmissionPolicy, RemoveResources};
pub use review::{AdmissionRequest, AdmissionResponse, AdmissionReview};
pub use server::{
    Verdict, WebhookState, create_webhook_router, handle_review, run_webhook_server,
    tls_server_config,
};
