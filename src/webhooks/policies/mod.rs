//! Admission policies served by the webhook.
//!
//! A policy receives the decoded `request` of a review and returns the
//! decision. It must always return a well-formed response: internal failures
//! become denials, never HTTP errors. The server stamps the request uid onto
//! whatever the policy returns.

pub mod resources;

use crate::webhooks::review::{AdmissionRequest, AdmissionResponse};

pub use resources::RemoveResources;

/// Decision logic plugged into the review protocol handler
pub trait AdmissionPolicy: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Decide on a single admission request
    fn admit(&self, request: &AdmissionRequest) -> AdmissionResponse;
}
