//! Error types for the webhook.
//!
//! Errors are split by where they surface: certificate errors fail a single
//! TLS handshake, protocol errors fail a single HTTP call, and [`Error`] is
//! fatal to the process at startup.

use std::path::PathBuf;

use axum::http::StatusCode;
use thiserror::Error;

/// Failure to produce a TLS identity for a handshake
#[derive(Error, Debug)]
pub enum CertError {
    /// Could not stat a certificate or key file
    #[error("failed checking modification time of {}: {source}", .path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not read a certificate or key file
    #[error("failed reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// PEM content could not be parsed
    #[error("failed parsing {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    /// The private key type is not supported by the crypto provider
    #[error("unsupported private key in {}: {source}", .path.display())]
    UnsupportedKey {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },

    /// Private key does not belong to the leaf certificate
    #[error("private key {} does not match certificate {}: {source}", .key_path.display(), .cert_path.display())]
    KeyMismatch {
        cert_path: PathBuf,
        key_path: PathBuf,
        #[source]
        source: rustls::Error,
    },

    /// Cache lock was poisoned by a panicking handshake
    #[error("certificate cache lock poisoned")]
    LockPoisoned,
}

/// Failure to process a single admission review call
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Content-Type header missing or not JSON
    #[error("expect content type application/json but got {0}")]
    ContentType(String),

    /// Body is not a decodable object
    #[error("decoding request failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// Body decoded to something other than an admission review
    #[error("expected admission.k8s.io/v1 AdmissionReview but got {api_version} {kind}")]
    UnexpectedKind { api_version: String, kind: String },

    /// Admission review carries no request
    #[error("admission review carries no request")]
    MissingRequest,

    /// Response envelope could not be serialized
    #[error("encoding response failed: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    /// HTTP status returned to the caller for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProtocolError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProtocolError::ContentType(_)
            | ProtocolError::Decode(_)
            | ProtocolError::UnexpectedKind { .. }
            | ProtocolError::MissingRequest => StatusCode::BAD_REQUEST,
        }
    }

    /// Body written with the status; encode failures do not leak details
    pub fn public_message(&self) -> String {
        match self {
            ProtocolError::Encode(_) => "internal server error".to_string(),
            ProtocolError::Decode(_) => "decoding request failed".to_string(),
            other => other.to_string(),
        }
    }
}

/// Fatal process-level error
#[derive(Error, Debug)]
pub enum Error {
    /// In-cluster service account credentials are unavailable
    #[error("unable to load in-cluster config: {0}")]
    ClusterCredentials(#[from] kube::config::InClusterError),

    /// TLS server configuration could not be built
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[from] rustls::Error),

    /// Listener bind or serve failure
    #[error("webhook server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Result type alias for process-level operations
pub type Result<T> = std::result::Result<T, Error>;
