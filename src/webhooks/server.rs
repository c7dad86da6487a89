//! Admission webhook server.
//!
//! Serves the review protocol on a single POST route over TLS. The TLS
//! identity is resolved per handshake by [`CertLoader`], so rotating the
//! certificate files on disk needs no restart.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::post,
};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use tracing::{debug, error, info};

use crate::certs::CertLoader;
use crate::config::{MUTATE_PATH, WebhookConfig};
use crate::error::{ProtocolError, Result};
use crate::health::{HealthState, ReviewOutcome};
use crate::webhooks::policies::AdmissionPolicy;
use crate::webhooks::review::decode_review;

const JSON_MEDIA_TYPE: &str = "application/json";

/// Shared state for webhook handlers
pub struct WebhookState<P> {
    pub policy: P,
    pub health: Arc<HealthState>,
}

impl<P: AdmissionPolicy> WebhookState<P> {
    pub fn new(policy: P, health: Arc<HealthState>) -> Self {
        Self { policy, health }
    }
}

/// Encoded reply to one review
#[derive(Debug)]
pub struct Verdict {
    pub uid: String,
    pub allowed: bool,
    pub body: Vec<u8>,
}

fn check_content_type(content_type: Option<&str>) -> std::result::Result<(), ProtocolError> {
    let value = content_type.unwrap_or_default();
    let essence = value.split(';').next().unwrap_or_default().trim();
    if essence.eq_ignore_ascii_case(JSON_MEDIA_TYPE) {
        Ok(())
    } else {
        Err(ProtocolError::ContentType(value.to_string()))
    }
}

/// Run one review through `policy` and encode the reply envelope.
///
/// The reply always carries the request uid regardless of what the policy
/// put in its response.
pub fn handle_review<P: AdmissionPolicy + ?Sized>(
    policy: &P,
    content_type: Option<&str>,
    body: &[u8],
) -> std::result::Result<Verdict, ProtocolError> {
    check_content_type(content_type)?;

    debug!(body = %String::from_utf8_lossy(body), "Handling admission request");
    let review = decode_review(body)?;
    let request = review.request.as_ref().ok_or(ProtocolError::MissingRequest)?;

    let mut response = policy.admit(request);
    response.uid = request.uid.clone();
    let uid = response.uid.clone();
    let allowed = response.allowed;

    let reply = review.respond(response);
    debug!(response = ?reply, "Sending admission response");
    let body = serde_json::to_vec(&reply).map_err(ProtocolError::Encode)?;

    Ok(Verdict { uid, allowed, body })
}

/// Admission review route
async fn review<P: AdmissionPolicy>(
    State(state): State<Arc<WebhookState<P>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());

    let (outcome, response) = match handle_review(&state.policy, content_type, &body) {
        Ok(verdict) => {
            info!(
                uid = %verdict.uid,
                policy = state.policy.name(),
                allowed = verdict.allowed,
                "Admission request reviewed"
            );
            let outcome = if verdict.allowed {
                ReviewOutcome::Allowed
            } else {
                ReviewOutcome::Denied
            };
            (
                outcome,
                (StatusCode::OK, [(CONTENT_TYPE, JSON_MEDIA_TYPE)], verdict.body).into_response(),
            )
        }
        Err(e) => {
            error!(error = %e, status = %e.status_code(), "Admission review failed");
            (
                ReviewOutcome::Rejected,
                (e.status_code(), e.public_message()).into_response(),
            )
        }
    };

    state
        .health
        .metrics
        .record_review(outcome, started.elapsed().as_secs_f64());
    response
}

/// Create the webhook router
pub fn create_webhook_router<P: AdmissionPolicy>(state: Arc<WebhookState<P>>) -> Router {
    Router::new()
        .route(MUTATE_PATH, post(review::<P>))
        .with_state(state)
}

/// rustls server configuration resolving the identity through `loader`
pub fn tls_server_config(loader: Arc<CertLoader>) -> Result<Arc<rustls::ServerConfig>> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(loader);
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Run the webhook server with TLS
///
/// Binds to `config.addr` and serves [`MUTATE_PATH`] with `policy`. Readiness
/// is reported through `health` once the listener is bound. Returns when the
/// listener fails or `handle` is shut down.
pub async fn run_webhook_server<P: AdmissionPolicy>(
    config: &WebhookConfig,
    policy: P,
    health: Arc<HealthState>,
    handle: Handle,
) -> Result<()> {
    let loader = Arc::new(
        CertLoader::new(&config.cert_path, &config.key_path).with_metrics(&health.metrics),
    );
    let tls_config = RustlsConfig::from_config(tls_server_config(loader)?);

    info!(
        policy = policy.name(),
        cert = %config.cert_path.display(),
        key = %config.key_path.display(),
        "Starting webhook server"
    );
    let app = create_webhook_router(Arc::new(WebhookState::new(policy, health.clone())));

    let readiness = {
        let handle = handle.clone();
        let health = health.clone();
        tokio::spawn(async move {
            if let Some(addr) = handle.listening().await {
                info!(addr = %addr, path = MUTATE_PATH, "Webhook server listening with TLS");
                health.set_ready(true).await;
            }
        })
    };

    let served = axum_server::bind_rustls(config.addr, tls_config)
        .handle(handle)
        .serve(app.into_make_service())
        .await;

    readiness.abort();
    health.set_ready(false).await;
    served?;
    Ok(())
}
