//! Admission webhook server.
//!
//! Provides HTTP endpoints for Kubernetes admission webhooks:
//! - `/mutate-pods` - MutatingWebhookConfiguration target
//! - `/validate-pods` - ValidatingWebhookConfiguration target
//!
//! To enable webhooks:
//! 1. Deploy cert-manager for TLS certificates
//! 2. Create the webhook configurations pointing at the service
//! 3. Mount the TLS certificate secret to the pod at /etc/webhook/certs/
//!
//! The webhook server starts automatically when certificates are present.

use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use kube::Resource;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::engine::{AdmissionDecision, AdmissionEngine, AdmissionMode, Error, PodSnapshot};
use crate::health::HealthState;

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 9443;

/// Denial reason for policy violations
const REASON_POLICY_VIOLATION: &str = "PolicyViolation";

/// Shared state for webhook handlers
pub struct WebhookState {
    pub engine: AdmissionEngine,
    pub health_state: Option<Arc<HealthState>>,
}

impl WebhookState {
    pub fn new(engine: AdmissionEngine, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            engine,
            health_state,
        }
    }
}

/// Create a denial response with reason embedded in message.
/// kube-rs deny() only sets status.message, so we format as "[reason] message"
fn deny_with_reason<T: Resource>(
    request: &AdmissionRequest<T>,
    message: &str,
    reason: &str,
) -> AdmissionReview<DynamicObject> {
    let full_message = format!("[{}] {}", reason, message);
    AdmissionResponse::from(request)
        .deny(full_message)
        .into_review()
}

/// Map an engine decision onto the admission response
fn decision_review(
    request: &AdmissionRequest<DynamicObject>,
    decision: &AdmissionDecision,
) -> AdmissionReview<DynamicObject> {
    if !decision.allowed {
        let message = decision
            .status_message()
            .unwrap_or_else(|| "Validation failed".to_string());
        return deny_with_reason(request, &message, REASON_POLICY_VIOLATION);
    }

    let response = AdmissionResponse::from(request);
    if decision.patch.is_empty() {
        return response.into_review();
    }

    match response.with_patch(json_patch::Patch(decision.patch.clone())) {
        Ok(response) => response.into_review(),
        Err(e) => {
            error!(uid = %decision.uid, error = %e, "Failed to serialize patch");
            deny_with_reason(
                request,
                &format!("patch serialization error: {}", e),
                "InternalError",
            )
        }
    }
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate-pods", post(mutate_pods))
        .route("/validate-pods", post(validate_pods))
        .with_state(state)
}

/// Mutating admission handler
async fn mutate_pods(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> impl IntoResponse {
    handle_review(&state, review, AdmissionMode::Mutate)
}

/// Validating admission handler
async fn validate_pods(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> impl IntoResponse {
    handle_review(&state, review, AdmissionMode::Validate)
}

fn handle_review(
    state: &WebhookState,
    review: AdmissionReview<DynamicObject>,
    mode: AdmissionMode,
) -> (StatusCode, Json<AdmissionReview<DynamicObject>>) {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to extract admission request");
            return (
                StatusCode::BAD_REQUEST,
                Json(
                    AdmissionResponse::invalid(format!("Invalid AdmissionReview: {}", e))
                        .into_review(),
                ),
            );
        }
    };

    let uid = &request.uid;
    debug!(
        uid = %uid,
        mode = %mode,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = %request.name,
        "Processing admission request"
    );

    // DELETE and CONNECT carry nothing to check
    if matches!(request.operation, Operation::Delete | Operation::Connect)
        || request.kind.kind != "Pod"
    {
        debug!(
            uid = %uid,
            kind = %request.kind.kind,
            "Admission request allowed (no pod to check)"
        );
        return (
            StatusCode::OK,
            Json(AdmissionResponse::from(&request).into_review()),
        );
    }

    // Most pod fields are immutable after creation, so only CREATE is mutated
    if mode == AdmissionMode::Mutate && !matches!(request.operation, Operation::Create) {
        debug!(uid = %uid, "Admission request allowed unchanged (mutation only on CREATE)");
        return (
            StatusCode::OK,
            Json(AdmissionResponse::from(&request).into_review()),
        );
    }

    let Some(object) = request.object.as_ref() else {
        error!(uid = %uid, "Missing object in request");
        return (
            StatusCode::OK,
            Json(deny_with_reason(
                &request,
                "Missing object in request",
                "InvalidRequest",
            )),
        );
    };

    // Pods created through controllers carry no namespace in their metadata
    let namespace = request
        .namespace
        .clone()
        .or_else(|| object.metadata.namespace.clone())
        .unwrap_or_else(|| "default".to_string());

    let snapshot = match serde_json::to_value(object)
        .map_err(Error::from)
        .and_then(PodSnapshot::from_document)
    {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to decode pod");
            return (
                StatusCode::OK,
                Json(deny_with_reason(&request, &e.to_string(), "InvalidRequest")),
            );
        }
    };

    let started = Instant::now();
    let result = state.engine.admit(&snapshot, &namespace, mode, uid);
    let elapsed = started.elapsed().as_secs_f64();

    let decision = match result {
        Ok(decision) => decision,
        Err(e) => {
            error!(
                uid = %uid,
                namespace = %namespace,
                mode = %mode,
                kind = e.kind(),
                error = %e,
                "Admission request denied (engine error)"
            );
            if let Some(ref health) = state.health_state {
                health.metrics.record_engine_error(mode, &e, elapsed);
            }
            let reason = if e.is_config_error() {
                e.kind()
            } else {
                "InternalError"
            };
            return (
                StatusCode::OK,
                Json(deny_with_reason(&request, &e.to_string(), reason)),
            );
        }
    };

    if let Some(ref health) = state.health_state {
        health.metrics.record_decision(&decision, elapsed);
    }

    let provenance = decision.policy.provenance();
    if decision.allowed {
        info!(
            uid = %uid,
            namespace = %namespace,
            pod = ?snapshot.name(),
            mode = %mode,
            patch_ops = decision.patch.len(),
            provenance = %provenance,
            "Admission request allowed"
        );
    } else {
        warn!(
            uid = %uid,
            namespace = %namespace,
            pod = ?snapshot.name(),
            mode = %mode,
            failures = decision.failures.len(),
            message = ?decision.status_message(),
            provenance = %provenance,
            "Admission request denied"
        );
    }

    (StatusCode::OK, Json(decision_review(&request, &decision)))
}

/// Errors that can occur when running the webhook server
#[derive(Debug, Error)]
pub enum WebhookError {
    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    /// Server error
    #[error("Webhook server error: {0}")]
    Server(String),
}

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0:9443 and serves the mutate and validate endpoints.
/// TLS certificates are loaded from the paths specified.
pub async fn run_webhook_server(
    engine: AdmissionEngine,
    health_state: Option<Arc<HealthState>>,
    cert_path: &str,
    key_path: &str,
) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let state = Arc::new(WebhookState::new(engine, health_state));
    let app = create_webhook_router(state);

    let config = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    info!(port = WEBHOOK_PORT, "Webhook server listening with TLS");

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}
