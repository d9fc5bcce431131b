//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 once policy configuration has synced)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

use crate::engine::{AdmissionDecision, AdmissionMode, Error};

/// Default health server port
pub const HEALTH_PORT: u16 = 8080;

/// Labels for admission outcome metrics (mode + outcome)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct AdmissionLabels {
    pub mode: String,
    pub outcome: String,
}

impl EncodeLabelSet for AdmissionLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("mode", self.mode.as_str()).encode(encoder.encode_label())?;
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for mode-only metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ModeLabels {
    pub mode: String,
}

impl EncodeLabelSet for ModeLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("mode", self.mode.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for per-control failure metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ControlLabels {
    pub control: String,
}

impl EncodeLabelSet for ControlLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("control", self.control.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for configuration error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ErrorLabels {
    pub kind: String,
}

impl EncodeLabelSet for ErrorLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Admission outcome label values
const OUTCOME_ALLOWED: &str = "allowed";
const OUTCOME_PATCHED: &str = "patched";
const OUTCOME_DENIED: &str = "denied";
const OUTCOME_ERROR: &str = "error";

/// Shared metrics for the webhook
pub struct Metrics {
    /// Admission requests by mode and outcome
    pub admissions_total: Family<AdmissionLabels, Counter>,
    /// Patch operations emitted in mutate mode
    pub patch_operations_total: Counter,
    /// Validation failures by control
    pub validation_failures_total: Family<ControlLabels, Counter>,
    /// Decision latency histogram
    pub admission_duration_seconds: Family<ModeLabels, Histogram>,
    /// Engine errors by kind
    pub config_errors_total: Family<ErrorLabels, Counter>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let admissions_total = Family::<AdmissionLabels, Counter>::default();
        registry.register(
            "podguard_admissions",
            "Total number of admission decisions",
            admissions_total.clone(),
        );

        let patch_operations_total = Counter::default();
        registry.register(
            "podguard_patch_operations",
            "Total number of patch operations emitted",
            patch_operations_total.clone(),
        );

        let validation_failures_total = Family::<ControlLabels, Counter>::default();
        registry.register(
            "podguard_validation_failures",
            "Total number of validation failures by control",
            validation_failures_total.clone(),
        );

        // Decisions are in-memory, so buckets start at 10us
        let admission_duration_seconds =
            Family::<ModeLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.00001, 2.0, 15))
            });
        registry.register(
            "podguard_admission_duration_seconds",
            "Duration of admission decisions in seconds",
            admission_duration_seconds.clone(),
        );

        let config_errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "podguard_config_errors",
            "Total number of admission requests that failed to produce a decision",
            config_errors_total.clone(),
        );

        Self {
            admissions_total,
            patch_operations_total,
            validation_failures_total,
            admission_duration_seconds,
            config_errors_total,
            registry,
        }
    }

    fn observe(&self, mode: AdmissionMode, outcome: &str, duration_secs: f64) {
        let labels = AdmissionLabels {
            mode: mode.to_string(),
            outcome: outcome.to_string(),
        };
        self.admissions_total.get_or_create(&labels).inc();
        self.admission_duration_seconds
            .get_or_create(&ModeLabels {
                mode: mode.to_string(),
            })
            .observe(duration_secs);
    }

    /// Record a completed decision
    pub fn record_decision(&self, decision: &AdmissionDecision, duration_secs: f64) {
        let outcome = if !decision.allowed {
            OUTCOME_DENIED
        } else if decision.patch.is_empty() {
            OUTCOME_ALLOWED
        } else {
            OUTCOME_PATCHED
        };
        self.observe(decision.mode, outcome, duration_secs);

        self.patch_operations_total
            .inc_by(decision.patch.len() as u64);
        for failure in &decision.failures {
            self.validation_failures_total
                .get_or_create(&ControlLabels {
                    control: failure.control.clone(),
                })
                .inc();
        }
    }

    /// Record a request the engine could not decide
    pub fn record_engine_error(&self, mode: AdmissionMode, error: &Error, duration_secs: f64) {
        self.observe(mode, OUTCOME_ERROR, duration_secs);
        self.config_errors_total
            .get_or_create(&ErrorLabels {
                kind: error.kind().to_string(),
            })
            .inc();
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the policy configuration caches have synced
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    /// Mark the webhook as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the webhook is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 200 OK once both configuration caches have synced.
/// Returns 503 Service Unavailable before that.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server
///
/// Binds to 0.0.0.0:8080 and serves health/metrics endpoints.
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], HEALTH_PORT));
    info!(port = HEALTH_PORT, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
