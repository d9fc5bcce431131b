//! Webhook module for pod admission.
//!
//! This module provides the admission controls and the HTTP surface:
//! - `policies`: one mutate/validate pair per control, in a fixed order
//! - `server`: mutating and validating endpoints backed by the engine

pub mod policies;
mod server;

pub use policies::{CATALOGUE, Control, EvaluationContext, evaluate_all};
pub use server::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, WebhookState,
    create_webhook_router, run_webhook_server,
};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
