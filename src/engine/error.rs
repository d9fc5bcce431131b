//! Error types for the admission engine.
//!
//! Validation failures are data, not errors; they travel inside
//! [`AdmissionDecision`](super::AdmissionDecision). Only conditions that stop
//! the engine from producing a decision at all live here.

use thiserror::Error;

/// Error type for engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// A patch addressed a path whose parent has the wrong shape.
    /// This points at an evaluator bug, not at the admitted pod.
    #[error("Malformed patch target {path}: {reason}")]
    MalformedPatchTarget { path: String, reason: String },

    /// No cluster-wide default policy is available
    #[error("Unresolvable policy configuration: {0}")]
    UnresolvableConfig(String),

    /// Pod document could not be converted
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A patch could not be applied to a pod document
    #[error("Patch error: {0}")]
    Patch(#[from] json_patch::PatchError),
}

impl Error {
    /// Short machine-readable kind, used as a metric label and denial reason
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MalformedPatchTarget { .. } => "MalformedPatchTarget",
            Error::UnresolvableConfig(_) => "UnresolvableConfig",
            Error::Serialization(_) => "Serialization",
            Error::Patch(_) => "Patch",
        }
    }

    /// Whether this error reflects missing configuration rather than a bug
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::UnresolvableConfig(_))
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;
