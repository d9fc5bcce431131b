//! Evaluator results, validation failures, and the admission decision.

use std::fmt;

use json_patch::PatchOperation;

use super::resolver::EffectivePolicy;

/// Whether the engine corrects pods or only reports on them
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdmissionMode {
    Mutate,
    Validate,
}

impl fmt::Display for AdmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionMode::Mutate => write!(f, "mutate"),
            AdmissionMode::Validate => write!(f, "validate"),
        }
    }
}

/// One control's deviation from the resolved policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationFailure {
    /// Control that reported the failure
    pub control: String,
    /// Pod field the failure refers to
    pub path: String,
    /// Human-readable explanation
    pub message: String,
}

impl ValidationFailure {
    pub fn new(
        control: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            control: control.into(),
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Outcome of running one evaluator
#[derive(Clone, Debug, PartialEq)]
pub enum EvaluatorResult {
    NoAction,
    Patch(Vec<PatchOperation>),
    Reject(Vec<ValidationFailure>),
}

impl EvaluatorResult {
    /// `Patch` for a non-empty list, otherwise `NoAction`
    pub fn patch(ops: Vec<PatchOperation>) -> Self {
        if ops.is_empty() {
            EvaluatorResult::NoAction
        } else {
            EvaluatorResult::Patch(ops)
        }
    }

    /// `Reject` for a non-empty list, otherwise `NoAction`
    pub fn reject(failures: Vec<ValidationFailure>) -> Self {
        if failures.is_empty() {
            EvaluatorResult::NoAction
        } else {
            EvaluatorResult::Reject(failures)
        }
    }

    pub fn is_no_action(&self) -> bool {
        matches!(self, EvaluatorResult::NoAction)
    }
}

/// Collect every rejection across evaluators, in evaluator order.
pub fn aggregate<'a>(results: impl IntoIterator<Item = &'a EvaluatorResult>) -> Vec<ValidationFailure> {
    results
        .into_iter()
        .filter_map(|result| match result {
            EvaluatorResult::Reject(failures) => Some(failures.iter().cloned()),
            _ => None,
        })
        .flatten()
        .collect()
}

/// The engine's answer to one admission request.
///
/// A decision is either a mutation (no failures) or a validation verdict
/// (no patch), never both.
#[derive(Clone, Debug, PartialEq)]
pub struct AdmissionDecision {
    /// Request correlation id
    pub uid: String,
    pub mode: AdmissionMode,
    pub allowed: bool,
    pub patch: Vec<PatchOperation>,
    pub failures: Vec<ValidationFailure>,
    /// Resolved policy the decision was made against
    pub policy: EffectivePolicy,
}

impl AdmissionDecision {
    /// Mutation decision: always allowed
    pub fn mutated(uid: impl Into<String>, patch: Vec<PatchOperation>, policy: EffectivePolicy) -> Self {
        Self {
            uid: uid.into(),
            mode: AdmissionMode::Mutate,
            allowed: true,
            patch,
            failures: Vec::new(),
            policy,
        }
    }

    /// Validation decision: allowed when nothing failed
    pub fn validated(
        uid: impl Into<String>,
        failures: Vec<ValidationFailure>,
        policy: EffectivePolicy,
    ) -> Self {
        Self {
            uid: uid.into(),
            mode: AdmissionMode::Validate,
            allowed: failures.is_empty(),
            patch: Vec::new(),
            failures,
            policy,
        }
    }

    /// All failure messages joined into one status message
    pub fn status_message(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        Some(
            self.failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
