//! Security controls applied to pods at admission.
//!
//! Each control is a module exposing a `mutate` and a `validate` function with
//! the same shape, registered in [`CATALOGUE`]. Controls are independent and
//! always run in catalogue order:
//! 1. seccomp profile
//! 2. service account token automount
//! 3. container privilege escalation
//!
//! Mutation only fills in settings the pod leaves unset. Validation reports
//! every deviation from the resolved policy, including unset values.

pub mod privilege_escalation;
pub mod seccomp;
pub mod service_account_token;

use crate::engine::{AdmissionMode, EffectivePolicy, EvaluatorResult, PodSnapshot};

/// Input to every evaluator
pub struct EvaluationContext<'a> {
    /// The pod being admitted
    pub pod: &'a PodSnapshot,
    /// Resolved policy for the pod's namespace
    pub policy: &'a EffectivePolicy,
}

/// Evaluator function shape shared by every control
pub type Evaluator = fn(&EvaluationContext<'_>) -> EvaluatorResult;

/// A named control with its two evaluation modes
pub struct Control {
    pub name: &'static str,
    pub mutate: Evaluator,
    pub validate: Evaluator,
}

impl Control {
    /// Run this control in the given mode
    pub fn evaluate(&self, ctx: &EvaluationContext<'_>, mode: AdmissionMode) -> EvaluatorResult {
        match mode {
            AdmissionMode::Mutate => (self.mutate)(ctx),
            AdmissionMode::Validate => (self.validate)(ctx),
        }
    }
}

/// Every control, in evaluation order
pub const CATALOGUE: &[Control] = &[
    seccomp::CONTROL,
    service_account_token::CONTROL,
    privilege_escalation::CONTROL,
];

/// Run all controls. Every control runs regardless of earlier results.
pub fn evaluate_all(ctx: &EvaluationContext<'_>, mode: AdmissionMode) -> Vec<EvaluatorResult> {
    CATALOGUE
        .iter()
        .map(|control| control.evaluate(ctx, mode))
        .collect()
}
