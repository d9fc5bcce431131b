//! Service account token automount policy.
//!
//! With `disableDefaultServiceAccount` the control covers pods running as the
//! `default` service account; with `disableAll` it covers every pod.
//!
//! Mutate: sets `spec.automountServiceAccountToken: false` when the pod leaves
//! it unset. An explicit `true` is respected.
//!
//! Validate: covered pods must set the field to `false`.

use serde_json::Value;

use super::{Control, EvaluationContext};
use crate::crd::TokenAutomount;
use crate::engine::{DEFAULT_SERVICE_ACCOUNT, EvaluatorResult, ValidationFailure, patch};

/// Control name
pub const NAME: &str = "automount-service-account-token";

const FAILURE_PATH: &str = "spec.automountServiceAccountToken";

pub const CONTROL: Control = Control {
    name: NAME,
    mutate,
    validate,
};

/// Whether the resolved policy covers this pod
fn covers(ctx: &EvaluationContext<'_>) -> bool {
    match ctx.policy.token_automount.value {
        TokenAutomount::Allow => false,
        TokenAutomount::DisableDefaultServiceAccount => {
            ctx.pod.service_account_name() == DEFAULT_SERVICE_ACCOUNT
        }
        TokenAutomount::DisableAll => true,
    }
}

/// Disable token automount where the pod leaves it unset
pub fn mutate(ctx: &EvaluationContext<'_>) -> EvaluatorResult {
    if !covers(ctx) || ctx.pod.automount_service_account_token().is_some() {
        return EvaluatorResult::NoAction;
    }

    EvaluatorResult::Patch(vec![patch::add(
        ["spec", "automountServiceAccountToken"],
        Value::Bool(false),
    )])
}

/// Require token automount to be disabled
pub fn validate(ctx: &EvaluationContext<'_>) -> EvaluatorResult {
    if !covers(ctx) || ctx.pod.automount_service_account_token() == Some(false) {
        return EvaluatorResult::NoAction;
    }

    let message = match ctx.policy.token_automount.value {
        TokenAutomount::DisableDefaultServiceAccount => format!(
            "automount of the token for service account '{}' is not allowed",
            DEFAULT_SERVICE_ACCOUNT
        ),
        _ => "automount of service account tokens is not allowed".to_string(),
    };
    EvaluatorResult::Reject(vec![ValidationFailure::new(NAME, FAILURE_PATH, message)])
}
