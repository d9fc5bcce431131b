//! Container privilege escalation policy.
//!
//! Applies to init containers and regular containers when the resolved
//! policy is `deny`.
//!
//! Containers that are privileged or add `SYS_ADMIN` always escalate and the
//! API server rejects `allowPrivilegeEscalation: false` on them, so both modes
//! leave them out of scope.
//!
//! Mutate: sets `securityContext.allowPrivilegeEscalation: false` on each
//! in-scope container that leaves it unset.
//!
//! Validate: every in-scope container must set the field to `false`.

use k8s_openapi::api::core::v1::Container;
use serde_json::Value;

use super::{Control, EvaluationContext};
use crate::crd::PrivilegeEscalation;
use crate::engine::{ContainerRef, EvaluatorResult, ValidationFailure, patch};

/// Control name
pub const NAME: &str = "privilege-escalation";

pub const CONTROL: Control = Control {
    name: NAME,
    mutate,
    validate,
};

fn allow_privilege_escalation(container: &Container) -> Option<bool> {
    container
        .security_context
        .as_ref()
        .and_then(|sc| sc.allow_privilege_escalation)
}

/// Privileged or CAP_SYS_ADMIN containers always escalate
fn always_escalates(container: &Container) -> bool {
    let Some(sc) = container.security_context.as_ref() else {
        return false;
    };
    if sc.privileged == Some(true) {
        return true;
    }
    sc.capabilities
        .as_ref()
        .and_then(|c| c.add.as_ref())
        .is_some_and(|add| {
            add.iter()
                .any(|cap| cap == "SYS_ADMIN" || cap == "CAP_SYS_ADMIN")
        })
}

fn failure_path(container: &ContainerRef<'_>) -> String {
    format!(
        "spec.{}[{}].securityContext.allowPrivilegeEscalation",
        container.kind.field(),
        container.index
    )
}

fn enforced(ctx: &EvaluationContext<'_>) -> bool {
    ctx.policy.privilege_escalation.value == PrivilegeEscalation::Deny
}

/// Disable privilege escalation on containers that leave it unset
pub fn mutate(ctx: &EvaluationContext<'_>) -> EvaluatorResult {
    if !enforced(ctx) {
        return EvaluatorResult::NoAction;
    }

    let ops = ctx
        .pod
        .containers()
        .filter(|c| !always_escalates(c.container))
        .filter(|c| allow_privilege_escalation(c.container).is_none())
        .map(|c| {
            let [spec, field, index] = c.path_tokens();
            patch::add(
                [
                    spec.as_str(),
                    field.as_str(),
                    index.as_str(),
                    "securityContext",
                    "allowPrivilegeEscalation",
                ],
                Value::Bool(false),
            )
        })
        .collect();

    EvaluatorResult::patch(ops)
}

/// Require privilege escalation to be disabled on every container
pub fn validate(ctx: &EvaluationContext<'_>) -> EvaluatorResult {
    if !enforced(ctx) {
        return EvaluatorResult::NoAction;
    }

    let failures = ctx
        .pod
        .containers()
        .filter(|c| !always_escalates(c.container))
        .filter(|c| allow_privilege_escalation(c.container) != Some(false))
        .map(|c| {
            ValidationFailure::new(
                NAME,
                failure_path(&c),
                format!(
                    "container '{}' must set allowPrivilegeEscalation to false",
                    c.container.name
                ),
            )
        })
        .collect();

    EvaluatorResult::reject(failures)
}
