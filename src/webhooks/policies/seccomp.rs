//! Seccomp profile policy.
//!
//! A pod's profile is read from the seccomp annotation, falling back to
//! `spec.securityContext.seccompProfile` mapped onto the annotation form.
//!
//! Mutate: adds the pod-level seccomp annotation when the pod sets neither.
//! An existing setting is left alone whatever its value.
//!
//! Validate: the profile must be set and equal to the target profile.

use serde_json::Value;

use super::{Control, EvaluationContext};
use crate::engine::{EvaluatorResult, ValidationFailure, patch};

/// Control name
pub const NAME: &str = "seccomp-profile";

pub use crate::engine::SECCOMP_POD_ANNOTATION;

const SECCOMP_FIELD_PATH: &str = "spec.securityContext.seccompProfile";

pub const CONTROL: Control = Control {
    name: NAME,
    mutate,
    validate,
};

fn failure_path(ctx: &EvaluationContext<'_>) -> String {
    let from_field = ctx.pod.annotation(SECCOMP_POD_ANNOTATION).is_none()
        && ctx.pod.seccomp_profile().is_some();
    if from_field {
        SECCOMP_FIELD_PATH.to_string()
    } else {
        format!("metadata.annotations[{}]", SECCOMP_POD_ANNOTATION)
    }
}

/// Fill in a missing seccomp profile
pub fn mutate(ctx: &EvaluationContext<'_>) -> EvaluatorResult {
    let Some(target) = ctx.policy.seccomp_profile.value.as_deref() else {
        return EvaluatorResult::NoAction;
    };

    if ctx.pod.seccomp_profile().is_some() {
        return EvaluatorResult::NoAction;
    }

    EvaluatorResult::Patch(vec![patch::add(
        ["metadata", "annotations", SECCOMP_POD_ANNOTATION],
        Value::String(target.to_string()),
    )])
}

/// Require the target seccomp profile
pub fn validate(ctx: &EvaluationContext<'_>) -> EvaluatorResult {
    let Some(target) = ctx.policy.seccomp_profile.value.as_deref() else {
        return EvaluatorResult::NoAction;
    };

    match ctx.pod.seccomp_profile() {
        Some(profile) if profile == target => EvaluatorResult::NoAction,
        Some(profile) => EvaluatorResult::Reject(vec![ValidationFailure::new(
            NAME,
            failure_path(ctx),
            format!(
                "seccomp profile '{}' does not match required profile '{}'",
                profile, target
            ),
        )]),
        None => EvaluatorResult::Reject(vec![ValidationFailure::new(
            NAME,
            failure_path(ctx),
            format!("seccomp profile is not set, required profile is '{}'", target),
        )]),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::crd::{PolicyControls, Setting};
    use crate::engine::{EffectivePolicy, PodSnapshot, patch::apply, resolve};
    use k8s_openapi::api::core::v1::{Pod, PodSecurityContext, PodSpec, SeccompProfile};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    const TARGET: &str = "runtime/default";

    fn policy(profile: &str) -> EffectivePolicy {
        resolve(
            &PolicyControls {
                seccomp_profile: Setting::Value(profile.to_string()),
                ..Default::default()
            },
            None,
        )
    }

    fn create_pod(annotations: Option<BTreeMap<String, String>>) -> PodSnapshot {
        PodSnapshot::new(Pod {
            metadata: ObjectMeta {
                name: Some("test".to_string()),
                namespace: Some("default".to_string()),
                annotations,
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap()
    }

    fn annotated(profile: &str) -> PodSnapshot {
        create_pod(Some(BTreeMap::from([(
            SECCOMP_POD_ANNOTATION.to_string(),
            profile.to_string(),
        )])))
    }

    fn with_field(type_: &str, localhost: Option<&str>) -> PodSnapshot {
        PodSnapshot::new(Pod {
            spec: Some(PodSpec {
                security_context: Some(PodSecurityContext {
                    seccomp_profile: Some(SeccompProfile {
                        type_: type_.to_string(),
                        localhost_profile: localhost.map(str::to_string),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
        .unwrap()
    }

    fn run(
        evaluator: fn(&EvaluationContext<'_>) -> EvaluatorResult,
        pod: &PodSnapshot,
        policy: &EffectivePolicy,
    ) -> EvaluatorResult {
        evaluator(&EvaluationContext { pod, policy })
    }

    #[test]
    fn test_no_annotation_is_patched() {
        let pod = create_pod(None);
        let policy = policy(TARGET);

        let result = run(mutate, &pod, &policy);
        let EvaluatorResult::Patch(ops) = &result else {
            panic!("expected a patch");
        };
        assert_eq!(ops.len(), 1);

        // No annotation map yet, so the builder creates it
        let ops = patch::build([&result], &pod).unwrap();
        assert_eq!(ops.len(), 1);
        let patched = apply(&pod, &ops).unwrap();
        assert_eq!(patched.annotation(SECCOMP_POD_ANNOTATION), Some(TARGET));
        assert!(run(validate, &patched, &policy).is_no_action());

        // The original pod fails validation
        let EvaluatorResult::Reject(failures) = run(validate, &pod, &policy) else {
            panic!("expected a rejection");
        };
        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("not set"));
    }

    #[test]
    fn test_empty_annotation_map_is_patched() {
        let pod = create_pod(Some(BTreeMap::new()));
        let policy = policy(TARGET);
        assert!(matches!(run(mutate, &pod, &policy), EvaluatorResult::Patch(_)));
        assert!(matches!(run(validate, &pod, &policy), EvaluatorResult::Reject(_)));
    }

    #[test]
    fn test_other_profile_is_left_alone_but_invalid() {
        let pod = annotated("runtime/other");
        let policy = policy(TARGET);

        assert!(run(mutate, &pod, &policy).is_no_action());

        let EvaluatorResult::Reject(failures) = run(validate, &pod, &policy) else {
            panic!("expected a rejection");
        };
        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("runtime/other"));
        assert_eq!(failures[0].control, NAME);
    }

    #[test]
    fn test_target_profile_is_valid() {
        let pod = annotated(TARGET);
        let policy = policy(TARGET);
        assert!(run(mutate, &pod, &policy).is_no_action());
        assert!(run(validate, &pod, &policy).is_no_action());
    }

    #[test]
    fn test_disabled_control() {
        let pod = create_pod(None);
        let policy = policy("");
        assert!(run(mutate, &pod, &policy).is_no_action());
        assert!(run(validate, &pod, &policy).is_no_action());
    }

    #[test]
    fn test_field_counts_as_explicit_setting() {
        let pod = with_field("RuntimeDefault", None);
        let policy = policy(TARGET);
        assert!(run(mutate, &pod, &policy).is_no_action());
        assert!(run(validate, &pod, &policy).is_no_action());
    }

    #[test]
    fn test_field_with_other_profile_is_left_alone_but_invalid() {
        let pod = with_field("Localhost", Some("audit.json"));
        let policy = policy(TARGET);
        assert!(run(mutate, &pod, &policy).is_no_action());

        let EvaluatorResult::Reject(failures) = run(validate, &pod, &policy) else {
            panic!("expected a rejection");
        };
        assert_eq!(failures[0].path, SECCOMP_FIELD_PATH);
        assert!(failures[0].message.contains("localhost/audit.json"));
    }
}
