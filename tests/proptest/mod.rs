// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for pod-guard.
//!
//! Uses proptest to generate random pods and policy configurations and
//! verify the engine's invariants.

#[path = "../common/mod.rs"]
mod common;

use proptest::prelude::*;

use common::fixtures::{ContainerBuilder, PodBuilder};
use pod_guard::crd::{PolicyControls, PrivilegeEscalation, Setting, TokenAutomount};
use pod_guard::engine::{
    AdmissionMode, EffectivePolicy, FALLBACK_PRIVILEGE_ESCALATION, FALLBACK_TOKEN_AUTOMOUNT,
    PodSnapshot, Source, ValidationFailure, decide, patch, resolve,
};
use pod_guard::webhooks::policies::{privilege_escalation, seccomp, service_account_token};

/// Container settings relevant to the privilege escalation control
#[derive(Clone, Debug)]
struct ContainerShape {
    allow_privilege_escalation: Option<bool>,
    privileged: Option<bool>,
    sys_admin: bool,
}

impl ContainerShape {
    fn builder(&self, name: String) -> ContainerBuilder {
        let mut builder = ContainerBuilder::new(name);
        if let Some(allow) = self.allow_privilege_escalation {
            builder = builder.allow_privilege_escalation(allow);
        }
        if let Some(privileged) = self.privileged {
            builder = builder.privileged(privileged);
        }
        if self.sys_admin {
            builder = builder.add_capability("SYS_ADMIN");
        }
        builder
    }

    /// Containers that escalate by construction are out of scope for the control
    fn always_escalates(&self) -> bool {
        self.privileged == Some(true) || self.sys_admin
    }
}

/// Pod settings relevant to the control catalogue
#[derive(Clone, Debug)]
struct PodShape {
    /// None = no annotation map, Some(None) = empty map, Some(Some(p)) = profile
    seccomp: Option<Option<String>>,
    /// `spec.securityContext.seccompProfile` as (type, localhost profile)
    seccomp_field: Option<(String, Option<String>)>,
    service_account: Option<String>,
    automount_token: Option<bool>,
    init_containers: Vec<ContainerShape>,
    containers: Vec<ContainerShape>,
}

impl PodShape {
    /// Whether the pod sets a seccomp profile in either place
    fn sets_seccomp(&self) -> bool {
        matches!(self.seccomp, Some(Some(_))) || self.seccomp_field.is_some()
    }

    fn snapshot(&self) -> PodSnapshot {
        let mut builder = PodBuilder::new("generated");
        match &self.seccomp {
            None => {}
            Some(None) => builder = builder.empty_annotations(),
            Some(Some(profile)) => builder = builder.seccomp(profile.clone()),
        }
        if let Some((type_, localhost)) = &self.seccomp_field {
            builder = builder.seccomp_field(type_, localhost.as_deref());
        }
        if let Some(sa) = &self.service_account {
            builder = builder.service_account(sa.clone());
        }
        if let Some(automount) = self.automount_token {
            builder = builder.automount_token(automount);
        }
        for (i, c) in self.init_containers.iter().enumerate() {
            builder = builder.init_container(c.builder(format!("init-{}", i)));
        }
        for (i, c) in self.containers.iter().enumerate() {
            builder = builder.container(c.builder(format!("app-{}", i)));
        }
        builder.snapshot()
    }
}

fn any_profile() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("runtime/default".to_string()),
        Just("localhost/custom.json".to_string()),
        Just("unconfined".to_string()),
    ]
}

fn any_seccomp_field() -> impl Strategy<Value = (String, Option<String>)> {
    prop_oneof![
        Just(("RuntimeDefault".to_string(), None)),
        Just(("Unconfined".to_string(), None)),
        Just(("Localhost".to_string(), Some("custom.json".to_string()))),
    ]
}

fn any_container() -> impl Strategy<Value = ContainerShape> {
    (
        proptest::option::of(any::<bool>()),
        proptest::option::of(any::<bool>()),
        proptest::bool::weighted(0.1),
    )
        .prop_map(
            |(allow_privilege_escalation, privileged, sys_admin)| ContainerShape {
                allow_privilege_escalation,
                privileged,
                sys_admin,
            },
        )
}

fn any_pod() -> impl Strategy<Value = PodShape> {
    (
        proptest::option::of(proptest::option::of(any_profile())),
        proptest::option::of(any_seccomp_field()),
        proptest::option::of(prop_oneof![
            Just("default".to_string()),
            Just("builder".to_string()),
        ]),
        proptest::option::of(any::<bool>()),
        proptest::collection::vec(any_container(), 0..3),
        proptest::collection::vec(any_container(), 0..4),
    )
        .prop_map(
            |(
                seccomp,
                seccomp_field,
                service_account,
                automount_token,
                init_containers,
                containers,
            )| PodShape {
                seccomp,
                seccomp_field,
                service_account,
                automount_token,
                init_containers,
                containers,
            },
        )
}

fn any_setting<T: std::fmt::Debug + Clone + 'static>(
    value: impl Strategy<Value = T> + 'static,
) -> impl Strategy<Value = Setting<T>> {
    proptest::option::of(value).prop_map(Setting::from)
}

fn any_token_automount() -> impl Strategy<Value = TokenAutomount> {
    prop_oneof![
        Just(TokenAutomount::Allow),
        Just(TokenAutomount::DisableDefaultServiceAccount),
        Just(TokenAutomount::DisableAll),
    ]
}

fn any_privilege_escalation() -> impl Strategy<Value = PrivilegeEscalation> {
    prop_oneof![
        Just(PrivilegeEscalation::Allow),
        Just(PrivilegeEscalation::Deny),
    ]
}

fn any_controls() -> impl Strategy<Value = PolicyControls> {
    (
        any_setting(prop_oneof![Just(String::new()), any_profile()]),
        any_setting(any_token_automount()),
        any_setting(any_privilege_escalation()),
    )
        .prop_map(
            |(seccomp_profile, automount_service_account_token, allow_privilege_escalation)| {
                PolicyControls {
                    seccomp_profile,
                    automount_service_account_token,
                    allow_privilege_escalation,
                }
            },
        )
}

fn any_policy() -> impl Strategy<Value = EffectivePolicy> {
    (any_controls(), proptest::option::of(any_controls()))
        .prop_map(|(cluster, namespace)| resolve(&cluster, namespace.as_ref()))
}

fn patch_paths(ops: &[json_patch::PatchOperation]) -> Vec<String> {
    ops.iter()
        .map(|op| serde_json::to_value(op).unwrap()["path"].as_str().unwrap().to_string())
        .collect()
}

/// Unit a patch operation fixes: a pod-level control, or one container
fn patched_unit(path: &str) -> String {
    let tokens: Vec<&str> = path.split('/').skip(1).collect();
    match tokens.as_slice() {
        ["metadata", "annotations", ..] => seccomp::NAME.to_string(),
        ["spec", "automountServiceAccountToken"] => service_account_token::NAME.to_string(),
        ["spec", field, index, ..] => format!("{}[{}]", field, index),
        _ => path.to_string(),
    }
}

/// Unit a validation failure is reported against
fn failure_unit(failure: &ValidationFailure) -> String {
    if failure.control == privilege_escalation::NAME {
        failure.path.split('.').nth(1).unwrap_or_default().to_string()
    } else {
        failure.control.clone()
    }
}

/// Failure paths of containers mutation is expected to fix
fn fixable_container_paths(shape: &PodShape) -> Vec<String> {
    [
        ("initContainers", &shape.init_containers),
        ("containers", &shape.containers),
    ]
    .into_iter()
    .flat_map(|(field, containers)| {
        containers
            .iter()
            .enumerate()
            .filter(|(_, c)| c.allow_privilege_escalation.is_none() && !c.always_escalates())
            .map(move |(i, _)| {
                format!(
                    "spec.{}[{}].securityContext.allowPrivilegeEscalation",
                    field, i
                )
            })
    })
    .collect()
}

proptest! {
    /// Deciding the same pod under the same policy twice gives identical output
    #[test]
    fn decisions_are_deterministic(shape in any_pod(), policy in any_policy()) {
        let pod = shape.snapshot();
        for mode in [AdmissionMode::Mutate, AdmissionMode::Validate] {
            let first = decide(&pod, policy.clone(), mode, "uid").unwrap();
            let second = decide(&pod, policy.clone(), mode, "uid").unwrap();
            prop_assert_eq!(
                serde_json::to_vec(&first.patch).unwrap(),
                serde_json::to_vec(&second.patch).unwrap()
            );
            prop_assert_eq!(&first.failures, &second.failures);
            prop_assert_eq!(first.allowed, second.allowed);
        }
    }

    /// Re-running mutation on a patched pod emits nothing
    #[test]
    fn mutation_is_idempotent(shape in any_pod(), policy in any_policy()) {
        let pod = shape.snapshot();
        let first = decide(&pod, policy.clone(), AdmissionMode::Mutate, "uid").unwrap();
        let patched = patch::apply(&pod, &first.patch).unwrap();
        let second = decide(&patched, policy, AdmissionMode::Mutate, "uid").unwrap();
        prop_assert!(second.patch.is_empty(), "second patch: {:?}", patch_paths(&second.patch));
    }

    /// Mutate implies valid: what mutation fixed, validation accepts
    #[test]
    fn mutation_closes_under_validation(shape in any_pod(), policy in any_policy()) {
        let pod = shape.snapshot();
        let mutated = decide(&pod, policy.clone(), AdmissionMode::Mutate, "uid").unwrap();
        prop_assert!(mutated.allowed);
        prop_assert!(mutated.failures.is_empty());

        let before = decide(&pod, policy.clone(), AdmissionMode::Validate, "uid").unwrap();
        let patched = patch::apply(&pod, &mutated.patch).unwrap();
        let after = decide(&patched, policy, AdmissionMode::Validate, "uid").unwrap();
        prop_assert!(after.patch.is_empty());

        // Patching never introduces a failure
        for failure in &after.failures {
            prop_assert!(before.failures.contains(failure), "new failure: {}", failure);
        }

        // Whatever a patch touched now validates cleanly
        let patched_units: Vec<String> = patch_paths(&mutated.patch)
            .iter()
            .map(|p| patched_unit(p))
            .collect();
        for failure in &after.failures {
            prop_assert!(
                !patched_units.contains(&failure_unit(failure)),
                "patched target still failing: {}",
                failure
            );
        }

        // Remaining failures are explicit choices mutation must respect
        for failure in &after.failures {
            match failure.control.as_str() {
                seccomp::NAME => prop_assert!(shape.sets_seccomp()),
                service_account_token::NAME => prop_assert_eq!(shape.automount_token, Some(true)),
                privilege_escalation::NAME => {
                    prop_assert!(
                        !fixable_container_paths(&shape).contains(&failure.path),
                        "fixable container still failing: {}",
                        failure
                    );
                }
                other => prop_assert!(false, "unknown control {}", other),
            }
        }
    }

    /// Explicit pod settings are never patched, whatever their value
    #[test]
    fn mutation_is_non_destructive(shape in any_pod(), policy in any_policy()) {
        let pod = shape.snapshot();
        let mutated = decide(&pod, policy, AdmissionMode::Mutate, "uid").unwrap();
        let paths = patch_paths(&mutated.patch);

        if shape.sets_seccomp() {
            prop_assert!(!paths.iter().any(|p| p.starts_with("/metadata/annotations")));
        }
        if shape.automount_token.is_some() {
            prop_assert!(!paths.iter().any(|p| p == "/spec/automountServiceAccountToken"));
        }
        for (field, containers) in [
            ("initContainers", &shape.init_containers),
            ("containers", &shape.containers),
        ] {
            for (i, c) in containers.iter().enumerate() {
                if c.allow_privilege_escalation.is_some() {
                    let prefix = format!("/spec/{}/{}", field, i);
                    prop_assert!(!paths.iter().any(|p| p.starts_with(&prefix)));
                }
            }
        }

        // Whatever was there before is still there after
        let patched = patch::apply(&pod, &mutated.patch).unwrap();
        if let Some(Some(profile)) = &shape.seccomp {
            prop_assert_eq!(patched.annotation(seccomp::SECCOMP_POD_ANNOTATION), Some(profile.as_str()));
        }
        if shape.sets_seccomp() {
            prop_assert_eq!(patched.seccomp_profile(), pod.seccomp_profile());
        }
        if let Some(automount) = shape.automount_token {
            prop_assert_eq!(patched.automount_service_account_token(), Some(automount));
        }
    }

    /// A set namespace value beats the cluster value; other namespaces see the cluster value
    #[test]
    fn override_takes_precedence(
        cluster in any_token_automount(),
        namespace in any_token_automount(),
        profile in any_profile(),
    ) {
        let cluster_controls = PolicyControls {
            seccomp_profile: Setting::Value(profile.clone()),
            automount_service_account_token: Setting::Value(cluster.clone()),
            ..Default::default()
        };
        let override_controls = PolicyControls {
            automount_service_account_token: Setting::Value(namespace.clone()),
            ..Default::default()
        };

        let overridden = resolve(&cluster_controls, Some(&override_controls));
        prop_assert_eq!(&overridden.token_automount.value, &namespace);
        prop_assert_eq!(overridden.token_automount.source, Source::Namespace);
        // Unset override fields inherit
        prop_assert_eq!(overridden.seccomp_profile.value.as_deref(), Some(profile.as_str()));

        let sibling = resolve(&cluster_controls, None);
        prop_assert_eq!(&sibling.token_automount.value, &cluster);
        prop_assert_eq!(sibling.token_automount.source, Source::Cluster);
    }

    /// Unset everywhere resolves to the built-in fallback
    #[test]
    fn empty_config_uses_fallbacks(namespace in proptest::option::of(Just(PolicyControls::default()))) {
        let policy = resolve(&PolicyControls::default(), namespace.as_ref());
        prop_assert_eq!(policy.seccomp_profile.value.as_deref(), None);
        prop_assert_eq!(policy.token_automount.value, FALLBACK_TOKEN_AUTOMOUNT);
        prop_assert_eq!(policy.privilege_escalation.value, FALLBACK_PRIVILEGE_ESCALATION);
        prop_assert!(!policy.provenance().has_namespace_override());
    }
}
