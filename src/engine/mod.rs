//! Admission decision engine.
//!
//! Resolves the effective policy for a namespace from the [`ConfigCache`],
//! runs every control against the pod, and assembles one
//! [`AdmissionDecision`]:
//! - Mutate mode: always allowed, carries the combined patch
//! - Validate mode: never patches, allowed only when no control failed
//!
//! Everything here is synchronous and in-memory. The engine holds no
//! per-request state and can be shared across tasks.

pub mod cache;
pub mod decision;
mod error;
pub mod patch;
pub mod pod;
pub mod resolver;

pub use cache::{ConfigCache, ConfigEvent, InMemoryConfigCache, StoreConfigCache};
pub use decision::{AdmissionDecision, AdmissionMode, EvaluatorResult, ValidationFailure, aggregate};
pub use error::{Error, Result};
pub use pod::{
    ContainerKind, ContainerRef, DEFAULT_SERVICE_ACCOUNT, PodSnapshot, SECCOMP_POD_ANNOTATION,
};
pub use resolver::{
    EffectivePolicy, FALLBACK_PRIVILEGE_ESCALATION, FALLBACK_SECCOMP_PROFILE,
    FALLBACK_TOKEN_AUTOMOUNT, Provenance, Resolved, Source, resolve,
};

use std::sync::Arc;

use crate::crd::CLUSTER_DEFAULT_NAME;
use crate::webhooks::policies::{EvaluationContext, evaluate_all};

/// Entry point for admission decisions
#[derive(Clone)]
pub struct AdmissionEngine {
    cache: Arc<dyn ConfigCache>,
}

impl AdmissionEngine {
    pub fn new(cache: Arc<dyn ConfigCache>) -> Self {
        Self { cache }
    }

    /// Resolve the policy for a namespace.
    ///
    /// Fails only when there is no cluster default; running without a
    /// baseline is not allowed.
    pub fn effective_policy(&self, namespace: &str) -> Result<EffectivePolicy> {
        let cluster_default = self.cache.cluster_default().ok_or_else(|| {
            Error::UnresolvableConfig(format!(
                "ClusterPolicyConfig '{}' not found",
                CLUSTER_DEFAULT_NAME
            ))
        })?;
        let namespace_override = self.cache.namespace_override(namespace);
        Ok(resolve(&cluster_default, namespace_override.as_ref()))
    }

    /// Decide one admission request
    pub fn admit(
        &self,
        pod: &PodSnapshot,
        namespace: &str,
        mode: AdmissionMode,
        uid: &str,
    ) -> Result<AdmissionDecision> {
        let policy = self.effective_policy(namespace)?;
        decide(pod, policy, mode, uid)
    }
}

/// Run every control against a pod and assemble the decision
pub fn decide(
    pod: &PodSnapshot,
    policy: EffectivePolicy,
    mode: AdmissionMode,
    uid: &str,
) -> Result<AdmissionDecision> {
    let results = evaluate_all(
        &EvaluationContext {
            pod,
            policy: &policy,
        },
        mode,
    );

    match mode {
        AdmissionMode::Mutate => {
            let patch = patch::build(&results, pod)?;
            Ok(AdmissionDecision::mutated(uid, patch, policy))
        }
        AdmissionMode::Validate => Ok(AdmissionDecision::validated(
            uid,
            aggregate(&results),
            policy,
        )),
    }
}
