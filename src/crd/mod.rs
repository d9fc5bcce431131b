//! Custom Resource Definitions (CRDs) for pod-guard.
//!
//! - `ClusterPolicyConfig`: cluster-wide policy defaults
//! - `PolicyConfig`: per-namespace policy overrides

mod policy_config;

pub use policy_config::*;
