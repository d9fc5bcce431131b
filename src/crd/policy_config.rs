//! Policy configuration Custom Resource Definitions.
//!
//! Two kinds carry the same set of controls:
//! - `ClusterPolicyConfig` (cluster-scoped): the object named `default` is the
//!   cluster-wide baseline.
//! - `PolicyConfig` (namespaced): the object named `default` in a namespace
//!   overrides the baseline for pods in that namespace.
//!
//! Every control is a tri-state [`Setting`], so a namespace can override one
//! control and inherit the rest.

use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Name of the `ClusterPolicyConfig` holding the cluster-wide defaults.
pub const CLUSTER_DEFAULT_NAME: &str = "default";

/// Name of the `PolicyConfig` that overrides defaults within its namespace.
pub const NAMESPACE_OVERRIDE_NAME: &str = "default";

/// A configuration value that is either unset (inherit) or explicitly set.
///
/// An explicitly set empty value is still `Value`, which is how a namespace
/// switches a control off while the cluster default keeps it on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Setting<T> {
    /// Nothing configured at this scope
    Unset,
    /// Explicitly configured value
    Value(T),
}

impl<T> Default for Setting<T> {
    fn default() -> Self {
        Setting::Unset
    }
}

impl<T> Setting<T> {
    /// Used by serde to omit unset fields
    pub fn is_unset(&self) -> bool {
        matches!(self, Setting::Unset)
    }

    /// Borrow the configured value, if any
    pub fn value(&self) -> Option<&T> {
        match self {
            Setting::Unset => None,
            Setting::Value(v) => Some(v),
        }
    }
}

impl<T> From<Option<T>> for Setting<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Setting::Value(v),
            None => Setting::Unset,
        }
    }
}

impl<T: Serialize> Serialize for Setting<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Setting::Unset => serializer.serialize_none(),
            Setting::Value(v) => v.serialize(serializer),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Setting<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // A literal `null` is treated the same as an absent field
        Ok(Option::<T>::deserialize(deserializer)?.into())
    }
}

/// Service account token automount policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum TokenAutomount {
    /// Leave `automountServiceAccountToken` alone
    Allow,
    /// Disable automount for pods running as the `default` service account
    DisableDefaultServiceAccount,
    /// Disable automount for every pod
    DisableAll,
}

impl fmt::Display for TokenAutomount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenAutomount::Allow => write!(f, "allow"),
            TokenAutomount::DisableDefaultServiceAccount => write!(f, "disableDefaultServiceAccount"),
            TokenAutomount::DisableAll => write!(f, "disableAll"),
        }
    }
}

/// Container privilege escalation policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum PrivilegeEscalation {
    /// Leave `allowPrivilegeEscalation` alone
    Allow,
    /// Require `allowPrivilegeEscalation: false` on every container
    Deny,
}

impl fmt::Display for PrivilegeEscalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivilegeEscalation::Allow => write!(f, "allow"),
            PrivilegeEscalation::Deny => write!(f, "deny"),
        }
    }
}

/// The security controls shared by both policy kinds.
///
/// Example:
/// ```yaml
/// seccompProfile: runtime/default
/// automountServiceAccountToken: disableDefaultServiceAccount
/// allowPrivilegeEscalation: deny
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyControls {
    /// Seccomp profile applied to pods without one.
    /// An empty string disables the control for this scope.
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    #[schemars(with = "Option<String>")]
    pub seccomp_profile: Setting<String>,

    /// Service account token automount policy.
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    #[schemars(with = "Option<TokenAutomount>")]
    pub automount_service_account_token: Setting<TokenAutomount>,

    /// Container privilege escalation policy.
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    #[schemars(with = "Option<PrivilegeEscalation>")]
    pub allow_privilege_escalation: Setting<PrivilegeEscalation>,
}

/// ClusterPolicyConfig holds cluster-wide policy defaults.
///
/// Example:
/// ```yaml
/// apiVersion: podguard.io/v1alpha1
/// kind: ClusterPolicyConfig
/// metadata:
///   name: default
/// spec:
///   seccompProfile: runtime/default
///   automountServiceAccountToken: disableDefaultServiceAccount
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "podguard.io",
    version = "v1alpha1",
    kind = "ClusterPolicyConfig",
    plural = "clusterpolicyconfigs",
    shortname = "cpc",
    printcolumn = r#"{"name":"Seccomp", "type":"string", "jsonPath":".spec.seccompProfile"}"#,
    printcolumn = r#"{"name":"Token", "type":"string", "jsonPath":".spec.automountServiceAccountToken"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPolicyConfigSpec {
    #[serde(flatten)]
    pub controls: PolicyControls,
}

/// PolicyConfig overrides the cluster defaults for one namespace.
///
/// Example:
/// ```yaml
/// apiVersion: podguard.io/v1alpha1
/// kind: PolicyConfig
/// metadata:
///   name: default
///   namespace: legacy-apps
/// spec:
///   seccompProfile: ""
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "podguard.io",
    version = "v1alpha1",
    kind = "PolicyConfig",
    plural = "policyconfigs",
    shortname = "pc",
    namespaced,
    printcolumn = r#"{"name":"Seccomp", "type":"string", "jsonPath":".spec.seccompProfile"}"#,
    printcolumn = r#"{"name":"Token", "type":"string", "jsonPath":".spec.automountServiceAccountToken"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfigSpec {
    #[serde(flatten)]
    pub controls: PolicyControls,
}
