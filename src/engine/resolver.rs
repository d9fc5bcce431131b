//! Effective policy resolution.
//!
//! Precedence per control: namespace override (if set) > cluster default
//! (if set) > built-in fallback. Resolution is a pure function and never
//! fails; a missing override is the normal case.

use std::fmt;

use crate::crd::{PolicyControls, PrivilegeEscalation, Setting, TokenAutomount};

/// Built-in seccomp target when no scope sets one (control disabled)
pub const FALLBACK_SECCOMP_PROFILE: &str = "";
/// Built-in token automount policy
pub const FALLBACK_TOKEN_AUTOMOUNT: TokenAutomount = TokenAutomount::Allow;
/// Built-in privilege escalation policy
pub const FALLBACK_PRIVILEGE_ESCALATION: PrivilegeEscalation = PrivilegeEscalation::Allow;

/// Where a resolved value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    Namespace,
    Cluster,
    BuiltIn,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Namespace => write!(f, "namespace"),
            Source::Cluster => write!(f, "cluster"),
            Source::BuiltIn => write!(f, "builtin"),
        }
    }
}

/// A concrete value together with its provenance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: Source,
}

/// Fully resolved policy for one namespace at one point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EffectivePolicy {
    /// Target seccomp profile; `None` when the control is disabled
    pub seccomp_profile: Resolved<Option<String>>,
    pub token_automount: Resolved<TokenAutomount>,
    pub privilege_escalation: Resolved<PrivilegeEscalation>,
}

impl EffectivePolicy {
    /// Policy built purely from built-in fallbacks
    pub fn builtin() -> Self {
        resolve(&PolicyControls::default(), None)
    }

    /// Per-field provenance, for logging
    pub fn provenance(&self) -> Provenance {
        Provenance(vec![
            ("seccompProfile", self.seccomp_profile.source),
            ("automountServiceAccountToken", self.token_automount.source),
            ("allowPrivilegeEscalation", self.privilege_escalation.source),
        ])
    }
}

/// Which scope each control's value came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Provenance(pub Vec<(&'static str, Source)>);

impl Provenance {
    /// Whether any control was taken from a namespace override
    pub fn has_namespace_override(&self) -> bool {
        self.0.iter().any(|(_, source)| *source == Source::Namespace)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, source)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}={}", field, source)?;
        }
        Ok(())
    }
}

fn pick<T: Clone>(namespace: Option<&Setting<T>>, cluster: &Setting<T>, fallback: T) -> Resolved<T> {
    if let Some(value) = namespace.and_then(Setting::value) {
        return Resolved {
            value: value.clone(),
            source: Source::Namespace,
        };
    }
    if let Some(value) = cluster.value() {
        return Resolved {
            value: value.clone(),
            source: Source::Cluster,
        };
    }
    Resolved {
        value: fallback,
        source: Source::BuiltIn,
    }
}

/// Merge the cluster default with an optional namespace override.
pub fn resolve(
    cluster_default: &PolicyControls,
    namespace_override: Option<&PolicyControls>,
) -> EffectivePolicy {
    let seccomp = pick(
        namespace_override.map(|o| &o.seccomp_profile),
        &cluster_default.seccomp_profile,
        FALLBACK_SECCOMP_PROFILE.to_string(),
    );

    EffectivePolicy {
        // An explicit empty profile switches the control off at that scope
        seccomp_profile: Resolved {
            value: Some(seccomp.value).filter(|p| !p.is_empty()),
            source: seccomp.source,
        },
        token_automount: pick(
            namespace_override.map(|o| &o.automount_service_account_token),
            &cluster_default.automount_service_account_token,
            FALLBACK_TOKEN_AUTOMOUNT,
        ),
        privilege_escalation: pick(
            namespace_override.map(|o| &o.allow_privilege_escalation),
            &cluster_default.allow_privilege_escalation,
            FALLBACK_PRIVILEGE_ESCALATION,
        ),
    }
}
