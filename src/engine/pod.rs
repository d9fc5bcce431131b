//! Read-only view of the pod under admission.

use std::borrow::Cow;

use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use serde_json::Value;

use super::error::Result;

/// Pod annotation carrying the seccomp profile
pub const SECCOMP_POD_ANNOTATION: &str = "seccomp.security.alpha.kubernetes.io/pod";

/// Service account a pod runs as when none is named
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// Which container list a container belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerKind {
    Init,
    Regular,
}

impl ContainerKind {
    /// Field name under `spec`
    pub fn field(&self) -> &'static str {
        match self {
            ContainerKind::Init => "initContainers",
            ContainerKind::Regular => "containers",
        }
    }
}

/// A container together with its position in the pod spec
#[derive(Clone, Copy, Debug)]
pub struct ContainerRef<'a> {
    pub kind: ContainerKind,
    pub index: usize,
    pub container: &'a Container,
}

impl ContainerRef<'_> {
    /// JSON pointer tokens of this container inside the pod document
    pub fn path_tokens(&self) -> [String; 3] {
        [
            "spec".to_string(),
            self.kind.field().to_string(),
            self.index.to_string(),
        ]
    }
}

/// Immutable snapshot of a pod: the typed object plus its JSON document.
///
/// Evaluators read the typed view; the patch builder checks paths against the
/// document. Neither is ever modified in place.
#[derive(Clone, Debug, PartialEq)]
pub struct PodSnapshot {
    pod: Pod,
    document: Value,
}

impl PodSnapshot {
    /// Snapshot a typed pod
    pub fn new(pod: Pod) -> Result<Self> {
        let document = serde_json::to_value(&pod)?;
        Ok(Self { pod, document })
    }

    /// Snapshot a pod document, keeping the document as given
    pub fn from_document(document: Value) -> Result<Self> {
        let pod = serde_json::from_value(document.clone())?;
        Ok(Self { pod, document })
    }

    pub fn pod(&self) -> &Pod {
        &self.pod
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn name(&self) -> Option<&str> {
        self.pod
            .metadata
            .name
            .as_deref()
            .or(self.pod.metadata.generate_name.as_deref())
    }

    /// Look up an annotation. A missing or empty annotation map yields `None`.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// Pod-level seccomp profile in annotation form.
    ///
    /// The annotation wins; otherwise `spec.securityContext.seccompProfile` is
    /// mapped onto it (`RuntimeDefault` → `runtime/default`, `Localhost` →
    /// `localhost/<profile>`, `Unconfined` → `unconfined`).
    pub fn seccomp_profile(&self) -> Option<Cow<'_, str>> {
        if let Some(profile) = self.annotation(SECCOMP_POD_ANNOTATION) {
            return Some(Cow::Borrowed(profile));
        }

        let profile = self
            .spec()
            .and_then(|s| s.security_context.as_ref())
            .and_then(|sc| sc.seccomp_profile.as_ref())?;
        let mapped = match profile.type_.as_str() {
            "RuntimeDefault" => Cow::Borrowed("runtime/default"),
            "Unconfined" => Cow::Borrowed("unconfined"),
            "Localhost" => Cow::Owned(format!(
                "localhost/{}",
                profile.localhost_profile.as_deref().unwrap_or_default()
            )),
            other => Cow::Borrowed(other),
        };
        Some(mapped)
    }

    pub fn spec(&self) -> Option<&PodSpec> {
        self.pod.spec.as_ref()
    }

    /// Effective service account name, honouring the deprecated field
    pub fn service_account_name(&self) -> &str {
        self.spec()
            .and_then(|s| {
                s.service_account_name
                    .as_deref()
                    .or(s.service_account.as_deref())
            })
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_SERVICE_ACCOUNT)
    }

    /// Explicit `automountServiceAccountToken`, if any
    pub fn automount_service_account_token(&self) -> Option<bool> {
        self.spec().and_then(|s| s.automount_service_account_token)
    }

    /// Init containers followed by regular containers
    pub fn containers(&self) -> impl Iterator<Item = ContainerRef<'_>> {
        let init = self
            .spec()
            .and_then(|s| s.init_containers.as_deref())
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(index, container)| ContainerRef {
                kind: ContainerKind::Init,
                index,
                container,
            });
        let regular = self
            .spec()
            .map(|s| s.containers.as_slice())
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(index, container)| ContainerRef {
                kind: ContainerKind::Regular,
                index,
                container,
            });
        init.chain(regular)
    }
}
