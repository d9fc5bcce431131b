//! Read-side view of policy configuration.
//!
//! The admission path reads configuration only through [`ConfigCache`], which
//! must answer from memory. Two implementations:
//! - [`StoreConfigCache`]: backed by kube reflector stores kept current by a
//!   background watch
//! - [`InMemoryConfigCache`]: a copy-on-write snapshot fed by explicit
//!   [`ConfigEvent`]s

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use kube::runtime::reflector::{ObjectRef, Store};

use crate::crd::{
    CLUSTER_DEFAULT_NAME, ClusterPolicyConfig, NAMESPACE_OVERRIDE_NAME, PolicyConfig,
    PolicyControls,
};

/// In-memory lookups of the two configuration scopes.
///
/// Reads may be stale by at most the updates still in flight; they never
/// block on the network.
pub trait ConfigCache: Send + Sync {
    /// Cluster-wide defaults. `None` only before bootstrap or after deletion.
    fn cluster_default(&self) -> Option<PolicyControls>;

    /// Override for one namespace, if one exists
    fn namespace_override(&self, namespace: &str) -> Option<PolicyControls>;
}

impl<C: ConfigCache + ?Sized> ConfigCache for Arc<C> {
    fn cluster_default(&self) -> Option<PolicyControls> {
        (**self).cluster_default()
    }

    fn namespace_override(&self, namespace: &str) -> Option<PolicyControls> {
        (**self).namespace_override(namespace)
    }
}

/// Config cache backed by reflector stores.
///
/// The reflectors apply watch events per object key, so the latest write
/// always wins regardless of duplicate deliveries.
#[derive(Clone)]
pub struct StoreConfigCache {
    cluster: Store<ClusterPolicyConfig>,
    namespaced: Store<PolicyConfig>,
}

impl StoreConfigCache {
    pub fn new(cluster: Store<ClusterPolicyConfig>, namespaced: Store<PolicyConfig>) -> Self {
        Self {
            cluster,
            namespaced,
        }
    }

    /// Wait for the initial list of both stores.
    ///
    /// Returns `false` if a reflector was dropped before syncing.
    pub async fn wait_until_ready(&self) -> bool {
        self.cluster.wait_until_ready().await.is_ok()
            && self.namespaced.wait_until_ready().await.is_ok()
    }
}

impl ConfigCache for StoreConfigCache {
    fn cluster_default(&self) -> Option<PolicyControls> {
        self.cluster
            .get(&ObjectRef::new(CLUSTER_DEFAULT_NAME))
            .map(|config| config.spec.controls.clone())
    }

    fn namespace_override(&self, namespace: &str) -> Option<PolicyControls> {
        self.namespaced
            .get(&ObjectRef::new(NAMESPACE_OVERRIDE_NAME).within(namespace))
            .map(|config| config.spec.controls.clone())
    }
}

/// A configuration change notification
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigEvent {
    ClusterDefaultApplied(PolicyControls),
    ClusterDefaultDeleted,
    OverrideApplied {
        namespace: String,
        controls: PolicyControls,
    },
    OverrideDeleted {
        namespace: String,
    },
}

#[derive(Clone, Debug, Default)]
struct ConfigSnapshot {
    cluster_default: Option<PolicyControls>,
    overrides: HashMap<String, PolicyControls>,
}

/// Copy-on-write config cache.
///
/// Writers build a new snapshot and swap the pointer; readers clone the
/// pointer and never see a half-applied update.
#[derive(Debug, Default)]
pub struct InMemoryConfigCache {
    snapshot: RwLock<Arc<ConfigSnapshot>>,
}

impl InMemoryConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: seed the cluster default
    pub fn with_cluster_default(self, controls: PolicyControls) -> Self {
        self.apply(ConfigEvent::ClusterDefaultApplied(controls));
        self
    }

    /// Builder: seed a namespace override
    pub fn with_override(self, namespace: impl Into<String>, controls: PolicyControls) -> Self {
        self.apply(ConfigEvent::OverrideApplied {
            namespace: namespace.into(),
            controls,
        });
        self
    }

    /// Apply one notification. Last write per key wins; replaying an event
    /// leaves the cache unchanged.
    pub fn apply(&self, event: ConfigEvent) {
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = ConfigSnapshot::clone(&guard);
        match event {
            ConfigEvent::ClusterDefaultApplied(controls) => next.cluster_default = Some(controls),
            ConfigEvent::ClusterDefaultDeleted => next.cluster_default = None,
            ConfigEvent::OverrideApplied {
                namespace,
                controls,
            } => {
                next.overrides.insert(namespace, controls);
            }
            ConfigEvent::OverrideDeleted { namespace } => {
                next.overrides.remove(&namespace);
            }
        }
        *guard = Arc::new(next);
    }

    fn current(&self) -> Arc<ConfigSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ConfigCache for InMemoryConfigCache {
    fn cluster_default(&self) -> Option<PolicyControls> {
        self.current().cluster_default.clone()
    }

    fn namespace_override(&self, namespace: &str) -> Option<PolicyControls> {
        self.current().overrides.get(namespace).cloned()
    }
}
