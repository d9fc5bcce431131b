//! pod-guard library crate
//!
//! This module exports the policy configuration CRDs, the admission engine,
//! the webhook server, and the watch that keeps the configuration cache
//! current.

pub mod crd;
pub mod engine;
pub mod health;
pub mod webhooks;

pub use engine::{AdmissionDecision, AdmissionEngine, AdmissionMode, ConfigCache};
pub use health::HealthState;
pub use webhooks::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, run_webhook_server,
};

use std::future::Future;

use futures::{Stream, StreamExt};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{WatchStreamExt, reflector, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crd::{ClusterPolicyConfig, PolicyConfig};
use engine::StoreConfigCache;

/// Create the default watcher configuration for the configuration watches.
///
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a reflector-backed stream for a resource type.
///
/// The stream:
/// - Maintains an in-memory cache via reflector (deletes included)
/// - Uses automatic retry with exponential backoff on errors
/// - Yields every touched object so changes can be logged
///
/// Returns the reflector store (for cache lookups) and the stream that must be
/// polled to keep the store current.
fn create_reflected_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .touched_objects();
    (reader, stream)
}

/// Poll a reflected stream until it ends, logging changes and watch errors
async fn drain<K>(kind: &'static str, stream: impl Stream<Item = Result<K, watcher::Error>>)
where
    K: Resource,
{
    stream
        .for_each(|event| async move {
            match event {
                Ok(obj) => {
                    debug!(
                        kind,
                        name = %obj.name_any(),
                        namespace = ?obj.namespace(),
                        "Policy configuration changed"
                    );
                }
                Err(e) => {
                    warn!(kind, error = %e, "Policy configuration watch error");
                }
            }
        })
        .await;
}

/// Build the configuration cache backed by cluster watches.
///
/// Returns the cache and the watch future that keeps it current. The future
/// runs until the watch streams end, which does not happen in normal
/// operation; it should be spawned as a background task. Lookups answer
/// from memory only and return nothing until the initial list completes
/// (see [`StoreConfigCache::wait_until_ready`]).
pub fn config_cache(client: Client) -> (StoreConfigCache, impl Future<Output = ()> + Send) {
    let watcher_config = default_watcher_config();

    let cluster_configs: Api<ClusterPolicyConfig> = Api::all(client.clone());
    let namespace_configs: Api<PolicyConfig> = Api::all(client);

    let (cluster_store, cluster_stream) =
        create_reflected_stream(cluster_configs, watcher_config.clone());
    let (namespace_store, namespace_stream) =
        create_reflected_stream(namespace_configs, watcher_config);

    let watch = async move {
        futures::join!(
            drain("ClusterPolicyConfig", cluster_stream),
            drain("PolicyConfig", namespace_stream),
        );
        error!("Policy configuration watch ended unexpectedly");
    };

    (StoreConfigCache::new(cluster_store, namespace_store), watch)
}
