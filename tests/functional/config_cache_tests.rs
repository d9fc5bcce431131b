//! Configuration changes observed by the engine between requests.

use std::sync::Arc;

use crate::common::fixtures::{PodBuilder, RUNTIME_DEFAULT, seccomp_only, strict_controls};
use pod_guard::crd::{PolicyControls, Setting};
use pod_guard::engine::{
    AdmissionEngine, AdmissionMode, ConfigEvent, InMemoryConfigCache, Source,
};

fn engine(cache: &Arc<InMemoryConfigCache>) -> AdmissionEngine {
    AdmissionEngine::new(cache.clone())
}

#[test]
fn test_decisions_follow_config_events() {
    let cache = Arc::new(InMemoryConfigCache::new());
    let engine = engine(&cache);
    let pod = PodBuilder::default().snapshot();

    // No baseline yet
    let err = engine
        .admit(&pod, "apps", AdmissionMode::Validate, "uid")
        .unwrap_err();
    assert!(err.is_config_error());

    cache.apply(ConfigEvent::ClusterDefaultApplied(seccomp_only(
        RUNTIME_DEFAULT,
    )));
    let decision = engine
        .admit(&pod, "apps", AdmissionMode::Mutate, "uid")
        .unwrap();
    assert_eq!(decision.patch.len(), 1);

    cache.apply(ConfigEvent::OverrideApplied {
        namespace: "apps".to_string(),
        controls: PolicyControls {
            seccomp_profile: Setting::Value(String::new()),
            ..Default::default()
        },
    });
    let decision = engine
        .admit(&pod, "apps", AdmissionMode::Mutate, "uid")
        .unwrap();
    assert!(decision.patch.is_empty());
    assert_eq!(decision.policy.seccomp_profile.source, Source::Namespace);

    cache.apply(ConfigEvent::OverrideDeleted {
        namespace: "apps".to_string(),
    });
    let decision = engine
        .admit(&pod, "apps", AdmissionMode::Mutate, "uid")
        .unwrap();
    assert_eq!(decision.patch.len(), 1);
    assert_eq!(decision.policy.seccomp_profile.source, Source::Cluster);

    cache.apply(ConfigEvent::ClusterDefaultDeleted);
    assert!(
        engine
            .admit(&pod, "apps", AdmissionMode::Mutate, "uid")
            .is_err()
    );
}

#[test]
fn test_duplicate_and_reordered_events_last_write_wins() {
    let cache = Arc::new(InMemoryConfigCache::new());
    let engine = engine(&cache);

    let events = [
        ConfigEvent::ClusterDefaultApplied(seccomp_only("runtime/old")),
        ConfigEvent::ClusterDefaultApplied(strict_controls()),
        ConfigEvent::ClusterDefaultApplied(strict_controls()),
    ];
    for event in events {
        cache.apply(event);
    }

    let policy = engine.effective_policy("apps").unwrap();
    assert_eq!(policy.seccomp_profile.value.as_deref(), Some(RUNTIME_DEFAULT));
}

#[tokio::test]
async fn test_concurrent_admissions_during_updates() {
    let cache = Arc::new(InMemoryConfigCache::new().with_cluster_default(strict_controls()));
    let engine = engine(&cache);

    let writer = {
        let cache = cache.clone();
        tokio::spawn(async move {
            for i in 0..100 {
                let controls = if i % 2 == 0 {
                    seccomp_only(RUNTIME_DEFAULT)
                } else {
                    strict_controls()
                };
                cache.apply(ConfigEvent::ClusterDefaultApplied(controls));
                tokio::task::yield_now().await;
            }
        })
    };

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let pod = PodBuilder::default().snapshot();
                for _ in 0..50 {
                    let decision = engine
                        .admit(&pod, "apps", AdmissionMode::Mutate, "uid")
                        .unwrap();
                    // Either snapshot, never a mix of the two
                    assert!(decision.patch.len() == 1 || decision.patch.len() == 3);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
}
