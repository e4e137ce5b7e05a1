//! Behaviour of the generic reconciler against the in-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use slumber_core::{
    AccessMode, DependentResource, Error, Instance, InstanceId, InstanceSpec, MountSource,
    ObjectMeta,
    OperatorConfig, OperatorConfigDocument, ReclaimPolicy, ResourceBody, ResourceKind,
    StoreOperation, VolumeTemplate,
};
use slumber_reconciler::{ReconcileAction, Renderer, ResourceReconciler};
use slumber_store::{Fault, InMemoryResourceStore, ResourceStore};

fn lobby() -> InstanceId {
    InstanceId::new("games", "lobby")
}

fn operator_config() -> Arc<OperatorConfig> {
    Arc::new(OperatorConfig::from_document(&OperatorConfigDocument {
        namespace: "games".to_string(),
        server_jars_claim: "server-jars".to_string(),
        mod_jars_claim: "mod-jars".to_string(),
        servers_volume: VolumeTemplate {
            storage_class: "manual".to_string(),
            capacity: "5Gi".to_string(),
            base_path: "/srv/worlds".to_string(),
            access_mode: AccessMode::ReadWriteOnce,
            reclaim_policy: ReclaimPolicy::Retain,
        },
        init_image: None,
    }))
}

fn instance(enabled: bool) -> Instance {
    let mut spec = InstanceSpec::new("eclipse-temurin:21", 2048, 1024).with_enabled(enabled);
    spec.jar_site = "https://jars.example.com".to_string();
    Instance::new(lobby(), spec)
}

async fn setup() -> (Arc<InMemoryResourceStore>, ResourceReconciler) {
    let store = InMemoryResourceStore::new_arc();
    store.insert_instance(instance(true)).await;
    let reconciler = ResourceReconciler::new(store.clone());
    (store, reconciler)
}

fn rendered(instance: &Instance, kind: ResourceKind) -> Result<DependentResource, Error> {
    Renderer::new(operator_config())
        .render(instance)
        .get(kind)
        .cloned()
        .unwrap_or_else(|| Err(Error::render(kind, "not rendered")))
}

async fn converge(
    reconciler: &ResourceReconciler,
    instance: &Instance,
) -> Result<Vec<ReconcileAction>, Box<dyn std::error::Error>> {
    let mut actions = Vec::new();
    for kind in ResourceKind::ALL {
        let outcome = reconciler
            .reconcile(&instance.id, rendered(instance, kind)?)
            .await?;
        actions.push(outcome.action);
    }
    Ok(actions)
}

/// GIVEN: an instance with no dependents
/// WHEN: two passes run back to back with no external change
/// THEN: the first creates every kind and the second writes nothing
#[tokio::test]
async fn test_second_pass_is_write_free() -> Result<(), Box<dyn std::error::Error>> {
    let (store, reconciler) = setup().await;
    let instance = instance(true);

    let first = converge(&reconciler, &instance).await?;
    assert!(first.iter().all(|a| *a == ReconcileAction::Created));
    let after_first = store.write_stats();

    let second = converge(&reconciler, &instance).await?;
    assert!(second.iter().all(|a| *a == ReconcileAction::Unchanged));
    assert_eq!(store.write_stats(), after_first);
    Ok(())
}

/// GIVEN: four workloads owned by one instance, the rendered one not the oldest
/// WHEN: the workload kind is reconciled once
/// THEN: exactly one survives and it is the one carrying the rendered name
#[tokio::test]
async fn test_duplicates_converge_to_rendered_name() -> Result<(), Box<dyn std::error::Error>> {
    let (store, reconciler) = setup().await;
    let instance = instance(true);
    let desired = rendered(&instance, ResourceKind::Workload)?;

    for (name, minute) in [("a-copy", 30), ("b-copy", 20), ("lobby", 10), ("z-first", 5)] {
        let mut duplicate = desired.clone();
        duplicate.meta.name = name.to_string();
        duplicate.meta.created_at = Utc.with_ymd_and_hms(2026, 1, 1, 12, minute, 0).single();
        store.seed_resource(duplicate).await;
    }

    let outcome = reconciler.reconcile(&lobby(), desired).await?;
    let remaining = store.list_dependents(&lobby(), ResourceKind::Workload).await?;

    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].meta.name, "lobby");
    assert_eq!(outcome.name, "lobby");
    assert_eq!(outcome.action, ReconcileAction::Unchanged);
    assert_eq!(outcome.duplicates_removed, 3);
    Ok(())
}

/// GIVEN: an older claim under a legacy name next to the rendered claim
/// WHEN: the claim and the workload are reconciled
/// THEN: the rendered claim survives and the workload mounts a claim that exists
#[tokio::test]
async fn test_older_misnamed_duplicate_does_not_win() -> Result<(), Box<dyn std::error::Error>> {
    let (store, reconciler) = setup().await;
    let instance = instance(true);
    let claim = rendered(&instance, ResourceKind::VolumeClaim)?;

    let mut legacy = claim.clone();
    legacy.meta.name = "lobby-legacy".to_string();
    legacy.meta.created_at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single();
    store.seed_resource(legacy).await;
    store.seed_resource(claim.clone()).await;

    let outcome = reconciler.reconcile(&lobby(), claim).await?;
    reconciler
        .reconcile(&lobby(), rendered(&instance, ResourceKind::Workload)?)
        .await?;

    let claims: Vec<String> = store
        .list_dependents(&lobby(), ResourceKind::VolumeClaim)
        .await?
        .into_iter()
        .map(|c| c.meta.name)
        .collect();
    let workload = store
        .list_dependents(&lobby(), ResourceKind::Workload)
        .await?
        .pop()
        .ok_or("workload missing")?;
    let ResourceBody::Workload(spec) = workload.body else {
        return Err("not a workload".into());
    };
    let mounted: Vec<&str> = spec
        .mounts
        .iter()
        .filter_map(|m| match &m.source {
            MountSource::Claim(name) => Some(name.as_str()),
            _ => None,
        })
        .collect();

    assert_eq!(outcome.name, "lobby");
    assert_eq!(claims, vec!["lobby"]);
    assert!(mounted.iter().all(|name| claims.iter().any(|c| c == name)));
    assert!(!mounted.is_empty());
    Ok(())
}

/// GIVEN: a single claim under a legacy name and no claim with the rendered name
/// WHEN: the claim kind is reconciled
/// THEN: the rendered claim is created and the legacy one removed
#[tokio::test]
async fn test_misnamed_survivor_is_replaced() -> Result<(), Box<dyn std::error::Error>> {
    let (store, reconciler) = setup().await;
    let instance = instance(true);
    let claim = rendered(&instance, ResourceKind::VolumeClaim)?;

    let mut legacy = claim.clone();
    legacy.meta.name = "lobby-legacy".to_string();
    store.seed_resource(legacy).await;

    let outcome = reconciler.reconcile(&lobby(), claim).await?;
    let remaining = store.list_dependents(&lobby(), ResourceKind::VolumeClaim).await?;

    assert_eq!(outcome.action, ReconcileAction::Created);
    assert_eq!(outcome.duplicates_removed, 1);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].meta.name, "lobby");
    Ok(())
}

/// GIVEN: duplicate config bundles and a store whose deletes fail
/// WHEN: the kind is reconciled
/// THEN: the call still succeeds and reports the failed deletions
#[tokio::test]
async fn test_duplicate_delete_failure_is_not_fatal() -> Result<(), Box<dyn std::error::Error>> {
    let (store, reconciler) = setup().await;
    let instance = instance(true);
    let desired = rendered(&instance, ResourceKind::ConfigBundle)?;

    store.seed_resource(desired.clone()).await;
    let mut copy = desired.clone();
    copy.meta.name = "lobby-copy".to_string();
    store.seed_resource(copy).await;
    store.inject(Fault::on(StoreOperation::Delete)).await;

    let outcome = reconciler.reconcile(&lobby(), desired).await?;
    assert_eq!(outcome.duplicates_failed, 1);
    assert_eq!(outcome.duplicates_removed, 0);
    Ok(())
}

/// GIVEN: a network endpoint whose port drifted externally
/// WHEN: the endpoint is reconciled
/// THEN: it is left untouched
#[tokio::test]
async fn test_endpoint_is_never_updated() -> Result<(), Box<dyn std::error::Error>> {
    let (store, reconciler) = setup().await;
    let instance = instance(true);
    let desired = rendered(&instance, ResourceKind::NetworkEndpoint)?;

    let mut drifted = desired.clone();
    if let ResourceBody::NetworkEndpoint(endpoint) = &mut drifted.body {
        endpoint.port = 30000;
        endpoint.selector = BTreeMap::new();
    }
    store.seed_resource(drifted).await;

    let outcome = reconciler.reconcile(&lobby(), desired).await?;
    assert_eq!(outcome.action, ReconcileAction::Unchanged);
    assert_eq!(store.write_stats().updates, 0);
    Ok(())
}

/// GIVEN: a running workload
/// WHEN: the instance is disabled and the workload reconciled
/// THEN: the stored workload is updated to zero replicas, keeping its identity
#[tokio::test]
async fn test_disable_scales_workload_to_zero() -> Result<(), Box<dyn std::error::Error>> {
    let (store, reconciler) = setup().await;
    let created = store
        .create_dependent(rendered(&instance(true), ResourceKind::Workload)?)
        .await?;

    let outcome = reconciler
        .reconcile(&lobby(), rendered(&instance(false), ResourceKind::Workload)?)
        .await?;
    let stored = store.list_dependents(&lobby(), ResourceKind::Workload).await?;

    assert_eq!(outcome.action, ReconcileAction::Updated);
    assert_eq!(stored[0].replicas(), Some(0));
    assert_eq!(stored[0].meta.uid, created.meta.uid);
    Ok(())
}

/// GIVEN: a store that refuses to create volumes
/// WHEN: the volume is reconciled
/// THEN: a retryable infrastructure error naming the kind and operation comes back
#[tokio::test]
async fn test_create_failure_is_transient() -> Result<(), Box<dyn std::error::Error>> {
    let (store, reconciler) = setup().await;
    store
        .inject(Fault::on(StoreOperation::Create).for_kind(ResourceKind::Volume))
        .await;

    let result = reconciler
        .reconcile(&lobby(), rendered(&instance(true), ResourceKind::Volume)?)
        .await;

    match result {
        Err(Error::TransientInfra {
            target, operation, ..
        }) => {
            assert!(target.starts_with("Volume"));
            assert_eq!(operation, StoreOperation::Create);
        }
        other => return Err(format!("expected transient error, got {other:?}").into()),
    }
    Ok(())
}

/// GIVEN: the owning instance was deleted
/// WHEN: a dependent is reconciled for it
/// THEN: the error is `NotFound`, so the pass can be abandoned
#[tokio::test]
async fn test_vanished_owner_is_not_found() -> Result<(), Box<dyn std::error::Error>> {
    let (store, reconciler) = setup().await;
    store.delete_instance(&lobby()).await;

    let result = reconciler
        .reconcile(&lobby(), rendered(&instance(true), ResourceKind::Volume)?)
        .await;
    assert!(matches!(result, Err(Error::NotFound { .. })));
    Ok(())
}
