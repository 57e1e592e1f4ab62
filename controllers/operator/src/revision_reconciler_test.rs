use super::*;
use crate::projection::tests::layer2_spec;
use crds::{Layer2Revision, NetworkConfigRevisionStatus, RevisionConfig};
use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use network_store::MockStore;

const CONTROL_PLANE: &str = "node-role.kubernetes.io/control-plane";

fn settings() -> RolloutSettings {
    RolloutSettings {
        max_updating: 1,
        api_timeout: Duration::from_secs(60),
        config_timeout: Duration::from_secs(120),
        preconfig_timeout: Duration::from_secs(600),
        excluded_node_roles: vec![CONTROL_PLANE.to_string()],
    }
}

fn reconciler(store: &MockStore, settings: RolloutSettings) -> RevisionReconciler {
    RevisionReconciler::new(Arc::new(store.clone()), settings, VrfTable::default())
}

fn node(name: &str, ready: bool, labels: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn add_nodes(store: &MockStore, names: &[&str]) {
    for name in names {
        store.add_node(node(name, true, &[]));
    }
}

/// Publishes a revision whose content is distinguished by `vni`.
async fn publish(store: &MockStore, vni: u32) -> NetworkConfigRevision {
    let revision = NetworkConfigRevision::from_config(RevisionConfig {
        layer2: vec![Layer2Revision {
            name: "seg".to_string(),
            spec: layer2_spec(100, vni),
        }],
        ..Default::default()
    })
    .unwrap();
    store.create_revision(&revision).await.unwrap()
}

/// Reports `status` for `node` as the agent would, `age` ago.
async fn report(store: &MockStore, node: &str, status: ConfigStatus, age: chrono::Duration) {
    let config = store.node_config(node).unwrap();
    let last_applied_revision = match status {
        ConfigStatus::Provisioned | ConfigStatus::Invalid => Some(config.spec.revision.clone()),
        _ => config.status.and_then(|s| s.last_applied_revision),
    };
    store
        .update_node_config_status(
            node,
            &NodeNetworkConfigStatus {
                config_status: status,
                last_update: Some(Utc::now() - age),
                last_applied_revision,
                error_message: (status == ConfigStatus::Invalid)
                    .then(|| "applying bridge failed".to_string()),
            },
        )
        .await
        .unwrap();
}

/// Ticks until every listed node is provisioned on the newest revision.
async fn roll_out(store: &MockStore, reconciler: &RevisionReconciler, nodes: &[&str]) {
    for _ in 0..=nodes.len() {
        reconciler.reconcile().await.unwrap();
        for name in nodes {
            if store
                .node_config(name)
                .is_some_and(|c| c.config_status() != ConfigStatus::Provisioned)
            {
                report(store, name, ConfigStatus::Provisioned, chrono::Duration::zero()).await;
            }
        }
    }
    reconciler.reconcile().await.unwrap();
}

fn config_revision(store: &MockStore, node: &str) -> Option<String> {
    store.node_config(node).map(|c| c.spec.revision)
}

fn status(store: &MockStore, revision: &NetworkConfigRevision) -> NetworkConfigRevisionStatus {
    store
        .revision(&revision.name_any())
        .and_then(|r| r.status)
        .unwrap_or_default()
}

#[tokio::test]
async fn test_failed_node_invalidates_revision_and_rolls_back() {
    let store = MockStore::new();
    add_nodes(&store, &["a", "b", "c"]);
    let reconciler = reconciler(&store, settings());

    let r1 = publish(&store, 1000).await;
    roll_out(&store, &reconciler, &["a", "b", "c"]).await;
    let s1 = status(&store, &r1);
    assert_eq!((s1.ready, s1.total, s1.queued), (3, 3, 0));

    let r2 = publish(&store, 2000).await;
    reconciler.reconcile().await.unwrap();
    assert_eq!(config_revision(&store, "a").as_deref(), Some(r2.revision()));
    assert_eq!(config_revision(&store, "b").as_deref(), Some(r1.revision()));
    assert_eq!(status(&store, &r2).queued, 3);

    report(&store, "a", ConfigStatus::Invalid, chrono::Duration::zero()).await;
    reconciler.reconcile().await.unwrap();

    let s2 = status(&store, &r2);
    assert!(s2.is_invalid);
    assert_eq!(s2.failed_node.as_deref(), Some("a"));
    assert_eq!(s2.failed_message.as_deref(), Some("applying bridge failed"));
    let failed_at = s2.failed_at;
    assert!(failed_at.is_some());
    // Node a goes back to the last good revision.
    assert_eq!(config_revision(&store, "a").as_deref(), Some(r1.revision()));

    for _ in 0..5 {
        reconciler.reconcile().await.unwrap();
        report(&store, "a", ConfigStatus::Provisioned, chrono::Duration::zero()).await;
    }
    for name in ["a", "b", "c"] {
        assert_eq!(config_revision(&store, name).as_deref(), Some(r1.revision()));
    }
    let s2 = status(&store, &r2);
    assert!(s2.is_invalid);
    assert_eq!(s2.failed_node.as_deref(), Some("a"));
    assert_eq!(s2.failed_at, failed_at);
    assert_eq!((s2.ready, s2.total), (0, 3));
}

#[tokio::test]
async fn test_admits_at_most_one_node_per_tick() {
    let store = MockStore::new();
    add_nodes(&store, &["a", "b", "c"]);
    let reconciler = reconciler(
        &store,
        RolloutSettings {
            max_updating: 10,
            ..settings()
        },
    );
    publish(&store, 1000).await;

    reconciler.reconcile().await.unwrap();
    assert_eq!(store.list_node_configs().await.unwrap().len(), 1);
    assert!(store.node_config("a").is_some());

    reconciler.reconcile().await.unwrap();
    assert_eq!(store.list_node_configs().await.unwrap().len(), 2);
    assert!(store.node_config("b").is_some());
}

#[tokio::test]
async fn test_updating_nodes_are_bounded() {
    let store = MockStore::new();
    add_nodes(&store, &["a", "b", "c"]);
    let reconciler = reconciler(&store, settings());
    let revision = publish(&store, 1000).await;

    reconciler.reconcile().await.unwrap();
    reconciler.reconcile().await.unwrap();
    assert_eq!(store.list_node_configs().await.unwrap().len(), 1);
    let s = status(&store, &revision);
    assert_eq!((s.ongoing, s.total, s.queued), (1, 3, 2));

    report(&store, "a", ConfigStatus::Provisioning, chrono::Duration::zero()).await;
    reconciler.reconcile().await.unwrap();
    assert_eq!(store.list_node_configs().await.unwrap().len(), 1);

    report(&store, "a", ConfigStatus::Provisioned, chrono::Duration::zero()).await;
    reconciler.reconcile().await.unwrap();
    assert!(store.node_config("b").is_some());
}

#[tokio::test]
async fn test_new_config_starts_unknown_with_both_owners() {
    let store = MockStore::new();
    add_nodes(&store, &["a"]);
    let revision = publish(&store, 1000).await;

    reconciler(&store, settings()).reconcile().await.unwrap();

    let config = store.node_config("a").unwrap();
    assert_eq!(config.revision(), revision.revision());
    assert_eq!(config.config_status(), ConfigStatus::Unknown);
    assert!(config.last_update().is_some());
    let owners: Vec<&str> = config
        .metadata
        .owner_references
        .iter()
        .flatten()
        .map(|r| r.kind.as_str())
        .collect();
    assert_eq!(owners, vec!["Node", "NetworkConfigRevision"]);
}

#[tokio::test]
async fn test_preconfig_timeout_invalidates() {
    let store = MockStore::new();
    add_nodes(&store, &["a"]);
    let reconciler = reconciler(&store, settings());
    let revision = publish(&store, 1000).await;

    reconciler.reconcile().await.unwrap();
    report(&store, "a", ConfigStatus::Unknown, chrono::Duration::minutes(9)).await;
    reconciler.reconcile().await.unwrap();
    assert!(!status(&store, &revision).is_invalid);

    report(&store, "a", ConfigStatus::Unknown, chrono::Duration::minutes(11)).await;
    reconciler.reconcile().await.unwrap();
    let s = status(&store, &revision);
    assert!(s.is_invalid);
    assert_eq!(s.failed_node.as_deref(), Some("a"));
    assert!(s.failed_message.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_config_timeout_invalidates() {
    let store = MockStore::new();
    add_nodes(&store, &["a"]);
    let reconciler = reconciler(&store, settings());
    let revision = publish(&store, 1000).await;

    reconciler.reconcile().await.unwrap();
    report(&store, "a", ConfigStatus::Provisioning, chrono::Duration::minutes(3)).await;
    reconciler.reconcile().await.unwrap();

    let s = status(&store, &revision);
    assert!(s.is_invalid);
    assert!(s.failed_message.unwrap().contains("provisioning"));
}

#[tokio::test]
async fn test_deploy_retries_timeouts() {
    let store = MockStore::new();
    add_nodes(&store, &["a"]);
    publish(&store, 1000).await;
    store.fail_node_config_writes(2);

    reconciler(&store, settings()).reconcile().await.unwrap();

    assert_eq!(store.node_config_writes(), 3);
    assert!(store.node_config("a").is_some());
}

#[tokio::test]
async fn test_deploy_gives_up_after_three_timeouts() {
    let store = MockStore::new();
    add_nodes(&store, &["a"]);
    publish(&store, 1000).await;
    store.fail_node_config_writes(5);

    let err = reconciler(&store, settings()).reconcile().await.unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(store.node_config_writes(), 3);
    assert!(store.node_config("a").is_none());
}

#[tokio::test]
async fn test_orphaned_configs_are_deleted() {
    let store = MockStore::new();
    add_nodes(&store, &["a"]);
    let reconciler = reconciler(&store, settings());
    publish(&store, 1000).await;
    reconciler.reconcile().await.unwrap();

    let mut orphan = NodeNetworkConfig::new("gone", Default::default());
    orphan.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "v1".to_string(),
        kind: "Node".to_string(),
        name: "gone".to_string(),
        uid: "0000".to_string(),
        ..Default::default()
    }]);
    store.put_node_config(orphan);

    reconciler.reconcile().await.unwrap();

    assert!(store.node_config("gone").is_none());
    assert!(store.node_config("a").is_some());
}

#[tokio::test]
async fn test_ineligible_nodes_are_skipped() {
    let store = MockStore::new();
    store.add_node(node("cp", true, &[(CONTROL_PLANE, "")]));
    store.add_node(node("down", false, &[]));
    store.add_node(node("worker", true, &[]));
    let reconciler = reconciler(&store, settings());
    let revision = publish(&store, 1000).await;

    roll_out(&store, &reconciler, &["worker"]).await;

    assert!(store.node_config("cp").is_none());
    assert!(store.node_config("down").is_none());
    let s = status(&store, &revision);
    assert_eq!((s.ready, s.total, s.queued), (1, 1, 0));
}

#[tokio::test]
async fn test_unused_revisions_are_cleaned_up() {
    let store = MockStore::new();
    add_nodes(&store, &["a"]);
    let reconciler = reconciler(&store, settings());

    let r1 = publish(&store, 1000).await;
    roll_out(&store, &reconciler, &["a"]).await;
    let r2 = publish(&store, 2000).await;
    roll_out(&store, &reconciler, &["a"]).await;

    assert!(store.revision(&r1.name_any()).is_none());
    assert!(store.revision(&r2.name_any()).is_some());
    assert_eq!(config_revision(&store, "a").as_deref(), Some(r2.revision()));
}

#[tokio::test]
async fn test_no_valid_revision_leaves_nodes_alone() {
    let store = MockStore::new();
    add_nodes(&store, &["a"]);
    let reconciler = reconciler(&store, settings());
    let revision = publish(&store, 1000).await;
    store
        .update_revision_status(
            &revision.name_any(),
            &NetworkConfigRevisionStatus {
                is_invalid: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    reconciler.reconcile().await.unwrap();

    assert!(store.node_config("a").is_none());
    assert!(status(&store, &revision).is_invalid);
}

#[tokio::test]
async fn test_total_counts_eligible_nodes() {
    let store = MockStore::new();
    add_nodes(&store, &["a", "b", "c"]);
    let reconciler = reconciler(&store, settings());
    let revision = publish(&store, 1000).await;

    reconciler.reconcile().await.unwrap();
    report(&store, "a", ConfigStatus::Provisioned, chrono::Duration::zero()).await;
    reconciler.reconcile().await.unwrap();

    let s = status(&store, &revision);
    assert_eq!((s.ready, s.total), (1, 3));
}

#[tokio::test]
async fn test_invalid_revision_kept_while_rollout_is_partial() {
    let store = MockStore::new();
    add_nodes(&store, &["a", "b", "c"]);
    let reconciler = reconciler(&store, settings());

    let r1 = publish(&store, 1000).await;
    roll_out(&store, &reconciler, &["a", "b", "c"]).await;

    let r2 = publish(&store, 2000).await;
    reconciler.reconcile().await.unwrap();
    report(&store, "a", ConfigStatus::Invalid, chrono::Duration::zero()).await;
    reconciler.reconcile().await.unwrap();
    report(&store, "a", ConfigStatus::Provisioned, chrono::Duration::zero()).await;
    assert!(status(&store, &r2).is_invalid);

    let r3 = publish(&store, 3000).await;
    reconciler.reconcile().await.unwrap();
    assert_eq!(config_revision(&store, "a").as_deref(), Some(r3.revision()));
    report(&store, "a", ConfigStatus::Provisioned, chrono::Duration::zero()).await;
    reconciler.reconcile().await.unwrap();

    let s3 = status(&store, &r3);
    assert_eq!((s3.ready, s3.total), (1, 3));
    assert!(s3.queued > 0);
    assert!(store.revision(&r2.name_any()).is_some());
    assert!(store.revision(&r1.name_any()).is_some());
    assert_eq!(config_revision(&store, "c").as_deref(), Some(r1.revision()));
}

#[tokio::test]
async fn test_status_reset_survives_timeout() {
    let store = MockStore::new();
    add_nodes(&store, &["a"]);
    let reconciler = reconciler(&store, settings());
    let r1 = publish(&store, 1000).await;
    roll_out(&store, &reconciler, &["a"]).await;

    let r2 = publish(&store, 2000).await;
    store.fail_node_config_status_writes(1);
    reconciler.reconcile().await.unwrap();

    let config = store.node_config("a").unwrap();
    assert_eq!(config.revision(), r2.revision());
    assert_eq!(config.config_status(), ConfigStatus::Unknown);
    let last_applied = config.status.and_then(|s| s.last_applied_revision);
    assert_eq!(last_applied.as_deref(), Some(r1.revision()));

    reconciler.reconcile().await.unwrap();
    let s2 = status(&store, &r2);
    assert_eq!((s2.ready, s2.ongoing), (0, 1));
    assert!(store.revision(&r1.name_any()).is_some());
}

#[tokio::test]
async fn test_missing_status_is_repaired() {
    let store = MockStore::new();
    add_nodes(&store, &["a"]);
    let reconciler = reconciler(&store, settings());
    let revision = publish(&store, 1000).await;
    store.fail_node_config_status_writes(3);

    let err = reconciler.reconcile().await.unwrap_err();
    assert!(err.is_timeout());
    assert!(store.node_config("a").unwrap().status.is_none());

    reconciler.reconcile().await.unwrap();

    let config = store.node_config("a").unwrap();
    assert_eq!(config.config_status(), ConfigStatus::Unknown);
    assert!(config.last_update().is_some());
    let s = status(&store, &revision);
    assert_eq!((s.ready, s.ongoing), (0, 1));
    assert!(!s.is_invalid);
}

#[tokio::test]
async fn test_outcome_of_previous_revision_is_not_ready() {
    let store = MockStore::new();
    add_nodes(&store, &["a"]);
    let reconciler = reconciler(&store, settings());
    let r1 = publish(&store, 1000).await;
    roll_out(&store, &reconciler, &["a"]).await;
    let r2 = publish(&store, 2000).await;
    reconciler.reconcile().await.unwrap();

    // The node reports its old revision after the spec moved on.
    store
        .update_node_config_status(
            "a",
            &NodeNetworkConfigStatus {
                config_status: ConfigStatus::Provisioned,
                last_update: Some(Utc::now()),
                last_applied_revision: Some(r1.revision().to_string()),
                error_message: None,
            },
        )
        .await
        .unwrap();
    reconciler.reconcile().await.unwrap();

    let s2 = status(&store, &r2);
    assert_eq!((s2.ready, s2.ongoing), (0, 1));
    assert!(store.revision(&r1.name_any()).is_some());
    assert_eq!(
        store.node_config("a").unwrap().config_status(),
        ConfigStatus::Unknown
    );
}
