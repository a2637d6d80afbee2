use clusterddl::command::{CommandRequest, CreateCommand};
use clusterddl::{
    CatalogCache, ClusterDdl, CreateCollectionRequest, DatabaseName, ErrorCode, InMemoryCluster,
    InjectedFault, Namespace, OperationContext, RetryPolicy, RouterConfig, SessionCatalog,
    ShardId, ShardVersion, TargetSelection, TransactionRouterResourceYielder, VersionedDispatcher,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    cluster: InMemoryCluster,
    cache: Arc<CatalogCache>,
    ddl: ClusterDdl,
    dispatcher: VersionedDispatcher,
}

fn harness(shards: &[&str], config: RouterConfig) -> Harness {
    let cluster = InMemoryCluster::with_shards(shards);
    let cache = Arc::new(CatalogCache::new(Arc::new(cluster.clone()), 64));
    let ddl = ClusterDdl::new(
        cache.clone(),
        Arc::new(cluster.clone()),
        Arc::new(TransactionRouterResourceYielder::new(Arc::new(
            SessionCatalog::new(),
        ))),
        config.clone(),
    );
    let dispatcher = VersionedDispatcher::new(cache.clone(), Arc::new(cluster.clone()), config);
    Harness {
        cluster,
        cache,
        ddl,
        dispatcher,
    }
}

fn app() -> DatabaseName {
    DatabaseName::new("app").unwrap()
}

fn create(coll: &str) -> CommandRequest {
    CreateCommand::new(Namespace::new(app(), coll).unwrap()).to_request()
}

async fn with_database(h: &Harness, primary: &str) {
    h.ddl
        .create_database(&OperationContext::new(), &app(), Some(&ShardId::new(primary)))
        .await
        .unwrap();
}

#[tokio::test]
async fn idempotent_command_retries_transport_failures() {
    let h = harness(&["shard0"], RouterConfig::default());
    with_database(&h, "shard0").await;
    let shard0 = ShardId::new("shard0");
    h.cluster
        .inject_fault(&shard0, InjectedFault::Transport(ErrorCode::HostUnreachable))
        .await;
    h.cluster
        .inject_fault(&shard0, InjectedFault::Transport(ErrorCode::NetworkTimeout))
        .await;

    let response = h
        .dispatcher
        .dispatch_one(
            &OperationContext::new(),
            &TargetSelection::DatabasePrimary(app()),
            &create("logs"),
            RetryPolicy::Idempotent,
        )
        .await
        .unwrap();

    assert_eq!(response.attempts, 3);
    assert!(response.into_response().unwrap().ok);
}

#[tokio::test]
async fn retries_stop_at_configured_bound() {
    let h = harness(&["shard0"], RouterConfig::new().max_retry_attempts(2));
    with_database(&h, "shard0").await;
    for _ in 0..5 {
        h.cluster
            .inject_fault(
                &ShardId::new("shard0"),
                InjectedFault::Transport(ErrorCode::HostUnreachable),
            )
            .await;
    }

    let response = h
        .dispatcher
        .dispatch_one(
            &OperationContext::new(),
            &TargetSelection::DatabasePrimary(app()),
            &create("logs"),
            RetryPolicy::Idempotent,
        )
        .await
        .unwrap();

    assert_eq!(response.attempts, 3);
    let err = response.into_response().unwrap_err();
    assert_eq!(err.code(), ErrorCode::HostUnreachable);
    assert!(err.to_string().contains("shard0"));
}

#[tokio::test]
async fn non_idempotent_command_only_retries_not_primary() {
    let h = harness(&["shard0"], RouterConfig::default());
    with_database(&h, "shard0").await;
    let shard0 = ShardId::new("shard0");
    let op_ctx = OperationContext::new();
    let selection = TargetSelection::DatabasePrimary(app());

    h.cluster
        .inject_fault(&shard0, InjectedFault::Reply(ErrorCode::NotWritablePrimary))
        .await;
    let response = h
        .dispatcher
        .dispatch_one(&op_ctx, &selection, &create("a"), RetryPolicy::NotIdempotent)
        .await
        .unwrap();
    assert_eq!(response.attempts, 2);

    h.cluster
        .inject_fault(&shard0, InjectedFault::Transport(ErrorCode::HostUnreachable))
        .await;
    let response = h
        .dispatcher
        .dispatch_one(&op_ctx, &selection, &create("b"), RetryPolicy::NotIdempotent)
        .await
        .unwrap();
    assert_eq!(response.attempts, 1);
    assert!(response.response.is_err());
}

#[tokio::test]
async fn command_errors_are_returned_as_is() {
    let h = harness(&["shard0"], RouterConfig::default());
    with_database(&h, "shard0").await;
    h.cluster
        .inject_fault(&ShardId::new("shard0"), InjectedFault::Reply(ErrorCode::InvalidOptions))
        .await;

    let response = h
        .dispatcher
        .dispatch_one(
            &OperationContext::new(),
            &TargetSelection::DatabasePrimary(app()),
            &create("logs"),
            RetryPolicy::Idempotent,
        )
        .await
        .unwrap();

    assert_eq!(response.attempts, 1);
    let reply = response.into_response().unwrap();
    assert_eq!(reply.error_code(), Some(ErrorCode::InvalidOptions));
}

#[tokio::test]
async fn stale_shard_version_invalidates_once_then_retries() {
    let h = harness(&["shard0"], RouterConfig::default());
    let op_ctx = OperationContext::new();
    let request = CreateCollectionRequest::sharded(Namespace::new(app(), "users").unwrap(), json!({"_id": 1}));
    h.ddl.create_collection(&op_ctx, &request).await.unwrap();
    let before = h.cache.stats().collection_invalidations;
    h.cluster
        .inject_fault(&ShardId::new("shard0"), InjectedFault::StaleShard)
        .await;

    let response = h
        .dispatcher
        .dispatch_one(
            &op_ctx,
            &TargetSelection::Shard(ShardId::new("shard0")),
            &request.to_request(),
            RetryPolicy::Idempotent,
        )
        .await
        .unwrap();

    assert_eq!(response.attempts, 2);
    assert!(response.into_response().unwrap().ok);
    assert_eq!(h.cache.stats().collection_invalidations, before + 1);
}

#[tokio::test]
async fn repeated_staleness_is_returned_after_one_retry() {
    let h = harness(&["shard0"], RouterConfig::default());
    with_database(&h, "shard0").await;
    let before = h.cache.stats().database_invalidations;
    for _ in 0..2 {
        h.cluster
            .inject_fault(&ShardId::new("shard0"), InjectedFault::StaleDb)
            .await;
    }

    let response = h
        .dispatcher
        .dispatch_one(
            &OperationContext::new(),
            &TargetSelection::DatabasePrimary(app()),
            &create("logs"),
            RetryPolicy::Idempotent,
        )
        .await
        .unwrap();

    assert_eq!(response.attempts, 2);
    let reply = response.into_response().unwrap();
    assert_eq!(reply.error_code(), Some(ErrorCode::StaleDbVersion));
    assert_eq!(h.cache.stats().database_invalidations, before + 1);
}

#[tokio::test]
async fn every_attempt_is_stamped_afresh() {
    let h = harness(&["shard0", "shard1"], RouterConfig::default());
    with_database(&h, "shard0").await;
    let before = h.cluster.database(&app()).await.unwrap().version;
    let after = h
        .cluster
        .move_primary(&app(), &ShardId::new("shard1"))
        .await
        .unwrap();

    let response = h
        .dispatcher
        .dispatch_one(
            &OperationContext::new(),
            &TargetSelection::DatabasePrimary(app()),
            &create("logs"),
            RetryPolicy::Idempotent,
        )
        .await
        .unwrap();

    assert_eq!(response.shard_id, ShardId::new("shard1"));
    let first = h.cluster.commands_received(&ShardId::new("shard0")).await;
    let second = h.cluster.commands_received(&ShardId::new("shard1")).await;
    assert_eq!(first[0].version_stamp.database_version, Some(before));
    assert_eq!(second[0].version_stamp.database_version, Some(after));
}

#[tokio::test]
async fn broadcast_preserves_per_shard_identity() {
    let h = harness(&["shard2", "shard0", "shard1"], RouterConfig::default());
    h.cluster
        .inject_fault(&ShardId::new("shard1"), InjectedFault::Reply(ErrorCode::InvalidOptions))
        .await;

    let responses = h
        .dispatcher
        .dispatch(
            &OperationContext::new(),
            &TargetSelection::AllShards { namespace: None },
            &create("logs"),
            RetryPolicy::Idempotent,
        )
        .await
        .unwrap();

    let ids: Vec<_> = responses.iter().map(|r| r.shard_id.as_str()).collect();
    assert_eq!(ids, ["shard0", "shard1", "shard2"]);
    let failed: Vec<_> = responses
        .iter()
        .filter(|r| r.response.as_ref().is_ok_and(|reply| !reply.ok))
        .map(|r| r.shard_id.as_str())
        .collect();
    assert_eq!(failed, ["shard1"]);
    for id in ["shard0", "shard1", "shard2"] {
        let sent = h.cluster.commands_received(&ShardId::new(id)).await;
        assert_eq!(sent[0].version_stamp.shard_version, Some(ShardVersion::Unsharded));
    }
}

#[tokio::test]
async fn broadcast_stamps_owned_collection_version() {
    let h = harness(&["shard0", "shard1"], RouterConfig::default());
    let op_ctx = OperationContext::new();
    let users = Namespace::new(app(), "users").unwrap();
    h.ddl
        .create_collection(
            &op_ctx,
            &CreateCollectionRequest::sharded(users.clone(), json!({"_id": 1}))
                .with_suggested_primary(ShardId::new("shard0")),
        )
        .await
        .unwrap();
    let version = h.cluster.collection(&users).await.unwrap().version;
    let ping = CommandRequest::new("ping", app(), json!({ "ping": 1 })).with_namespace(users.clone());

    h.dispatcher
        .dispatch(
            &op_ctx,
            &TargetSelection::AllShards {
                namespace: Some(users),
            },
            &ping,
            RetryPolicy::NoRetry,
        )
        .await
        .unwrap();

    let owner = h.cluster.commands_received(&ShardId::new("shard0")).await;
    let other = h.cluster.commands_received(&ShardId::new("shard1")).await;
    assert_eq!(
        owner.last().unwrap().version_stamp.shard_version,
        Some(ShardVersion::Sharded { version })
    );
    assert_eq!(
        other.last().unwrap().version_stamp.shard_version,
        Some(ShardVersion::Unsharded)
    );
}

#[tokio::test]
async fn first_shard_without_shards_is_illegal_operation() {
    let h = harness(&[], RouterConfig::default());

    let err = h
        .dispatcher
        .dispatch(
            &OperationContext::new(),
            &TargetSelection::FirstShard(app()),
            &create("logs"),
            RetryPolicy::Idempotent,
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::IllegalOperation);
    assert_eq!(h.cluster.total_commands().await, 0);
}

#[tokio::test]
async fn first_shard_carries_database_version() {
    let h = harness(&["shard1", "shard0"], RouterConfig::default());
    with_database(&h, "shard1").await;
    let version = h.cluster.database(&app()).await.unwrap().version;

    let response = h
        .dispatcher
        .dispatch_one(
            &OperationContext::new(),
            &TargetSelection::FirstShard(app()),
            &CommandRequest::new("ping", app(), json!({ "ping": 1 })),
            RetryPolicy::NoRetry,
        )
        .await
        .unwrap();

    assert_eq!(response.shard_id, ShardId::new("shard0"));
    let sent = h.cluster.commands_received(&ShardId::new("shard0")).await;
    assert_eq!(sent[0].version_stamp.database_version, Some(version));
    assert_eq!(sent[0].version_stamp.shard_version, Some(ShardVersion::Unsharded));
}

#[tokio::test(start_paused = true)]
async fn command_timeout_surfaces_network_timeout() {
    let h = harness(
        &["shard0"],
        RouterConfig::new().command_timeout(Duration::from_millis(100)),
    );
    with_database(&h, "shard0").await;
    h.cluster
        .inject_fault(&ShardId::new("shard0"), InjectedFault::Hang)
        .await;

    let response = h
        .dispatcher
        .dispatch_one(
            &OperationContext::new(),
            &TargetSelection::DatabasePrimary(app()),
            &create("logs"),
            RetryPolicy::NoRetry,
        )
        .await
        .unwrap();

    assert_eq!(
        response.response.unwrap_err().code(),
        ErrorCode::NetworkTimeout
    );
}

#[tokio::test]
async fn cancelled_operation_never_reports_a_reply() {
    let h = harness(&["shard0"], RouterConfig::default());
    with_database(&h, "shard0").await;
    let op_ctx = OperationContext::new();
    op_ctx.cancel();

    let err = h
        .dispatcher
        .dispatch(
            &op_ctx,
            &TargetSelection::DatabasePrimary(app()),
            &create("logs"),
            RetryPolicy::Idempotent,
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::Interrupted);
    assert!(
        !h.cluster
            .has_untracked_collection(&ShardId::new("shard0"), &Namespace::new(app(), "logs").unwrap())
            .await
    );
}
