use async_trait::async_trait;
use clusterddl::command::CONFIGSVR_CREATE_DATABASE;
use clusterddl::core::{CachedDatabaseInfo, CollectionRoutingInfo};
use clusterddl::{
    CatalogCache, CatalogSource, ClusterDdl, DatabaseName, DatabaseVersion, DdlError,
    ErrorCategory, ErrorCode, InMemoryCluster, InjectedFault, LogicalSessionId, Namespace,
    OperationContext, ResourceYielder, Result, RouterConfig, SessionCatalog, ShardId,
    TransactionRouterResourceYielder, YielderStats,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct Router {
    ddl: ClusterDdl,
    yielder: Arc<TransactionRouterResourceYielder>,
}

fn router(cluster: &InMemoryCluster) -> Router {
    let config = RouterConfig::default();
    let catalog = cluster
        .session_catalog()
        .cloned()
        .unwrap_or_else(|| Arc::new(SessionCatalog::new()));
    let cache = Arc::new(CatalogCache::from_config(Arc::new(cluster.clone()), &config));
    let yielder = Arc::new(TransactionRouterResourceYielder::new(catalog));
    let ddl = ClusterDdl::new(cache, Arc::new(cluster.clone()), yielder.clone(), config);
    Router { ddl, yielder }
}

fn db(name: &str) -> DatabaseName {
    DatabaseName::new(name).unwrap()
}

fn in_transaction(catalog: &SessionCatalog) -> (OperationContext, LogicalSessionId) {
    let lsid = LogicalSessionId::new();
    catalog.check_out(lsid).unwrap();
    let op_ctx = OperationContext::new()
        .with_session(lsid, Some(7))
        .in_transaction()
        .unwrap();
    (op_ctx, lsid)
}

#[tokio::test]
async fn concurrent_create_database_creates_once() {
    let cluster = InMemoryCluster::with_shards(&["shard0", "shard1"]);
    let router = router(&cluster);
    let (op_a, op_b) = (OperationContext::new(), OperationContext::new());
    let name = db("orders");

    let (a, b) = tokio::join!(
        router.ddl.create_database(&op_a, &name, None),
        router.ddl.create_database(&op_b, &name, None)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.version, b.version);
    assert_eq!(a.primary, b.primary);
    assert_eq!(cluster.database_creations().await, 1);
}

#[tokio::test]
async fn racing_routers_observe_the_same_database() {
    let cluster = InMemoryCluster::with_shards(&["shard0", "shard1"]);
    let first = router(&cluster);
    let second = router(&cluster);
    let name = db("inventory");
    let (op_a, op_b) = (OperationContext::new(), OperationContext::new());

    let (a, b) = tokio::join!(
        first.ddl.create_database(&op_a, &name, None),
        second.ddl.create_database(&op_b, &name, None)
    );

    assert_eq!(a.unwrap().version, b.unwrap().version);
    assert_eq!(cluster.database_creations().await, 1);
}

#[tokio::test]
async fn cached_database_skips_the_config_server() {
    let cluster = InMemoryCluster::with_shards(&["shard0"]);
    let router = router(&cluster);
    let op_ctx = OperationContext::new();

    router.ddl.create_database(&op_ctx, &db("app"), None).await.unwrap();
    let after_first = cluster.total_commands().await;
    let fetches = cluster.catalog_fetches().await;

    router.ddl.create_database(&op_ctx, &db("app"), None).await.unwrap();
    assert_eq!(cluster.total_commands().await, after_first);
    assert_eq!(cluster.catalog_fetches().await, fetches);
}

#[tokio::test]
async fn no_shards_fails_without_contacting_anyone() {
    let cluster = InMemoryCluster::new();
    let router = router(&cluster);

    let err = router
        .ddl
        .create_database(&OperationContext::new(), &db("app"), None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::IllegalOperation);
    assert_eq!(err.category(), ErrorCategory::FatalCaller);
    assert!(err.to_string().contains("Database app could not be created"));
    assert_eq!(cluster.total_commands().await, 0);
    assert_eq!(cluster.catalog_fetches().await, 0);
    assert_eq!(router.yielder.stats(), YielderStats::default());
}

#[tokio::test]
async fn reserved_database_is_never_created() {
    let cluster = InMemoryCluster::with_shards(&["shard0"]);
    let router = router(&cluster);

    let info = router
        .ddl
        .create_database(&OperationContext::new(), &DatabaseName::config(), None)
        .await
        .unwrap();

    assert_eq!(info.primary, cluster.config_shard_id());
    assert_eq!(info.version, DatabaseVersion::fixed());
    assert_eq!(cluster.total_commands().await, 0);
}

#[tokio::test]
async fn suggested_primary_is_advisory() {
    let cluster = InMemoryCluster::with_shards(&["shard0", "shard1"]);
    let router = router(&cluster);
    let op_ctx = OperationContext::new();

    let honoured = router
        .ddl
        .create_database(&op_ctx, &db("a"), Some(&ShardId::new("shard1")))
        .await
        .unwrap();
    assert_eq!(honoured.primary, ShardId::new("shard1"));

    let reassigned = router
        .ddl
        .create_database(&op_ctx, &db("b"), Some(&ShardId::new("ghost")))
        .await
        .unwrap();
    assert_eq!(reassigned.primary, ShardId::new("shard0"));
}

#[tokio::test]
async fn create_request_uses_majority_and_admin_database() {
    let cluster = InMemoryCluster::with_shards(&["shard0"]);
    let router = router(&cluster);

    router
        .ddl
        .create_database(&OperationContext::new(), &db("app"), None)
        .await
        .unwrap();

    let sent = cluster.commands_received(&cluster.config_shard_id()).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].command_name, CONFIGSVR_CREATE_DATABASE);
    assert!(sent[0].db.is_admin());
    assert!(sent[0].write_concern.as_ref().unwrap().is_majority());
}

#[tokio::test]
async fn transient_config_server_failure_is_retried() {
    let cluster = InMemoryCluster::with_shards(&["shard0"]);
    let router = router(&cluster);
    let config = cluster.config_shard_id();
    cluster
        .inject_fault(&config, InjectedFault::Transport(ErrorCode::HostUnreachable))
        .await;
    cluster
        .inject_fault(&config, InjectedFault::Reply(ErrorCode::PrimarySteppedDown))
        .await;

    let info = router
        .ddl
        .create_database(&OperationContext::new(), &db("app"), None)
        .await
        .unwrap();

    assert_eq!(cluster.commands_received(&config).await.len(), 3);
    assert_eq!(cluster.database(&db("app")).await.map(|i| i.version), Some(info.version));
}

#[tokio::test]
async fn authority_error_is_fatal_with_context() {
    let cluster = InMemoryCluster::with_shards(&["shard0"]);
    let router = router(&cluster);
    cluster
        .inject_fault(&cluster.config_shard_id(), InjectedFault::Reply(ErrorCode::InvalidOptions))
        .await;

    let err = router
        .ddl
        .create_database(&OperationContext::new(), &db("app"), None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::InvalidOptions);
    assert!(err.to_string().starts_with("Database app could not be created"));
    assert!(cluster.database(&db("app")).await.is_none());
}

#[tokio::test]
async fn exists_reply_for_vanished_database_surfaces_authority_error() {
    let cluster = InMemoryCluster::with_shards(&["shard0"]);
    let router = router(&cluster);
    cluster
        .inject_fault(&cluster.config_shard_id(), InjectedFault::Reply(ErrorCode::NamespaceExists))
        .await;

    let err = router
        .ddl
        .create_database(&OperationContext::new(), &db("app"), None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::NamespaceExists);
}

/// Reports every database as missing on its first read, as a router does
/// when another router creates the database between its lookup and its
/// create request.
struct MissOnceSource {
    inner: InMemoryCluster,
    reads: AtomicUsize,
}

#[async_trait]
impl CatalogSource for MissOnceSource {
    async fn fetch_database(&self, db: &DatabaseName) -> Result<Option<CachedDatabaseInfo>> {
        if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(None);
        }
        self.inner.fetch_database(db).await
    }

    async fn fetch_collection(&self, nss: &Namespace) -> Result<Option<CollectionRoutingInfo>> {
        self.inner.fetch_collection(nss).await
    }
}

#[tokio::test]
async fn exists_race_with_another_router_is_success() {
    let cluster = InMemoryCluster::with_shards(&["shard0"]);
    let other = router(&cluster);
    let created = other
        .ddl
        .create_database(&OperationContext::new(), &db("app"), None)
        .await
        .unwrap();

    let source = Arc::new(MissOnceSource {
        inner: cluster.clone(),
        reads: AtomicUsize::new(0),
    });
    let catalog = Arc::new(SessionCatalog::new());
    let ddl = ClusterDdl::new(
        Arc::new(CatalogCache::new(source, 16)),
        Arc::new(cluster.clone()),
        Arc::new(TransactionRouterResourceYielder::new(catalog)),
        RouterConfig::default(),
    );
    cluster
        .inject_fault(&cluster.config_shard_id(), InjectedFault::Reply(ErrorCode::NamespaceExists))
        .await;

    let info = ddl
        .create_database(&OperationContext::new(), &db("app"), None)
        .await
        .unwrap();

    assert_eq!(info.version, created.version);
    assert_eq!(cluster.database_creations().await, 1);
}

// ============================================================================
// Session yielding
// ============================================================================

#[tokio::test]
async fn co_located_config_server_can_use_the_yielded_session() {
    let catalog = Arc::new(SessionCatalog::new());
    let cluster = InMemoryCluster::with_shards(&["shard0"]).with_session_catalog(catalog.clone());
    let router = router(&cluster);
    let (op_ctx, lsid) = in_transaction(&catalog);

    router
        .ddl
        .create_database(&op_ctx, &db("app"), None)
        .await
        .unwrap();

    assert!(catalog.is_checked_out(lsid));
    let sent = cluster.commands_received(&cluster.config_shard_id()).await;
    let session = sent[0].session.unwrap();
    assert_eq!(session.lsid, lsid);
    assert_eq!(session.txn_number, Some(7));
    assert_eq!(
        router.yielder.stats(),
        YielderStats {
            yields: 1,
            unyields: 1,
            unyield_failures: 0
        }
    );
}

#[tokio::test]
async fn nested_failure_still_restores_session_once() {
    let catalog = Arc::new(SessionCatalog::new());
    let cluster = InMemoryCluster::with_shards(&["shard0"]).with_session_catalog(catalog.clone());
    let router = router(&cluster);
    let (op_ctx, lsid) = in_transaction(&catalog);
    cluster
        .inject_fault(&cluster.config_shard_id(), InjectedFault::Reply(ErrorCode::InvalidOptions))
        .await;

    let err = router
        .ddl
        .create_database(&op_ctx, &db("app"), None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::InvalidOptions);
    assert!(err.session_restore_error().is_none());
    assert!(catalog.is_checked_out(lsid));
    assert_eq!(router.yielder.stats().unyields, 1);
}

/// Yielder whose restore always fails, as when the session was killed while
/// yielded.
#[derive(Default)]
struct BrokenRestore {
    yields: AtomicUsize,
    unyields: AtomicUsize,
}

impl ResourceYielder for BrokenRestore {
    fn yield_resources(&self, _op_ctx: &OperationContext) -> Result<()> {
        self.yields.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unyield_resources(&self, _op_ctx: &OperationContext) -> Result<()> {
        self.unyields.fetch_add(1, Ordering::SeqCst);
        Err(DdlError::command(
            ErrorCode::NoSuchTransaction,
            "session was killed while yielded",
        ))
    }
}

fn router_with_yielder(cluster: &InMemoryCluster, yielder: Arc<BrokenRestore>) -> ClusterDdl {
    ClusterDdl::new(
        Arc::new(CatalogCache::new(Arc::new(cluster.clone()), 16)),
        Arc::new(cluster.clone()),
        yielder,
        RouterConfig::default(),
    )
}

#[tokio::test]
async fn nested_error_wins_but_restore_failure_is_kept() {
    let cluster = InMemoryCluster::with_shards(&["shard0"]);
    let yielder = Arc::new(BrokenRestore::default());
    let ddl = router_with_yielder(&cluster, yielder.clone());
    cluster
        .inject_fault(&cluster.config_shard_id(), InjectedFault::Reply(ErrorCode::InvalidOptions))
        .await;

    let err = ddl
        .create_database(&OperationContext::new(), &db("app"), None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::InvalidOptions);
    assert_eq!(err.category(), ErrorCategory::FatalCaller);
    assert_eq!(
        err.session_restore_error().map(DdlError::code),
        Some(ErrorCode::NoSuchTransaction)
    );
    assert_eq!(yielder.unyields.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn restore_failure_alone_is_session_fatal() {
    let cluster = InMemoryCluster::with_shards(&["shard0"]);
    let yielder = Arc::new(BrokenRestore::default());
    let ddl = router_with_yielder(&cluster, yielder.clone());

    let err = ddl
        .create_database(&OperationContext::new(), &db("app"), None)
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::FatalSession);
    assert!(err.is_session_fatal());
    assert_eq!(yielder.yields.load(Ordering::SeqCst), 1);
    assert_eq!(yielder.unyields.load(Ordering::SeqCst), 1);
    // The authority did create the database.
    assert_eq!(cluster.database_creations().await, 1);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancellation_restores_session_and_reports_interrupted() {
    let catalog = Arc::new(SessionCatalog::new());
    let cluster = InMemoryCluster::with_shards(&["shard0"]).with_session_catalog(catalog.clone());
    let router = router(&cluster);
    let (op_ctx, lsid) = in_transaction(&catalog);
    cluster
        .inject_fault(&cluster.config_shard_id(), InjectedFault::Hang)
        .await;

    let app_db = db("app");
    let (result, ()) = tokio::join!(
        router.ddl.create_database(&op_ctx, &app_db, None),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            op_ctx.cancel();
        }
    );

    let err = result.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Interrupted);
    assert!(catalog.is_checked_out(lsid));
    assert_eq!(router.yielder.stats().unyields, 1);
    assert!(cluster.database(&db("app")).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn deadline_restores_session_and_reports_time_limit() {
    let catalog = Arc::new(SessionCatalog::new());
    let cluster = InMemoryCluster::with_shards(&["shard0"]).with_session_catalog(catalog.clone());
    let router = router(&cluster);
    let lsid = LogicalSessionId::new();
    catalog.check_out(lsid).unwrap();
    let op_ctx = OperationContext::new()
        .with_session(lsid, Some(1))
        .in_transaction()
        .unwrap()
        .with_timeout(Duration::from_millis(100));
    cluster
        .inject_fault(&cluster.config_shard_id(), InjectedFault::Hang)
        .await;

    let err = router
        .ddl
        .create_database(&op_ctx, &db("app"), None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::ExceededTimeLimit);
    assert!(catalog.is_checked_out(lsid));
}

#[tokio::test]
async fn dropped_future_restores_session() {
    let catalog = Arc::new(SessionCatalog::new());
    let cluster = InMemoryCluster::with_shards(&["shard0"]).with_session_catalog(catalog.clone());
    let router = router(&cluster);
    let (op_ctx, lsid) = in_transaction(&catalog);
    cluster
        .inject_fault(&cluster.config_shard_id(), InjectedFault::Hang)
        .await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        router.ddl.create_database(&op_ctx, &db("app"), None),
    )
    .await;

    assert!(abandoned.is_err());
    assert!(catalog.is_checked_out(lsid));
    assert_eq!(router.yielder.stats().unyields, 1);
    assert!(op_ctx.secondary_failures().is_empty());
}

#[tokio::test]
async fn shard_added_later_makes_creation_possible() {
    let cluster = InMemoryCluster::new();
    let router = router(&cluster);
    let op_ctx = OperationContext::new();

    let err = router
        .ddl
        .create_database(&op_ctx, &db("app"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::IllegalOperation);

    cluster.add_shard("shard0").await;
    let info = router
        .ddl
        .create_database(&op_ctx, &db("app"), None)
        .await
        .unwrap();
    assert_eq!(info.primary, ShardId::new("shard0"));
}

#[tokio::test]
async fn recreated_database_is_a_newer_incarnation() {
    let cluster = InMemoryCluster::with_shards(&["shard0"]);
    let first = router(&cluster);
    let original = first
        .ddl
        .create_database(&OperationContext::new(), &db("app"), None)
        .await
        .unwrap();

    cluster.drop_database(&db("app")).await;
    let second = router(&cluster);
    let recreated = second
        .ddl
        .create_database(&OperationContext::new(), &db("app"), None)
        .await
        .unwrap();

    assert_ne!(recreated.version.uuid, original.version.uuid);
    assert!(recreated.version.is_newer_than(&original.version));
    assert_eq!(cluster.database_creations().await, 2);
}
