// ============================================================================
// In-Memory Cluster
// ============================================================================
//
// A config server and a set of data shards sharing one in-process state.
// Implements the shard directory, the remote shard handles and the catalog
// source, so a router can be exercised end to end without a network.
//
// Faults are queued per shard and consumed one per received command.
//
// ============================================================================

mod shard;

pub use shard::InMemoryShard;

use crate::command::CommandEnvelope;
use crate::core::{
    CachedDatabaseInfo, CollectionRoutingInfo, DatabaseName, DatabaseVersion, DdlError,
    ErrorCode, Namespace, Result, ShardId,
};
use crate::session::SessionCatalog;
use crate::shard::{RemoteShard, ShardRegistry};
use crate::topology::CatalogSource;
use async_trait::async_trait;
use serde_json::Value;
use shard::ShardRole;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Id under which the config server is reachable.
pub const CONFIG_SHARD_ID: &str = "config";

/// Failure injected into the next command a shard receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFault {
    /// The transport fails; the command is not executed.
    Transport(ErrorCode),
    /// The command is rejected with `code` without being executed.
    Reply(ErrorCode),
    /// `StaleDbVersion`, reporting the authority's current database version.
    StaleDb,
    /// `StaleShardVersion`, reporting the authority's current collection
    /// version.
    StaleShard,
    /// The command executes but replication to the requested write concern
    /// fails.
    WriteConcernError(ErrorCode),
    /// No reply is ever sent.
    Hang,
}

#[derive(Debug, Clone)]
pub(crate) struct TrackedCollection {
    /// Creation body, compared to detect conflicting re-creation.
    pub options: Value,
    pub routing: CollectionRoutingInfo,
}

#[derive(Default)]
pub(crate) struct ClusterState {
    /// Registration order; deliberately not sorted.
    pub shards: Vec<ShardId>,
    pub databases: HashMap<DatabaseName, CachedDatabaseInfo>,
    pub collections: HashMap<Namespace, TrackedCollection>,
    pub untracked: HashMap<ShardId, HashSet<Namespace>>,
    pub faults: HashMap<ShardId, VecDeque<InjectedFault>>,
    pub commands: HashMap<ShardId, Vec<CommandEnvelope>>,
    pub database_creations: usize,
    pub catalog_fetches: usize,
    clock: u64,
}

impl ClusterState {
    pub fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Shard owning the fewest databases, ties broken by id.
    pub fn least_loaded_shard(&self) -> Option<ShardId> {
        self.shards
            .iter()
            .min_by_key(|id| {
                let owned = self
                    .databases
                    .values()
                    .filter(|info| &info.primary == *id)
                    .count();
                (owned, (*id).clone())
            })
            .cloned()
    }

    pub fn collection_exists(&self, nss: &Namespace) -> bool {
        self.collections.contains_key(nss)
            || self.untracked.values().any(|colls| colls.contains(nss))
    }
}

/// An in-memory cluster for testing and local simulation.
///
/// Cloning is cheap; clones share the same cluster.
#[derive(Clone)]
pub struct InMemoryCluster {
    state: Arc<Mutex<ClusterState>>,
    sessions: Option<Arc<SessionCatalog>>,
    config_shard: Arc<InMemoryShard>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    /// Creates a cluster with a config server and no data shards.
    pub fn new() -> Self {
        Self::from_state(ClusterState::default(), None)
    }

    /// Creates a cluster whose shards are enumerated in the given order.
    pub fn with_shards(ids: &[&str]) -> Self {
        let state = ClusterState {
            shards: ids.iter().map(|id| ShardId::new(*id)).collect(),
            ..ClusterState::default()
        };
        Self::from_state(state, None)
    }

    /// Co-locates the config server with a router using `catalog`: the
    /// config server checks out the caller's session while it creates a
    /// database.
    pub fn with_session_catalog(self, catalog: Arc<SessionCatalog>) -> Self {
        Self {
            config_shard: Arc::new(InMemoryShard::new(
                ShardId::new(CONFIG_SHARD_ID),
                ShardRole::ConfigServer,
                self.state.clone(),
                Some(catalog.clone()),
            )),
            sessions: Some(catalog),
            state: self.state,
        }
    }

    fn from_state(state: ClusterState, sessions: Option<Arc<SessionCatalog>>) -> Self {
        let state = Arc::new(Mutex::new(state));
        let config_shard = Arc::new(InMemoryShard::new(
            ShardId::new(CONFIG_SHARD_ID),
            ShardRole::ConfigServer,
            state.clone(),
            sessions.clone(),
        ));
        Self {
            state,
            sessions,
            config_shard,
        }
    }

    pub fn config_shard_id(&self) -> ShardId {
        self.config_shard.id().clone()
    }

    pub fn session_catalog(&self) -> Option<&Arc<SessionCatalog>> {
        self.sessions.as_ref()
    }

    pub async fn add_shard(&self, id: &str) {
        let id = ShardId::new(id);
        let mut state = self.state.lock().await;
        if !state.shards.contains(&id) {
            state.shards.push(id);
        }
    }

    pub async fn inject_fault(&self, shard: &ShardId, fault: InjectedFault) {
        let mut state = self.state.lock().await;
        state.faults.entry(shard.clone()).or_default().push_back(fault);
    }

    /// Number of databases the config server actually created.
    pub async fn database_creations(&self) -> usize {
        self.state.lock().await.database_creations
    }

    /// Every envelope `shard` received, in arrival order.
    pub async fn commands_received(&self, shard: &ShardId) -> Vec<CommandEnvelope> {
        let state = self.state.lock().await;
        state.commands.get(shard).cloned().unwrap_or_default()
    }

    pub async fn total_commands(&self) -> usize {
        let state = self.state.lock().await;
        state.commands.values().map(Vec::len).sum()
    }

    /// Number of catalog reads served to router caches.
    pub async fn catalog_fetches(&self) -> usize {
        self.state.lock().await.catalog_fetches
    }

    pub async fn database(&self, db: &DatabaseName) -> Option<CachedDatabaseInfo> {
        self.state.lock().await.databases.get(db).cloned()
    }

    pub async fn collection(&self, nss: &Namespace) -> Option<CollectionRoutingInfo> {
        let state = self.state.lock().await;
        state.collections.get(nss).map(|coll| coll.routing.clone())
    }

    pub async fn has_untracked_collection(&self, shard: &ShardId, nss: &Namespace) -> bool {
        let state = self.state.lock().await;
        state
            .untracked
            .get(shard)
            .is_some_and(|colls| colls.contains(nss))
    }

    /// Creates a collection directly on a shard, bypassing any router.
    pub async fn create_untracked_collection(&self, shard: &ShardId, nss: &Namespace) {
        let mut state = self.state.lock().await;
        state
            .untracked
            .entry(shard.clone())
            .or_default()
            .insert(nss.clone());
    }

    /// Moves the primary of `db` and advances its version.
    pub async fn move_primary(&self, db: &DatabaseName, to: &ShardId) -> Result<DatabaseVersion> {
        let mut state = self.state.lock().await;
        if !state.shards.contains(to) {
            return Err(DdlError::command(
                ErrorCode::ShardNotFound,
                format!("shard {} not found", to),
            ));
        }
        let info = state.databases.get_mut(db).ok_or_else(|| {
            DdlError::command(
                ErrorCode::NamespaceNotFound,
                format!("database {} not found", db),
            )
        })?;
        info.primary = to.clone();
        info.version = info.version.make_updated();
        Ok(info.version)
    }

    pub async fn drop_database(&self, db: &DatabaseName) {
        let mut state = self.state.lock().await;
        state.databases.remove(db);
        state.collections.retain(|nss, _| &nss.db != db);
        for colls in state.untracked.values_mut() {
            colls.retain(|nss| &nss.db != db);
        }
    }
}

#[async_trait]
impl ShardRegistry for InMemoryCluster {
    async fn all_shard_ids(&self) -> Result<Vec<ShardId>> {
        Ok(self.state.lock().await.shards.clone())
    }

    async fn shard(&self, id: &ShardId) -> Result<Arc<dyn RemoteShard>> {
        if id == self.config_shard.id() {
            return Ok(self.config_shard.clone());
        }
        if !self.state.lock().await.shards.contains(id) {
            return Err(DdlError::command(
                ErrorCode::ShardNotFound,
                format!("shard {} not found", id),
            ));
        }
        Ok(Arc::new(InMemoryShard::new(
            id.clone(),
            ShardRole::Data,
            self.state.clone(),
            None,
        )))
    }

    fn config_shard(&self) -> Arc<dyn RemoteShard> {
        self.config_shard.clone()
    }
}

#[async_trait]
impl CatalogSource for InMemoryCluster {
    async fn fetch_database(&self, db: &DatabaseName) -> Result<Option<CachedDatabaseInfo>> {
        let mut state = self.state.lock().await;
        state.catalog_fetches += 1;
        Ok(state.databases.get(db).cloned())
    }

    async fn fetch_collection(&self, nss: &Namespace) -> Result<Option<CollectionRoutingInfo>> {
        let mut state = self.state.lock().await;
        state.catalog_fetches += 1;
        Ok(state.collections.get(nss).map(|coll| coll.routing.clone()))
    }
}
