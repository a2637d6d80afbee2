// ============================================================================
// Topology Cache
// ============================================================================
//
// Read-through cache of database placement and collection distribution.
// Shared by every concurrent DDL flow in the process; internally
// synchronized, and no lock is held while the authority is consulted.
//
// ============================================================================

pub mod cache;

pub use cache::{CacheStats, CatalogCache};

use crate::core::{
    CachedDatabaseInfo, CollectionRoutingInfo, CollectionVersion, DatabaseName, DatabaseVersion,
    Namespace, Result, ShardId,
};
use crate::operation::OperationContext;
use async_trait::async_trait;

/// Authoritative source the cache refreshes from.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// `None` when the database does not exist.
    async fn fetch_database(&self, db: &DatabaseName) -> Result<Option<CachedDatabaseInfo>>;

    /// `None` when the collection is not sharded (or does not exist).
    async fn fetch_collection(&self, nss: &Namespace) -> Result<Option<CollectionRoutingInfo>>;
}

/// Which part of a collection's routing entry an invalidation hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationScope {
    Shard,
    Collection,
}

#[async_trait]
pub trait TopologyCache: Send + Sync {
    /// Fails with `NamespaceNotFound` when the database does not exist.
    async fn get_database(
        &self,
        op_ctx: &OperationContext,
        db: &DatabaseName,
    ) -> Result<CachedDatabaseInfo>;

    /// `None` for an unsharded collection.
    async fn get_collection_routing_info(
        &self,
        op_ctx: &OperationContext,
        nss: &Namespace,
    ) -> Result<Option<CollectionRoutingInfo>>;

    /// Version the given shard owns for `nss`, refreshing only if that shard
    /// (or the whole entry) was invalidated.
    async fn get_shard_version(
        &self,
        op_ctx: &OperationContext,
        nss: &Namespace,
        shard: &ShardId,
    ) -> Result<Option<CollectionVersion>>;

    /// Marks the database entry stale if `wanted` is unknown or newer than
    /// the cached version.
    fn on_stale_database_version(&self, db: &DatabaseName, wanted: Option<DatabaseVersion>);

    /// Invalidates one shard's entry when the cached routing table belongs to
    /// the same collection incarnation as `version`, else the whole entry.
    fn invalidate_shard_or_entire_collection_entry(
        &self,
        nss: &Namespace,
        version: Option<CollectionVersion>,
        shard: &ShardId,
    ) -> InvalidationScope;
}
