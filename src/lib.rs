// ============================================================================
// ClusterDDL Library
// ============================================================================
//
// Router-side coordination of database and collection creation in a sharded
// cluster: a config server is the single serializing authority, shards own
// the data, and the router's topology cache may be stale.
//
// ============================================================================

pub mod cluster;
pub mod command;
pub mod config;
pub mod core;
pub mod ddl;
pub mod dispatch;
pub mod operation;
pub mod session;
pub mod shard;
pub mod topology;

// Re-export main types for convenience
pub use core::{
    CachedDatabaseInfo, CollectionVersion, DatabaseName, DatabaseVersion, DdlError,
    EffectiveWriteConcern, ErrorCategory, ErrorCode, Namespace, ReadConcern, ReadConcernLevel,
    Result, RetryPolicy, ShardId, ShardVersion, WriteConcern, WriteConcernProvenance,
};

pub use cluster::{InMemoryCluster, InjectedFault, CONFIG_SHARD_ID};
pub use command::{CreateCollectionRequest, ShardingMode};
pub use config::RouterConfig;
pub use ddl::{caller_write_concern, effective_write_concern, ClusterDdl};
pub use dispatch::{ShardResponse, TargetSelection, VersionedDispatcher};
pub use operation::OperationContext;
pub use session::{
    LogicalSessionId, ResourceYielder, SessionCatalog, TransactionRouterResourceYielder,
    YieldGuard, YielderStats,
};
pub use shard::{RemoteShard, ShardRegistry};
pub use topology::{CatalogCache, CatalogSource, InvalidationScope, TopologyCache};
