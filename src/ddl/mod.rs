// ============================================================================
// Cluster DDL Coordination
// ============================================================================
//
// Entry points used by command handlers to create databases and collections
// across the cluster:
//
// - `create_database`: resolves or creates a database exactly once
// - `create_collection`: creates a tracked collection on its owning shard
// - `create_legacy_unsharded_collection`: plain `create` on the primary
//
// ============================================================================

mod collection;
mod database;

use crate::config::RouterConfig;
use crate::core::{EffectiveWriteConcern, ShardId, WriteConcern};
use crate::dispatch::VersionedDispatcher;
use crate::operation::OperationContext;
use crate::session::ResourceYielder;
use crate::shard::ShardRegistry;
use crate::topology::TopologyCache;
use std::sync::Arc;

/// Coordinates DDL on behalf of router command handlers.
///
/// Holds no per-request state; a single instance is shared by all
/// concurrent callers for the lifetime of the process.
pub struct ClusterDdl {
    cache: Arc<dyn TopologyCache>,
    registry: Arc<dyn ShardRegistry>,
    yielder: Arc<dyn ResourceYielder>,
    dispatcher: VersionedDispatcher,
}

impl ClusterDdl {
    pub fn new(
        cache: Arc<dyn TopologyCache>,
        registry: Arc<dyn ShardRegistry>,
        yielder: Arc<dyn ResourceYielder>,
        config: RouterConfig,
    ) -> Self {
        let dispatcher = VersionedDispatcher::new(cache.clone(), registry.clone(), config);
        Self {
            cache,
            registry,
            yielder,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &VersionedDispatcher {
        &self.dispatcher
    }

    fn config_shard_id(&self) -> ShardId {
        self.registry.config_shard().id().clone()
    }
}

/// Write concern attached to a collection-creation envelope.
///
/// Inside a multi-statement transaction nothing may override the
/// transaction's own write concern. Outside one, a write concern supplied by
/// an external client is forwarded verbatim; anything else becomes majority.
pub fn effective_write_concern(op_ctx: &OperationContext) -> EffectiveWriteConcern {
    if op_ctx.in_multi_document_transaction() {
        return EffectiveWriteConcern::Transaction;
    }
    match op_ctx.write_concern() {
        Some(wc) if op_ctx.is_client_supplied_write_concern() => {
            EffectiveWriteConcern::Explicit(wc.clone())
        }
        _ => EffectiveWriteConcern::Majority,
    }
}

/// Write concern the caller's operation runs with, as a plain `create`
/// forwards it: unchanged, or omitted inside a transaction.
pub fn caller_write_concern(op_ctx: &OperationContext) -> Option<WriteConcern> {
    if op_ctx.in_multi_document_transaction() {
        return None;
    }
    op_ctx.write_concern().cloned()
}
