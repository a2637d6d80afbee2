// ============================================================================
// Shard Directory
// ============================================================================
//
// Enumerates live shards and resolves shard ids to command-sending handles,
// including the handle for the config server.
//
// ============================================================================

use crate::command::{CommandEnvelope, RemoteResponse};
use crate::core::{Result, ShardId};
use async_trait::async_trait;
use std::sync::Arc;

/// Handle used to send commands to one shard (or the config server).
#[async_trait]
pub trait RemoteShard: Send + Sync {
    fn id(&self) -> &ShardId;

    /// Sends one envelope. `Err` means the transport failed and the reply was
    /// never read; command-level failures come back inside the response.
    async fn run_command(&self, envelope: CommandEnvelope) -> Result<RemoteResponse>;
}

#[async_trait]
pub trait ShardRegistry: Send + Sync {
    /// Live data shards, in no particular order.
    async fn all_shard_ids(&self) -> Result<Vec<ShardId>>;

    /// Fails with `ShardNotFound` for an unknown id.
    async fn shard(&self, id: &ShardId) -> Result<Arc<dyn RemoteShard>>;

    fn config_shard(&self) -> Arc<dyn RemoteShard>;
}
