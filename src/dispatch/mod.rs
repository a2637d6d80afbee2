// ============================================================================
// Versioned Command Dispatcher
// ============================================================================
//
// Selects target shards for a command, stamps each attempt with the
// versions the router currently believes in, and sends with the declared
// retry class. Multiple targets are contacted concurrently; attempts against
// one target are strictly sequential.
//
// Responses are returned per target and never merged here.
//
// ============================================================================

use crate::command::{CommandEnvelope, CommandRequest, RemoteResponse, StaleInfo, VersionStamp};
use crate::config::RouterConfig;
use crate::core::{
    DatabaseName, DdlError, ErrorCode, Namespace, Result, RetryPolicy, ShardId, ShardVersion,
};
use crate::operation::OperationContext;
use crate::shard::{RemoteShard, ShardRegistry};
use crate::topology::TopologyCache;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, event, info_span, warn, Instrument, Level};

/// Rule for choosing where a command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelection {
    /// The database's current primary shard.
    DatabasePrimary(DatabaseName),
    /// The lexicographically smallest live shard: a stable single owner
    /// without an election.
    FirstShard(DatabaseName),
    /// Every live shard. With a namespace, each target is stamped with the
    /// version it owns for that collection.
    AllShards { namespace: Option<Namespace> },
    Shard(ShardId),
    ConfigServer,
}

#[derive(Debug, Clone)]
enum Target {
    Primary {
        db: DatabaseName,
    },
    Shard {
        shard: ShardId,
        stamp_db: Option<DatabaseName>,
        stamp_nss: Option<Namespace>,
    },
    Config,
}

/// Outcome for a single target.
#[derive(Debug, Clone)]
pub struct ShardResponse {
    pub shard_id: ShardId,
    /// `Err` when the transport failed on the final attempt.
    pub response: Result<RemoteResponse>,
    pub attempts: u32,
}

impl ShardResponse {
    pub fn into_response(self) -> Result<RemoteResponse> {
        let shard_id = self.shard_id;
        self.response
            .map_err(|err| err.with_context(format!("error contacting shard {}", shard_id)))
    }
}

fn no_shards() -> DdlError {
    DdlError::command(ErrorCode::IllegalOperation, "there are no shards to target")
}

pub struct VersionedDispatcher {
    cache: Arc<dyn TopologyCache>,
    registry: Arc<dyn ShardRegistry>,
    config: RouterConfig,
}

impl VersionedDispatcher {
    pub fn new(
        cache: Arc<dyn TopologyCache>,
        registry: Arc<dyn ShardRegistry>,
        config: RouterConfig,
    ) -> Self {
        Self {
            cache,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Sends `request` to every target chosen by `selection`.
    ///
    /// Fails as a whole only when targets cannot be resolved or the
    /// operation is interrupted; per-target transport failures are reported
    /// in the matching [`ShardResponse`].
    pub async fn dispatch(
        &self,
        op_ctx: &OperationContext,
        selection: &TargetSelection,
        request: &CommandRequest,
        retry: RetryPolicy,
    ) -> Result<Vec<ShardResponse>> {
        let span = info_span!(
            "dispatch",
            command = %request.command_name,
            db = %request.db,
            retry = ?retry
        );
        async move {
            let targets = self.resolve_targets(selection).await?;
            debug!(targets = targets.len(), "resolved dispatch targets");
            let sends = targets
                .iter()
                .map(|target| self.send_with_retries(op_ctx, target, request, retry));
            join_all(sends).await.into_iter().collect()
        }
        .instrument(span)
        .await
    }

    /// Like [`dispatch`](Self::dispatch) for selections that yield exactly
    /// one target.
    pub async fn dispatch_one(
        &self,
        op_ctx: &OperationContext,
        selection: &TargetSelection,
        request: &CommandRequest,
        retry: RetryPolicy,
    ) -> Result<ShardResponse> {
        let mut responses = self.dispatch(op_ctx, selection, request, retry).await?;
        match (responses.pop(), responses.is_empty()) {
            (Some(response), true) => Ok(response),
            _ => Err(DdlError::command(
                ErrorCode::InternalError,
                format!("expected a single target for {}", request.command_name),
            )),
        }
    }

    async fn resolve_targets(&self, selection: &TargetSelection) -> Result<Vec<Target>> {
        let targets = match selection {
            TargetSelection::DatabasePrimary(db) => vec![Target::Primary { db: db.clone() }],
            TargetSelection::FirstShard(db) => {
                let first = self
                    .registry
                    .all_shard_ids()
                    .await?
                    .into_iter()
                    .min()
                    .ok_or_else(no_shards)?;
                vec![Target::Shard {
                    shard: first,
                    stamp_db: Some(db.clone()),
                    stamp_nss: None,
                }]
            }
            TargetSelection::AllShards { namespace } => {
                let mut shard_ids = self.registry.all_shard_ids().await?;
                if shard_ids.is_empty() {
                    return Err(no_shards());
                }
                shard_ids.sort();
                shard_ids
                    .into_iter()
                    .map(|shard| Target::Shard {
                        shard,
                        stamp_db: None,
                        stamp_nss: namespace.clone(),
                    })
                    .collect()
            }
            TargetSelection::Shard(shard) => vec![Target::Shard {
                shard: shard.clone(),
                stamp_db: None,
                stamp_nss: None,
            }],
            TargetSelection::ConfigServer => vec![Target::Config],
        };
        Ok(targets)
    }

    /// Resolves the handle and builds a freshly stamped envelope.
    async fn prepare_attempt(
        &self,
        op_ctx: &OperationContext,
        target: &Target,
        request: &CommandRequest,
    ) -> Result<(Arc<dyn RemoteShard>, CommandEnvelope)> {
        match target {
            Target::Primary { db } if db.is_reserved() => Ok((
                self.registry.config_shard(),
                request.stamp(VersionStamp::unsharded()),
            )),
            Target::Primary { db } => {
                let info = self.cache.get_database(op_ctx, db).await?;
                let shard = self.registry.shard(&info.primary).await?;
                let stamp = VersionStamp::unsharded().with_database_version_if_present(info.version);
                Ok((shard, request.stamp(stamp)))
            }
            Target::Shard {
                shard,
                stamp_db,
                stamp_nss,
            } => {
                let shard_version = match stamp_nss {
                    Some(nss) => match self.cache.get_shard_version(op_ctx, nss, shard).await? {
                        Some(version) => ShardVersion::Sharded { version },
                        None => ShardVersion::Unsharded,
                    },
                    None => ShardVersion::Unsharded,
                };
                let mut stamp = VersionStamp {
                    database_version: None,
                    shard_version: Some(shard_version),
                };
                if let Some(db) = stamp_db.as_ref().filter(|db| !db.is_reserved()) {
                    match self.cache.get_database(op_ctx, db).await {
                        Ok(info) => stamp = stamp.with_database_version_if_present(info.version),
                        Err(err) if err.code() == ErrorCode::NamespaceNotFound => {}
                        Err(err) => return Err(err),
                    }
                }
                let handle = self.registry.shard(shard).await?;
                Ok((handle, request.stamp(stamp)))
            }
            Target::Config => Ok((
                self.registry.config_shard(),
                request.stamp(VersionStamp::default()),
            )),
        }
    }

    async fn send(&self, shard: &dyn RemoteShard, envelope: CommandEnvelope) -> Result<RemoteResponse> {
        match self.config.command_timeout {
            Some(timeout) => tokio::time::timeout(timeout, shard.run_command(envelope))
                .await
                .unwrap_or_else(|_| {
                    Err(DdlError::command(
                        ErrorCode::NetworkTimeout,
                        format!("no reply from {} within {:?}", shard.id(), timeout),
                    ))
                }),
            None => shard.run_command(envelope).await,
        }
    }

    async fn send_with_retries(
        &self,
        op_ctx: &OperationContext,
        target: &Target,
        request: &CommandRequest,
        retry: RetryPolicy,
    ) -> Result<ShardResponse> {
        let mut attempts = 0u32;
        let mut transient_retries = 0u32;
        let mut stale_retries = 0u32;

        loop {
            attempts += 1;
            let (shard, envelope) = self.prepare_attempt(op_ctx, target, request).await?;
            let shard_id = shard.id().clone();
            let sent = op_ctx
                .run_interruptible(self.send(shard.as_ref(), envelope))
                .await;
            // A cancelled operation never reports a reply, even a successful one.
            op_ctx.check_for_interrupt()?;

            let failure = match &sent {
                Err(err) => Some(err.code()),
                Ok(response) => response
                    .error_code()
                    .or_else(|| response.write_concern_error.as_ref().map(|wce| wce.code)),
            };

            match (failure, &sent) {
                (Some(code), Ok(response))
                    if code.is_stale_version()
                        && stale_retries < self.config.stale_retry_attempts =>
                {
                    stale_retries += 1;
                    event!(
                        Level::INFO,
                        shard = %shard_id,
                        code = %code,
                        attempt = attempts,
                        "stale routing information, refreshing before retry"
                    );
                    self.on_stale(request, &shard_id, code, response.stale_info.as_ref());
                }
                (Some(code), _)
                    if retry.is_retriable(code)
                        && transient_retries < self.config.max_retry_attempts =>
                {
                    transient_retries += 1;
                    warn!(
                        shard = %shard_id,
                        code = %code,
                        attempt = attempts,
                        "retrying command after transient failure"
                    );
                    if !self.config.retry_backoff.is_zero() {
                        op_ctx
                            .run_interruptible(async {
                                tokio::time::sleep(self.config.retry_backoff).await;
                                Ok(())
                            })
                            .await?;
                    }
                }
                _ => {
                    return Ok(ShardResponse {
                        shard_id,
                        response: sent,
                        attempts,
                    });
                }
            }
        }
    }

    fn on_stale(
        &self,
        request: &CommandRequest,
        shard_id: &ShardId,
        code: ErrorCode,
        info: Option<&StaleInfo>,
    ) {
        match code {
            ErrorCode::StaleDbVersion => {
                let wanted = info.and_then(|info| info.wanted_database_version);
                self.cache.on_stale_database_version(&request.db, wanted);
            }
            ErrorCode::StaleShardVersion => {
                let nss = info
                    .and_then(|info| info.namespace.as_ref())
                    .or(request.namespace.as_ref());
                if let Some(nss) = nss {
                    let wanted = info.and_then(|info| info.wanted_collection_version);
                    self.cache
                        .invalidate_shard_or_entire_collection_entry(nss, wanted, shard_id);
                }
            }
            _ => {}
        }
    }
}
