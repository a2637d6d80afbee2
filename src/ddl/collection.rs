use super::{caller_write_concern, effective_write_concern, ClusterDdl};
use crate::command::{CreateCollectionRequest, CreateCommand, ReplyShape};
use crate::core::{ErrorCode, Namespace, Result, ResultExt, RetryPolicy};
use crate::dispatch::TargetSelection;
use crate::operation::OperationContext;
use tracing::{debug, event, info_span, Instrument, Level};

fn could_not_create(nss: &Namespace) -> String {
    format!("Collection {} could not be created", nss)
}

impl ClusterDdl {
    /// Creates a tracked collection and refreshes the routing cache for it.
    ///
    /// Any failure reported by the owning shard is fatal, including
    /// `NamespaceExists` for a collection created with different options.
    pub async fn create_collection(
        &self,
        op_ctx: &OperationContext,
        request: &CreateCollectionRequest,
    ) -> Result<()> {
        let nss = &request.nss;
        let span = info_span!("create_collection", nss = %nss, sharded = request.is_sharded());
        async move {
            self.create_database(op_ctx, &nss.db, request.suggested_primary.as_ref())
                .await?;

            let write_concern = effective_write_concern(op_ctx);
            debug!(write_concern = ?write_concern, "resolved effective write concern");
            let command = request
                .to_request()
                .with_write_concern(write_concern.to_write_concern())
                .with_read_concern(op_ctx.read_concern().cloned());

            // Collections under `config` have no movable primary; the smallest
            // shard id stands in as their single owner.
            let selection = if nss.is_config_db() {
                TargetSelection::FirstShard(nss.db.clone())
            } else {
                TargetSelection::DatabasePrimary(nss.db.clone())
            };

            let sent = self
                .dispatcher
                .dispatch_one(op_ctx, &selection, &command, RetryPolicy::Idempotent)
                .await
                .context(|| could_not_create(nss))?;
            let shard_id = sent.shard_id.clone();
            let response = sent.into_response().context(|| could_not_create(nss))?;

            response
                .command_status()
                .context(|| could_not_create(nss))?;
            response
                .write_concern_status()
                .context(|| could_not_create(nss))?;

            let reply = ReplyShape::CreateCollection
                .decode(&response)?
                .into_create_collection()?;
            let scope = self.cache.invalidate_shard_or_entire_collection_entry(
                nss,
                Some(reply.collection_version),
                &shard_id,
            );
            event!(
                Level::INFO,
                shard = %shard_id,
                version = %reply.collection_version,
                scope = ?scope,
                "collection created"
            );
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Creates an untracked collection with a plain `create` on the database
    /// primary. An existing collection is not an error.
    pub async fn create_legacy_unsharded_collection(
        &self,
        op_ctx: &OperationContext,
        nss: &Namespace,
    ) -> Result<()> {
        let span = info_span!("create_legacy_unsharded_collection", nss = %nss);
        async move {
            self.create_database(op_ctx, &nss.db, None).await?;

            let command = CreateCommand::new(nss.clone())
                .to_request()
                .with_write_concern(caller_write_concern(op_ctx))
                .with_read_concern(op_ctx.read_concern().cloned());

            let response = self
                .dispatcher
                .dispatch_one(
                    op_ctx,
                    &TargetSelection::DatabasePrimary(nss.db.clone()),
                    &command,
                    RetryPolicy::Idempotent,
                )
                .await
                .and_then(|sent| sent.into_response())
                .context(|| could_not_create(nss))?;

            match response.command_status() {
                Ok(()) => {}
                Err(err) if err.code() == ErrorCode::NamespaceExists => {
                    debug!("collection already exists");
                }
                Err(err) => return Err(err.with_context(could_not_create(nss))),
            }
            response
                .write_concern_status()
                .context(|| could_not_create(nss))
        }
        .instrument(span)
        .await
    }
}
