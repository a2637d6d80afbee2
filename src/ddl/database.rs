use super::ClusterDdl;
use crate::command::{ConfigsvrCreateDatabase, ReplyShape};
use crate::core::{
    CachedDatabaseInfo, DatabaseName, DdlError, ErrorCode, Result, ResultExt, RetryPolicy,
    ShardId, WriteConcern,
};
use crate::dispatch::{ShardResponse, TargetSelection};
use crate::operation::OperationContext;
use crate::session::YieldGuard;
use tracing::{debug, info, info_span, Instrument};

fn could_not_create(db: &DatabaseName) -> String {
    format!("Database {} could not be created", db)
}

impl ClusterDdl {
    /// Returns the placement of `db`, creating the database on the authority
    /// if the cache does not know it.
    ///
    /// `suggested_primary` is advisory; the authority may place the database
    /// elsewhere. A concurrent creation by another router counts as success.
    pub async fn create_database(
        &self,
        op_ctx: &OperationContext,
        db: &DatabaseName,
        suggested_primary: Option<&ShardId>,
    ) -> Result<CachedDatabaseInfo> {
        let span = info_span!("create_database", db = %db);
        async move {
            if db.is_reserved() {
                return Ok(CachedDatabaseInfo::reserved(db.clone(), self.config_shard_id()));
            }

            let shard_ids = self
                .registry
                .all_shard_ids()
                .await
                .context(|| could_not_create(db))?;
            if shard_ids.is_empty() {
                return Err(DdlError::command(
                    ErrorCode::IllegalOperation,
                    "there are no shards to target",
                )
                .with_context(could_not_create(db)));
            }

            match self.cache.get_database(op_ctx, db).await {
                Ok(info) => return Ok(info),
                Err(err) if err.code() == ErrorCode::NamespaceNotFound => {
                    debug!("database not cached, asking the config server to create it");
                }
                Err(err) => return Err(err),
            }

            let request = ConfigsvrCreateDatabase::new(db.clone(), suggested_primary.cloned())
                .to_request()
                .with_write_concern(Some(WriteConcern::majority()))
                .with_session(op_ctx.session().copied());

            let guard = YieldGuard::acquire(self.yielder.as_ref(), op_ctx)?;
            let sent = self
                .dispatcher
                .dispatch_one(op_ctx, &TargetSelection::ConfigServer, &request, RetryPolicy::Idempotent)
                .await
                .and_then(ShardResponse::into_response);
            let response = guard.restore_after(sent)?;

            response.write_concern_status()?;
            let raced = match response.command_status() {
                Ok(()) => None,
                Err(err) if err.code() == ErrorCode::NamespaceExists => {
                    info!("database was created concurrently by another router");
                    Some(err.with_context(could_not_create(db)))
                }
                Err(err) => return Err(err.with_context(could_not_create(db))),
            };

            let created_version = if raced.is_some() {
                None
            } else {
                let reply = ReplyShape::CreateDatabase
                    .decode(&response)?
                    .into_create_database()?;
                info!(version = %reply.database_version, "database created");
                Some(reply.database_version)
            };
            self.cache.on_stale_database_version(db, created_version);

            match self.cache.get_database(op_ctx, db).await {
                Ok(info) => Ok(info),
                Err(err) if err.code() == ErrorCode::NamespaceNotFound => {
                    Err(raced.unwrap_or_else(|| err.with_context(could_not_create(db))))
                }
                Err(err) => Err(err),
            }
        }
        .instrument(span)
        .await
    }
}
