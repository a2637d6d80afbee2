use super::{ClusterState, InjectedFault, TrackedCollection};
use crate::command::{
    CommandEnvelope, ConfigsvrCreateDatabase, RemoteResponse, StaleInfo,
    CONFIGSVR_CREATE_DATABASE, CREATE, SHARDSVR_CREATE_COLLECTION,
};
use crate::core::{
    CachedDatabaseInfo, CollectionRoutingInfo, CollectionVersion, DatabaseVersion, DdlError,
    ErrorCode, Result, ShardId,
};
use crate::session::SessionCatalog;
use crate::shard::RemoteShard;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShardRole {
    ConfigServer,
    Data,
}

enum Outcome {
    Reply(RemoteResponse),
    Transport(DdlError),
    Hang,
}

/// Handle to one member of an [`InMemoryCluster`](super::InMemoryCluster).
pub struct InMemoryShard {
    id: ShardId,
    role: ShardRole,
    state: Arc<Mutex<ClusterState>>,
    sessions: Option<Arc<SessionCatalog>>,
}

#[async_trait]
impl RemoteShard for InMemoryShard {
    fn id(&self) -> &ShardId {
        &self.id
    }

    async fn run_command(&self, envelope: CommandEnvelope) -> Result<RemoteResponse> {
        // Lets concurrent callers interleave between sending and executing.
        tokio::task::yield_now().await;
        let outcome = {
            let mut state = self.state.lock().await;
            self.execute(&mut state, envelope)
        };
        match outcome {
            Outcome::Reply(response) => Ok(response),
            Outcome::Transport(err) => Err(err),
            Outcome::Hang => std::future::pending::<Result<RemoteResponse>>().await,
        }
    }
}

impl InMemoryShard {
    pub(crate) fn new(
        id: ShardId,
        role: ShardRole,
        state: Arc<Mutex<ClusterState>>,
        sessions: Option<Arc<SessionCatalog>>,
    ) -> Self {
        Self {
            id,
            role,
            state,
            sessions,
        }
    }

    fn execute(&self, state: &mut ClusterState, envelope: CommandEnvelope) -> Outcome {
        trace!(shard = %self.id, command = %envelope.command_name, "received command");
        state
            .commands
            .entry(self.id.clone())
            .or_default()
            .push(envelope.clone());

        let fault = state
            .faults
            .get_mut(&self.id)
            .and_then(VecDeque::pop_front);
        let mut write_concern_failure = None;
        match fault {
            Some(InjectedFault::Transport(code)) => {
                return Outcome::Transport(DdlError::command(
                    code,
                    format!("connection to {} failed", self.id),
                ));
            }
            Some(InjectedFault::Reply(code)) => {
                return Outcome::Reply(RemoteResponse::error(code, "rejected by injected fault"));
            }
            Some(InjectedFault::StaleDb) => {
                let wanted = state.databases.get(&envelope.db).map(|info| info.version);
                return Outcome::Reply(stale_database(&envelope, wanted));
            }
            Some(InjectedFault::StaleShard) => {
                let wanted = envelope
                    .namespace
                    .as_ref()
                    .and_then(|nss| state.collections.get(nss))
                    .map(|coll| coll.routing.version);
                return Outcome::Reply(RemoteResponse::stale(
                    ErrorCode::StaleShardVersion,
                    format!("shard {} has a newer shard version", self.id),
                    StaleInfo {
                        namespace: envelope.namespace.clone(),
                        wanted_database_version: None,
                        wanted_collection_version: wanted,
                    },
                ));
            }
            Some(InjectedFault::WriteConcernError(code)) => write_concern_failure = Some(code),
            Some(InjectedFault::Hang) => return Outcome::Hang,
            None => {}
        }

        let response = self.apply(state, &envelope);
        Outcome::Reply(match write_concern_failure {
            Some(code) => response.with_write_concern_error(code, "waiting for replication failed"),
            None => response,
        })
    }

    fn apply(&self, state: &mut ClusterState, envelope: &CommandEnvelope) -> RemoteResponse {
        if let Some(stamped) = envelope.version_stamp.database_version {
            let current = state.databases.get(&envelope.db).map(|info| info.version);
            if current != Some(stamped) {
                return stale_database(envelope, current);
            }
        }

        match envelope.command_name.as_str() {
            CONFIGSVR_CREATE_DATABASE if self.role == ShardRole::ConfigServer => {
                self.create_database(state, envelope)
            }
            SHARDSVR_CREATE_COLLECTION => self.create_tracked_collection(state, envelope),
            CREATE => self.create_untracked_collection(state, envelope),
            other => RemoteResponse::error(
                ErrorCode::CommandFailed,
                format!("no such command: '{}'", other),
            ),
        }
    }

    fn create_database(&self, state: &mut ClusterState, envelope: &CommandEnvelope) -> RemoteResponse {
        let Some(request) = ConfigsvrCreateDatabase::from_body(&envelope.body) else {
            return RemoteResponse::error(
                ErrorCode::FailedToParse,
                "malformed _configsvrCreateDatabase request",
            );
        };

        let session = match (&self.sessions, envelope.session) {
            (Some(catalog), Some(session)) => Some((catalog, session.lsid)),
            _ => None,
        };
        if let Some((catalog, lsid)) = session {
            if let Err(err) = catalog.check_out(lsid) {
                return RemoteResponse::error(err.code(), err.to_string());
            }
        }

        let response = create_database_entry(state, request);

        if let Some((catalog, lsid)) = session {
            if let Err(err) = catalog.check_in(lsid) {
                return RemoteResponse::error(err.code(), err.to_string());
            }
        }
        response
    }

    fn create_tracked_collection(
        &self,
        state: &mut ClusterState,
        envelope: &CommandEnvelope,
    ) -> RemoteResponse {
        let Some(nss) = envelope.namespace.clone() else {
            return missing_namespace(envelope);
        };
        if let Some(existing) = state.collections.get(&nss) {
            if existing.options == envelope.body {
                return RemoteResponse::ok(json!({ "collectionVersion": existing.routing.version }));
            }
            return RemoteResponse::error(
                ErrorCode::NamespaceExists,
                format!("collection {} already exists with different options", nss),
            );
        }
        if state.collection_exists(&nss) {
            return RemoteResponse::error(
                ErrorCode::NamespaceExists,
                format!("collection {} already exists and is not tracked", nss),
            );
        }

        let version = CollectionVersion::new(Uuid::new_v4(), state.tick(), 1, 0);
        state.collections.insert(
            nss.clone(),
            TrackedCollection {
                options: envelope.body.clone(),
                routing: CollectionRoutingInfo {
                    nss,
                    version,
                    shard_versions: vec![(self.id.clone(), version)],
                },
            },
        );
        RemoteResponse::ok(json!({ "collectionVersion": version }))
    }

    fn create_untracked_collection(
        &self,
        state: &mut ClusterState,
        envelope: &CommandEnvelope,
    ) -> RemoteResponse {
        let Some(nss) = envelope.namespace.clone() else {
            return missing_namespace(envelope);
        };
        // Untracked collections live in each shard's own local catalog.
        let local = state
            .untracked
            .get(&self.id)
            .is_some_and(|colls| colls.contains(&nss));
        if local || state.collections.contains_key(&nss) {
            return RemoteResponse::error(
                ErrorCode::NamespaceExists,
                format!("collection {} already exists", nss),
            );
        }
        state.untracked.entry(self.id.clone()).or_default().insert(nss);
        RemoteResponse::ok(json!({}))
    }
}

fn create_database_entry(state: &mut ClusterState, request: ConfigsvrCreateDatabase) -> RemoteResponse {
    if let Some(existing) = state.databases.get(&request.name) {
        return RemoteResponse::ok(json!({ "databaseVersion": existing.version }));
    }

    // The suggested primary is honoured only if it is a live shard.
    let primary = request
        .primary_shard_id
        .filter(|id| state.shards.contains(id))
        .or_else(|| state.least_loaded_shard());
    let Some(primary) = primary else {
        return RemoteResponse::error(ErrorCode::IllegalOperation, "there are no shards to target");
    };

    let version = DatabaseVersion::new(Uuid::new_v4(), state.tick());
    state.databases.insert(
        request.name.clone(),
        CachedDatabaseInfo {
            name: request.name,
            primary,
            version,
        },
    );
    state.database_creations += 1;
    RemoteResponse::ok(json!({ "databaseVersion": version }))
}

fn stale_database(envelope: &CommandEnvelope, wanted: Option<DatabaseVersion>) -> RemoteResponse {
    RemoteResponse::stale(
        ErrorCode::StaleDbVersion,
        format!("version mismatch for database {}", envelope.db),
        StaleInfo {
            namespace: envelope.namespace.clone(),
            wanted_database_version: wanted,
            wanted_collection_version: None,
        },
    )
}

fn missing_namespace(envelope: &CommandEnvelope) -> RemoteResponse {
    RemoteResponse::error(
        ErrorCode::InvalidNamespace,
        format!("{} requires a namespace", envelope.command_name),
    )
}
