use crate::core::{
    DatabaseName, DatabaseVersion, Namespace, ReadConcern, ShardId, ShardVersion, WriteConcern,
};
use crate::operation::OperationSessionInfo;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const CONFIGSVR_CREATE_DATABASE: &str = "_configsvrCreateDatabase";
pub const SHARDSVR_CREATE_COLLECTION: &str = "_shardsvrCreateCollection";
pub const CREATE: &str = "create";

/// Versions the router assumed when sending a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionStamp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_version: Option<DatabaseVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_version: Option<ShardVersion>,
}

impl VersionStamp {
    pub fn unsharded() -> Self {
        Self {
            database_version: None,
            shard_version: Some(ShardVersion::Unsharded),
        }
    }

    /// Adds the database version unless it is the fixed version of a
    /// reserved database.
    pub fn with_database_version_if_present(mut self, version: DatabaseVersion) -> Self {
        if !version.is_fixed() {
            self.database_version = Some(version);
        }
        self
    }
}

/// Version-free command, reusable across attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub command_name: String,
    /// Database the command runs against.
    pub db: DatabaseName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_concern: Option<WriteConcern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_concern: Option<ReadConcern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<OperationSessionInfo>,
}

impl CommandRequest {
    pub fn new(command_name: impl Into<String>, db: DatabaseName, body: Value) -> Self {
        Self {
            command_name: command_name.into(),
            db,
            namespace: None,
            body,
            write_concern: None,
            read_concern: None,
            session: None,
        }
    }

    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn with_write_concern(mut self, write_concern: Option<WriteConcern>) -> Self {
        self.write_concern = write_concern;
        self
    }

    pub fn with_read_concern(mut self, read_concern: Option<ReadConcern>) -> Self {
        self.read_concern = read_concern;
        self
    }

    pub fn with_session(mut self, session: Option<OperationSessionInfo>) -> Self {
        self.session = session;
        self
    }

    /// Builds the envelope for one attempt.
    pub fn stamp(&self, version_stamp: VersionStamp) -> CommandEnvelope {
        CommandEnvelope {
            command_name: self.command_name.clone(),
            db: self.db.clone(),
            namespace: self.namespace.clone(),
            body: self.body.clone(),
            version_stamp,
            write_concern: self.write_concern.clone(),
            read_concern: self.read_concern.clone(),
            session: self.session,
        }
    }
}

/// What actually goes over the wire for a single attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub command_name: String,
    pub db: DatabaseName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    pub body: Value,
    #[serde(default)]
    pub version_stamp: VersionStamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_concern: Option<WriteConcern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_concern: Option<ReadConcern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<OperationSessionInfo>,
}

// ============================================================================
// Typed requests
// ============================================================================

/// Asks the authority to create a database. Idempotent on the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigsvrCreateDatabase {
    pub name: DatabaseName,
    /// Advisory; the authority may choose another shard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_shard_id: Option<ShardId>,
}

impl ConfigsvrCreateDatabase {
    pub fn new(name: DatabaseName, primary_shard_id: Option<ShardId>) -> Self {
        Self {
            name,
            primary_shard_id,
        }
    }

    pub fn to_request(&self) -> CommandRequest {
        let mut body = Map::new();
        body.insert(CONFIGSVR_CREATE_DATABASE.to_string(), json!(self.name));
        if let Some(primary) = &self.primary_shard_id {
            body.insert("primaryShardId".to_string(), json!(primary));
        }
        CommandRequest::new(CONFIGSVR_CREATE_DATABASE, DatabaseName::admin(), Value::Object(body))
    }

    pub fn from_body(body: &Value) -> Option<Self> {
        let name = body.get(CONFIGSVR_CREATE_DATABASE)?.as_str()?;
        let name = DatabaseName::new(name).ok()?;
        let primary_shard_id = body
            .get("primaryShardId")
            .and_then(Value::as_str)
            .map(ShardId::new);
        Some(Self::new(name, primary_shard_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ShardingMode {
    /// Distributed across shards by `shard_key`.
    Sharded {
        shard_key: Value,
        #[serde(default)]
        unique: bool,
    },
    /// Tracked by the authority but kept on a single shard.
    Unsplittable,
}

/// Caller intent for creating a collection; immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateCollectionRequest {
    pub nss: Namespace,
    pub sharding_mode: ShardingMode,
    /// Advisory primary for the database, used if it has to be created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_primary: Option<ShardId>,
}

impl CreateCollectionRequest {
    pub fn sharded(nss: Namespace, shard_key: Value) -> Self {
        Self {
            nss,
            sharding_mode: ShardingMode::Sharded {
                shard_key,
                unique: false,
            },
            suggested_primary: None,
        }
    }

    pub fn unsplittable(nss: Namespace) -> Self {
        Self {
            nss,
            sharding_mode: ShardingMode::Unsplittable,
            suggested_primary: None,
        }
    }

    pub fn with_suggested_primary(mut self, shard: ShardId) -> Self {
        self.suggested_primary = Some(shard);
        self
    }

    pub fn is_sharded(&self) -> bool {
        matches!(self.sharding_mode, ShardingMode::Sharded { .. })
    }

    pub fn to_request(&self) -> CommandRequest {
        let mut body = Map::new();
        body.insert(SHARDSVR_CREATE_COLLECTION.to_string(), json!(self.nss.coll));
        match &self.sharding_mode {
            ShardingMode::Sharded { shard_key, unique } => {
                body.insert("shardKey".to_string(), shard_key.clone());
                body.insert("unique".to_string(), json!(unique));
                body.insert("unsplittable".to_string(), json!(false));
            }
            ShardingMode::Unsplittable => {
                body.insert("unsplittable".to_string(), json!(true));
            }
        }
        CommandRequest::new(
            SHARDSVR_CREATE_COLLECTION,
            self.nss.db.clone(),
            Value::Object(body),
        )
        .with_namespace(self.nss.clone())
    }
}

/// Plain `create` for an untracked, unsharded collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCommand {
    pub nss: Namespace,
}

impl CreateCommand {
    pub fn new(nss: Namespace) -> Self {
        Self { nss }
    }

    pub fn to_request(&self) -> CommandRequest {
        CommandRequest::new(CREATE, self.nss.db.clone(), json!({ "create": self.nss.coll }))
            .with_namespace(self.nss.clone())
    }
}
