use super::error::{DdlError, ErrorCode, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// Databases owned by the config authority itself. They never go through
/// sharded creation.
pub const ADMIN_DB: &str = "admin";
pub const CONFIG_DB: &str = "config";
pub const LOCAL_DB: &str = "local";

const MAX_DATABASE_NAME_BYTES: usize = 63;
const FORBIDDEN_DATABASE_CHARS: &[char] = &['/', '\\', '.', ' ', '"', '$', '\0'];

// ============================================================================
// Names
// ============================================================================

/// A validated database name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatabaseName(String);

impl DatabaseName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(DdlError::command(
                ErrorCode::InvalidNamespace,
                "database name must not be empty",
            ));
        }
        if name.len() > MAX_DATABASE_NAME_BYTES {
            return Err(DdlError::command(
                ErrorCode::InvalidNamespace,
                format!(
                    "database name '{}' is longer than {} bytes",
                    name, MAX_DATABASE_NAME_BYTES
                ),
            ));
        }
        if let Some(bad) = name.chars().find(|c| FORBIDDEN_DATABASE_CHARS.contains(c)) {
            return Err(DdlError::command(
                ErrorCode::InvalidNamespace,
                format!("database name '{}' contains illegal character {:?}", name, bad),
            ));
        }
        Ok(Self(name))
    }

    pub fn admin() -> Self {
        Self(ADMIN_DB.to_string())
    }

    pub fn config() -> Self {
        Self(CONFIG_DB.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_admin(&self) -> bool {
        self.0 == ADMIN_DB
    }

    pub fn is_config(&self) -> bool {
        self.0 == CONFIG_DB
    }

    /// `admin`, `config` and `local` live on the authority and are never
    /// created through the sharding path.
    pub fn is_reserved(&self) -> bool {
        matches!(self.0.as_str(), ADMIN_DB | CONFIG_DB | LOCAL_DB)
    }
}

impl TryFrom<String> for DatabaseName {
    type Error = DdlError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DatabaseName> for String {
    fn from(value: DatabaseName) -> Self {
        value.0
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `(database, collection)` pair identifying a collection cluster-wide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    pub db: DatabaseName,
    pub coll: String,
}

impl Namespace {
    pub fn new(db: DatabaseName, coll: impl Into<String>) -> Result<Self> {
        let coll = coll.into();
        if coll.is_empty() {
            return Err(DdlError::command(
                ErrorCode::InvalidNamespace,
                format!("collection name in database '{}' must not be empty", db),
            ));
        }
        if coll.contains('\0') || coll.starts_with('.') {
            return Err(DdlError::command(
                ErrorCode::InvalidNamespace,
                format!("invalid collection name '{}'", coll),
            ));
        }
        Ok(Self { db, coll })
    }

    /// Parses `"db.coll"`; the collection part may itself contain dots.
    pub fn parse(full: &str) -> Result<Self> {
        let (db, coll) = full.split_once('.').ok_or_else(|| {
            DdlError::command(
                ErrorCode::InvalidNamespace,
                format!("namespace '{}' is missing a collection name", full),
            )
        })?;
        Self::new(DatabaseName::new(db)?, coll)
    }

    pub fn db_name(&self) -> &DatabaseName {
        &self.db
    }

    pub fn is_config_db(&self) -> bool {
        self.db.is_config()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

/// Identifier of a data shard. Ordering is lexicographic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(pub String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// Versions
// ============================================================================

/// Placement version of a database, issued by the authority.
///
/// `uuid` changes when the database is dropped and re-created; `last_mod`
/// advances on every primary move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseVersion {
    pub uuid: Uuid,
    pub timestamp: u64,
    pub last_mod: u32,
}

impl DatabaseVersion {
    pub fn new(uuid: Uuid, timestamp: u64) -> Self {
        Self {
            uuid,
            timestamp,
            last_mod: 1,
        }
    }

    /// Version of a reserved database, which never moves.
    pub fn fixed() -> Self {
        Self {
            uuid: Uuid::nil(),
            timestamp: 0,
            last_mod: 0,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.uuid.is_nil() && self.last_mod == 0
    }

    pub fn make_updated(&self) -> Self {
        Self {
            last_mod: self.last_mod + 1,
            ..*self
        }
    }

    /// Incarnations are ordered by timestamp; within one incarnation by
    /// `last_mod`.
    pub fn is_newer_than(&self, other: &DatabaseVersion) -> bool {
        matches!(self.partial_cmp(other), Some(Ordering::Greater))
    }
}

impl PartialOrd for DatabaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.uuid == other.uuid {
            return Some(self.last_mod.cmp(&other.last_mod));
        }
        match self.timestamp.cmp(&other.timestamp) {
            Ordering::Equal => None,
            ord => Some(ord),
        }
    }
}

impl fmt::Display for DatabaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.uuid, self.timestamp, self.last_mod)
    }
}

/// Distribution version of a sharded collection.
///
/// `epoch` identifies the incarnation of the collection; `(major, minor)`
/// advance with chunk migrations and splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionVersion {
    pub epoch: Uuid,
    pub timestamp: u64,
    pub major: u32,
    pub minor: u32,
}

impl CollectionVersion {
    pub fn new(epoch: Uuid, timestamp: u64, major: u32, minor: u32) -> Self {
        Self {
            epoch,
            timestamp,
            major,
            minor,
        }
    }

    pub fn is_same_collection(&self, other: &CollectionVersion) -> bool {
        self.epoch == other.epoch && self.timestamp == other.timestamp
    }

    pub fn is_newer_than(&self, other: &CollectionVersion) -> bool {
        matches!(self.partial_cmp(other), Some(Ordering::Greater))
    }
}

impl PartialOrd for CollectionVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.is_same_collection(other) {
            return Some((self.major, self.minor).cmp(&(other.major, other.minor)));
        }
        match self.timestamp.cmp(&other.timestamp) {
            Ordering::Equal => None,
            ord => Some(ord),
        }
    }
}

impl fmt::Display for CollectionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}||{}|{}",
            self.major, self.minor, self.epoch, self.timestamp
        )
    }
}

/// Version attached to a shard-targeted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShardVersion {
    /// The receiving shard must not attempt distribution-aware routing.
    Unsharded,
    Sharded { version: CollectionVersion },
}

impl fmt::Display for ShardVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardVersion::Unsharded => f.write_str("UNSHARDED"),
            ShardVersion::Sharded { version } => write!(f, "{}", version),
        }
    }
}

// ============================================================================
// Cache snapshots
// ============================================================================

/// Read-only snapshot of a database's placement, borrowed from the topology
/// cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedDatabaseInfo {
    pub name: DatabaseName,
    pub primary: ShardId,
    pub version: DatabaseVersion,
}

impl CachedDatabaseInfo {
    /// Placement of a reserved database: owned by the config server, fixed
    /// version.
    pub fn reserved(name: DatabaseName, config_shard: ShardId) -> Self {
        Self {
            name,
            primary: config_shard,
            version: DatabaseVersion::fixed(),
        }
    }

    pub fn primary(&self) -> &ShardId {
        &self.primary
    }

    pub fn version(&self) -> DatabaseVersion {
        self.version
    }
}

/// Routing entry for a sharded collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRoutingInfo {
    pub nss: Namespace,
    pub version: CollectionVersion,
    /// Highest version owned by each shard.
    pub shard_versions: Vec<(ShardId, CollectionVersion)>,
}

impl CollectionRoutingInfo {
    pub fn version_for_shard(&self, shard: &ShardId) -> Option<CollectionVersion> {
        self.shard_versions
            .iter()
            .find(|(id, _)| id == shard)
            .map(|(_, v)| *v)
    }
}

// ============================================================================
// Retry classes
// ============================================================================

/// Retry class attached to every outgoing command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryPolicy {
    NoRetry,
    /// Safe to re-send on any transient failure; the receiver de-duplicates.
    Idempotent,
    /// Only re-sent when the receiver provably did not execute the command.
    NotIdempotent,
}

impl RetryPolicy {
    pub fn is_retriable(&self, code: ErrorCode) -> bool {
        match self {
            RetryPolicy::NoRetry => false,
            RetryPolicy::Idempotent => code.is_transient(),
            RetryPolicy::NotIdempotent => code.is_not_primary(),
        }
    }
}
