pub mod concern;
pub mod error;
pub mod types;

pub use concern::{
    EffectiveWriteConcern, ReadConcern, ReadConcernLevel, WriteAcknowledgement, WriteConcern,
    WriteConcernProvenance,
};
pub use error::{DdlError, ErrorCategory, ErrorCode, Result, ResultExt};
pub use types::{
    CachedDatabaseInfo, CollectionRoutingInfo, CollectionVersion, DatabaseName, DatabaseVersion,
    Namespace, RetryPolicy, ShardId, ShardVersion,
};
