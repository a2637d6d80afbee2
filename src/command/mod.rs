// ============================================================================
// Command Envelopes
// ============================================================================
//
// A `CommandRequest` is the version-free body of a command. Each dispatch
// attempt stamps it into a fresh `CommandEnvelope` carrying the versions the
// router currently believes in; envelopes are never reused across attempts.
//
// ============================================================================

pub mod reply;
pub mod request;

pub use reply::{
    CommandReply, CreateCollectionReply, CreateDatabaseReply, RemoteResponse, ReplyShape,
    StaleInfo, WriteConcernError,
};
pub use request::{
    CommandRequest, CommandEnvelope, ConfigsvrCreateDatabase, CreateCollectionRequest,
    CreateCommand, ShardingMode, VersionStamp, CONFIGSVR_CREATE_DATABASE, CREATE,
    SHARDSVR_CREATE_COLLECTION,
};
