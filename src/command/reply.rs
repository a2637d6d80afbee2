use crate::core::{CollectionVersion, DatabaseVersion, DdlError, ErrorCode, Namespace, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteConcernError {
    pub code: ErrorCode,
    pub errmsg: String,
}

/// Versions a shard reported alongside a staleness error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wanted_database_version: Option<DatabaseVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wanted_collection_version: Option<CollectionVersion>,
}

/// Raw reply from a shard or the authority, before shape-specific decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errmsg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_concern_error: Option<WriteConcernError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_info: Option<StaleInfo>,
    #[serde(default)]
    pub data: Value,
}

impl RemoteResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            code: None,
            errmsg: None,
            write_concern_error: None,
            stale_info: None,
            data,
        }
    }

    pub fn error(code: ErrorCode, errmsg: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: Some(code),
            errmsg: Some(errmsg.into()),
            write_concern_error: None,
            stale_info: None,
            data: Value::Null,
        }
    }

    pub fn stale(code: ErrorCode, errmsg: impl Into<String>, info: StaleInfo) -> Self {
        Self {
            stale_info: Some(info),
            ..Self::error(code, errmsg)
        }
    }

    pub fn with_write_concern_error(mut self, code: ErrorCode, errmsg: impl Into<String>) -> Self {
        self.write_concern_error = Some(WriteConcernError {
            code,
            errmsg: errmsg.into(),
        });
        self
    }

    /// Code of the command-level failure, if any.
    pub fn error_code(&self) -> Option<ErrorCode> {
        if self.ok {
            None
        } else {
            Some(self.code.unwrap_or(ErrorCode::CommandFailed))
        }
    }

    pub fn command_status(&self) -> Result<()> {
        match self.error_code() {
            None => Ok(()),
            Some(code) => Err(DdlError::command(
                code,
                self.errmsg.clone().unwrap_or_else(|| "command failed".to_string()),
            )),
        }
    }

    pub fn write_concern_status(&self) -> Result<()> {
        match &self.write_concern_error {
            None => Ok(()),
            Some(wce) => Err(DdlError::command(
                wce.code,
                format!("write concern error: {}", wce.errmsg),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDatabaseReply {
    pub database_version: DatabaseVersion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCollectionReply {
    pub collection_version: CollectionVersion,
}

/// Reply layouts; chosen by the caller from the command it sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    CreateDatabase,
    CreateCollection,
    Plain,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    CreateDatabase(CreateDatabaseReply),
    CreateCollection(CreateCollectionReply),
    Plain(Value),
}

impl ReplyShape {
    /// Decodes a successful reply's payload. Callers check command status
    /// first.
    pub fn decode(self, response: &RemoteResponse) -> Result<CommandReply> {
        match self {
            ReplyShape::CreateDatabase => decode_create_database(&response.data)
                .map(CommandReply::CreateDatabase),
            ReplyShape::CreateCollection => decode_create_collection(&response.data)
                .map(CommandReply::CreateCollection),
            ReplyShape::Plain => Ok(CommandReply::Plain(response.data.clone())),
        }
    }
}

fn decode_create_database(data: &Value) -> Result<CreateDatabaseReply> {
    serde_json::from_value(data.clone()).map_err(|err| {
        DdlError::command(
            ErrorCode::FailedToParse,
            format!("malformed create-database reply: {}", err),
        )
    })
}

fn decode_create_collection(data: &Value) -> Result<CreateCollectionReply> {
    serde_json::from_value(data.clone()).map_err(|err| {
        DdlError::command(
            ErrorCode::FailedToParse,
            format!("malformed create-collection reply: {}", err),
        )
    })
}

impl CommandReply {
    pub fn into_create_database(self) -> Result<CreateDatabaseReply> {
        match self {
            CommandReply::CreateDatabase(reply) => Ok(reply),
            other => Err(unexpected_shape("create-database", &other)),
        }
    }

    pub fn into_create_collection(self) -> Result<CreateCollectionReply> {
        match self {
            CommandReply::CreateCollection(reply) => Ok(reply),
            other => Err(unexpected_shape("create-collection", &other)),
        }
    }
}

fn unexpected_shape(expected: &str, got: &CommandReply) -> DdlError {
    DdlError::command(
        ErrorCode::InternalError,
        format!("expected a {} reply, got {:?}", expected, got),
    )
}
