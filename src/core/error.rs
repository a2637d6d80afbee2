use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed set of error codes exchanged with the authority and shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    NamespaceNotFound,
    NamespaceExists,
    IllegalOperation,
    InvalidNamespace,
    InvalidOptions,
    FailedToParse,
    StaleShardVersion,
    StaleDbVersion,
    HostUnreachable,
    HostNotFound,
    NetworkTimeout,
    SocketException,
    NotWritablePrimary,
    NotPrimaryNoSecondaryOk,
    PrimarySteppedDown,
    InterruptedDueToReplStateChange,
    ShutdownInProgress,
    ShardNotFound,
    WriteConcernFailed,
    Interrupted,
    ExceededTimeLimit,
    NoSuchTransaction,
    ConflictingOperationInProgress,
    InternalError,
    CommandFailed,
}

/// How a failure is treated by the coordination layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Not-found / already-exists races, resolved locally.
    Expected,
    /// Transient transport failures and version staleness.
    Retryable,
    /// Surfaced to the caller with namespace and command context.
    FatalCaller,
    /// Session resources could not be restored after a nested call.
    FatalSession,
}

impl ErrorCode {
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            ErrorCode::HostUnreachable
                | ErrorCode::HostNotFound
                | ErrorCode::NetworkTimeout
                | ErrorCode::SocketException
        )
    }

    pub fn is_not_primary(&self) -> bool {
        matches!(
            self,
            ErrorCode::NotWritablePrimary
                | ErrorCode::NotPrimaryNoSecondaryOk
                | ErrorCode::PrimarySteppedDown
                | ErrorCode::InterruptedDueToReplStateChange
                | ErrorCode::ShutdownInProgress
        )
    }

    pub fn is_stale_version(&self) -> bool {
        matches!(self, ErrorCode::StaleShardVersion | ErrorCode::StaleDbVersion)
    }

    /// Errors an idempotent command may be re-sent on.
    ///
    /// Besides transport and not-primary failures this includes
    /// `WriteConcernFailed`: re-running an idempotent DDL command is safe, and
    /// a write-concern error on the last attempt still reaches the caller.
    pub fn is_transient(&self) -> bool {
        self.is_network() || self.is_not_primary() || *self == ErrorCode::WriteConcernFailed
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::NamespaceNotFound | ErrorCode::NamespaceExists => ErrorCategory::Expected,
            code if code.is_transient() || code.is_stale_version() => ErrorCategory::Retryable,
            _ => ErrorCategory::FatalCaller,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DdlError {
    #[error("{code}: {message}")]
    Command { code: ErrorCode, message: String },

    #[error("{context} :: caused by :: {source}")]
    Context {
        context: String,
        source: Box<DdlError>,
    },

    #[error("failed to restore transaction session resources: {source}")]
    SessionRestore { source: Box<DdlError> },

    #[error("{nested}; session resources could not be restored either: {unyield}")]
    NestedAndSessionRestore {
        nested: Box<DdlError>,
        unyield: Box<DdlError>,
    },

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, DdlError>;

impl DdlError {
    pub fn command(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Command {
            code,
            message: message.into(),
        }
    }

    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Code of the caller-visible failure. Context layers are transparent and
    /// a nested command error takes precedence over a restore failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            DdlError::Command { code, .. } => *code,
            DdlError::Context { source, .. } => source.code(),
            DdlError::SessionRestore { source } => source.code(),
            DdlError::NestedAndSessionRestore { nested, .. } => nested.code(),
            DdlError::LockError(_) => ErrorCode::InternalError,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            DdlError::Context { source, .. } => source.category(),
            DdlError::SessionRestore { .. } => ErrorCategory::FatalSession,
            DdlError::NestedAndSessionRestore { nested, .. } => nested.category(),
            _ => self.code().category(),
        }
    }

    /// The restore failure, if session resources were left in an
    /// inconsistent state.
    pub fn session_restore_error(&self) -> Option<&DdlError> {
        match self {
            DdlError::Context { source, .. } => source.session_restore_error(),
            DdlError::SessionRestore { source } => Some(source),
            DdlError::NestedAndSessionRestore { unyield, .. } => Some(unyield),
            _ => None,
        }
    }

    pub fn is_session_fatal(&self) -> bool {
        self.session_restore_error().is_some()
    }
}

pub trait ResultExt<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|err| err.with_context(context()))
    }
}

impl<T> From<std::sync::PoisonError<T>> for DdlError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for DdlError {
    fn from(err: serde_json::Error) -> Self {
        Self::command(ErrorCode::FailedToParse, err.to_string())
    }
}
