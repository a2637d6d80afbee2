use crate::core::{DdlError, ErrorCode, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalSessionId(pub Uuid);

impl LogicalSessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LogicalSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LogicalSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SessionEntry {
    checked_out: bool,
    killed: bool,
}

/// Process-wide registry of sessions and their check-out state.
///
/// A session can be held by at most one operation at a time; a second
/// check-out fails instead of blocking so callers never deadlock on it.
#[derive(Debug, Default)]
pub struct SessionCatalog {
    sessions: Mutex<HashMap<LogicalSessionId, SessionEntry>>,
}

impl SessionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_out(&self, lsid: LogicalSessionId) -> Result<()> {
        let mut sessions = self.sessions.lock()?;
        let entry = sessions.entry(lsid).or_default();
        if entry.killed {
            return Err(DdlError::command(
                ErrorCode::NoSuchTransaction,
                format!("session {} was killed", lsid),
            ));
        }
        if entry.checked_out {
            return Err(DdlError::command(
                ErrorCode::ConflictingOperationInProgress,
                format!("session {} is already checked out", lsid),
            ));
        }
        entry.checked_out = true;
        Ok(())
    }

    pub fn check_in(&self, lsid: LogicalSessionId) -> Result<()> {
        let mut sessions = self.sessions.lock()?;
        match sessions.get_mut(&lsid) {
            Some(entry) if entry.checked_out => {
                entry.checked_out = false;
                Ok(())
            }
            _ => Err(DdlError::command(
                ErrorCode::InternalError,
                format!("session {} is not checked out", lsid),
            )),
        }
    }

    pub fn is_checked_out(&self, lsid: LogicalSessionId) -> bool {
        self.sessions
            .lock()
            .map(|sessions| sessions.get(&lsid).is_some_and(|e| e.checked_out))
            .unwrap_or(false)
    }

    /// Kills the session; later check-outs fail with `NoSuchTransaction`.
    pub fn kill(&self, lsid: LogicalSessionId) -> Result<()> {
        let mut sessions = self.sessions.lock()?;
        let entry = sessions.entry(lsid).or_default();
        entry.killed = true;
        entry.checked_out = false;
        Ok(())
    }
}
