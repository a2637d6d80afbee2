// ============================================================================
// Operation Context
// ============================================================================
//
// Per-request state of the caller on whose behalf DDL is coordinated: the
// concerns it asked for, its session, and its cancellation signal.
//
// ============================================================================

use crate::core::{
    DdlError, ErrorCode, ReadConcern, Result, WriteConcern, WriteConcernProvenance,
};
use crate::session::LogicalSessionId;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Session identity propagated on nested commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSessionInfo {
    pub lsid: LogicalSessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn_number: Option<u64>,
}

pub struct OperationContext {
    write_concern: Option<WriteConcern>,
    write_concern_provenance: WriteConcernProvenance,
    read_concern: Option<ReadConcern>,
    session: Option<OperationSessionInfo>,
    in_multi_document_transaction: bool,
    deadline: Option<Instant>,
    cancel: watch::Sender<bool>,
    // Failures that could not be returned, e.g. from a guard's drop path.
    secondary_failures: Mutex<Vec<DdlError>>,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationContext {
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            write_concern: None,
            write_concern_provenance: WriteConcernProvenance::Implicit,
            read_concern: None,
            session: None,
            in_multi_document_transaction: false,
            deadline: None,
            cancel,
            secondary_failures: Mutex::new(Vec::new()),
        }
    }

    pub fn with_write_concern(
        mut self,
        write_concern: WriteConcern,
        provenance: WriteConcernProvenance,
    ) -> Self {
        self.write_concern = Some(write_concern);
        self.write_concern_provenance = provenance;
        self
    }

    pub fn with_read_concern(mut self, read_concern: ReadConcern) -> Self {
        self.read_concern = Some(read_concern);
        self
    }

    pub fn with_session(mut self, lsid: LogicalSessionId, txn_number: Option<u64>) -> Self {
        self.session = Some(OperationSessionInfo { lsid, txn_number });
        self
    }

    /// Marks the operation as running inside a multi-statement transaction.
    /// Requires a session with a transaction number.
    pub fn in_transaction(mut self) -> Result<Self> {
        match self.session {
            Some(OperationSessionInfo {
                txn_number: Some(_),
                ..
            }) => {
                self.in_multi_document_transaction = true;
                Ok(self)
            }
            _ => Err(DdlError::command(
                ErrorCode::IllegalOperation,
                "a multi-statement transaction requires a session and a transaction number",
            )),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }

    pub fn write_concern_provenance(&self) -> WriteConcernProvenance {
        self.write_concern_provenance
    }

    /// True only when an external client supplied the write concern.
    pub fn is_client_supplied_write_concern(&self) -> bool {
        self.write_concern.is_some()
            && self.write_concern_provenance == WriteConcernProvenance::ClientSupplied
    }

    pub fn read_concern(&self) -> Option<&ReadConcern> {
        self.read_concern.as_ref()
    }

    pub fn session(&self) -> Option<&OperationSessionInfo> {
        self.session.as_ref()
    }

    pub fn in_multi_document_transaction(&self) -> bool {
        self.in_multi_document_transaction
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Signals cancellation. Outstanding interruptible calls return
    /// `Interrupted`.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn check_for_interrupt(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(DdlError::command(
                ErrorCode::Interrupted,
                "operation was interrupted",
            ));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(DdlError::command(
                    ErrorCode::ExceededTimeLimit,
                    "operation exceeded time limit",
                ));
            }
        }
        Ok(())
    }

    /// Runs `fut` until it completes, the operation is cancelled, or its
    /// deadline passes. On cancellation or deadline the future is dropped.
    pub async fn run_interruptible<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check_for_interrupt()?;
        let deadline = self.deadline;
        let cancelled = self.cancel.subscribe();
        tokio::select! {
            biased;
            _ = wait_cancelled(cancelled) => Err(DdlError::command(
                ErrorCode::Interrupted,
                "operation was interrupted",
            )),
            _ = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            } => Err(DdlError::command(
                ErrorCode::ExceededTimeLimit,
                "operation exceeded time limit",
            )),
            result = fut => result,
        }
    }

    pub(crate) fn record_secondary_failure(&self, err: DdlError) {
        match self.secondary_failures.lock() {
            Ok(mut failures) => failures.push(err),
            Err(poisoned) => poisoned.into_inner().push(err),
        }
    }

    /// Failures recorded on cleanup paths that had no caller to return to.
    pub fn secondary_failures(&self) -> Vec<DdlError> {
        match self.secondary_failures.lock() {
            Ok(failures) => failures.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

async fn wait_cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        let cancelled = *rx.borrow_and_update();
        if cancelled {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
