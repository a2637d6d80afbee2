use super::catalog::{LogicalSessionId, SessionCatalog};
use crate::core::{DdlError, Result};
use crate::operation::OperationContext;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Releases and re-acquires the caller's session resources around a nested
/// command.
pub trait ResourceYielder: Send + Sync {
    fn yield_resources(&self, op_ctx: &OperationContext) -> Result<()>;

    fn unyield_resources(&self, op_ctx: &OperationContext) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct YielderStats {
    pub yields: usize,
    pub unyields: usize,
    pub unyield_failures: usize,
}

/// Yields the router's transactional session by checking it back into the
/// session catalog.
///
/// Only a session the caller actually holds is released, and only a session
/// released by this yielder is re-acquired.
pub struct TransactionRouterResourceYielder {
    catalog: Arc<SessionCatalog>,
    yielded: Mutex<HashSet<LogicalSessionId>>,
    yields: AtomicUsize,
    unyields: AtomicUsize,
    unyield_failures: AtomicUsize,
}

impl TransactionRouterResourceYielder {
    pub fn new(catalog: Arc<SessionCatalog>) -> Self {
        Self {
            catalog,
            yielded: Mutex::new(HashSet::new()),
            yields: AtomicUsize::new(0),
            unyields: AtomicUsize::new(0),
            unyield_failures: AtomicUsize::new(0),
        }
    }

    pub fn catalog(&self) -> &Arc<SessionCatalog> {
        &self.catalog
    }

    pub fn stats(&self) -> YielderStats {
        YielderStats {
            yields: self.yields.load(Ordering::SeqCst),
            unyields: self.unyields.load(Ordering::SeqCst),
            unyield_failures: self.unyield_failures.load(Ordering::SeqCst),
        }
    }
}

impl ResourceYielder for TransactionRouterResourceYielder {
    fn yield_resources(&self, op_ctx: &OperationContext) -> Result<()> {
        self.yields.fetch_add(1, Ordering::SeqCst);
        let Some(session) = op_ctx.session() else {
            return Ok(());
        };
        if !self.catalog.is_checked_out(session.lsid) {
            return Ok(());
        }
        self.catalog.check_in(session.lsid)?;
        self.yielded.lock()?.insert(session.lsid);
        debug!(lsid = %session.lsid, "yielded router session");
        Ok(())
    }

    fn unyield_resources(&self, op_ctx: &OperationContext) -> Result<()> {
        self.unyields.fetch_add(1, Ordering::SeqCst);
        let Some(session) = op_ctx.session() else {
            return Ok(());
        };
        if !self.yielded.lock()?.remove(&session.lsid) {
            return Ok(());
        }
        if let Err(err) = self.catalog.check_out(session.lsid) {
            self.unyield_failures.fetch_add(1, Ordering::SeqCst);
            return Err(err);
        }
        debug!(lsid = %session.lsid, "restored router session");
        Ok(())
    }
}

/// Scoped yield: resources are released on [`YieldGuard::acquire`] and
/// restored by [`YieldGuard::restore`] or, failing that, on drop.
///
/// A restore failure on the drop path cannot be returned; it is logged and
/// recorded on the operation context instead.
pub struct YieldGuard<'a> {
    yielder: &'a dyn ResourceYielder,
    op_ctx: &'a OperationContext,
    restored: bool,
}

impl<'a> YieldGuard<'a> {
    pub fn acquire(yielder: &'a dyn ResourceYielder, op_ctx: &'a OperationContext) -> Result<Self> {
        yielder.yield_resources(op_ctx)?;
        Ok(Self {
            yielder,
            op_ctx,
            restored: false,
        })
    }

    pub fn restore(mut self) -> Result<()> {
        self.restored = true;
        self.yielder.unyield_resources(self.op_ctx)
    }

    /// Restores resources and merges the outcome with the nested call's.
    ///
    /// The nested error takes precedence; a restore failure is kept
    /// alongside it, or surfaced as a session failure on its own.
    pub fn restore_after<T>(self, nested: Result<T>) -> Result<T> {
        let restored = self.restore();
        match (nested, restored) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(nested), Ok(())) => Err(nested),
            (Ok(_), Err(unyield)) => {
                warn!(error = %unyield, "failed to restore session resources");
                Err(DdlError::SessionRestore {
                    source: Box::new(unyield),
                })
            }
            (Err(nested), Err(unyield)) => {
                warn!(
                    error = %unyield,
                    nested = %nested,
                    "failed to restore session resources after failed nested command"
                );
                Err(DdlError::NestedAndSessionRestore {
                    nested: Box::new(nested),
                    unyield: Box::new(unyield),
                })
            }
        }
    }
}

impl Drop for YieldGuard<'_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        if let Err(err) = self.yielder.unyield_resources(self.op_ctx) {
            warn!(error = %err, "failed to restore session resources on cleanup");
            self.op_ctx.record_secondary_failure(DdlError::SessionRestore {
                source: Box::new(err),
            });
        }
    }
}
