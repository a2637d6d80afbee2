// ============================================================================
// Session Resource Yielding
// ============================================================================
//
// A nested administrative command may need to check out the caller's own
// session (when the authority is co-located with the router). The caller's
// session is checked in for the duration of the nested call and checked out
// again afterwards on every exit path.
//
// ============================================================================

pub mod catalog;
pub mod yielder;

pub use catalog::{LogicalSessionId, SessionCatalog};
pub use yielder::{ResourceYielder, TransactionRouterResourceYielder, YieldGuard, YielderStats};
