//! Transaction module
//!
//! Resource descriptors, the lock manager and per-transaction state.

pub mod lock;
pub mod resources;
pub mod transaction;

pub use lock::{LockGuard, LockManager, LockMode};
pub use resources::{MetaResources, Resource, TableMetaResource};
pub use transaction::{CancelFlag, Transaction, TransactionState, UndoEntry, UndoLog};
