//! Transaction state
//!
//! Handles the statement lifecycle (Active, Committed, Aborted), the undo
//! log replayed on rollback, and asynchronous cancellation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::catalog::TableId;
use crate::error::{Error, Result};
use crate::storage::{Row, RowId, Storage};

/// Shared flag polled at every row boundary and while waiting for locks
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails with [`Error::Cancelled`] once the flag is raised
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A row change that rollback has to revert
#[derive(Debug, Clone, PartialEq)]
pub enum UndoEntry {
    Inserted { table: TableId, pos: RowId },
    Updated { table: TableId, pos: RowId, before: Row },
    Deleted { table: TableId, pos: RowId, before: Row },
}

/// Row changes of the running transaction, in application order
#[derive(Debug, Default)]
pub struct UndoLog {
    entries: Vec<UndoEntry>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: UndoEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[UndoEntry] {
        &self.entries
    }

    /// Reverts every change, newest first. Keeps going after a failure and
    /// reports the first one.
    pub fn rollback(&mut self, storage: &dyn Storage) -> Result<()> {
        let mut first_error = None;
        while let Some(entry) = self.entries.pop() {
            trace!(?entry, "undo");
            let result = match entry {
                UndoEntry::Inserted { table, pos } => storage
                    .writer(table)
                    .and_then(|mut w| w.delete(pos).map(|_| ())),
                UndoEntry::Updated { table, pos, before } => storage
                    .writer(table)
                    .and_then(|mut w| w.update(pos, before).map(|_| ())),
                UndoEntry::Deleted { table, pos, before } => storage
                    .writer(table)
                    .and_then(|mut w| w.restore(pos, before)),
            };
            if let Err(e) = result {
                warn!(error = %e, "undo failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Forgets all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Transaction State
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Transaction Context
#[derive(Debug)]
pub struct Transaction {
    pub id: u64,
    state: TransactionState,
    cancel: CancelFlag,
    undo: UndoLog,
}

impl Transaction {
    pub fn begin(cancel: CancelFlag) -> Self {
        Self {
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
            state: TransactionState::Active,
            cancel,
            undo: UndoLog::new(),
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn undo_log(&mut self) -> &mut UndoLog {
        &mut self.undo
    }

    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.undo.clear();
        self.state = TransactionState::Committed;
        Ok(())
    }

    pub fn rollback(&mut self, storage: &dyn Storage) -> Result<()> {
        self.ensure_active()?;
        warn!(txn = self.id, changes = self.undo.len(), "rolling back");
        self.state = TransactionState::Aborted;
        self.undo.rollback(storage)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TransactionState::Active {
            return Err(Error::Internal(format!(
                "Transaction {} is not active",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BasicColumn, DataType, MaterializedTable};
    use crate::storage::{MemoryStorage, Value};

    fn storage() -> MemoryStorage {
        let mut table = MaterializedTable::new(1, "t");
        table.add_column(BasicColumn::new("a", DataType::Varchar).unique(true));
        table.add_column(BasicColumn::new("b", DataType::Integer));
        let storage = MemoryStorage::new();
        storage.create_table(&table).unwrap();
        storage
    }

    fn rows(storage: &MemoryStorage) -> Vec<Row> {
        let mut reader = storage.iterable(1).unwrap();
        let mut out = Vec::new();
        while let Some(row) = reader.next().unwrap() {
            out.push(row);
        }
        out
    }

    #[test]
    fn test_transaction_lifecycle() {
        let storage = storage();
        let mut txn = Transaction::begin(CancelFlag::new());
        assert_eq!(txn.state(), TransactionState::Active);
        txn.commit().unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(txn.commit().is_err());
        assert!(txn.rollback(&storage).is_err());
    }

    #[test]
    fn test_rollback_reverts_in_reverse_order() {
        let storage = storage();
        let mut writer = storage.writer(1).unwrap();
        let kept = writer
            .insert(vec![Value::from("x"), Value::Integer(1)])
            .unwrap();

        let mut txn = Transaction::begin(CancelFlag::new());
        let pos = writer
            .insert(vec![Value::from("y"), Value::Integer(2)])
            .unwrap();
        txn.undo_log().record(UndoEntry::Inserted { table: 1, pos });
        let before = writer
            .update(kept, vec![Value::from("x"), Value::Integer(10)])
            .unwrap();
        txn.undo_log().record(UndoEntry::Updated {
            table: 1,
            pos: kept,
            before,
        });
        let before = writer.delete(kept).unwrap();
        txn.undo_log().record(UndoEntry::Deleted {
            table: 1,
            pos: kept,
            before,
        });

        txn.rollback(&storage).unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert_eq!(rows(&storage), vec![vec![Value::from("x"), Value::Integer(1)]]);
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(flag.check().is_ok());
        other.cancel();
        assert!(matches!(flag.check(), Err(Error::Cancelled)));
    }
}
