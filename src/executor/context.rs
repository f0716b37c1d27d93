//! Runtime access to storage for a locked statement
//!
//! [`Resources`] hands out readers and writers only for tables and indexes
//! named in the statement's locked [`MetaResources`]. Reaching anything else
//! is an internal error: the compiled descriptor missed an access.

use std::collections::BTreeSet;

use crate::catalog::MaterializedTable;
use crate::error::{Error, Result};
use crate::storage::{
    IndexReader, IterableTableReader, RowId, SeekableTableReader, Storage, TableWriter, Value,
};
use crate::transaction::{CancelFlag, MetaResources};

pub struct Resources<'a> {
    storage: &'a dyn Storage,
    meta: &'a MetaResources,
    locked: BTreeSet<String>,
    cancel: &'a CancelFlag,
}

impl<'a> Resources<'a> {
    pub fn new(storage: &'a dyn Storage, meta: &'a MetaResources, cancel: &'a CancelFlag) -> Self {
        Self {
            storage,
            meta,
            locked: meta.all().into_iter().map(|r| r.id).collect(),
            cancel,
        }
    }

    pub fn storage(&self) -> &'a dyn Storage {
        self.storage
    }

    pub fn cancel_flag(&self) -> &'a CancelFlag {
        self.cancel
    }

    /// Polled at every row boundary
    pub fn check_cancelled(&self) -> Result<()> {
        self.cancel.check()
    }

    fn ensure_read(&self, id: &str) -> Result<()> {
        if self.locked.contains(id) {
            Ok(())
        } else {
            Err(Error::Internal(format!("Resource '{}' read without lock", id)))
        }
    }

    fn ensure_write(&self, table: &MaterializedTable) -> Result<()> {
        if self.meta.can_write(&table.name) {
            Ok(())
        } else {
            Err(Error::Internal(format!(
                "Table '{}' written without lock",
                table.name
            )))
        }
    }

    pub fn iterable(&self, table: &MaterializedTable) -> Result<Box<dyn IterableTableReader>> {
        self.ensure_read(&table.name)?;
        self.storage.iterable(table.id)
    }

    pub fn seekable(
        &self,
        table: &MaterializedTable,
        key_column: usize,
    ) -> Result<Box<dyn SeekableTableReader>> {
        self.ensure_read(&table.name)?;
        self.storage.seekable(table.id, key_column)
    }

    pub fn positions(&self, table: &MaterializedTable) -> Result<Vec<RowId>> {
        self.ensure_read(&table.name)?;
        self.storage.positions(table.id)
    }

    /// Index reader over `table.column`
    pub fn index(&self, table: &MaterializedTable, column: &str) -> Result<Box<dyn IndexReader>> {
        self.ensure_read(&format!("{}.{}", table.name, column))?;
        let position = table.column_index(column).ok_or_else(|| {
            Error::Internal(format!("no column {} in table {}", column, table.name))
        })?;
        self.storage.index(table.id, position)
    }

    /// Positions of the rows of `table` whose `column` equals `key`
    pub fn lookup(&self, table: &MaterializedTable, column: &str, key: &Value) -> Result<Vec<RowId>> {
        self.index(table, column)?.get(key)
    }

    pub fn writer(&self, table: &MaterializedTable) -> Result<Box<dyn TableWriter>> {
        self.ensure_write(table)?;
        self.storage.writer(table.id)
    }
}

/// Row-independent evaluation state. `owner` is the row a view is being
/// computed for.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalContext<'a> {
    pub owner: Option<&'a [Value]>,
}

impl<'a> EvalContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_owner(owner: &'a [Value]) -> Self {
        Self { owner: Some(owner) }
    }
}
