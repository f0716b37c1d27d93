//! Storage module
//!
//! This module defines the row storage contracts the engine runs against and
//! an in-memory implementation:
//! - Seekable and iterable table readers
//! - Table writers returning before-images for the undo log
//! - Unique and multi-value column indexes

pub mod index;
pub mod memory;
pub mod table;
pub mod tuple;

use crate::catalog::{MaterializedTable, TableId};
use crate::error::Result;

pub use index::ColumnIndex;
pub use memory::MemoryStorage;
pub use table::MemoryTable;
pub use tuple::{Tuple, Value};

/// Position of a row inside its table
pub type RowId = u64;

/// Column values of one stored row, in column order
pub type Row = Vec<Value>;

/// Point lookups by key or by position
pub trait SeekableTableReader {
    /// Row whose key column equals `key`
    fn get(&self, key: &Value) -> Result<Option<Row>>;

    /// Row stored at `pos`, `None` for deleted rows
    fn get_at(&self, pos: RowId) -> Result<Option<Row>>;
}

/// Row stream. `next` returns `None` once exhausted.
pub trait IterableTableReader {
    fn next(&mut self) -> Result<Option<Row>>;

    /// Releases the reader. Calling `next` afterwards yields `None`.
    fn close(&mut self) {}
}

pub trait IndexReader {
    /// Positions of the rows holding `key`
    fn get(&self, key: &Value) -> Result<Vec<RowId>>;

    fn contains(&self, key: &Value) -> Result<bool> {
        Ok(!self.get(key)?.is_empty())
    }
}

pub trait IndexWriter {
    fn put(&mut self, key: &Value, pos: RowId) -> Result<()>;
    fn remove(&mut self, key: &Value, pos: RowId) -> Result<()>;
}

/// Applies row changes and keeps the table's indexes in sync. Every
/// operation either fully applies or leaves the table unchanged.
pub trait TableWriter {
    fn insert(&mut self, row: Row) -> Result<RowId>;

    /// Replaces the row at `pos` and returns the before-image
    fn update(&mut self, pos: RowId, row: Row) -> Result<Row>;

    /// Deletes the row at `pos` and returns the before-image
    fn delete(&mut self, pos: RowId) -> Result<Row>;

    /// Puts a deleted row back at its former position
    fn restore(&mut self, pos: RowId, row: Row) -> Result<()>;
}

/// Provider of per-table readers and writers
pub trait Storage: Send + Sync {
    fn create_table(&self, table: &MaterializedTable) -> Result<()>;
    fn drop_table(&self, table: TableId) -> Result<()>;

    /// Appends a column that is null in every existing row
    fn add_column(&self, table: TableId) -> Result<()>;
    fn drop_column(&self, table: TableId, column: usize) -> Result<()>;

    /// Builds an index over the existing rows
    fn create_index(&self, table: TableId, column: usize, name: &str, unique: bool) -> Result<()>;
    fn drop_index(&self, table: TableId, column: usize) -> Result<()>;

    /// Positions of all live rows in insertion order
    fn positions(&self, table: TableId) -> Result<Vec<RowId>>;

    fn seekable(&self, table: TableId, key_column: usize)
        -> Result<Box<dyn SeekableTableReader>>;
    fn iterable(&self, table: TableId) -> Result<Box<dyn IterableTableReader>>;
    fn index(&self, table: TableId, column: usize) -> Result<Box<dyn IndexReader>>;
    fn writer(&self, table: TableId) -> Result<Box<dyn TableWriter>>;
}
