//! In-memory storage provider
//!
//! Each table sits behind its own `RwLock`. Readers and writers hold the
//! table handle and take the lock per call, so a statement may read a table
//! while it writes it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::table::MemoryTable;
use super::tuple::Value;
use super::{
    IndexReader, IterableTableReader, Row, RowId, SeekableTableReader, Storage, TableWriter,
};
use crate::catalog::{MaterializedTable, TableId};
use crate::error::{Error, Result};

type TableHandle = Arc<RwLock<MemoryTable>>;

#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: RwLock<HashMap<TableId, TableHandle>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, table: TableId) -> Result<TableHandle> {
        self.tables
            .read()
            .get(&table)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no storage for table {}", table)))
    }

    /// Number of live rows in a table
    pub fn row_count(&self, table: TableId) -> Result<usize> {
        Ok(self.handle(table)?.read().row_count())
    }
}

impl Storage for MemoryStorage {
    fn create_table(&self, table: &MaterializedTable) -> Result<()> {
        let mut data = MemoryTable::new(table.id, table.column_count());
        for column in table.indexed_columns() {
            data.create_index(
                column.index,
                &format!("{}.{}", table.name, column.name),
                column.unique,
            )?;
        }
        self.tables
            .write()
            .insert(table.id, Arc::new(RwLock::new(data)));
        debug!(table = %table.name, "created table storage");
        Ok(())
    }

    fn drop_table(&self, table: TableId) -> Result<()> {
        self.tables.write().remove(&table);
        Ok(())
    }

    fn add_column(&self, table: TableId) -> Result<()> {
        self.handle(table)?.write().add_column();
        Ok(())
    }

    fn drop_column(&self, table: TableId, column: usize) -> Result<()> {
        self.handle(table)?.write().drop_column(column)
    }

    fn create_index(&self, table: TableId, column: usize, name: &str, unique: bool) -> Result<()> {
        self.handle(table)?.write().create_index(column, name, unique)
    }

    fn drop_index(&self, table: TableId, column: usize) -> Result<()> {
        self.handle(table)?.write().drop_index(column);
        Ok(())
    }

    fn positions(&self, table: TableId) -> Result<Vec<RowId>> {
        Ok(self.handle(table)?.read().positions())
    }

    fn seekable(
        &self,
        table: TableId,
        key_column: usize,
    ) -> Result<Box<dyn SeekableTableReader>> {
        Ok(Box::new(MemorySeekableReader {
            table: self.handle(table)?,
            key_column,
        }))
    }

    fn iterable(&self, table: TableId) -> Result<Box<dyn IterableTableReader>> {
        Ok(Box::new(MemoryIterableReader {
            table: Some(self.handle(table)?),
            cursor: 0,
        }))
    }

    fn index(&self, table: TableId, column: usize) -> Result<Box<dyn IndexReader>> {
        let handle = self.handle(table)?;
        if handle.read().index(column).is_none() {
            return Err(Error::Internal(format!(
                "no index on column {} of table {}",
                column, table
            )));
        }
        Ok(Box::new(MemoryIndexReader {
            table: handle,
            column,
        }))
    }

    fn writer(&self, table: TableId) -> Result<Box<dyn TableWriter>> {
        Ok(Box::new(MemoryTableWriter {
            table: self.handle(table)?,
        }))
    }
}

struct MemorySeekableReader {
    table: TableHandle,
    key_column: usize,
}

impl SeekableTableReader for MemorySeekableReader {
    fn get(&self, key: &Value) -> Result<Option<Row>> {
        Ok(self.table.read().seek(self.key_column, key)?.cloned())
    }

    fn get_at(&self, pos: RowId) -> Result<Option<Row>> {
        Ok(self.table.read().get(pos).cloned())
    }
}

struct MemoryIterableReader {
    table: Option<TableHandle>,
    cursor: RowId,
}

impl IterableTableReader for MemoryIterableReader {
    fn next(&mut self) -> Result<Option<Row>> {
        let Some(table) = &self.table else {
            return Ok(None);
        };
        let next = table
            .read()
            .next_from(self.cursor)
            .map(|(pos, row)| (pos, row.clone()));
        match next {
            Some((pos, row)) => {
                self.cursor = pos + 1;
                Ok(Some(row))
            }
            None => {
                self.close();
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.table = None;
    }
}

struct MemoryIndexReader {
    table: TableHandle,
    column: usize,
}

impl IndexReader for MemoryIndexReader {
    fn get(&self, key: &Value) -> Result<Vec<RowId>> {
        match self.table.read().index(self.column) {
            Some(index) => index.get(key),
            None => Ok(Vec::new()),
        }
    }
}

struct MemoryTableWriter {
    table: TableHandle,
}

impl TableWriter for MemoryTableWriter {
    fn insert(&mut self, row: Row) -> Result<RowId> {
        self.table.write().insert(row)
    }

    fn update(&mut self, pos: RowId, row: Row) -> Result<Row> {
        self.table.write().update(pos, row)
    }

    fn delete(&mut self, pos: RowId) -> Result<Row> {
        self.table.write().delete(pos)
    }

    fn restore(&mut self, pos: RowId, row: Row) -> Result<()> {
        self.table.write().restore(pos, row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BasicColumn, DataType};

    fn users() -> MaterializedTable {
        let mut table = MaterializedTable::new(1, "users");
        table.add_column(BasicColumn::new("id", DataType::Integer).unique(true));
        table.add_column(BasicColumn::new("name", DataType::Varchar));
        table
    }

    #[test]
    fn test_create_table_builds_indexes() {
        let storage = MemoryStorage::new();
        storage.create_table(&users()).unwrap();
        let mut writer = storage.writer(1).unwrap();
        writer
            .insert(vec![Value::Integer(1), Value::from("Alice")])
            .unwrap();
        assert!(writer
            .insert(vec![Value::Integer(1), Value::from("Bob")])
            .is_err());

        let index = storage.index(1, 0).unwrap();
        assert!(index.contains(&Value::Integer(1)).unwrap());
        assert!(storage.index(1, 1).is_err());
    }

    #[test]
    fn test_iterable_reader_sees_live_rows() {
        let storage = MemoryStorage::new();
        storage.create_table(&users()).unwrap();
        let mut writer = storage.writer(1).unwrap();
        for i in 0..3 {
            writer
                .insert(vec![Value::Integer(i), Value::from(format!("u{}", i))])
                .unwrap();
        }
        writer.delete(1).unwrap();

        let mut reader = storage.iterable(1).unwrap();
        let mut ids = Vec::new();
        while let Some(row) = reader.next().unwrap() {
            ids.push(row[0].clone());
        }
        assert_eq!(ids, vec![Value::Integer(0), Value::Integer(2)]);
        assert_eq!(reader.next().unwrap(), None);
    }

    #[test]
    fn test_seekable_reader() {
        let storage = MemoryStorage::new();
        storage.create_table(&users()).unwrap();
        storage
            .writer(1)
            .unwrap()
            .insert(vec![Value::Integer(7), Value::from("Carol")])
            .unwrap();

        let reader = storage.seekable(1, 0).unwrap();
        assert_eq!(
            reader.get(&Value::Integer(7)).unwrap(),
            Some(vec![Value::Integer(7), Value::from("Carol")])
        );
        assert_eq!(reader.get(&Value::Null).unwrap(), None);
        assert!(reader.get_at(0).unwrap().is_some());
        assert_eq!(storage.row_count(1).unwrap(), 1);
    }
}
