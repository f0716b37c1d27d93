//! Table storage for LinkDB
//!
//! Rows live in a position-addressed vector. Deleting a row leaves a
//! tombstone so positions stay stable for indexes and the undo log.

use std::collections::BTreeMap;

use super::index::ColumnIndex;
use super::tuple::Value;
use super::{IndexReader, IndexWriter, Row, RowId};
use crate::catalog::TableId;
use crate::error::{Error, Result};

/// Rows and indexes of one materialized table
#[derive(Debug, Clone)]
pub struct MemoryTable {
    id: TableId,
    column_count: usize,
    rows: Vec<Option<Row>>,
    /// Indexes by column position
    indexes: BTreeMap<usize, ColumnIndex>,
}

impl MemoryTable {
    pub fn new(id: TableId, column_count: usize) -> Self {
        Self {
            id,
            column_count,
            rows: Vec::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    /// Get the row stored at a position
    pub fn get(&self, pos: RowId) -> Option<&Row> {
        self.rows.get(pos as usize).and_then(|r| r.as_ref())
    }

    /// Live rows from position `from` on
    pub fn next_from(&self, from: RowId) -> Option<(RowId, &Row)> {
        self.rows
            .iter()
            .enumerate()
            .skip(from as usize)
            .find_map(|(pos, row)| row.as_ref().map(|r| (pos as RowId, r)))
    }

    pub fn positions(&self) -> Vec<RowId> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.is_some())
            .map(|(pos, _)| pos as RowId)
            .collect()
    }

    /// Get tuple count
    pub fn row_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_some()).count()
    }

    pub fn index(&self, column: usize) -> Option<&ColumnIndex> {
        self.indexes.get(&column)
    }

    /// Create an index on a column, populated from the existing rows
    pub fn create_index(&mut self, column: usize, name: &str, unique: bool) -> Result<()> {
        let mut index = if unique {
            ColumnIndex::unique(name)
        } else {
            ColumnIndex::multi(name)
        };
        for (pos, row) in self.rows.iter().enumerate() {
            if let Some(row) = row {
                index.put(&row[column], pos as RowId)?;
            }
        }
        self.indexes.insert(column, index);
        Ok(())
    }

    pub fn drop_index(&mut self, column: usize) -> Option<ColumnIndex> {
        self.indexes.remove(&column)
    }

    pub fn add_column(&mut self) {
        self.column_count += 1;
        for row in self.rows.iter_mut().flatten() {
            row.push(Value::Null);
        }
    }

    /// Removes a column and shifts the indexes of the following ones
    pub fn drop_column(&mut self, column: usize) -> Result<()> {
        if column >= self.column_count {
            return Err(Error::Internal(format!(
                "column {} out of range for table {}",
                column, self.id
            )));
        }
        self.column_count -= 1;
        for row in self.rows.iter_mut().flatten() {
            row.remove(column);
        }
        self.indexes = std::mem::take(&mut self.indexes)
            .into_iter()
            .filter(|(c, _)| *c != column)
            .map(|(c, index)| if c > column { (c - 1, index) } else { (c, index) })
            .collect();
        Ok(())
    }

    fn check_width(&self, row: &Row) -> Result<()> {
        if row.len() != self.column_count {
            return Err(Error::Internal(format!(
                "Expected {} columns, got {}",
                self.column_count,
                row.len()
            )));
        }
        Ok(())
    }

    /// Fails on the first unique index the row would collide with
    fn check_unique(&self, row: &Row, pos: RowId) -> Result<()> {
        for (column, index) in &self.indexes {
            if index.conflicts(&row[*column], pos) {
                return Err(Error::rule(
                    index.name().to_string(),
                    format!("Key '{}' already present in index.", row[*column]),
                ));
            }
        }
        Ok(())
    }

    fn index_row(&mut self, row: &Row, pos: RowId) -> Result<()> {
        for (column, index) in self.indexes.iter_mut() {
            index.put(&row[*column], pos)?;
        }
        Ok(())
    }

    fn unindex_row(&mut self, row: &Row, pos: RowId) -> Result<()> {
        for (column, index) in self.indexes.iter_mut() {
            index.remove(&row[*column], pos)?;
        }
        Ok(())
    }

    /// Insert a row into the table
    pub fn insert(&mut self, row: Row) -> Result<RowId> {
        self.check_width(&row)?;
        let pos = self.rows.len() as RowId;
        self.check_unique(&row, pos)?;
        self.index_row(&row, pos)?;
        self.rows.push(Some(row));
        Ok(pos)
    }

    /// Update a row, returning the before-image
    pub fn update(&mut self, pos: RowId, row: Row) -> Result<Row> {
        self.check_width(&row)?;
        let old = self
            .get(pos)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("row {} not found", pos)))?;
        self.check_unique(&row, pos)?;
        self.unindex_row(&old, pos)?;
        self.index_row(&row, pos)?;
        self.rows[pos as usize] = Some(row);
        Ok(old)
    }

    /// Delete a row, returning the before-image
    pub fn delete(&mut self, pos: RowId) -> Result<Row> {
        let old = self
            .rows
            .get_mut(pos as usize)
            .and_then(Option::take)
            .ok_or_else(|| Error::Internal(format!("row {} not found", pos)))?;
        self.unindex_row(&old, pos)?;
        Ok(old)
    }

    /// Put a deleted row back at its position
    pub fn restore(&mut self, pos: RowId, row: Row) -> Result<()> {
        self.check_width(&row)?;
        match self.rows.get(pos as usize) {
            Some(None) => {}
            _ => {
                return Err(Error::Internal(format!(
                    "cannot restore row {} of table {}",
                    pos, self.id
                )))
            }
        }
        self.check_unique(&row, pos)?;
        self.index_row(&row, pos)?;
        self.rows[pos as usize] = Some(row);
        Ok(())
    }

    /// Row whose indexed `column` equals `key`
    pub fn seek(&self, column: usize, key: &Value) -> Result<Option<&Row>> {
        if key.is_null() {
            return Ok(None);
        }
        match self.indexes.get(&column) {
            Some(index) => Ok(index
                .get(key)?
                .first()
                .and_then(|pos| self.get(*pos))),
            None => Ok(self
                .rows
                .iter()
                .flatten()
                .find(|row| row[column] == *key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn create_test_table() -> MemoryTable {
        let mut table = MemoryTable::new(1, 3);
        table.create_index(0, "users.id", true).unwrap();
        table
    }

    fn row(id: i64, name: &str, age: i64) -> Row {
        vec![Value::Integer(id), Value::from(name), Value::Integer(age)]
    }

    #[test]
    fn test_table_insert() {
        let mut table = create_test_table();
        let pos = table.insert(row(1, "Alice", 25)).unwrap();
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.get(pos), Some(&row(1, "Alice", 25)));
    }

    #[test]
    fn test_table_wrong_column_count() {
        let mut table = create_test_table();
        let result = table.insert(vec![Value::Integer(1), Value::from("Alice")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_table_unique_violation_leaves_table_unchanged() {
        let mut table = create_test_table();
        table.insert(row(1, "Alice", 25)).unwrap();
        let err = table.insert(row(1, "Bob", 30)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rule);
        assert_eq!(err.to_string(), "Key '1' already present in index.");
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_table_index_sync() {
        let mut table = create_test_table();
        table.create_index(1, "users.name", false).unwrap();
        let pos = table.insert(row(1, "Alice", 25)).unwrap();

        let before = table.update(pos, row(1, "Bob", 25)).unwrap();
        assert_eq!(before, row(1, "Alice", 25));
        let index = table.index(1).unwrap();
        assert!(index.get(&Value::from("Alice")).unwrap().is_empty());
        assert_eq!(index.get(&Value::from("Bob")).unwrap(), vec![pos]);

        let deleted = table.delete(pos).unwrap();
        assert!(table.index(1).unwrap().is_empty());
        assert_eq!(table.seek(0, &Value::Integer(1)).unwrap(), None);

        table.restore(pos, deleted).unwrap();
        assert_eq!(
            table.seek(0, &Value::Integer(1)).unwrap(),
            Some(&row(1, "Bob", 25))
        );
    }

    #[test]
    fn test_drop_column_shifts_indexes() {
        let mut table = MemoryTable::new(1, 3);
        table.create_index(2, "t.c", false).unwrap();
        table.insert(row(1, "Alice", 25)).unwrap();
        table.drop_column(1).unwrap();

        assert_eq!(table.get(0), Some(&vec![Value::Integer(1), Value::Integer(25)]));
        assert_eq!(
            table.index(1).unwrap().get(&Value::Integer(25)).unwrap(),
            vec![0]
        );
        table.add_column();
        assert_eq!(table.get(0).unwrap().len(), 3);
    }

    #[test]
    fn test_scan_skips_tombstones() {
        let mut table = create_test_table();
        for i in 0..5 {
            table.insert(row(i, &format!("User{}", i), 20 + i)).unwrap();
        }
        table.delete(1).unwrap();
        table.delete(3).unwrap();
        assert_eq!(table.positions(), vec![0, 2, 4]);
        assert_eq!(table.next_from(1).map(|(pos, _)| pos), Some(2));
    }
}
