//! In-memory column indexes
//!
//! A unique index maps each key to one row position, a multi-value index maps
//! each key to a set of positions. Null keys are never indexed.

use std::collections::{BTreeMap, BTreeSet};

use super::tuple::Value;
use super::{IndexReader, IndexWriter, RowId};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
enum Entries {
    Unique(BTreeMap<Value, RowId>),
    Multi(BTreeMap<Value, BTreeSet<RowId>>),
}

/// Index over one column of a table
#[derive(Debug, Clone)]
pub struct ColumnIndex {
    /// `table.column`
    name: String,
    entries: Entries,
}

impl ColumnIndex {
    pub fn unique(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Entries::Unique(BTreeMap::new()),
        }
    }

    pub fn multi(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Entries::Multi(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_unique(&self) -> bool {
        matches!(self.entries, Entries::Unique(_))
    }

    /// Would `put(key, pos)` fail?
    pub fn conflicts(&self, key: &Value, pos: RowId) -> bool {
        match &self.entries {
            Entries::Unique(map) if !key.is_null() => map.get(key).map_or(false, |p| *p != pos),
            _ => false,
        }
    }

    /// Number of indexed keys
    pub fn len(&self) -> usize {
        match &self.entries {
            Entries::Unique(map) => map.len(),
            Entries::Multi(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IndexReader for ColumnIndex {
    fn get(&self, key: &Value) -> Result<Vec<RowId>> {
        if key.is_null() {
            return Ok(Vec::new());
        }
        Ok(match &self.entries {
            Entries::Unique(map) => map.get(key).copied().into_iter().collect(),
            Entries::Multi(map) => map
                .get(key)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default(),
        })
    }
}

impl IndexWriter for ColumnIndex {
    fn put(&mut self, key: &Value, pos: RowId) -> Result<()> {
        if key.is_null() {
            return Ok(());
        }
        match &mut self.entries {
            Entries::Unique(map) => {
                if map.get(key).map_or(false, |p| *p != pos) {
                    return Err(Error::rule(
                        self.name.clone(),
                        format!("Key '{}' already present in index.", key),
                    ));
                }
                map.insert(key.clone(), pos);
            }
            Entries::Multi(map) => {
                map.entry(key.clone()).or_default().insert(pos);
            }
        }
        Ok(())
    }

    fn remove(&mut self, key: &Value, pos: RowId) -> Result<()> {
        if key.is_null() {
            return Ok(());
        }
        match &mut self.entries {
            Entries::Unique(map) => {
                if map.get(key) == Some(&pos) {
                    map.remove(key);
                }
            }
            Entries::Multi(map) => {
                if let Some(set) = map.get_mut(key) {
                    set.remove(&pos);
                    if set.is_empty() {
                        map.remove(key);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_index_rejects_duplicates() {
        let mut index = ColumnIndex::unique("t.a");
        index.put(&Value::from("x"), 0).unwrap();
        index.put(&Value::from("x"), 0).unwrap();

        let err = index.put(&Value::from("x"), 1).unwrap_err();
        assert_eq!(err.to_string(), "Key 'x' already present in index.");
        assert!(index.conflicts(&Value::from("x"), 1));
        assert_eq!(index.get(&Value::from("x")).unwrap(), vec![0]);
    }

    #[test]
    fn test_multi_index_positions() {
        let mut index = ColumnIndex::multi("t.a");
        index.put(&Value::Integer(1), 3).unwrap();
        index.put(&Value::Integer(1), 1).unwrap();
        index.put(&Value::Integer(2), 2).unwrap();

        assert_eq!(index.get(&Value::Integer(1)).unwrap(), vec![1, 3]);
        index.remove(&Value::Integer(1), 3).unwrap();
        assert_eq!(index.get(&Value::Integer(1)).unwrap(), vec![1]);
        index.remove(&Value::Integer(1), 1).unwrap();
        assert!(!index.contains(&Value::Integer(1)).unwrap());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_null_keys_are_not_indexed() {
        let mut index = ColumnIndex::unique("t.a");
        index.put(&Value::Null, 0).unwrap();
        index.put(&Value::Null, 1).unwrap();
        assert!(index.is_empty());
        assert!(index.get(&Value::Null).unwrap().is_empty());
    }
}
