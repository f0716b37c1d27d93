//! Schema definitions for LinkDB
//!
//! This module defines materialized tables and the objects they own:
//! columns, keys, rules and views. Cross-table links are stored as table ids
//! and column names so the catalog can hold tables in a flat arena.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::types::DataType;
use crate::model::TableDependencies;
use crate::sql::ast::{Expr, SelectStatement};

/// Stable identifier of a table inside the catalog arena
pub type TableId = u32;

/// Column definition in a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicColumn {
    /// Column position (0-indexed)
    pub index: usize,
    /// Column name
    pub name: String,
    /// Data type
    pub data_type: DataType,
    /// Is this column nullable?
    pub nullable: bool,
    /// Is this column backed by a unique index?
    pub unique: bool,
    /// Is this column backed by any index?
    pub indexed: bool,
    /// The index was created for a foreign key and goes away with it
    #[serde(default)]
    pub foreign_index: bool,
    /// Can this column be updated?
    pub immutable: bool,
}

impl BasicColumn {
    /// Create a new column with minimal required fields
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            index: 0,
            name: name.into(),
            data_type,
            nullable: true,
            unique: false,
            indexed: false,
            foreign_index: false,
            immutable: false,
        }
    }

    /// Set nullable flag
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set unique flag
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        if unique {
            self.indexed = true;
        }
        self
    }

    /// Set indexed flag
    pub fn indexed(mut self, indexed: bool) -> Self {
        self.indexed = indexed;
        self
    }

    /// Set immutable flag
    pub fn immutable(mut self, immutable: bool) -> Self {
        self.immutable = immutable;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub name: String,
    pub column: String,
}

/// `table.column` references `ref_table.ref_column`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    /// Name of the matching reverse key on the target table
    pub reverse_name: String,
    pub table: TableId,
    pub column: String,
    pub ref_table: TableId,
    pub ref_column: String,
}

impl ForeignKey {
    pub fn reverse(&self) -> ReverseForeignKey {
        ReverseForeignKey {
            name: self.reverse_name.clone(),
            foreign_key: self.name.clone(),
            table: self.ref_table,
            column: self.ref_column.clone(),
            ref_table: self.table,
            ref_column: self.column.clone(),
        }
    }
}

/// Back-reference registered on the target of a [`ForeignKey`]: one row of
/// `table` is referenced by many rows of `ref_table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReverseForeignKey {
    pub name: String,
    /// Name of the originating foreign key on `ref_table`
    pub foreign_key: String,
    pub table: TableId,
    pub column: String,
    pub ref_table: TableId,
    pub ref_column: String,
}

/// One hop of a reference chain. Chains compare structurally, so the same
/// path rebuilt by two compilations is the same dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Ref {
    Foreign(ForeignKey),
    Reverse(ReverseForeignKey),
}

impl Ref {
    /// Table the hop starts from
    pub fn source_table(&self) -> TableId {
        match self {
            Ref::Foreign(fk) => fk.table,
            Ref::Reverse(rev) => rev.table,
        }
    }

    /// Table the hop arrives at
    pub fn target_table(&self) -> TableId {
        match self {
            Ref::Foreign(fk) => fk.ref_table,
            Ref::Reverse(rev) => rev.ref_table,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Ref::Foreign(fk) => &fk.name,
            Ref::Reverse(rev) => &rev.name,
        }
    }

    /// Column of the source table whose value selects the target rows
    pub fn source_column(&self) -> &str {
        match self {
            Ref::Foreign(fk) => &fk.column,
            Ref::Reverse(rev) => &rev.column,
        }
    }

    /// Column of the target table matched against the source value
    pub fn target_column(&self) -> &str {
        match self {
            Ref::Foreign(fk) => &fk.ref_column,
            Ref::Reverse(rev) => &rev.ref_column,
        }
    }
}

/// Ordered list of hops from a root table
pub type RefChain = Vec<Ref>;

/// Named check rule of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub table: TableId,
    pub expr: Expr,
    /// Computed once when the rule is added
    pub dependencies: TableDependencies,
}

/// Named aggregate over a reverse foreign key, exposed as a sub-table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDef {
    pub name: String,
    pub table: TableId,
    pub select: SelectStatement,
}

/// Registered on a table read by a rule of another table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReverseRuleDependency {
    pub rule_table: TableId,
    pub rule: String,
    /// Path from the rule table to the table holding this entry
    pub chain: RefChain,
}

/// A physical, named table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedTable {
    pub id: TableId,
    pub name: String,
    columns: Vec<BasicColumn>,
    pub primary_key: Option<PrimaryKey>,
    pub foreign_keys: IndexMap<String, ForeignKey>,
    pub reverse_foreign_keys: IndexMap<String, ReverseForeignKey>,
    /// Check rules in declaration order
    pub rules: IndexMap<String, Rule>,
    pub views: IndexMap<String, ViewDef>,
    pub reverse_rule_dependencies: Vec<ReverseRuleDependency>,
}

impl MaterializedTable {
    pub fn new(id: TableId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
            foreign_keys: IndexMap::new(),
            reverse_foreign_keys: IndexMap::new(),
            rules: IndexMap::new(),
            views: IndexMap::new(),
            reverse_rule_dependencies: Vec::new(),
        }
    }

    /// Appends a column and assigns its position
    pub fn add_column(&mut self, mut column: BasicColumn) {
        column.index = self.columns.len();
        self.columns.push(column);
    }

    /// Removes a column and renumbers the following ones
    pub fn remove_column(&mut self, name: &str) -> Option<BasicColumn> {
        let index = self.column_index(name)?;
        let column = self.columns.remove(index);
        for (i, col) in self.columns.iter_mut().enumerate() {
            col.index = i;
        }
        Some(column)
    }

    pub fn columns(&self) -> &[BasicColumn] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, name: &str) -> Option<&BasicColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut BasicColumn> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column(name).map(|c| c.index)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn primary_key_index(&self) -> Option<usize> {
        self.primary_key
            .as_ref()
            .and_then(|pk| self.column_index(&pk.column))
    }

    /// Columns backed by an index
    pub fn indexed_columns(&self) -> impl Iterator<Item = &BasicColumn> {
        self.columns.iter().filter(|c| c.indexed)
    }

    /// Is `name` a foreign key, reverse foreign key or view of this table?
    pub fn has_reference(&self, name: &str) -> bool {
        self.foreign_keys.contains_key(name)
            || self.reverse_foreign_keys.contains_key(name)
            || self.views.contains_key(name)
    }

    /// Is `name` taken by any named object of this table?
    pub fn has_named_object(&self, name: &str) -> bool {
        self.has_reference(name)
            || self.rules.contains_key(name)
            || self.primary_key.as_ref().map_or(false, |pk| pk.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove_columns() {
        let mut table = MaterializedTable::new(1, "t");
        table.add_column(BasicColumn::new("a", DataType::Varchar));
        table.add_column(BasicColumn::new("b", DataType::Integer));
        table.add_column(BasicColumn::new("c", DataType::Float));

        assert_eq!(table.column_index("c"), Some(2));
        let removed = table.remove_column("b").unwrap();
        assert_eq!(removed.data_type, DataType::Integer);
        assert_eq!(table.column_index("c"), Some(1));
        assert_eq!(table.column_names(), vec!["a", "c"]);
    }

    #[test]
    fn test_reverse_key_mirrors_foreign_key() {
        let fk = ForeignKey {
            name: "fk_a".to_string(),
            reverse_name: "rev_fk_a".to_string(),
            table: 2,
            column: "a".to_string(),
            ref_table: 1,
            ref_column: "id".to_string(),
        };
        let rev = fk.reverse();
        assert_eq!(rev.table, 1);
        assert_eq!(rev.ref_table, 2);
        assert_eq!(rev.foreign_key, "fk_a");

        let forward = Ref::Foreign(fk.clone());
        let backward = Ref::Reverse(rev);
        assert_eq!(forward.source_table(), backward.target_table());
        assert_eq!(forward.source_column(), backward.target_column());
        assert_eq!(forward, Ref::Foreign(fk));
    }

    #[test]
    fn test_column_builder() {
        let col = BasicColumn::new("id", DataType::Integer)
            .nullable(false)
            .unique(true)
            .immutable(true);
        assert!(col.indexed);
        assert!(!col.nullable);
        assert!(col.immutable);
    }
}
