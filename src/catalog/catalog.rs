//! System Catalog for LinkDB
//!
//! The catalog is an arena of materialized tables indexed by id and by name.
//! Foreign keys and their reverse keys, rules and the reverse rule
//! dependencies they register are always added and removed together here.
//!
//! The catalog itself is not synchronized; the engine keeps it behind the
//! metadata lock and mutates a clone that is swapped in only when a schema
//! statement succeeds.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use super::schema::{
    BasicColumn, ForeignKey, MaterializedTable, PrimaryKey, ReverseRuleDependency, Rule, TableId,
    ViewDef,
};
use crate::error::{Error, Result};

/// System Catalog - manages all table metadata
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// Table definitions by id
    tables: BTreeMap<TableId, Arc<MaterializedTable>>,
    /// Table ids by name
    names: HashMap<String, TableId>,
    /// Next table ID
    next_table_id: TableId,
}

impl Catalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
            names: HashMap::new(),
            next_table_id: 1,
        }
    }

    /// Create a new table
    pub fn create_table(&mut self, name: &str, columns: Vec<BasicColumn>) -> Result<TableId> {
        if self.names.contains_key(name) {
            return Err(Error::model(format!("Table '{}' already exists.", name)));
        }
        let mut table = MaterializedTable::new(self.next_table_id, name);
        for column in columns {
            if table.column(&column.name).is_some() {
                return Err(Error::model(format!(
                    "Duplicate column '{}' in table '{}'.",
                    column.name, name
                )));
            }
            table.add_column(column);
        }

        let id = self.next_table_id;
        self.next_table_id += 1;
        self.names.insert(name.to_string(), id);
        self.tables.insert(id, Arc::new(table));
        info!(table = name, id, "created table");
        Ok(id)
    }

    /// Get a table by name
    pub fn table(&self, name: &str) -> Result<Arc<MaterializedTable>> {
        self.names
            .get(name)
            .and_then(|id| self.tables.get(id))
            .cloned()
            .ok_or_else(|| Error::model(format!("Table '{}' not found.", name)))
    }

    /// Get a table by id
    pub fn table_by_id(&self, id: TableId) -> Result<&Arc<MaterializedTable>> {
        self.tables
            .get(&id)
            .ok_or_else(|| Error::Internal(format!("table id {} not in catalog", id)))
    }

    fn table_mut(&mut self, id: TableId) -> Result<&mut MaterializedTable> {
        self.tables
            .get_mut(&id)
            .map(Arc::make_mut)
            .ok_or_else(|| Error::Internal(format!("table id {} not in catalog", id)))
    }

    /// Check if a table exists
    pub fn has_table(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// All tables in creation order
    pub fn tables(&self) -> impl Iterator<Item = &Arc<MaterializedTable>> {
        self.tables.values()
    }

    /// List all table names
    pub fn list_tables(&self) -> Vec<String> {
        self.tables.values().map(|t| t.name.clone()).collect()
    }

    /// Drop a table. Fails while another table references it.
    pub fn drop_table(&mut self, name: &str) -> Result<Arc<MaterializedTable>> {
        let table = self.table(name)?;
        if let Some(rev) = table
            .reverse_foreign_keys
            .values()
            .find(|rev| rev.ref_table != table.id)
        {
            let child = self.table_by_id(rev.ref_table)?;
            return Err(Error::model(format!(
                "Cannot drop table '{}', referenced by foreign key '{}.{}'.",
                name, child.name, rev.foreign_key
            )));
        }

        for rule in table.rules.values() {
            self.unregister_rule(rule)?;
        }
        for fk in table.foreign_keys.values() {
            if fk.ref_table != table.id {
                self.table_mut(fk.ref_table)?
                    .reverse_foreign_keys
                    .shift_remove(&fk.reverse_name);
            }
        }

        self.names.remove(name);
        self.tables.remove(&table.id);
        info!(table = name, "dropped table");
        Ok(table)
    }

    /// Declares the primary key. The key column becomes unique, non-null and
    /// immutable.
    pub fn set_primary_key(&mut self, table: TableId, name: &str, column: &str) -> Result<()> {
        let t = self.table_mut(table)?;
        if t.primary_key.is_some() {
            return Err(Error::model(format!(
                "Table '{}' already has a primary key.",
                t.name
            )));
        }
        let table_name = t.name.clone();
        let col = t.column_mut(column).ok_or_else(|| {
            Error::model(format!(
                "Column '{}' not found in table '{}'.",
                column, table_name
            ))
        })?;
        col.unique = true;
        col.indexed = true;
        col.nullable = false;
        col.immutable = true;
        t.primary_key = Some(PrimaryKey {
            name: name.to_string(),
            column: column.to_string(),
        });
        Ok(())
    }

    /// Adds a foreign key to the primary key of `ref_table` and registers
    /// the reverse key on the target.
    pub fn add_foreign_key(
        &mut self,
        table: TableId,
        name: &str,
        column: &str,
        ref_table: &str,
        ref_column: Option<&str>,
        reverse_name: Option<&str>,
    ) -> Result<ForeignKey> {
        let source = self.table_by_id(table)?.clone();
        let target = self.table(ref_table)?;
        if source.has_named_object(name) {
            return Err(Error::model(format!(
                "Duplicate constraint or reference '{}' in table '{}'.",
                name, source.name
            )));
        }
        let local = source.column(column).ok_or_else(|| {
            Error::model(format!(
                "Column '{}' not found in table '{}'.",
                column, source.name
            ))
        })?;
        let pk = target.primary_key.as_ref().ok_or_else(|| {
            Error::model(format!(
                "Foreign key '{}' must reference the primary key of table '{}'.",
                name, target.name
            ))
        })?;
        if let Some(ref_column) = ref_column {
            if ref_column != pk.column {
                return Err(Error::model(format!(
                    "Foreign key '{}' must reference the primary key of table '{}'.",
                    name, target.name
                )));
            }
        }
        let key_column = target
            .column(&pk.column)
            .ok_or_else(|| Error::Internal(format!("missing primary key column {}", pk.column)))?;
        if local.data_type != key_column.data_type {
            return Err(Error::model(format!(
                "Foreign key reference column has type '{}' while local column '{}' has type '{}'.",
                key_column.data_type, local.name, local.data_type
            )));
        }
        let reverse_name = reverse_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("rev_{}", name));
        let target_has_name = if target.id == table {
            source.has_named_object(&reverse_name) || reverse_name == name
        } else {
            target.has_named_object(&reverse_name)
        };
        if target_has_name {
            return Err(Error::model(format!(
                "Duplicate constraint or reference '{}' in table '{}'.",
                reverse_name, target.name
            )));
        }

        let fk = ForeignKey {
            name: name.to_string(),
            reverse_name,
            table,
            column: column.to_string(),
            ref_table: target.id,
            ref_column: pk.column.clone(),
        };
        {
            let t = self.table_mut(table)?;
            t.foreign_keys.insert(fk.name.clone(), fk.clone());
            if let Some(col) = t.column_mut(column) {
                if !col.indexed {
                    col.indexed = true;
                    col.foreign_index = true;
                }
            }
        }
        let rev = fk.reverse();
        self.table_mut(target.id)?
            .reverse_foreign_keys
            .insert(rev.name.clone(), rev);
        info!(
            foreign_key = name,
            table = %source.name,
            target = %target.name,
            "added foreign key"
        );
        Ok(fk)
    }

    /// Removes a foreign key together with its reverse key
    pub fn drop_foreign_key(&mut self, table: TableId, name: &str) -> Result<ForeignKey> {
        let t = self.table_mut(table)?;
        let fk = t.foreign_keys.shift_remove(name).ok_or_else(|| {
            Error::model(format!("Foreign key '{}' not found in table '{}'.", name, t.name))
        })?;
        let shared = t.foreign_keys.values().any(|other| other.column == fk.column);
        if let Some(col) = t.column_mut(&fk.column).filter(|c| c.foreign_index && !shared) {
            col.indexed = col.unique;
            col.foreign_index = false;
        }
        self.table_mut(fk.ref_table)?
            .reverse_foreign_keys
            .shift_remove(&fk.reverse_name);
        Ok(fk)
    }

    /// Adds a compiled rule and registers it on every table it reads
    /// through a reference.
    pub fn add_rule(&mut self, rule: Rule) -> Result<()> {
        {
            let t = self.table_mut(rule.table)?;
            if t.has_named_object(&rule.name) {
                return Err(Error::model(format!(
                    "Duplicate constraint or reference '{}' in table '{}'.",
                    rule.name, t.name
                )));
            }
        }
        for dep in rule.dependencies.references() {
            let entry = ReverseRuleDependency {
                rule_table: rule.table,
                rule: rule.name.clone(),
                chain: dep.chain.clone(),
            };
            let target = self.table_mut(dep.table)?;
            if !target.reverse_rule_dependencies.contains(&entry) {
                target.reverse_rule_dependencies.push(entry);
            }
        }
        let t = self.table_mut(rule.table)?;
        info!(rule = %rule.name, table = %t.name, "added rule");
        t.rules.insert(rule.name.clone(), rule);
        Ok(())
    }

    pub fn drop_rule(&mut self, table: TableId, name: &str) -> Result<Rule> {
        let t = self.table_mut(table)?;
        let rule = t.rules.shift_remove(name).ok_or_else(|| {
            Error::model(format!("Constraint '{}' not found in table '{}'.", name, t.name))
        })?;
        self.unregister_rule(&rule)?;
        Ok(rule)
    }

    fn unregister_rule(&mut self, rule: &Rule) -> Result<()> {
        for dep in rule.dependencies.references() {
            if let Some(target) = self.tables.get_mut(&dep.table) {
                Arc::make_mut(target)
                    .reverse_rule_dependencies
                    .retain(|d| !(d.rule_table == rule.table && d.rule == rule.name));
            }
        }
        Ok(())
    }

    pub fn add_view(&mut self, view: ViewDef) -> Result<()> {
        let t = self.table_mut(view.table)?;
        if t.has_named_object(&view.name) || t.column(&view.name).is_some() {
            return Err(Error::model(format!(
                "Duplicate constraint or reference '{}' in table '{}'.",
                view.name, t.name
            )));
        }
        t.views.insert(view.name.clone(), view);
        Ok(())
    }

    pub fn drop_view(&mut self, table: TableId, name: &str) -> Result<ViewDef> {
        let t = self.table_mut(table)?;
        t.views.shift_remove(name).ok_or_else(|| {
            Error::model(format!("View '{}' not found in table '{}'.", name, t.name))
        })
    }

    /// Appends a nullable column
    pub fn add_column(&mut self, table: TableId, column: BasicColumn) -> Result<usize> {
        let t = self.table_mut(table)?;
        if t.column(&column.name).is_some() || t.has_reference(&column.name) {
            return Err(Error::model(format!(
                "Column '{}' already exists in table '{}'.",
                column.name, t.name
            )));
        }
        if !column.nullable {
            return Err(Error::model(format!(
                "Cannot add non-nullable column '{}' to table '{}'.",
                column.name, t.name
            )));
        }
        t.add_column(column);
        Ok(t.column_count() - 1)
    }

    /// Removes a column that no key refers to. Returns its former position.
    pub fn drop_column(&mut self, table: TableId, name: &str) -> Result<usize> {
        let t = self.table_by_id(table)?.clone();
        let column = t.column(name).ok_or_else(|| {
            Error::model(format!("Column '{}' not found in table '{}'.", name, t.name))
        })?;
        if t.primary_key.as_ref().map_or(false, |pk| pk.column == name) {
            return Err(Error::model(format!(
                "Cannot drop column '{}', it is the primary key of table '{}'.",
                name, t.name
            )));
        }
        if let Some(fk) = t.foreign_keys.values().find(|fk| fk.column == name) {
            return Err(Error::model(format!(
                "Cannot drop column '{}', used by foreign key '{}.{}'.",
                name, t.name, fk.name
            )));
        }
        let index = column.index;
        self.table_mut(table)?.remove_column(name);
        Ok(index)
    }

    /// Creates a multi-value index on a column
    pub fn create_index(&mut self, table: TableId, column: &str) -> Result<usize> {
        let t = self.table_mut(table)?;
        let table_name = t.name.clone();
        let col = t.column_mut(column).ok_or_else(|| {
            Error::model(format!(
                "Column '{}' not found in table '{}'.",
                column, table_name
            ))
        })?;
        if col.indexed {
            return Err(Error::model(format!(
                "Index '{}.{}' already exists.",
                table_name, column
            )));
        }
        col.indexed = true;
        Ok(col.index)
    }

    /// Drops an index that no key depends on. Returns the column position,
    /// or `None` when the column was not indexed.
    pub fn drop_index(&mut self, table: TableId, column: &str) -> Result<Option<usize>> {
        let t = self.table_mut(table)?;
        let table_name = t.name.clone();
        let fk = t
            .foreign_keys
            .values()
            .find(|fk| fk.column == column)
            .map(|fk| fk.name.clone());
        let col = t.column_mut(column).ok_or_else(|| {
            Error::model(format!(
                "Column '{}' not found in table '{}'.",
                column, table_name
            ))
        })?;
        if col.unique {
            return Err(Error::model(format!(
                "Cannot drop index '{}.{}', column is unique.",
                table_name, column
            )));
        }
        if let Some(fk) = fk {
            return Err(Error::model(format!(
                "Cannot drop index '{}.{}', used by foreign key '{}'.",
                table_name, column, fk
            )));
        }
        if !col.indexed {
            return Ok(None);
        }
        col.indexed = false;
        Ok(Some(col.index))
    }

    /// Save catalog to disk
    pub fn save_to_disk(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = CatalogData {
            tables: self.tables.values().map(|t| (**t).clone()).collect(),
            next_table_id: self.next_table_id,
        };
        let json = serde_json::to_string_pretty(&data)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load catalog from disk
    pub fn load_from_disk(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let data: CatalogData = serde_json::from_str(&json)?;

        let mut catalog = Catalog::new();
        catalog.next_table_id = data.next_table_id;
        for table in data.tables {
            catalog.names.insert(table.name.clone(), table.id);
            catalog.tables.insert(table.id, Arc::new(table));
        }
        Ok(catalog)
    }
}

/// Serializable proxy for Catalog
#[derive(serde::Serialize, serde::Deserialize)]
struct CatalogData {
    tables: Vec<MaterializedTable>,
    next_table_id: TableId,
}
