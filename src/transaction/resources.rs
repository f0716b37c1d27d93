//! Per-statement resource descriptors
//!
//! A [`MetaResources`] value names every table and index a compiled statement
//! touches and whether it writes them. Descriptors merge with OR semantics,
//! so the merge order never changes the resulting lock set.

use std::collections::BTreeMap;

use crate::catalog::{Catalog, MaterializedTable};

/// A lockable resource: a table name or `table.column` for an index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Resource {
    pub id: String,
    pub write: bool,
}

/// Access flags of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetaResource {
    pub select: bool,
    pub insert: bool,
    pub delete: bool,
    pub update: bool,
    pub foreign_indexes: bool,
    pub reverse_foreign_indexes: bool,
    table: String,
    indexes: Vec<String>,
    foreign_index_ids: Vec<String>,
    reverse_foreign_index_ids: Vec<String>,
}

impl TableMetaResource {
    fn of(catalog: &Catalog, table: &MaterializedTable) -> Self {
        let index_id = |table: u32, column: &str| {
            let name = catalog
                .table_by_id(table)
                .map(|t| t.name.clone())
                .unwrap_or_default();
            format!("{}.{}", name, column)
        };
        Self {
            select: false,
            insert: false,
            delete: false,
            update: false,
            foreign_indexes: false,
            reverse_foreign_indexes: false,
            table: table.name.clone(),
            indexes: table
                .indexed_columns()
                .map(|c| format!("{}.{}", table.name, c.name))
                .collect(),
            foreign_index_ids: table
                .foreign_keys
                .values()
                .map(|fk| index_id(fk.ref_table, &fk.ref_column))
                .collect(),
            reverse_foreign_index_ids: table
                .reverse_foreign_keys
                .values()
                .map(|rev| index_id(rev.ref_table, &rev.ref_column))
                .collect(),
        }
    }

    pub fn write(&self) -> bool {
        self.insert || self.delete || self.update
    }

    fn merge(mut self, other: &TableMetaResource) -> Self {
        self.select |= other.select;
        self.insert |= other.insert;
        self.delete |= other.delete;
        self.update |= other.update;
        self.foreign_indexes |= other.foreign_indexes;
        self.reverse_foreign_indexes |= other.reverse_foreign_indexes;
        self
    }

    fn resources(&self) -> Vec<Resource> {
        let write = self.write();
        let mut out = vec![Resource {
            id: self.table.clone(),
            write,
        }];
        out.extend(self.indexes.iter().map(|id| Resource {
            id: id.clone(),
            write,
        }));
        if self.foreign_indexes {
            out.extend(self.foreign_index_ids.iter().map(|id| Resource {
                id: id.clone(),
                write: false,
            }));
        }
        if self.reverse_foreign_indexes {
            out.extend(self.reverse_foreign_index_ids.iter().map(|id| Resource {
                id: id.clone(),
                write: false,
            }));
        }
        out
    }
}

/// Resource descriptor of a statement, keyed by table name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaResources {
    tables: BTreeMap<String, TableMetaResource>,
}

impl MetaResources {
    pub fn empty() -> Self {
        Self::default()
    }

    fn single(resource: TableMetaResource) -> Self {
        let mut tables = BTreeMap::new();
        tables.insert(resource.table.clone(), resource);
        Self { tables }
    }

    pub fn read_table(catalog: &Catalog, table: &MaterializedTable) -> Self {
        let mut resource = TableMetaResource::of(catalog, table);
        resource.select = true;
        Self::single(resource)
    }

    /// Updates may move index entries and race with key validation
    pub fn update_table(catalog: &Catalog, table: &MaterializedTable) -> Self {
        let mut resource = TableMetaResource::of(catalog, table);
        resource.update = true;
        resource.foreign_indexes = true;
        resource.reverse_foreign_indexes = true;
        Self::single(resource)
    }

    /// Inserts validate that foreign key targets exist
    pub fn insert_into_table(catalog: &Catalog, table: &MaterializedTable) -> Self {
        let mut resource = TableMetaResource::of(catalog, table);
        resource.insert = true;
        resource.foreign_indexes = true;
        Self::single(resource)
    }

    /// Deletes validate that no child row references the deleted row
    pub fn delete_from_table(catalog: &Catalog, table: &MaterializedTable) -> Self {
        let mut resource = TableMetaResource::of(catalog, table);
        resource.delete = true;
        resource.reverse_foreign_indexes = true;
        Self::single(resource)
    }

    /// Read access to every table of the catalog
    pub fn all_tables(catalog: &Catalog) -> Self {
        catalog
            .tables()
            .fold(Self::empty(), |acc, t| acc.merge(Self::read_table(catalog, t)))
    }

    pub fn merge(mut self, other: MetaResources) -> Self {
        for (name, resource) in other.tables {
            let merged = match self.tables.remove(&name) {
                Some(existing) => existing.merge(&resource),
                None => resource,
            };
            self.tables.insert(name, merged);
        }
        self
    }

    pub fn table(&self, name: &str) -> Option<&TableMetaResource> {
        self.tables.get(name)
    }

    pub fn can_read(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn can_write(&self, table: &str) -> bool {
        self.tables.get(table).map_or(false, |t| t.write())
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Every lockable resource in lexicographic order of id. An id reached
    /// from several tables is written if any of them writes it.
    pub fn all(&self) -> Vec<Resource> {
        let mut merged: BTreeMap<String, bool> = BTreeMap::new();
        for resource in self.tables.values().flat_map(|t| t.resources()) {
            *merged.entry(resource.id).or_insert(false) |= resource.write;
        }
        merged
            .into_iter()
            .map(|(id, write)| Resource { id, write })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BasicColumn, DataType};

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let t1 = catalog
            .create_table(
                "t1",
                vec![
                    BasicColumn::new("a", DataType::Varchar),
                    BasicColumn::new("b", DataType::Integer),
                ],
            )
            .unwrap();
        catalog.set_primary_key(t1, "pk_a", "a").unwrap();
        let t2 = catalog
            .create_table("t2", vec![BasicColumn::new("a", DataType::Varchar)])
            .unwrap();
        catalog.add_foreign_key(t2, "fk", "a", "t1", None, None).unwrap();
        catalog
    }

    fn ids(resources: &MetaResources) -> Vec<(String, bool)> {
        resources
            .all()
            .into_iter()
            .map(|r| (r.id, r.write))
            .collect()
    }

    #[test]
    fn test_insert_locks_foreign_index() {
        let catalog = catalog();
        let t2 = catalog.table("t2").unwrap();
        let resources = MetaResources::insert_into_table(&catalog, &t2);
        assert_eq!(
            ids(&resources),
            vec![
                ("t1.a".to_string(), false),
                ("t2".to_string(), true),
                ("t2.a".to_string(), true),
            ]
        );
    }

    #[test]
    fn test_delete_locks_reverse_index() {
        let catalog = catalog();
        let t1 = catalog.table("t1").unwrap();
        let resources = MetaResources::delete_from_table(&catalog, &t1);
        assert_eq!(
            ids(&resources),
            vec![
                ("t1".to_string(), true),
                ("t1.a".to_string(), true),
                ("t2.a".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_merge_is_commutative_and_associative() {
        let catalog = catalog();
        let t1 = catalog.table("t1").unwrap();
        let t2 = catalog.table("t2").unwrap();
        let a = MetaResources::read_table(&catalog, &t1);
        let b = MetaResources::update_table(&catalog, &t2);
        let c = MetaResources::delete_from_table(&catalog, &t1);

        let left = a.clone().merge(b.clone()).merge(c.clone());
        let right = c.clone().merge(a.clone().merge(b.clone()));
        let shuffled = b.merge(c).merge(a);
        assert_eq!(left.all(), right.all());
        assert_eq!(left.all(), shuffled.all());
        assert!(left.can_write("t1"));
        assert!(left.can_write("t2"));
    }

    #[test]
    fn test_read_only_resources() {
        let catalog = catalog();
        let t1 = catalog.table("t1").unwrap();
        let resources = MetaResources::read_table(&catalog, &t1);
        assert!(resources.can_read("t1"));
        assert!(!resources.can_write("t1"));
        assert!(!resources.can_read("t2"));
        assert!(resources.all().iter().all(|r| !r.write));
    }
}
