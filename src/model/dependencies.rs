//! Table dependencies of compiled columns and rules
//!
//! A dependency edge is a table together with the chain of foreign and
//! reverse foreign keys used to reach it. Two chains ending at the same
//! table are different edges.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::catalog::{Ref, RefChain, TableId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableDependency {
    pub table: TableId,
    pub chain: RefChain,
}

/// Union-mergeable set of dependency edges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDependencies {
    edges: BTreeSet<TableDependency>,
}

impl TableDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a read of `root` itself, or of the tables along `chain` when
    /// the read goes through references.
    pub fn add_read(&mut self, root: TableId, chain: &[Ref]) {
        if chain.is_empty() {
            self.edges.insert(TableDependency {
                table: root,
                chain: Vec::new(),
            });
        } else {
            self.add_reference(chain);
        }
    }

    /// Every prefix of the chain reaches a table whose rows decide what the
    /// full chain sees, so all of them are recorded.
    pub fn add_reference(&mut self, chain: &[Ref]) {
        for end in 1..=chain.len() {
            self.edges.insert(TableDependency {
                table: chain[end - 1].target_table(),
                chain: chain[..end].to_vec(),
            });
        }
    }

    pub fn merge(&mut self, other: &TableDependencies) {
        self.edges.extend(other.edges.iter().cloned());
    }

    pub fn merged(mut self, other: &TableDependencies) -> Self {
        self.merge(other);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableDependency> {
        self.edges.iter()
    }

    /// Distinct tables, regardless of the chain
    pub fn tables(&self) -> BTreeSet<TableId> {
        self.edges.iter().map(|d| d.table).collect()
    }

    /// Edges reached through at least one reference
    pub fn references(&self) -> impl Iterator<Item = &TableDependency> {
        self.edges.iter().filter(|d| !d.chain.is_empty())
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ForeignKey;

    fn fk(name: &str, table: TableId, ref_table: TableId) -> Ref {
        Ref::Foreign(ForeignKey {
            name: name.to_string(),
            reverse_name: format!("rev_{}", name),
            table,
            column: name.to_string(),
            ref_table,
            ref_column: "a".to_string(),
        })
    }

    #[test]
    fn test_add_reference_records_prefixes() {
        let mut deps = TableDependencies::new();
        deps.add_reference(&[fk("fk_a", 3, 2), fk("fk_b", 2, 1)]);

        assert_eq!(deps.len(), 2);
        assert_eq!(deps.tables(), BTreeSet::from([1, 2]));
        assert!(deps.iter().any(|d| d.table == 2 && d.chain.len() == 1));
        assert!(deps.iter().any(|d| d.table == 1 && d.chain.len() == 2));
    }

    #[test]
    fn test_distinct_chains_to_same_table() {
        let mut deps = TableDependencies::new();
        deps.add_reference(&[fk("fk_a", 2, 1)]);
        deps.add_reference(&[fk("fk_b", 2, 1)]);
        deps.add_reference(&[fk("fk_a", 2, 1)]);

        assert_eq!(deps.len(), 2);
        assert_eq!(deps.tables().len(), 1);
    }

    #[test]
    fn test_merge_is_union() {
        let mut a = TableDependencies::new();
        a.add_read(1, &[]);
        let mut b = TableDependencies::new();
        b.add_reference(&[fk("fk_a", 1, 2)]);

        let ab = a.clone().merged(&b);
        let ba = b.clone().merged(&a);
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 2);
        assert_eq!(ab.references().count(), 1);
    }
}
