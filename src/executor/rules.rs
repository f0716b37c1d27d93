//! Integrity checks run after a statement changed the rows of a table
//!
//! A [`RuleChecker`] is compiled together with the mutating statement. After
//! the writes it validates, in order:
//!
//! 1. foreign keys of inserted and updated rows,
//! 2. that no child row still references a deleted row,
//! 3. the rules of the mutated table on every written row,
//! 4. rules of other tables that read the mutated table through a reference
//!    chain. Their affected rows are found by walking the chain backwards
//!    through the key indexes, starting from the before and after images.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::context::{EvalContext, Resources};
use crate::catalog::{Catalog, ForeignKey, MaterializedTable, Ref, ReverseForeignKey};
use crate::error::{Error, Result};
use crate::model::{compile_rule, CompiledRule, TableDependencies};
use crate::storage::{Row, RowId, Value};
use crate::transaction::MetaResources;

/// A row written by the statement
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Inserted(Row),
    Updated { before: Row, after: Row },
    Deleted(Row),
}

impl RowChange {
    fn after(&self) -> Option<&Row> {
        match self {
            RowChange::Inserted(row) | RowChange::Updated { after: row, .. } => Some(row),
            RowChange::Deleted(_) => None,
        }
    }

    fn before(&self) -> Option<&Row> {
        match self {
            RowChange::Updated { before, .. } | RowChange::Deleted(before) => Some(before),
            RowChange::Inserted(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Insert,
    Update,
    Delete,
}

struct ForeignKeyCheck {
    foreign_key: ForeignKey,
    key_index: usize,
    target: Arc<MaterializedTable>,
}

struct ReverseKeyCheck {
    reverse_key: ReverseForeignKey,
    key_index: usize,
    child: Arc<MaterializedTable>,
}

/// Rule of another table, with the tables along its chain. `path[0]` is the
/// rule table and the last entry is the mutated table.
struct ReferencingRule {
    rule: CompiledRule,
    chain: Vec<Ref>,
    path: Vec<Arc<MaterializedTable>>,
}

pub struct RuleChecker {
    table: Arc<MaterializedTable>,
    foreign_keys: Vec<ForeignKeyCheck>,
    reverse_keys: Vec<ReverseKeyCheck>,
    own: Vec<CompiledRule>,
    referencing: Vec<ReferencingRule>,
}

/// Read access to every table a compiled expression depends on
pub fn read_dependencies(catalog: &Catalog, deps: &TableDependencies) -> Result<MetaResources> {
    let mut resources = MetaResources::empty();
    for id in deps.tables() {
        let table = catalog.table_by_id(id)?;
        resources = resources.merge(MetaResources::read_table(catalog, table));
    }
    Ok(resources)
}

fn column_position(table: &MaterializedTable, column: &str) -> Result<usize> {
    table
        .column_index(column)
        .ok_or_else(|| Error::Internal(format!("column {} missing in table {}", column, table.name)))
}

impl RuleChecker {
    /// Compiles the checks a mutation of `table` triggers and the resources
    /// they read
    pub fn compile(
        catalog: &Catalog,
        table: &Arc<MaterializedTable>,
        mutation: Mutation,
    ) -> Result<(Self, MetaResources)> {
        let mut resources = MetaResources::empty();

        let mut foreign_keys = Vec::new();
        if mutation != Mutation::Delete {
            for fk in table.foreign_keys.values() {
                foreign_keys.push(ForeignKeyCheck {
                    foreign_key: fk.clone(),
                    key_index: column_position(table, &fk.column)?,
                    target: catalog.table_by_id(fk.ref_table)?.clone(),
                });
            }
        }

        let mut reverse_keys = Vec::new();
        if mutation == Mutation::Delete {
            for rev in table.reverse_foreign_keys.values() {
                reverse_keys.push(ReverseKeyCheck {
                    reverse_key: rev.clone(),
                    key_index: column_position(table, &rev.column)?,
                    child: catalog.table_by_id(rev.ref_table)?.clone(),
                });
            }
        }

        let mut own = Vec::new();
        if mutation != Mutation::Delete {
            for rule in table.rules.values() {
                let compiled = compile_rule(catalog, table, &rule.name, &rule.expr)?;
                resources = resources.merge(read_dependencies(catalog, &compiled.dependencies)?);
                own.push(compiled);
            }
        }

        let mut referencing = Vec::new();
        for dep in &table.reverse_rule_dependencies {
            let rule_table = catalog.table_by_id(dep.rule_table)?.clone();
            let rule = rule_table.rules.get(&dep.rule).ok_or_else(|| {
                Error::Internal(format!(
                    "rule {}.{} registered on {} is missing",
                    rule_table.name, dep.rule, table.name
                ))
            })?;
            let compiled = compile_rule(catalog, &rule_table, &rule.name, &rule.expr)?;
            resources = resources.merge(read_dependencies(catalog, &compiled.dependencies)?);

            let mut path = vec![rule_table.clone()];
            for hop in &dep.chain {
                path.push(catalog.table_by_id(hop.target_table())?.clone());
            }
            referencing.push(ReferencingRule {
                rule: compiled,
                chain: dep.chain.clone(),
                path,
            });
        }

        debug!(
            table = %table.name,
            own = own.len(),
            referencing = referencing.len(),
            "compiled rule checks"
        );
        Ok((
            Self {
                table: table.clone(),
                foreign_keys,
                reverse_keys,
                own,
                referencing,
            },
            resources,
        ))
    }

    pub fn check(&self, res: &Resources<'_>, changes: &[RowChange]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        for change in changes {
            res.check_cancelled()?;
            self.check_keys(res, change)?;
        }
        for change in changes {
            if let Some(row) = change.after() {
                for rule in &self.own {
                    check_rule(rule, row, res, false)?;
                }
            }
        }
        for referencing in &self.referencing {
            for row in referencing.affected_rows(res, changes)? {
                check_rule(&referencing.rule, &row, res, true)?;
            }
        }
        Ok(())
    }

    fn check_keys(&self, res: &Resources<'_>, change: &RowChange) -> Result<()> {
        if let Some(row) = change.after() {
            for check in &self.foreign_keys {
                let value = &row[check.key_index];
                let unchanged = change
                    .before()
                    .map_or(false, |before| &before[check.key_index] == value);
                if value.is_null() || unchanged {
                    continue;
                }
                check_foreign_key(res, &self.table, &check.foreign_key, &check.target, value)?;
            }
        }
        if let RowChange::Deleted(row) = change {
            for check in &self.reverse_keys {
                let value = &row[check.key_index];
                if value.is_null() {
                    continue;
                }
                let children = res.lookup(&check.child, &check.reverse_key.ref_column, value)?;
                if !children.is_empty() {
                    let name = format!("{}.{}", check.child.name, check.reverse_key.foreign_key);
                    warn!(foreign_key = %name, %value, "delete of referenced row");
                    return Err(Error::rule(
                        name.clone(),
                        format!("Cannot delete record referenced by foreign key '{}'.", name),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl ReferencingRule {
    /// Rows of the rule table that reach a changed row through the chain
    fn affected_rows(&self, res: &Resources<'_>, changes: &[RowChange]) -> Result<Vec<Row>> {
        let mut rows: Vec<Row> = changes
            .iter()
            .flat_map(|c| c.before().into_iter().chain(c.after()))
            .cloned()
            .collect();
        for i in (0..self.chain.len()).rev() {
            rows = step_back(res, &self.chain[i], &self.path[i], &self.path[i + 1], &rows)?;
            if rows.is_empty() {
                break;
            }
        }
        Ok(rows)
    }
}

/// Rows of `source` whose hop leads to one of the `target` rows
fn step_back(
    res: &Resources<'_>,
    hop: &Ref,
    source: &MaterializedTable,
    target: &MaterializedTable,
    rows: &[Row],
) -> Result<Vec<Row>> {
    let key_index = column_position(target, hop.target_column())?;
    let mut positions: BTreeSet<RowId> = BTreeSet::new();
    for row in rows {
        res.check_cancelled()?;
        let key = &row[key_index];
        if !key.is_null() {
            positions.extend(res.lookup(source, hop.source_column(), key)?);
        }
    }
    let reader = res.seekable(source, 0)?;
    let mut found = Vec::with_capacity(positions.len());
    for pos in positions {
        if let Some(row) = reader.get_at(pos)? {
            found.push(row);
        }
    }
    Ok(found)
}

/// Fails unless `value` is a key of the table `foreign_key` points at
pub(crate) fn check_foreign_key(
    res: &Resources<'_>,
    table: &MaterializedTable,
    foreign_key: &ForeignKey,
    target: &MaterializedTable,
    value: &Value,
) -> Result<()> {
    if value.is_null() || !res.lookup(target, &foreign_key.ref_column, value)?.is_empty() {
        return Ok(());
    }
    warn!(foreign_key = %foreign_key.name, %value, "foreign key violation");
    Err(Error::rule(
        format!("{}.{}", table.name, foreign_key.name),
        format!("Foreign key violation, value '{}' not present.", value),
    ))
}

pub(crate) fn check_rule(
    rule: &CompiledRule,
    row: &[Value],
    res: &Resources<'_>,
    referencing: bool,
) -> Result<()> {
    let value = rule.check.value(row, res, EvalContext::new())?;
    if value.as_bool() != Some(false) {
        return Ok(());
    }
    let name = rule.qualified_name();
    warn!(rule = %name, referencing, "rule violation");
    let message = if referencing {
        format!("Referencing constraint check {} failed.", name)
    } else {
        format!("Constraint check {} failed.", name)
    };
    Err(Error::rule(name, message))
}
