//! Tables reached through foreign keys, reverse foreign keys and views
//!
//! A dotted identifier such as `fk_a.fk_b.c` is resolved hop by hop. Each hop
//! looks at the foreign keys, then the reverse foreign keys, then the views of
//! the table reached so far, and extends the reference chain. The chain is the
//! identity of the dependency edge the resulting column records.

use std::sync::Arc;

use super::column::{ColumnMeta, IndexColumn};
use super::compiler::compile_view;
use super::dependencies::TableDependencies;
use super::table::{SelectPlan, VecReader};
use crate::catalog::{
    Catalog, ForeignKey, MaterializedTable, Ref, RefChain, ReverseForeignKey, TableId,
};
use crate::error::{Error, Result, Span};
use crate::executor::context::{EvalContext, Resources};
use crate::storage::{IterableTableReader, Row, RowId, SeekableTableReader, Value};

/// Longest reference chain a single identifier may build
const MAX_CHAIN_DEPTH: usize = 16;

/// One row of `table` per referencing row, looked up by primary key
#[derive(Debug, Clone)]
pub struct ReferencedSimpleTable {
    pub parent: Option<Arc<ReferencedTable>>,
    pub foreign_key: ForeignKey,
    /// Position of the foreign key column in the referencing row
    pub key_index: usize,
    pub table: Arc<MaterializedTable>,
    /// Position of the primary key in the referenced row
    pub target_key_index: usize,
    pub chain: RefChain,
}

/// All rows of `table` pointing at the owner row
#[derive(Debug, Clone)]
pub struct ReferencedMultiTable {
    pub reverse_key: ReverseForeignKey,
    /// Position of the owner's primary key in the owner row
    pub key_index: usize,
    pub table: Arc<MaterializedTable>,
    pub chain: RefChain,
}

/// A view evaluated for the row at the end of `parent`
#[derive(Debug, Clone)]
pub struct ReferencedRefTable {
    pub parent: Option<Arc<ReferencedTable>>,
    pub name: String,
    pub view: Arc<SelectPlan>,
    pub chain: RefChain,
}

#[derive(Debug, Clone)]
pub enum ReferencedTable {
    Simple(ReferencedSimpleTable),
    Multi(ReferencedMultiTable),
    Ref(ReferencedRefTable),
}

impl ReferencedTable {
    /// Foreign and reverse foreign keys used to reach this table
    pub fn foreign_key_chain(&self) -> &RefChain {
        match self {
            ReferencedTable::Simple(t) => &t.chain,
            ReferencedTable::Multi(t) => &t.chain,
            ReferencedTable::Ref(t) => &t.chain,
        }
    }

    pub fn width(&self) -> usize {
        match self {
            ReferencedTable::Simple(t) => t.table.column_count(),
            ReferencedTable::Multi(t) => t.table.column_count(),
            ReferencedTable::Ref(t) => t.view.columns.len(),
        }
    }

    fn parent_row(
        parent: &Option<Arc<ReferencedTable>>,
        row: &[Value],
        res: &Resources<'_>,
        ctx: EvalContext<'_>,
    ) -> Result<Row> {
        match parent {
            Some(parent) => parent.row(row, res, ctx),
            None => Ok(row.to_vec()),
        }
    }

    /// The single row this reference yields for `row`. A null key yields a
    /// row of nulls.
    pub fn row(&self, row: &[Value], res: &Resources<'_>, ctx: EvalContext<'_>) -> Result<Row> {
        match self {
            ReferencedTable::Simple(t) => {
                let source = Self::parent_row(&t.parent, row, res, ctx)?;
                let key = source.get(t.key_index).cloned().unwrap_or(Value::Null);
                if key.is_null() {
                    return Ok(vec![Value::Null; self.width()]);
                }
                let found = res.seekable(&t.table, t.target_key_index)?.get(&key)?;
                Ok(found.unwrap_or_else(|| vec![Value::Null; self.width()]))
            }
            ReferencedTable::Ref(t) => {
                let owner = Self::parent_row(&t.parent, row, res, ctx)?;
                let mut reader = t.view.table.reader(res, EvalContext::for_owner(&owner))?;
                let result = reader.next()?;
                reader.close();
                Ok(result.unwrap_or_else(|| vec![Value::Null; self.width()]))
            }
            ReferencedTable::Multi(t) => Err(Error::Internal(format!(
                "reference '{}' yields many rows",
                t.reverse_key.name
            ))),
        }
    }

    /// Rows this reference yields for the owner in `ctx`
    pub fn reader<'a>(
        &'a self,
        res: &'a Resources<'a>,
        ctx: EvalContext<'a>,
    ) -> Result<Box<dyn IterableTableReader + 'a>> {
        match self {
            ReferencedTable::Multi(t) => t.reader(res, ctx),
            _ => {
                let owner = ctx.owner.unwrap_or(&[]);
                let row = self.row(owner, res, ctx)?;
                Ok(Box::new(VecReader::new(vec![row])))
            }
        }
    }
}

impl ReferencedMultiTable {
    /// Rows of the referencing table pointing at the owner in `ctx`
    pub fn reader<'a>(
        &'a self,
        res: &'a Resources<'a>,
        ctx: EvalContext<'a>,
    ) -> Result<Box<dyn IterableTableReader + 'a>> {
        let owner = ctx.owner.ok_or_else(|| {
            Error::Internal(format!(
                "reference '{}' evaluated without an owner row",
                self.reverse_key.name
            ))
        })?;
        let key = owner.get(self.key_index).cloned().unwrap_or(Value::Null);
        let positions = if key.is_null() {
            Vec::new()
        } else {
            res.lookup(&self.table, &self.reverse_key.ref_column, &key)?
        };
        let child_key = self
            .table
            .column_index(&self.reverse_key.ref_column)
            .unwrap_or_default();
        Ok(Box::new(PositionReader {
            positions: positions.into_iter(),
            rows: res.seekable(&self.table, child_key)?,
            res,
        }))
    }
}

/// Reads rows at a fixed list of positions
struct PositionReader<'a> {
    positions: std::vec::IntoIter<RowId>,
    rows: Box<dyn SeekableTableReader>,
    res: &'a Resources<'a>,
}

impl IterableTableReader for PositionReader<'_> {
    fn next(&mut self) -> Result<Option<Row>> {
        for pos in self.positions.by_ref() {
            self.res.check_cancelled()?;
            if let Some(row) = self.rows.get_at(pos)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.positions = Vec::new().into_iter();
    }
}

/// Resolves `name` as a foreign key, reverse foreign key or view of `table`
pub fn resolve_ref(
    catalog: &Catalog,
    table: &Arc<MaterializedTable>,
    name: &str,
    parent: Option<Arc<ReferencedTable>>,
    chain: &RefChain,
    root: TableId,
    span: Span,
) -> Result<Option<ReferencedTable>> {
    let extend = |hop: Ref| -> Result<RefChain> {
        if chain.len() >= MAX_CHAIN_DEPTH {
            return Err(Error::model_at(
                format!("Reference chain through '{}' is too deep.", name),
                span,
            ));
        }
        let mut chain = chain.clone();
        chain.push(hop);
        Ok(chain)
    };
    let position = |t: &MaterializedTable, column: &str| {
        t.column_index(column).ok_or_else(|| {
            Error::Internal(format!("column {} missing in table {}", column, t.name))
        })
    };

    if let Some(fk) = table.foreign_keys.get(name) {
        let target = catalog.table_by_id(fk.ref_table)?.clone();
        return Ok(Some(ReferencedTable::Simple(ReferencedSimpleTable {
            parent,
            foreign_key: fk.clone(),
            key_index: position(table, &fk.column)?,
            target_key_index: position(&target, &fk.ref_column)?,
            table: target,
            chain: extend(Ref::Foreign(fk.clone()))?,
        })));
    }
    if let Some(rev) = table.reverse_foreign_keys.get(name) {
        let child = catalog.table_by_id(rev.ref_table)?.clone();
        return Ok(Some(ReferencedTable::Multi(ReferencedMultiTable {
            reverse_key: rev.clone(),
            key_index: position(table, &rev.column)?,
            table: child,
            chain: extend(Ref::Reverse(rev.clone()))?,
        })));
    }
    if let Some(view) = table.views.get(name) {
        let plan = compile_view(catalog, table, view, chain, root)?;
        return Ok(Some(ReferencedTable::Ref(ReferencedRefTable {
            parent,
            name: name.to_string(),
            view: Arc::new(plan),
            chain: chain.clone(),
        })));
    }
    Ok(None)
}

/// Where a path is being resolved
pub struct PathStart<'a> {
    pub catalog: &'a Catalog,
    pub table: Arc<MaterializedTable>,
    pub root: TableId,
    pub chain: RefChain,
    pub span: Span,
}

/// Resolves the segments of a dotted identifier starting at `start.table`.
/// `Ok(None)` means the first segment names nothing in that table.
pub fn resolve_path(start: PathStart<'_>, parts: &[String]) -> Result<Option<ColumnMeta>> {
    let PathStart {
        catalog,
        mut table,
        root,
        mut chain,
        span,
    } = start;
    let mut parent: Option<Arc<ReferencedTable>> = None;
    let mut rest = parts;

    loop {
        let head = rest[0].as_str();
        let first = rest.len() == parts.len();

        if rest.len() == 1 {
            let Some(column) = table.column(head) else {
                if first {
                    return Ok(None);
                }
                return Err(Error::model_at(
                    format!("Column '{}' not found in table '{}'.", head, table.name),
                    span,
                ));
            };
            let mut dependencies = TableDependencies::new();
            dependencies.add_read(root, &chain);
            return Ok(Some(ColumnMeta::Index(IndexColumn {
                name: parts.join("."),
                index: column.index,
                offset: 0,
                data_type: column.data_type.clone(),
                reference: parent,
                dependencies,
            })));
        }

        let reference = if table.column(head).is_some() {
            None
        } else {
            resolve_ref(catalog, &table, head, parent.clone(), &chain, root, span)?
        };
        let Some(reference) = reference else {
            if first {
                return Ok(None);
            }
            return Err(Error::model_at(
                format!("Reference '{}' not found in table '{}'.", head, table.name),
                span,
            ));
        };

        match reference {
            ReferencedTable::Simple(simple) => {
                table = simple.table.clone();
                chain = simple.chain.clone();
                parent = Some(Arc::new(ReferencedTable::Simple(simple)));
                rest = &rest[1..];
            }
            ReferencedTable::Multi(multi) => {
                return Err(Error::model_at(
                    format!(
                        "Reference '{}' yields many rows of table '{}' and can only be aggregated in a view.",
                        multi.reverse_key.name, multi.table.name
                    ),
                    span,
                ));
            }
            ReferencedTable::Ref(view) => {
                let name = &rest[1];
                if rest.len() > 2 {
                    return Err(Error::model_at(
                        format!("Reference '{}' not found in table '{}'.", name, view.name),
                        span,
                    ));
                }
                let Some(index) = view.view.columns.iter().position(|c| &c.name == name) else {
                    return Err(Error::model_at(
                        format!("Column '{}' not found in table '{}'.", name, view.name),
                        span,
                    ));
                };
                let mut dependencies = view.view.dependencies.clone();
                dependencies.add_read(root, &chain);
                return Ok(Some(ColumnMeta::Index(IndexColumn {
                    name: parts.join("."),
                    index,
                    offset: 0,
                    data_type: view.view.columns[index].data_type.clone(),
                    reference: Some(Arc::new(ReferencedTable::Ref(view))),
                    dependencies,
                })));
            }
        }
    }
}
