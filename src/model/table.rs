//! Compiled table plans
//!
//! A [`TableMeta`] is built fresh for every statement and streams its rows
//! through [`IterableTableReader`]s. Filters, projections and joins stream;
//! sorting and aggregation consume their input first.

use std::cmp::Ordering;
use std::sync::Arc;

use indexmap::IndexMap;

use super::column::{AggrColumn, ColumnMeta};
use super::dependencies::TableDependencies;
use super::functions::Aggregator;
use super::references::ReferencedTable;
use crate::catalog::{DataType, MaterializedTable};
use crate::error::{Error, Result};
use crate::executor::context::{EvalContext, Resources};
use crate::sql::ast::JoinType;
use crate::storage::{IterableTableReader, Row, Value};

/// Name and type of a result column
#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    pub name: String,
    pub data_type: DataType,
}

/// A compiled SELECT or view
#[derive(Debug, Clone)]
pub struct SelectPlan {
    pub table: TableMeta,
    pub columns: Vec<OutputColumn>,
    pub dependencies: TableDependencies,
}

#[derive(Debug, Clone)]
pub enum DerivedKind {
    Filter(ColumnMeta),
    Project(Vec<ColumnMeta>),
    /// Keys with their ascending flag
    Sort(Vec<(ColumnMeta, bool)>),
}

/// Stateless transformation of a source table
#[derive(Debug, Clone)]
pub struct DerivedTable {
    pub source: Box<TableMeta>,
    pub kind: DerivedKind,
}

/// A source tagged with its GROUP BY keys
#[derive(Debug, Clone)]
pub struct KeyValueTable {
    pub source: Box<TableMeta>,
    pub keys: Vec<ColumnMeta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggrKind {
    /// One output row per distinct key
    Grouped,
    /// Exactly one output row, even over no input
    Global,
}

/// Key columns followed by one slot per aggregate column
#[derive(Debug, Clone)]
pub struct AggrTable {
    pub kind: AggrKind,
    pub source: KeyValueTable,
    pub columns: Vec<AggrColumn>,
    pub having: Option<ColumnMeta>,
}

#[derive(Debug, Clone)]
pub struct JoinTable {
    pub left: Box<TableMeta>,
    pub right: Box<TableMeta>,
    pub join_type: JoinType,
    /// Evaluated against the left row followed by the right row
    pub condition: ColumnMeta,
}

#[derive(Debug, Clone)]
pub enum TableMeta {
    Materialized(Arc<MaterializedTable>),
    Referenced(ReferencedTable),
    Derived(DerivedTable),
    Aggr(AggrTable),
    Join(JoinTable),
}

impl TableMeta {
    pub fn derived(source: TableMeta, kind: DerivedKind) -> Self {
        TableMeta::Derived(DerivedTable {
            source: Box::new(source),
            kind,
        })
    }

    /// Number of values in each row
    pub fn width(&self) -> usize {
        match self {
            TableMeta::Materialized(t) => t.column_count(),
            TableMeta::Referenced(r) => r.width(),
            TableMeta::Derived(d) => match &d.kind {
                DerivedKind::Project(columns) => columns.len(),
                _ => d.source.width(),
            },
            TableMeta::Aggr(a) => a.source.keys.len() + a.columns.len(),
            TableMeta::Join(j) => j.left.width() + j.right.width(),
        }
    }

    pub fn reader<'a>(
        &'a self,
        res: &'a Resources<'a>,
        ctx: EvalContext<'a>,
    ) -> Result<Box<dyn IterableTableReader + 'a>> {
        match self {
            TableMeta::Materialized(table) => Ok(Box::new(ScanReader {
                inner: res.iterable(table)?,
                res,
            })),
            TableMeta::Referenced(reference) => reference.reader(res, ctx),
            TableMeta::Derived(derived) => {
                let source = derived.source.reader(res, ctx)?;
                match &derived.kind {
                    DerivedKind::Filter(predicate) => Ok(Box::new(FilterReader {
                        source,
                        predicate,
                        res,
                        ctx,
                    })),
                    DerivedKind::Project(columns) => Ok(Box::new(ProjectReader {
                        source,
                        columns,
                        res,
                        ctx,
                    })),
                    DerivedKind::Sort(keys) => Ok(Box::new(sort(source, keys, res, ctx)?)),
                }
            }
            TableMeta::Aggr(aggr) => Ok(Box::new(AggrReader {
                table: aggr,
                res,
                ctx,
                state: AggrState::NotStarted,
            })),
            TableMeta::Join(join) => Ok(Box::new(JoinReader {
                join,
                left: join.left.reader(res, ctx)?,
                current: None,
                right: None,
                matched: false,
                right_width: join.right.width(),
                res,
                ctx,
            })),
        }
    }
}

/// Reader over rows already in memory
pub struct VecReader {
    rows: std::vec::IntoIter<Row>,
}

impl VecReader {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl IterableTableReader for VecReader {
    fn next(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }

    fn close(&mut self) {
        self.rows = Vec::new().into_iter();
    }
}

struct ScanReader<'a> {
    inner: Box<dyn IterableTableReader>,
    res: &'a Resources<'a>,
}

impl IterableTableReader for ScanReader<'_> {
    fn next(&mut self) -> Result<Option<Row>> {
        self.res.check_cancelled()?;
        self.inner.next()
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

struct FilterReader<'a> {
    source: Box<dyn IterableTableReader + 'a>,
    predicate: &'a ColumnMeta,
    res: &'a Resources<'a>,
    ctx: EvalContext<'a>,
}

impl IterableTableReader for FilterReader<'_> {
    fn next(&mut self) -> Result<Option<Row>> {
        while let Some(row) = self.source.next()? {
            if self.predicate.test(&row, self.res, self.ctx)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.source.close();
    }
}

struct ProjectReader<'a> {
    source: Box<dyn IterableTableReader + 'a>,
    columns: &'a [ColumnMeta],
    res: &'a Resources<'a>,
    ctx: EvalContext<'a>,
}

impl IterableTableReader for ProjectReader<'_> {
    fn next(&mut self) -> Result<Option<Row>> {
        let Some(row) = self.source.next()? else {
            return Ok(None);
        };
        self.columns
            .iter()
            .map(|c| c.value(&row, self.res, self.ctx))
            .collect::<Result<Row>>()
            .map(Some)
    }

    fn close(&mut self) {
        self.source.close();
    }
}

fn sort(
    mut source: Box<dyn IterableTableReader + '_>,
    keys: &[(ColumnMeta, bool)],
    res: &Resources<'_>,
    ctx: EvalContext<'_>,
) -> Result<VecReader> {
    let mut rows = Vec::new();
    while let Some(row) = source.next()? {
        let key = keys
            .iter()
            .map(|(k, _)| k.value(&row, res, ctx))
            .collect::<Result<Vec<_>>>()?;
        rows.push((key, row));
    }
    source.close();
    rows.sort_by(|(a, _), (b, _)| {
        for ((x, y), (_, ascending)) in a.iter().zip(b).zip(keys) {
            let ordering = x.cmp(y);
            if ordering != Ordering::Equal {
                return if *ascending { ordering } else { ordering.reverse() };
            }
        }
        Ordering::Equal
    });
    Ok(VecReader::new(rows.into_iter().map(|(_, row)| row).collect()))
}

struct JoinReader<'a> {
    join: &'a JoinTable,
    left: Box<dyn IterableTableReader + 'a>,
    current: Option<Row>,
    right: Option<Box<dyn IterableTableReader + 'a>>,
    matched: bool,
    right_width: usize,
    res: &'a Resources<'a>,
    ctx: EvalContext<'a>,
}

impl IterableTableReader for JoinReader<'_> {
    fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if self.current.is_none() {
                let Some(left) = self.left.next()? else {
                    return Ok(None);
                };
                self.current = Some(left);
                self.right = Some(self.join.right.reader(self.res, self.ctx)?);
                self.matched = false;
            }
            let (Some(left), Some(right)) = (&self.current, self.right.as_mut()) else {
                return Err(Error::Internal("join reader lost its state".to_string()));
            };
            match right.next()? {
                Some(right_row) => {
                    let mut row = left.clone();
                    row.extend(right_row);
                    if self.join.condition.test(&row, self.res, self.ctx)? {
                        self.matched = true;
                        return Ok(Some(row));
                    }
                }
                None => {
                    self.right = None;
                    let left = self.current.take();
                    if self.join.join_type == JoinType::Left && !self.matched {
                        if let Some(mut row) = left {
                            row.extend(std::iter::repeat(Value::Null).take(self.right_width));
                            return Ok(Some(row));
                        }
                    }
                }
            }
        }
    }

    fn close(&mut self) {
        self.left.close();
        if let Some(right) = self.right.as_mut() {
            right.close();
        }
    }
}

/// Aggregation runs once, on the first `next` call
enum AggrState {
    NotStarted,
    Aggregating,
    Done(std::vec::IntoIter<Row>),
}

struct AggrReader<'a> {
    table: &'a AggrTable,
    res: &'a Resources<'a>,
    ctx: EvalContext<'a>,
    state: AggrState,
}

impl AggrTable {
    fn new_group(&self) -> Vec<Aggregator> {
        self.columns
            .iter()
            .map(|c| c.function.create(&c.data_type))
            .collect()
    }

    /// Consumes the source and returns one row per group
    fn aggregate(&self, res: &Resources<'_>, ctx: EvalContext<'_>) -> Result<Vec<Row>> {
        let mut groups: IndexMap<Vec<Value>, Vec<Aggregator>> = IndexMap::new();
        if self.kind == AggrKind::Global {
            groups.insert(Vec::new(), self.new_group());
        }

        let mut source = self.source.source.reader(res, ctx)?;
        while let Some(row) = source.next()? {
            let key = self
                .source
                .keys
                .iter()
                .map(|k| k.value(&row, res, ctx))
                .collect::<Result<Vec<_>>>()?;
            let group = groups.entry(key).or_insert_with(|| self.new_group());
            for (aggregator, column) in group.iter_mut().zip(&self.columns) {
                aggregator.update(&column.inner.value(&row, res, ctx)?)?;
            }
        }
        source.close();

        Ok(groups
            .into_iter()
            .map(|(mut key, group)| {
                key.extend(group.iter().map(Aggregator::finish));
                key
            })
            .collect())
    }
}

impl IterableTableReader for AggrReader<'_> {
    fn next(&mut self) -> Result<Option<Row>> {
        loop {
            match &mut self.state {
                AggrState::NotStarted => {
                    self.state = AggrState::Aggregating;
                    let rows = self.table.aggregate(self.res, self.ctx)?;
                    self.state = AggrState::Done(rows.into_iter());
                }
                AggrState::Aggregating => {
                    return Err(Error::Internal("aggregation re-entered".to_string()));
                }
                AggrState::Done(rows) => {
                    let Some(row) = rows.next() else {
                        return Ok(None);
                    };
                    if let Some(having) = &self.table.having {
                        if !having.test(&row, self.res, self.ctx)? {
                            continue;
                        }
                    }
                    return Ok(Some(row));
                }
            }
        }
    }

    fn close(&mut self) {
        self.state = AggrState::Done(Vec::new().into_iter());
    }
}
