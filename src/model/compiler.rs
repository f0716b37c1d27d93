//! Expression and select compiler
//!
//! Turns statement trees into [`ColumnMeta`] and [`TableMeta`] plans. All
//! checks that do not need row data happen here: identifier resolution,
//! operator typing, aggregate placement and view shape.

use std::sync::Arc;

use super::column::{AggrColumn, ColumnMeta, DerivedColumn, DerivedKind, IndexColumn};
use super::dependencies::TableDependencies;
use super::functions::{AggregateFunction, Function};
use super::references::{resolve_path, PathStart, ReferencedMultiTable, ReferencedTable};
use super::table::{
    AggrKind, AggrTable, DerivedKind as TableKind, JoinTable, KeyValueTable, OutputColumn,
    SelectPlan, TableMeta,
};
use crate::catalog::{Catalog, DataType, MaterializedTable, Ref, RefChain, TableId, ViewDef};
use crate::error::{Error, Result};
use crate::sql::ast::{
    BinaryOperator, Expr, FromClause, Ident, OrderByItem, SelectItem, SelectStatement,
    UnaryOperator,
};

/// Where the rows a binding exposes come from
#[derive(Debug, Clone)]
pub enum BindingSource {
    /// A materialized table, possibly reached through references
    Table {
        table: Arc<MaterializedTable>,
        root: TableId,
        chain: RefChain,
    },
    /// Result columns of a subquery
    Columns(Vec<OutputColumn>),
}

/// A named source visible to expressions
#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    /// Start of this source's values in the evaluated row
    pub offset: usize,
    pub source: BindingSource,
}

impl Binding {
    pub fn table(table: &Arc<MaterializedTable>) -> Self {
        Self {
            name: table.name.clone(),
            offset: 0,
            source: BindingSource::Table {
                table: table.clone(),
                root: table.id,
                chain: Vec::new(),
            },
        }
    }

    fn display_name(&self) -> &str {
        match &self.source {
            BindingSource::Table { table, .. } => &table.name,
            BindingSource::Columns(_) => &self.name,
        }
    }
}

/// Identifiers visible while compiling one expression
pub struct Scope<'c> {
    catalog: &'c Catalog,
    bindings: Vec<Binding>,
    /// Named in errors when nothing is bound
    fallback: String,
}

impl<'c> Scope<'c> {
    pub fn new(catalog: &'c Catalog, bindings: Vec<Binding>) -> Self {
        Self {
            catalog,
            bindings,
            fallback: String::new(),
        }
    }

    /// Scope with no columns, for literal-only expressions
    pub fn empty(catalog: &'c Catalog, fallback: &str) -> Self {
        Self {
            catalog,
            bindings: Vec::new(),
            fallback: fallback.to_string(),
        }
    }

    pub fn for_table(catalog: &'c Catalog, table: &Arc<MaterializedTable>) -> Self {
        Self::new(catalog, vec![Binding::table(table)])
    }

    pub fn catalog(&self) -> &'c Catalog {
        self.catalog
    }

    fn into_bindings(self) -> Vec<Binding> {
        self.bindings
    }

    /// Resolves a column or a path through references. Bindings are tried in
    /// order; a qualifier naming a binding restricts the lookup to it.
    pub fn column(&self, ident: &Ident) -> Result<ColumnMeta> {
        if !ident.is_simple() {
            if let Some(binding) = self.bindings.iter().find(|b| b.name == ident.head()) {
                let tail = ident.tail();
                return self
                    .resolve_in(binding, &tail)?
                    .ok_or_else(|| self.not_found(&tail, binding.display_name()));
            }
        }
        for binding in &self.bindings {
            if let Some(column) = self.resolve_in(binding, ident)? {
                return Ok(column);
            }
        }
        let table = self
            .bindings
            .first()
            .map(|b| b.display_name())
            .unwrap_or(&self.fallback);
        Err(self.not_found(ident, table))
    }

    fn not_found(&self, ident: &Ident, table: &str) -> Error {
        let message = if ident.is_simple() {
            format!("Column '{}' not found in table '{}'.", ident, table)
        } else {
            format!("Reference '{}' not found in table '{}'.", ident.head(), table)
        };
        Error::model_at(message, ident.span)
    }

    fn resolve_in(&self, binding: &Binding, ident: &Ident) -> Result<Option<ColumnMeta>> {
        let column = match &binding.source {
            BindingSource::Columns(columns) if ident.is_simple() => columns
                .iter()
                .position(|c| c.name == ident.head())
                .map(|index| {
                    ColumnMeta::Index(IndexColumn {
                        name: ident.to_string(),
                        index,
                        offset: 0,
                        data_type: columns[index].data_type.clone(),
                        reference: None,
                        dependencies: TableDependencies::new(),
                    })
                }),
            BindingSource::Columns(_) => None,
            BindingSource::Table { table, root, chain } => resolve_path(
                PathStart {
                    catalog: self.catalog,
                    table: table.clone(),
                    root: *root,
                    chain: chain.clone(),
                    span: ident.span,
                },
                &ident.parts,
            )?,
        };
        Ok(column.map(|mut c| {
            c.shift(binding.offset);
            c
        }))
    }

    /// Every column of every binding, for `SELECT *`
    fn wildcard(&self) -> Vec<(String, ColumnMeta)> {
        let mut out = Vec::new();
        for binding in &self.bindings {
            let names: Vec<(String, DataType)> = match &binding.source {
                BindingSource::Table { table, .. } => table
                    .columns()
                    .iter()
                    .map(|c| (c.name.clone(), c.data_type.clone()))
                    .collect(),
                BindingSource::Columns(columns) => columns
                    .iter()
                    .map(|c| (c.name.clone(), c.data_type.clone()))
                    .collect(),
            };
            for (index, (name, data_type)) in names.into_iter().enumerate() {
                let mut dependencies = TableDependencies::new();
                if let BindingSource::Table { root, chain, .. } = &binding.source {
                    dependencies.add_read(*root, chain);
                }
                out.push((
                    name.clone(),
                    ColumnMeta::Index(IndexColumn {
                        name,
                        index,
                        offset: binding.offset,
                        data_type,
                        reference: None,
                        dependencies,
                    }),
                ));
            }
        }
        out
    }
}

/// GROUP BY keys and the aggregates registered while compiling the
/// projection of an aggregating select
#[derive(Debug, Default)]
pub struct Grouping {
    keys: Vec<(String, ColumnMeta)>,
    aggregates: Vec<AggrColumn>,
}

fn mismatch(expected: &DataType, got: &DataType, expr: &Expr) -> Error {
    Error::model_at(
        format!(
            "Expected '{}' but got '{}' for '{}'.",
            expected, got, expr
        ),
        expr.span(),
    )
}

/// Predicates must be boolean; the NULL literal is accepted
pub fn expect_boolean(column: &ColumnMeta, expr: &Expr) -> Result<()> {
    match column.data_type() {
        DataType::Boolean | DataType::Null => Ok(()),
        other => Err(mismatch(&DataType::Boolean, other, expr)),
    }
}

fn binary_type(
    op: BinaryOperator,
    left: &ColumnMeta,
    left_expr: &Expr,
    right: &ColumnMeta,
    right_expr: &Expr,
) -> Result<DataType> {
    let (l, r) = (left.data_type(), right.data_type());
    if op.is_logical() {
        for (t, e) in [(l, left_expr), (r, right_expr)] {
            if !matches!(t, DataType::Boolean | DataType::Null) {
                return Err(mismatch(&DataType::Boolean, t, e));
            }
        }
        return Ok(DataType::Boolean);
    }
    if op.is_comparison() {
        if *r == DataType::Null {
            return Err(mismatch(l, r, right_expr));
        }
        if *l == DataType::Null {
            return Err(mismatch(r, l, left_expr));
        }
        if !l.is_comparable_with(r) {
            return Err(mismatch(l, r, right_expr));
        }
        return Ok(DataType::Boolean);
    }

    let concat = op == BinaryOperator::Add;
    match (l, r) {
        (DataType::Null, DataType::Null) => Ok(DataType::Null),
        (DataType::Null, t) | (t, DataType::Null) if t.is_numeric() => Ok(t.clone()),
        (DataType::Null, t) | (t, DataType::Null) if concat && t.is_string() => {
            Ok(DataType::Varchar)
        }
        (a, b) if a.is_numeric() && b.is_numeric() => Ok(a.numeric_result(b)),
        (a, b) if concat && a.is_string() && b.is_string() => Ok(DataType::Varchar),
        (a, _) if !(a.is_numeric() || (concat && a.is_string())) => {
            Err(mismatch(&DataType::Float, a, left_expr))
        }
        _ => Err(mismatch(l, r, right_expr)),
    }
}

fn is_aggregate_call(name: &Ident) -> bool {
    AggregateFunction::lookup(&name.to_string()).is_some()
}

/// Does the expression call an aggregator anywhere?
pub fn contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Ident(_) | Expr::Literal { .. } => false,
        Expr::BinaryOp { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
        Expr::UnaryOp { expr, .. } | Expr::IsNull { expr, .. } => contains_aggregate(expr),
        Expr::Function { name, args, .. } => {
            is_aggregate_call(name) || args.iter().any(contains_aggregate)
        }
    }
}

/// Compiles an expression. With `grouping`, identifiers must match a GROUP
/// BY key and aggregators register an output slot; without it aggregators
/// are rejected.
pub fn compile_expr(
    scope: &Scope<'_>,
    expr: &Expr,
    mut grouping: Option<&mut Grouping>,
) -> Result<ColumnMeta> {
    if let Some(g) = grouping.as_deref_mut() {
        let text = expr.to_string();
        if let Some(index) = g.keys.iter().position(|(k, _)| *k == text) {
            let key = &g.keys[index].1;
            return Ok(ColumnMeta::Index(IndexColumn {
                name: text,
                index,
                offset: 0,
                data_type: key.data_type().clone(),
                reference: None,
                dependencies: key.dependencies(),
            }));
        }
    }

    match expr {
        Expr::Literal { value, .. } => Ok(ColumnMeta::literal(value.clone())),
        Expr::Ident(ident) => match grouping {
            Some(_) => Err(Error::model_at(
                format!(
                    "Column '{}' must appear in GROUP BY or be used in an aggregate function.",
                    ident
                ),
                ident.span,
            )),
            None => scope.column(ident),
        },
        Expr::Function { name, args, span } => {
            if let Some(function) = AggregateFunction::lookup(&name.to_string()) {
                let Some(g) = grouping else {
                    return Err(Error::model_at("Aggregators are not allowed here.", *span));
                };
                if args.len() != 1 {
                    return Err(Error::model_at(
                        format!(
                            "Invalid number of arguments for aggregator '{}'.",
                            function.name()
                        ),
                        *span,
                    ));
                }
                let inner = compile_expr(scope, &args[0], None)?;
                let data_type = function.result_type(inner.data_type(), *span)?;
                let column = AggrColumn {
                    function,
                    inner: Box::new(inner),
                    index: g.keys.len() + g.aggregates.len(),
                    data_type,
                };
                g.aggregates.push(column.clone());
                return Ok(ColumnMeta::Aggr(column));
            }

            let function = Function::lookup(&name.to_string()).ok_or_else(|| {
                Error::model_at(format!("Function '{}' not found.", name), *span)
            })?;
            let mut compiled = Vec::with_capacity(args.len());
            for arg in args {
                compiled.push(compile_expr(scope, arg, grouping.as_deref_mut())?);
            }
            let types: Vec<DataType> = compiled.iter().map(|c| c.data_type().clone()).collect();
            let data_type = function.result_type(&types, *span)?;
            Ok(ColumnMeta::Derived(DerivedColumn {
                kind: DerivedKind::Function(function),
                args: compiled,
                data_type,
            }))
        }
        Expr::BinaryOp {
            left, op, right, ..
        } => {
            let l = compile_expr(scope, left, grouping.as_deref_mut())?;
            let r = compile_expr(scope, right, grouping.as_deref_mut())?;
            let data_type = binary_type(*op, &l, left, &r, right)?;
            Ok(ColumnMeta::Derived(DerivedColumn {
                kind: DerivedKind::Binary(*op),
                args: vec![l, r],
                data_type,
            }))
        }
        Expr::UnaryOp { op, expr: inner, .. } => {
            let operand = compile_expr(scope, inner, grouping)?;
            let data_type = match (op, operand.data_type()) {
                (UnaryOperator::Not, DataType::Boolean | DataType::Null) => DataType::Boolean,
                (UnaryOperator::Not, t) => return Err(mismatch(&DataType::Boolean, t, inner)),
                (UnaryOperator::Minus, t) if t.is_numeric() || *t == DataType::Null => t.clone(),
                (UnaryOperator::Minus, t) => return Err(mismatch(&DataType::Float, t, inner)),
            };
            Ok(ColumnMeta::Derived(DerivedColumn {
                kind: DerivedKind::Unary(*op),
                args: vec![operand],
                data_type,
            }))
        }
        Expr::IsNull {
            expr: inner,
            negated,
            ..
        } => {
            let operand = compile_expr(scope, inner, grouping)?;
            Ok(ColumnMeta::Derived(DerivedColumn {
                kind: DerivedKind::IsNull { negated: *negated },
                args: vec![operand],
                data_type: DataType::Boolean,
            }))
        }
    }
}

/// Alias, else the last segment of an identifier, else the expression text
fn output_name(expr: &Expr, alias: &Option<String>) -> String {
    match (alias, expr) {
        (Some(alias), _) => alias.clone(),
        (None, Expr::Ident(ident)) => ident.last().to_string(),
        (None, expr) => expr.to_string(),
    }
}

/// ORDER BY may name a result column
fn order_key(
    scope: &Scope<'_>,
    columns: &[(String, ColumnMeta)],
    item: &OrderByItem,
    grouping: Option<&mut Grouping>,
) -> Result<ColumnMeta> {
    if let Expr::Ident(ident) = &item.expr {
        if let Some((_, column)) = columns.iter().find(|(name, _)| *name == ident.to_string()) {
            return Ok(column.clone());
        }
    }
    compile_expr(scope, &item.expr, grouping)
}

pub fn compile_select(catalog: &Catalog, select: &SelectStatement) -> Result<SelectPlan> {
    let (source, bindings, dependencies) = compile_from(catalog, &select.from)?;
    let scope = Scope::new(catalog, bindings);
    compile_select_body(&scope, source, dependencies, select)
}

fn compile_from(
    catalog: &Catalog,
    from: &FromClause,
) -> Result<(TableMeta, Vec<Binding>, TableDependencies)> {
    match from {
        FromClause::Table { name, alias } => {
            let table = catalog
                .table(&name.to_string())
                .map_err(|e| e.or_at(name.span))?;
            let mut dependencies = TableDependencies::new();
            dependencies.add_read(table.id, &[]);
            let mut binding = Binding::table(&table);
            if let Some(alias) = alias {
                binding.name = alias.clone();
            }
            Ok((TableMeta::Materialized(table), vec![binding], dependencies))
        }
        FromClause::Subquery { select, alias } => {
            let plan = compile_select(catalog, select)?;
            let binding = Binding {
                name: alias.clone().unwrap_or_else(|| "subquery".to_string()),
                offset: 0,
                source: BindingSource::Columns(plan.columns.clone()),
            };
            Ok((plan.table, vec![binding], plan.dependencies))
        }
        FromClause::Join {
            left,
            right,
            join_type,
            condition,
        } => {
            let (left, mut bindings, left_deps) = compile_from(catalog, left)?;
            let (right, right_bindings, right_deps) = compile_from(catalog, right)?;
            let width = left.width();
            bindings.extend(right_bindings.into_iter().map(|mut b| {
                b.offset += width;
                b
            }));
            let scope = Scope::new(catalog, bindings);
            let compiled = compile_expr(&scope, condition, None)?;
            expect_boolean(&compiled, condition)?;
            let dependencies = left_deps
                .merged(&right_deps)
                .merged(&compiled.dependencies());
            let table = TableMeta::Join(JoinTable {
                left: Box::new(left),
                right: Box::new(right),
                join_type: *join_type,
                condition: compiled,
            });
            Ok((table, scope.into_bindings(), dependencies))
        }
    }
}

fn compile_select_body(
    scope: &Scope<'_>,
    source: TableMeta,
    mut dependencies: TableDependencies,
    select: &SelectStatement,
) -> Result<SelectPlan> {
    let mut table = source;
    if let Some(filter) = &select.where_clause {
        let predicate = compile_expr(scope, filter, None)?;
        expect_boolean(&predicate, filter)?;
        dependencies.merge(&predicate.dependencies());
        table = TableMeta::derived(table, TableKind::Filter(predicate));
    }

    let aggregating = !select.group_by.is_empty()
        || select.having.is_some()
        || select.columns.iter().any(|item| match item {
            SelectItem::Expr { expr, .. } => contains_aggregate(expr),
            SelectItem::Wildcard => false,
        });

    let mut columns: Vec<(String, ColumnMeta)> = Vec::new();
    let mut order = Vec::new();
    if aggregating {
        let mut grouping = Grouping::default();
        for key in &select.group_by {
            let compiled = compile_expr(scope, key, None)?;
            grouping.keys.push((key.to_string(), compiled));
        }
        for item in &select.columns {
            match item {
                SelectItem::Wildcard => {
                    return Err(Error::model_at(
                        "Column '*' must appear in GROUP BY or be used in an aggregate function.",
                        select.span,
                    ))
                }
                SelectItem::Expr { expr, alias } => {
                    let compiled = compile_expr(scope, expr, Some(&mut grouping))?;
                    columns.push((output_name(expr, alias), compiled));
                }
            }
        }
        let having = match &select.having {
            Some(expr) => {
                let compiled = compile_expr(scope, expr, Some(&mut grouping))?;
                expect_boolean(&compiled, expr)?;
                Some(compiled)
            }
            None => None,
        };
        for item in &select.order_by {
            let key = order_key(scope, &columns, item, Some(&mut grouping))?;
            order.push((key, item.ascending));
        }

        let Grouping { keys, aggregates } = grouping;
        let keys: Vec<ColumnMeta> = keys.into_iter().map(|(_, c)| c).collect();
        for column in keys.iter().chain(aggregates.iter().map(|a| a.inner.as_ref())) {
            dependencies.merge(&column.dependencies());
        }
        if let Some(having) = &having {
            dependencies.merge(&having.dependencies());
        }
        let kind = if select.group_by.is_empty() {
            AggrKind::Global
        } else {
            AggrKind::Grouped
        };
        table = TableMeta::Aggr(AggrTable {
            kind,
            source: KeyValueTable {
                source: Box::new(table),
                keys,
            },
            columns: aggregates,
            having,
        });
    } else {
        for item in &select.columns {
            match item {
                SelectItem::Wildcard => columns.extend(scope.wildcard()),
                SelectItem::Expr { expr, alias } => {
                    let compiled = compile_expr(scope, expr, None)?;
                    columns.push((output_name(expr, alias), compiled));
                }
            }
        }
        for item in &select.order_by {
            let key = order_key(scope, &columns, item, None)?;
            order.push((key, item.ascending));
        }
    }

    for (key, _) in &order {
        dependencies.merge(&key.dependencies());
    }
    if !order.is_empty() {
        table = TableMeta::derived(table, TableKind::Sort(order));
    }

    let mut outputs = Vec::with_capacity(columns.len());
    let mut projection = Vec::with_capacity(columns.len());
    for (name, column) in columns {
        dependencies.merge(&column.dependencies());
        outputs.push(OutputColumn {
            name,
            data_type: column.data_type().clone(),
        });
        projection.push(column);
    }
    Ok(SelectPlan {
        table: TableMeta::derived(table, TableKind::Project(projection)),
        columns: outputs,
        dependencies,
    })
}

/// Compiles a view of `owner` reached from `root` through `chain`. The view
/// aggregates the rows of one reverse foreign key of its owner.
pub fn compile_view(
    catalog: &Catalog,
    owner: &Arc<MaterializedTable>,
    view: &ViewDef,
    chain: &RefChain,
    root: TableId,
) -> Result<SelectPlan> {
    let select = &view.select;
    let shape_error = || {
        Error::model_at(
            format!(
                "View '{}' must be a global aggregate over a reverse foreign key of table '{}'.",
                view.name, owner.name
            ),
            select.span,
        )
    };
    let FromClause::Table { name, alias } = &select.from else {
        return Err(shape_error());
    };
    let aggregates = select.columns.iter().all(|item| match item {
        SelectItem::Expr { expr, .. } => contains_aggregate(expr),
        SelectItem::Wildcard => false,
    });
    if !select.group_by.is_empty() || select.columns.is_empty() || !aggregates {
        return Err(shape_error());
    }
    let rev = owner
        .reverse_foreign_keys
        .get(&name.to_string())
        .ok_or_else(|| {
            Error::model_at(
                format!("Reference '{}' not found in table '{}'.", name, owner.name),
                name.span,
            )
        })?;
    let key_index = owner.column_index(&rev.column).ok_or_else(|| {
        Error::Internal(format!("column {} missing in table {}", rev.column, owner.name))
    })?;
    let child = catalog.table_by_id(rev.ref_table)?.clone();

    let mut child_chain = chain.clone();
    child_chain.push(Ref::Reverse(rev.clone()));
    let mut dependencies = TableDependencies::new();
    dependencies.add_read(root, chain);
    dependencies.add_reference(&child_chain);

    let source = TableMeta::Referenced(ReferencedTable::Multi(ReferencedMultiTable {
        reverse_key: rev.clone(),
        key_index,
        table: child.clone(),
        chain: child_chain.clone(),
    }));
    let binding = Binding {
        name: alias.clone().unwrap_or_else(|| rev.name.clone()),
        offset: 0,
        source: BindingSource::Table {
            table: child,
            root,
            chain: child_chain,
        },
    };
    let scope = Scope::new(catalog, vec![binding]);
    compile_select_body(&scope, source, dependencies, select)
}

/// A check rule compiled against its table
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    pub table: Arc<MaterializedTable>,
    pub check: ColumnMeta,
    pub dependencies: TableDependencies,
}

impl CompiledRule {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table.name, self.name)
    }
}

pub fn compile_rule(
    catalog: &Catalog,
    table: &Arc<MaterializedTable>,
    name: &str,
    expr: &Expr,
) -> Result<CompiledRule> {
    let scope = Scope::for_table(catalog, table);
    let check = compile_expr(&scope, expr, None)?;
    expect_boolean(&check, expr)?;
    let mut dependencies = check.dependencies();
    dependencies.add_read(table.id, &[]);
    Ok(CompiledRule {
        name: name.to_string(),
        table: table.clone(),
        check,
        dependencies,
    })
}
