//! Query Executor for LinkDB
//!
//! [`Database`] owns the schema behind the metadata lock, the row storage and
//! the lock manager. Data statements are compiled under the metadata read
//! lock, lock their resources all at once and run with an undo log. Schema
//! statements run under the metadata write lock against a cloned catalog
//! that replaces the live one only when every check passed.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::context::{EvalContext, Resources};
use super::planner::{CompiledStatement, DeletePlan, InsertPlan, Plan, Planner, UpdatePlan};
use super::rules::{check_foreign_key, check_rule, RowChange};
use crate::catalog::{BasicColumn, Catalog, MaterializedTable, Rule, TableId, ViewDef};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::model::{compile_rule, compile_view, ColumnMeta, SelectPlan};
use crate::sql::ast::*;
use crate::storage::{MemoryStorage, Row, RowId, Storage, Tuple, Value};
use crate::transaction::{CancelFlag, LockManager, MetaResources, Transaction, UndoEntry, UndoLog};

/// Query result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Column names
    pub columns: Vec<String>,
    /// Result rows
    pub rows: Vec<Tuple>,
}

impl QueryResult {
    /// Rows as plain value vectors
    pub fn values(&self) -> Vec<Vec<Value>> {
        self.rows.iter().map(|t| t.values().to_vec()).collect()
    }
}

/// Outcome of one statement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StatementResult {
    Query(QueryResult),
    /// Rows inserted, updated or deleted
    Affected(usize),
    /// Schema change acknowledgement
    MetaAck(String),
    Cancelled,
}

/// Storage work of a schema statement, reverted if a later step fails
enum StorageUndo {
    CreatedTable(TableId),
    AddedColumn(TableId, usize),
    /// Index state of a column before the statement; `None` if unindexed
    Index {
        table: TableId,
        column: usize,
        previous: Option<(String, bool)>,
    },
}

/// Database engine
pub struct Database {
    config: DatabaseConfig,
    /// Metadata lock
    catalog: RwLock<Catalog>,
    storage: Arc<dyn Storage>,
    locks: LockManager,
}

impl Database {
    /// Create an empty in-memory database
    pub fn new(config: DatabaseConfig) -> Self {
        Self::with_storage(config, Arc::new(MemoryStorage::new()))
    }

    /// Create an empty database over the given storage
    pub fn with_storage(config: DatabaseConfig, storage: Arc<dyn Storage>) -> Self {
        Self {
            config,
            catalog: RwLock::new(Catalog::new()),
            storage,
            locks: LockManager::new(),
        }
    }

    /// Open a database over an existing schema with empty tables
    pub fn open(config: DatabaseConfig, catalog: Catalog) -> Result<Self> {
        let storage = MemoryStorage::new();
        for table in catalog.tables() {
            storage.create_table(table)?;
        }
        info!(tables = catalog.list_tables().len(), "opened database");
        Ok(Self {
            config,
            catalog: RwLock::new(catalog),
            storage: Arc::new(storage),
            locks: LockManager::new(),
        })
    }

    /// Open a database over a schema saved with [`Database::save_schema`]
    pub fn load_schema(config: DatabaseConfig, path: impl AsRef<Path>) -> Result<Self> {
        Self::open(config, Catalog::load_from_disk(path)?)
    }

    pub fn save_schema(&self, path: impl AsRef<Path>) -> Result<()> {
        self.catalog.read().save_to_disk(path)
    }

    /// Snapshot of the current schema
    pub fn catalog(&self) -> Catalog {
        self.catalog.read().clone()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Execute one statement
    pub fn execute(&self, statement: &Statement) -> Result<StatementResult> {
        self.execute_with_cancel(statement, &CancelFlag::new())
    }

    /// Execute one statement that stops once `cancel` is raised
    pub fn execute_with_cancel(
        &self,
        statement: &Statement,
        cancel: &CancelFlag,
    ) -> Result<StatementResult> {
        if statement.is_meta() {
            return self.execute_meta(statement);
        }
        let mut results = self.execute_data(std::slice::from_ref(statement), cancel)?;
        Ok(results.pop().unwrap_or(StatementResult::Cancelled))
    }

    /// Execute data statements as one unit: resources are locked once and a
    /// failure of any statement rolls back all of them
    pub fn execute_transaction(&self, statements: &[Statement]) -> Result<Vec<StatementResult>> {
        self.execute_transaction_with_cancel(statements, &CancelFlag::new())
    }

    pub fn execute_transaction_with_cancel(
        &self,
        statements: &[Statement],
        cancel: &CancelFlag,
    ) -> Result<Vec<StatementResult>> {
        if statements.iter().any(Statement::is_meta) {
            return Err(Error::model(
                "Schema statements cannot run inside a transaction.",
            ));
        }
        self.execute_data(statements, cancel)
    }

    fn execute_data(
        &self,
        statements: &[Statement],
        cancel: &CancelFlag,
    ) -> Result<Vec<StatementResult>> {
        // Held until the statements finish so the schema cannot change
        // underneath the compiled plans
        let catalog = self.catalog.read();
        let planner = Planner::new(&catalog);
        let compiled = statements
            .iter()
            .map(|s| planner.plan(s))
            .collect::<Result<Vec<CompiledStatement>>>()?;
        let resources = compiled
            .iter()
            .fold(MetaResources::empty(), |acc, c| acc.merge(c.resources.clone()));

        let _guard = match self.locks.acquire(
            &resources.all(),
            cancel,
            self.config.lock_timeout,
            self.config.lock_poll_interval,
        ) {
            Ok(guard) => guard,
            Err(Error::Cancelled) => {
                debug!("cancelled while waiting for locks");
                return Ok(vec![StatementResult::Cancelled]);
            }
            Err(e) => return Err(e),
        };

        let res = Resources::new(self.storage.as_ref(), &resources, cancel);
        let mut txn = Transaction::begin(cancel.clone());
        let mut results = Vec::with_capacity(compiled.len());
        for statement in &compiled {
            match execute_plan(&statement.plan, &res, txn.undo_log()) {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(txn = txn.id, error = %e, "statement failed");
                    if let Err(failure) = txn.rollback(self.storage.as_ref()) {
                        error!(txn = txn.id, error = %failure, "rollback failed");
                        return Err(Error::Internal(format!(
                            "Rollback failed after '{}': {}",
                            e, failure
                        )));
                    }
                    return match e {
                        Error::Cancelled => Ok(vec![StatementResult::Cancelled]),
                        e => Err(e),
                    };
                }
            }
        }
        txn.commit()?;
        Ok(results)
    }

    fn execute_meta(&self, statement: &Statement) -> Result<StatementResult> {
        let mut catalog = self.catalog.write();
        let mut next = (*catalog).clone();
        let mut undo = Vec::new();
        match self.apply_schema(&mut next, statement, &mut undo) {
            Ok(message) => {
                *catalog = next;
                info!(%message, "schema changed");
                Ok(StatementResult::MetaAck(message))
            }
            Err(e) => {
                warn!(error = %e, "schema statement rejected");
                self.revert_storage(undo);
                Err(e)
            }
        }
    }

    fn revert_storage(&self, undo: Vec<StorageUndo>) {
        for step in undo.into_iter().rev() {
            let result = match step {
                StorageUndo::CreatedTable(table) => self.storage.drop_table(table),
                StorageUndo::AddedColumn(table, column) => self.storage.drop_column(table, column),
                StorageUndo::Index {
                    table,
                    column,
                    previous: None,
                } => self.storage.drop_index(table, column),
                StorageUndo::Index {
                    table,
                    column,
                    previous: Some((name, unique)),
                } => self.storage.create_index(table, column, &name, unique),
            };
            if let Err(e) = result {
                warn!(error = %e, "failed to revert storage change");
            }
        }
    }

    fn apply_schema(
        &self,
        next: &mut Catalog,
        statement: &Statement,
        undo: &mut Vec<StorageUndo>,
    ) -> Result<String> {
        match statement {
            Statement::CreateTable(create) => self.execute_create_table(next, create, undo),
            Statement::DropTable(drop) => self.execute_drop_table(next, &drop.table),
            Statement::AlterTable(alter) => self.execute_alter_table(next, alter, undo),
            Statement::CreateIndex(index) => self.execute_create_index(next, index, undo),
            Statement::DropIndex(index) => self.execute_drop_index(next, index),
            _ => Err(Error::Internal("not a schema statement".to_string())),
        }
    }

    fn execute_create_table(
        &self,
        next: &mut Catalog,
        create: &CreateTableStatement,
        undo: &mut Vec<StorageUndo>,
    ) -> Result<String> {
        let name = create.table.to_string();
        let columns = create.columns.iter().map(basic_column).collect();
        let id = next
            .create_table(&name, columns)
            .map_err(|e| e.or_at(create.table.span))?;

        // Keys first so checks can read through them
        let mut constraints: Vec<&TableConstraint> = create.constraints.iter().collect();
        constraints.sort_by_key(|c| match c {
            TableConstraint::PrimaryKey { .. } => 0,
            TableConstraint::ForeignKey { .. } => 1,
            TableConstraint::Check { .. } => 2,
        });
        for constraint in constraints {
            self.add_constraint(next, id, constraint)?;
        }

        let table = next.table_by_id(id)?.clone();
        self.storage.create_table(&table)?;
        undo.push(StorageUndo::CreatedTable(id));
        Ok(format!("Table '{}' created", name))
    }

    fn execute_drop_table(&self, next: &mut Catalog, name: &Ident) -> Result<String> {
        let table = next
            .drop_table(&name.to_string())
            .map_err(|e| e.or_at(name.span))?;
        if let Some(user) = broken_object(next) {
            return Err(Error::model_at(
                format!("Cannot drop table '{}', used by '{}'.", table.name, user),
                name.span,
            ));
        }
        self.storage.drop_table(table.id)?;
        Ok(format!("Table '{}' dropped", table.name))
    }

    /// Adds a constraint to the catalog only; rows are not looked at
    fn add_constraint(
        &self,
        next: &mut Catalog,
        table: TableId,
        constraint: &TableConstraint,
    ) -> Result<()> {
        match constraint {
            TableConstraint::PrimaryKey { name, column } => {
                let pk_name = name
                    .as_ref()
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| format!("pk_{}", column));
                next.set_primary_key(table, &pk_name, &column.to_string())
                    .map_err(|e| e.or_at(column.span))
            }
            TableConstraint::ForeignKey {
                name,
                column,
                ref_table,
                ref_column,
                reverse_name,
            } => {
                let fk_name = name.to_string();
                let reverse = reverse_name
                    .as_ref()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| self.config.reverse_name(&fk_name));
                let ref_column = ref_column.as_ref().map(|c| c.to_string());
                next.add_foreign_key(
                    table,
                    &fk_name,
                    &column.to_string(),
                    &ref_table.to_string(),
                    ref_column.as_deref(),
                    Some(reverse.as_str()),
                )
                .map(|_| ())
                .map_err(|e| e.or_at(name.span))
            }
            TableConstraint::Check { name, expr } => {
                let owner = next.table_by_id(table)?.clone();
                let compiled = compile_rule(next, &owner, &name.to_string(), expr)?;
                next.add_rule(Rule {
                    name: compiled.name,
                    table,
                    expr: expr.clone(),
                    dependencies: compiled.dependencies,
                })
                .map_err(|e| e.or_at(name.span))
            }
        }
    }

    fn execute_alter_table(
        &self,
        next: &mut Catalog,
        alter: &AlterTableStatement,
        undo: &mut Vec<StorageUndo>,
    ) -> Result<String> {
        let table = next
            .table(&alter.table.to_string())
            .map_err(|e| e.or_at(alter.table.span))?;
        match &alter.action {
            AlterAction::AddColumn(def) => {
                let column = basic_column(def);
                let unique = column.unique;
                let index = next
                    .add_column(table.id, column)
                    .map_err(|e| e.or_at(def.name.span))?;
                self.storage.add_column(table.id)?;
                undo.push(StorageUndo::AddedColumn(table.id, index));
                if unique {
                    let index_name = format!("{}.{}", table.name, def.name);
                    self.storage.create_index(table.id, index, &index_name, true)?;
                }
                Ok(format!("Column '{}' added to table '{}'", def.name, table.name))
            }
            AlterAction::DropColumn(name) => {
                let index = next
                    .drop_column(table.id, &name.to_string())
                    .map_err(|e| e.or_at(name.span))?;
                if let Some(user) = broken_object(next) {
                    return Err(Error::model_at(
                        format!("Cannot drop column '{}', used by '{}'.", name, user),
                        name.span,
                    ));
                }
                self.storage.drop_column(table.id, index)?;
                Ok(format!("Column '{}' dropped from table '{}'", name, table.name))
            }
            AlterAction::AddConstraint(constraint) => {
                self.execute_add_constraint(next, &table, constraint, undo)?;
                Ok(format!("Constraint added to table '{}'", table.name))
            }
            AlterAction::DropConstraint(name) => {
                let constraint = name.to_string();
                if table.rules.contains_key(&constraint) {
                    next.drop_rule(table.id, &constraint)?;
                } else {
                    let fk = next
                        .drop_foreign_key(table.id, &constraint)
                        .map_err(|e| e.or_at(name.span))?;
                    if let Some(user) = broken_object(next) {
                        return Err(Error::model_at(
                            format!("Cannot drop constraint '{}', used by '{}'.", name, user),
                            name.span,
                        ));
                    }
                    let owner = next.table_by_id(table.id)?;
                    if let Some(column) = owner.column(&fk.column).filter(|c| !c.indexed) {
                        self.storage.drop_index(table.id, column.index)?;
                    }
                }
                Ok(format!("Constraint '{}' dropped from table '{}'", name, table.name))
            }
            AlterAction::AddView { name, select } => {
                let view = ViewDef {
                    name: name.to_string(),
                    table: table.id,
                    select: (**select).clone(),
                };
                next.add_view(view.clone())
                    .map_err(|e| e.or_at(name.span))?;
                let owner = next.table_by_id(table.id)?.clone();
                compile_view(next, &owner, &view, &Vec::new(), owner.id)?;
                Ok(format!("View '{}' added to table '{}'", name, table.name))
            }
            AlterAction::DropView(name) => {
                next.drop_view(table.id, &name.to_string())
                    .map_err(|e| e.or_at(name.span))?;
                if let Some(user) = broken_object(next) {
                    return Err(Error::model_at(
                        format!("Cannot drop view '{}', used by '{}'.", name, user),
                        name.span,
                    ));
                }
                Ok(format!("View '{}' dropped from table '{}'", name, table.name))
            }
        }
    }

    /// Adds a constraint to a table that may already hold rows, which must
    /// satisfy it
    fn execute_add_constraint(
        &self,
        next: &mut Catalog,
        table: &Arc<MaterializedTable>,
        constraint: &TableConstraint,
        undo: &mut Vec<StorageUndo>,
    ) -> Result<()> {
        self.add_constraint(next, table.id, constraint)?;
        let updated = next.table_by_id(table.id)?.clone();
        match constraint {
            TableConstraint::PrimaryKey { column, .. } => {
                let name = column.to_string();
                let (index, previous) = index_state(table, &name)?;
                undo.push(StorageUndo::Index {
                    table: table.id,
                    column: index,
                    previous,
                });
                let index_name = format!("{}.{}", table.name, name);
                self.storage.create_index(table.id, index, &index_name, true)?;
                self.validate_rows(next, &updated, |row, _| {
                    if row[index].is_null() {
                        Err(Error::rule(
                            index_name.clone(),
                            format!("Column '{}' is not nullable.", index_name),
                        ))
                    } else {
                        Ok(())
                    }
                })
            }
            TableConstraint::ForeignKey { name, column, .. } => {
                let column = column.to_string();
                let (index, previous) = index_state(table, &column)?;
                if previous.is_none() {
                    undo.push(StorageUndo::Index {
                        table: table.id,
                        column: index,
                        previous: None,
                    });
                    let index_name = format!("{}.{}", table.name, column);
                    self.storage.create_index(table.id, index, &index_name, false)?;
                }
                let fk = updated
                    .foreign_keys
                    .get(&name.to_string())
                    .cloned()
                    .ok_or_else(|| Error::Internal(format!("foreign key {} not added", name)))?;
                let target = next.table_by_id(fk.ref_table)?.clone();
                self.validate_rows(next, &updated, |row, res| {
                    check_foreign_key(res, &updated, &fk, &target, &row[index])
                })
            }
            TableConstraint::Check { name, expr } => {
                let rule = compile_rule(next, &updated, &name.to_string(), expr)?;
                self.validate_rows(next, &updated, |row, res| check_rule(&rule, row, res, false))
            }
        }
    }

    /// Runs `check` on every stored row of `table`
    fn validate_rows<F>(&self, catalog: &Catalog, table: &MaterializedTable, check: F) -> Result<()>
    where
        F: Fn(&Row, &Resources<'_>) -> Result<()>,
    {
        let meta = MetaResources::all_tables(catalog);
        let cancel = CancelFlag::new();
        let res = Resources::new(self.storage.as_ref(), &meta, &cancel);
        let mut reader = res.iterable(table)?;
        while let Some(row) = reader.next()? {
            check(&row, &res)?;
        }
        reader.close();
        Ok(())
    }

    fn execute_create_index(
        &self,
        next: &mut Catalog,
        statement: &IndexStatement,
        undo: &mut Vec<StorageUndo>,
    ) -> Result<String> {
        let table = next
            .table(&statement.table.to_string())
            .map_err(|e| e.or_at(statement.table.span))?;
        let index = next
            .create_index(table.id, &statement.column.to_string())
            .map_err(|e| e.or_at(statement.column.span))?;
        let name = format!("{}.{}", table.name, statement.column);
        self.storage.create_index(table.id, index, &name, false)?;
        undo.push(StorageUndo::Index {
            table: table.id,
            column: index,
            previous: None,
        });
        Ok(format!("Index '{}' created", name))
    }

    fn execute_drop_index(&self, next: &mut Catalog, statement: &IndexStatement) -> Result<String> {
        let table = next
            .table(&statement.table.to_string())
            .map_err(|e| e.or_at(statement.table.span))?;
        let dropped = next
            .drop_index(table.id, &statement.column.to_string())
            .map_err(|e| e.or_at(statement.column.span))?;
        if let Some(index) = dropped {
            self.storage.drop_index(table.id, index)?;
        }
        Ok(format!("Index '{}.{}' dropped", table.name, statement.column))
    }
}

fn basic_column(def: &ColumnDef) -> BasicColumn {
    BasicColumn::new(def.name.to_string(), def.data_type.clone())
        .nullable(!def.not_null)
        .unique(def.unique)
        .immutable(def.immutable)
}

/// Position of `column` and its current index as `(name, unique)`
fn index_state(table: &MaterializedTable, column: &str) -> Result<(usize, Option<(String, bool)>)> {
    let col = table.column(column).ok_or_else(|| {
        Error::Internal(format!("column {} missing in table {}", column, table.name))
    })?;
    let previous = col
        .indexed
        .then(|| (format!("{}.{}", table.name, col.name), col.unique));
    Ok((col.index, previous))
}

/// First rule or view that no longer compiles, by qualified name
fn broken_object(catalog: &Catalog) -> Option<String> {
    for table in catalog.tables() {
        for rule in table.rules.values() {
            if compile_rule(catalog, table, &rule.name, &rule.expr).is_err() {
                return Some(format!("{}.{}", table.name, rule.name));
            }
        }
        for view in table.views.values() {
            if compile_view(catalog, table, view, &Vec::new(), table.id).is_err() {
                return Some(format!("{}.{}", table.name, view.name));
            }
        }
    }
    None
}

fn execute_plan(plan: &Plan, res: &Resources<'_>, undo: &mut UndoLog) -> Result<StatementResult> {
    match plan {
        Plan::Select(select) => execute_select(select, res),
        Plan::Insert(insert) => execute_insert(insert, res, undo),
        Plan::Update(update) => execute_update(update, res, undo),
        Plan::Delete(delete) => execute_delete(delete, res, undo),
    }
}

fn execute_select(plan: &SelectPlan, res: &Resources<'_>) -> Result<StatementResult> {
    let mut reader = plan.table.reader(res, EvalContext::new())?;
    let mut rows = Vec::new();
    while let Some(row) = reader.next()? {
        rows.push(Tuple::new(row));
    }
    reader.close();
    debug!(rows = rows.len(), "select finished");
    Ok(StatementResult::Query(QueryResult {
        columns: plan.columns.iter().map(|c| c.name.clone()).collect(),
        rows,
    }))
}

/// Coerces a computed value into the column's stored representation
fn store_value(table: &MaterializedTable, column: &BasicColumn, value: Value) -> Result<Value> {
    let name = format!("{}.{}", table.name, column.name);
    let value = column
        .data_type
        .coerce(value)
        .map_err(|message| Error::rule(name.clone(), message))?;
    if value.is_null() && !column.nullable {
        return Err(Error::rule(
            name.clone(),
            format!("Column '{}' is not nullable.", name),
        ));
    }
    Ok(value)
}

fn execute_insert(plan: &InsertPlan, res: &Resources<'_>, undo: &mut UndoLog) -> Result<StatementResult> {
    let mut writer = res.writer(&plan.table)?;
    let mut changes = Vec::with_capacity(plan.rows.len());
    for writes in &plan.rows {
        res.check_cancelled()?;
        let row = writes
            .iter()
            .map(|w| {
                let value = w.value.value(&[], res, EvalContext::new())?;
                store_value(&plan.table, &w.column, value)
            })
            .collect::<Result<Row>>()?;
        let pos = writer.insert(row.clone())?;
        undo.record(UndoEntry::Inserted {
            table: plan.table.id,
            pos,
        });
        changes.push(RowChange::Inserted(row));
    }
    plan.rules.check(res, &changes)?;
    Ok(StatementResult::Affected(changes.len()))
}

/// Positions and rows of `table` matching `filter`, read before any write
fn matching_rows(
    table: &MaterializedTable,
    filter: &Option<ColumnMeta>,
    res: &Resources<'_>,
) -> Result<Vec<(RowId, Row)>> {
    let reader = res.seekable(table, 0)?;
    let mut matches = Vec::new();
    for pos in res.positions(table)? {
        res.check_cancelled()?;
        let Some(row) = reader.get_at(pos)? else {
            continue;
        };
        let selected = match filter {
            Some(predicate) => predicate.test(&row, res, EvalContext::new())?,
            None => true,
        };
        if selected {
            matches.push((pos, row));
        }
    }
    Ok(matches)
}

fn execute_update(plan: &UpdatePlan, res: &Resources<'_>, undo: &mut UndoLog) -> Result<StatementResult> {
    let matches = matching_rows(&plan.table, &plan.filter, res)?;
    let mut writer = res.writer(&plan.table)?;
    let mut changes = Vec::with_capacity(matches.len());
    for (pos, current) in matches {
        res.check_cancelled()?;
        let mut after = current.clone();
        for write in &plan.assignments {
            let value = write.value.value(&current, res, EvalContext::new())?;
            after[write.column.index] = store_value(&plan.table, &write.column, value)?;
        }
        let before = writer.update(pos, after.clone())?;
        undo.record(UndoEntry::Updated {
            table: plan.table.id,
            pos,
            before: before.clone(),
        });
        changes.push(RowChange::Updated { before, after });
    }
    plan.rules.check(res, &changes)?;
    Ok(StatementResult::Affected(changes.len()))
}

fn execute_delete(plan: &DeletePlan, res: &Resources<'_>, undo: &mut UndoLog) -> Result<StatementResult> {
    let matches = matching_rows(&plan.table, &plan.filter, res)?;
    let mut writer = res.writer(&plan.table)?;
    let mut changes = Vec::with_capacity(matches.len());
    for (pos, _) in matches {
        res.check_cancelled()?;
        let before = writer.delete(pos)?;
        undo.record(UndoEntry::Deleted {
            table: plan.table.id,
            pos,
            before: before.clone(),
        });
        changes.push(RowChange::Deleted(before));
    }
    plan.rules.check(res, &changes)?;
    Ok(StatementResult::Affected(changes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DataType;
    use crate::error::ErrorKind;

    fn create(name: &str, columns: Vec<ColumnDef>, constraints: Vec<TableConstraint>) -> Statement {
        Statement::CreateTable(CreateTableStatement {
            table: Ident::new(name),
            columns,
            constraints,
        })
    }

    fn insert(table: &str, rows: Vec<Vec<Expr>>) -> Statement {
        Statement::Insert(InsertStatement {
            table: Ident::new(table),
            columns: None,
            values: rows,
        })
    }

    fn select_all(table: &str) -> Statement {
        Statement::Select(SelectStatement::new(
            vec![SelectItem::Wildcard],
            FromClause::table(table),
        ))
    }

    fn rows(db: &Database, table: &str) -> Vec<Vec<Value>> {
        match db.execute(&select_all(table)).unwrap() {
            StatementResult::Query(result) => result.values(),
            other => panic!("expected query result, got {:?}", other),
        }
    }

    #[test]
    fn test_create_insert_select() {
        let db = Database::new(DatabaseConfig::default());
        let ack = db
            .execute(&create(
                "t",
                vec![
                    ColumnDef::new("a", DataType::Varchar),
                    ColumnDef::new("b", DataType::Integer),
                ],
                Vec::new(),
            ))
            .unwrap();
        assert_eq!(ack, StatementResult::MetaAck("Table 't' created".to_string()));

        let affected = db
            .execute(&insert(
                "t",
                vec![
                    vec![Expr::string("x"), Expr::int(1)],
                    vec![Expr::string("y"), Expr::int(3)],
                ],
            ))
            .unwrap();
        assert_eq!(affected, StatementResult::Affected(2));
        assert_eq!(
            rows(&db, "t"),
            vec![
                vec![Value::from("x"), Value::Integer(1)],
                vec![Value::from("y"), Value::Integer(3)],
            ]
        );
    }

    #[test]
    fn test_failed_insert_rolls_back_statement() {
        let db = Database::new(DatabaseConfig::default());
        db.execute(&create(
            "t",
            vec![ColumnDef::new("a", DataType::Varchar).unique()],
            Vec::new(),
        ))
        .unwrap();
        let err = db
            .execute(&insert(
                "t",
                vec![vec![Expr::string("x")], vec![Expr::string("x")]],
            ))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rule);
        assert_eq!(err.to_string(), "Key 'x' already present in index.");
        assert!(rows(&db, "t").is_empty());
    }

    #[test]
    fn test_not_nullable_column() {
        let db = Database::new(DatabaseConfig::default());
        db.execute(&create(
            "t",
            vec![
                ColumnDef::new("a", DataType::Varchar).not_null(),
                ColumnDef::new("b", DataType::Integer),
            ],
            Vec::new(),
        ))
        .unwrap();
        let err = db
            .execute(&Statement::Insert(InsertStatement {
                table: Ident::new("t"),
                columns: Some(vec![Ident::new("b")]),
                values: vec![vec![Expr::int(1)]],
            }))
            .unwrap_err();
        assert_eq!(err.to_string(), "Column 't.a' is not nullable.");
    }

    #[test]
    fn test_failed_schema_statement_keeps_catalog() {
        let db = Database::new(DatabaseConfig::default());
        db.execute(&create(
            "t",
            vec![ColumnDef::new("a", DataType::Integer)],
            Vec::new(),
        ))
        .unwrap();
        db.execute(&insert("t", vec![vec![Expr::int(-1)]])).unwrap();

        let check = Expr::binary(Expr::ident("a"), BinaryOperator::Gt, Expr::int(0));
        let err = db
            .execute(&Statement::AlterTable(AlterTableStatement {
                table: Ident::new("t"),
                action: AlterAction::AddConstraint(TableConstraint::check("c", check)),
            }))
            .unwrap_err();
        assert_eq!(err.to_string(), "Constraint check t.c failed.");
        assert!(db.catalog().table("t").unwrap().rules.is_empty());
    }

    #[test]
    fn test_transaction_rejects_schema_statements() {
        let db = Database::new(DatabaseConfig::default());
        let err = db
            .execute_transaction(&[create("t", Vec::new(), Vec::new())])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Model);
    }
}
