//! Query Planner for LinkDB
//!
//! Compiles data statements against a catalog snapshot into executable plans
//! together with the [`MetaResources`] the executor has to lock first.

use std::sync::Arc;

use tracing::debug;

use super::rules::{read_dependencies, Mutation, RuleChecker};
use crate::catalog::{BasicColumn, Catalog, MaterializedTable};
use crate::error::{Error, Result};
use crate::model::compiler::expect_boolean;
use crate::model::{compile_expr, compile_select, ColumnMeta, Scope, SelectPlan, TableDependencies};
use crate::sql::ast::*;
use crate::transaction::MetaResources;

/// Value written to one column
pub struct ColumnWrite {
    pub column: BasicColumn,
    pub value: ColumnMeta,
}

pub struct InsertPlan {
    pub table: Arc<MaterializedTable>,
    /// One full-width row of writes per VALUES tuple
    pub rows: Vec<Vec<ColumnWrite>>,
    pub rules: RuleChecker,
}

pub struct UpdatePlan {
    pub table: Arc<MaterializedTable>,
    pub filter: Option<ColumnMeta>,
    pub assignments: Vec<ColumnWrite>,
    pub rules: RuleChecker,
}

pub struct DeletePlan {
    pub table: Arc<MaterializedTable>,
    pub filter: Option<ColumnMeta>,
    pub rules: RuleChecker,
}

/// Executable form of a data statement
pub enum Plan {
    Select(SelectPlan),
    Insert(InsertPlan),
    Update(UpdatePlan),
    Delete(DeletePlan),
}

/// A plan and the resources it must hold while running
pub struct CompiledStatement {
    pub plan: Plan,
    pub resources: MetaResources,
}

/// Query Planner
pub struct Planner<'c> {
    catalog: &'c Catalog,
}

impl<'c> Planner<'c> {
    pub fn new(catalog: &'c Catalog) -> Self {
        Self { catalog }
    }

    pub fn plan(&self, statement: &Statement) -> Result<CompiledStatement> {
        let compiled = match statement {
            Statement::Select(select) => self.plan_select(select),
            Statement::Insert(insert) => self.plan_insert(insert),
            Statement::Update(update) => self.plan_update(update),
            Statement::Delete(delete) => self.plan_delete(delete),
            _ => Err(Error::Internal(
                "schema statements are not planned".to_string(),
            )),
        }?;
        debug!(
            resources = compiled.resources.all().len(),
            "compiled statement"
        );
        Ok(compiled)
    }

    fn table(&self, name: &Ident) -> Result<Arc<MaterializedTable>> {
        self.catalog
            .table(&name.to_string())
            .map_err(|e| e.or_at(name.span))
    }

    fn reads(&self, deps: &TableDependencies) -> Result<MetaResources> {
        read_dependencies(self.catalog, deps)
    }

    fn plan_select(&self, select: &SelectStatement) -> Result<CompiledStatement> {
        let plan = compile_select(self.catalog, select)?;
        let resources = self.reads(&plan.dependencies)?;
        Ok(CompiledStatement {
            plan: Plan::Select(plan),
            resources,
        })
    }

    fn plan_filter(
        &self,
        scope: &Scope<'_>,
        filter: &Option<Expr>,
        deps: &mut TableDependencies,
    ) -> Result<Option<ColumnMeta>> {
        let Some(expr) = filter else {
            return Ok(None);
        };
        let predicate = compile_expr(scope, expr, None)?;
        expect_boolean(&predicate, expr)?;
        deps.merge(&predicate.dependencies());
        Ok(Some(predicate))
    }

    fn plan_insert(&self, insert: &InsertStatement) -> Result<CompiledStatement> {
        let table = self.table(&insert.table)?;
        let targets: Vec<usize> = match &insert.columns {
            Some(columns) => columns
                .iter()
                .map(|c| {
                    table.column_index(&c.to_string()).ok_or_else(|| {
                        Error::model_at(
                            format!("Column '{}' not found in table '{}'.", c, table.name),
                            c.span,
                        )
                    })
                })
                .collect::<Result<_>>()?,
            None => (0..table.column_count()).collect(),
        };

        let scope = Scope::empty(self.catalog, &table.name);
        let mut rows = Vec::with_capacity(insert.values.len());
        for values in &insert.values {
            if values.len() != targets.len() {
                let span = values
                    .iter()
                    .map(Expr::span)
                    .reduce(|a, b| a.union(&b))
                    .unwrap_or(insert.table.span);
                return Err(Error::model_at(
                    format!(
                        "Expected {} values but got {}.",
                        targets.len(),
                        values.len()
                    ),
                    span,
                ));
            }
            let mut row: Vec<ColumnWrite> = table
                .columns()
                .iter()
                .map(|c| ColumnWrite {
                    column: c.clone(),
                    value: ColumnMeta::literal(crate::storage::Value::Null),
                })
                .collect();
            for (&index, expr) in targets.iter().zip(values) {
                let value = compile_expr(&scope, expr, None)?;
                check_assignable(&row[index].column, &value, expr.span())?;
                row[index].value = value;
            }
            rows.push(row);
        }

        let (rules, rule_resources) = RuleChecker::compile(self.catalog, &table, Mutation::Insert)?;
        let resources = MetaResources::insert_into_table(self.catalog, &table).merge(rule_resources);
        Ok(CompiledStatement {
            plan: Plan::Insert(InsertPlan { table, rows, rules }),
            resources,
        })
    }

    fn plan_update(&self, update: &UpdateStatement) -> Result<CompiledStatement> {
        let table = self.table(&update.table)?;
        let scope = Scope::for_table(self.catalog, &table);
        let mut deps = TableDependencies::new();
        let filter = self.plan_filter(&scope, &update.where_clause, &mut deps)?;

        let mut assignments = Vec::with_capacity(update.assignments.len());
        for assignment in &update.assignments {
            let name = assignment.column.to_string();
            let column = table.column(&name).ok_or_else(|| {
                Error::model_at(
                    format!("Column '{}' not found in table '{}'.", name, table.name),
                    assignment.column.span,
                )
            })?;
            if column.immutable {
                return Err(Error::model_at(
                    format!("Column '{}.{}' is immutable.", table.name, column.name),
                    assignment.column.span,
                ));
            }
            let value = compile_expr(&scope, &assignment.value, None)?;
            check_assignable(column, &value, assignment.column.span)?;
            deps.merge(&value.dependencies());
            assignments.push(ColumnWrite {
                column: column.clone(),
                value,
            });
        }

        let (rules, rule_resources) = RuleChecker::compile(self.catalog, &table, Mutation::Update)?;
        let resources = MetaResources::update_table(self.catalog, &table)
            .merge(self.reads(&deps)?)
            .merge(rule_resources);
        Ok(CompiledStatement {
            plan: Plan::Update(UpdatePlan {
                table,
                filter,
                assignments,
                rules,
            }),
            resources,
        })
    }

    fn plan_delete(&self, delete: &DeleteStatement) -> Result<CompiledStatement> {
        let table = self.table(&delete.table)?;
        let scope = Scope::for_table(self.catalog, &table);
        let mut deps = TableDependencies::new();
        let filter = self.plan_filter(&scope, &delete.where_clause, &mut deps)?;

        let (rules, rule_resources) = RuleChecker::compile(self.catalog, &table, Mutation::Delete)?;
        let resources = MetaResources::delete_from_table(self.catalog, &table)
            .merge(self.reads(&deps)?)
            .merge(rule_resources);
        Ok(CompiledStatement {
            plan: Plan::Delete(DeletePlan {
                table,
                filter,
                rules,
            }),
            resources,
        })
    }
}

/// Static assignment compatibility; coercions that depend on the value are
/// checked when the row is written
fn check_assignable(column: &BasicColumn, value: &ColumnMeta, span: crate::error::Span) -> Result<()> {
    if column.data_type.accepts(value.data_type()) {
        Ok(())
    } else {
        Err(Error::model_at(
            format!(
                "Expected '{}' but got '{}' for '{}'.",
                column.data_type,
                value.data_type(),
                column.name
            ),
            span,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DataType;
    use crate::error::{ErrorKind, Span};

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
            .create_table(
                "t2",
                vec![
                    BasicColumn::new("a", DataType::Varchar),
                    BasicColumn::new("c", DataType::Float).immutable(true),
                ],
            )
            .unwrap();
        catalog
            .add_foreign_key(t2, "fk", "a", "t1", None, None)
            .unwrap();
        catalog
    }

    fn update(table: &str, column: &str, value: Expr) -> Statement {
        Statement::Update(UpdateStatement {
            table: Ident::new(table),
            assignments: vec![Assignment {
                column: Ident::new(column).at(Span::new(15, 16)),
                value,
            }],
            where_clause: None,
        })
    }

    #[test]
    fn test_update_type_mismatch() {
        let catalog = catalog();
        let planner = Planner::new(&catalog);
        let err = planner
            .plan(&update("t1", "b", Expr::float(1.0)))
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "[15, 16]: Expected 'integer' but got 'float' for 'b'."
        );
    }

    #[test]
    fn test_update_immutable_column() {
        let catalog = catalog();
        let planner = Planner::new(&catalog);
        let err = planner.plan(&update("t2", "c", Expr::int(1))).err().unwrap();
        assert_eq!(err.to_string(), "[15, 16]: Column 't2.c' is immutable.");
        assert_eq!(err.kind(), ErrorKind::Model);

        let err = planner
            .plan(&update("t1", "a", Expr::string("x")))
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "[15, 16]: Column 't1.a' is immutable.");
    }

    #[test]
    fn test_insert_locks_foreign_index() {
        let catalog = catalog();
        let planner = Planner::new(&catalog);
        let compiled = planner
            .plan(&Statement::Insert(InsertStatement {
                table: Ident::new("t2"),
                columns: None,
                values: vec![vec![Expr::string("x"), Expr::int(1)]],
            }))
            .unwrap();
        let ids: Vec<String> = compiled.resources.all().into_iter().map(|r| r.id).collect();
        assert!(ids.contains(&"t1.a".to_string()));
        assert!(compiled.resources.can_write("t2"));
        assert!(!compiled.resources.can_read("t1"));
    }

    #[test]
    fn test_insert_value_count() {
        let catalog = catalog();
        let planner = Planner::new(&catalog);
        let err = planner
            .plan(&Statement::Insert(InsertStatement {
                table: Ident::new("t1"),
                columns: None,
                values: vec![vec![Expr::string("x")]],
            }))
            .err()
            .unwrap();
        assert!(err.to_string().ends_with("Expected 2 values but got 1."));
    }

    #[test]
    fn test_select_reads_referenced_tables() {
        let catalog = catalog();
        let planner = Planner::new(&catalog);
        let select = SelectStatement::new(
            vec![SelectItem::expr(Expr::ident("fk.b"))],
            FromClause::table("t2"),
        );
        let compiled = planner.plan(&Statement::Select(select)).unwrap();
        assert!(compiled.resources.can_read("t1"));
        assert!(compiled.resources.can_read("t2"));
        assert!(!compiled.resources.can_write("t2"));
    }
}
