//! Shared statement builders for the integration tests

#![allow(dead_code)]

use linkdb::catalog::DataType;
use linkdb::sql::ast::*;
use linkdb::storage::Value;
use linkdb::{Database, DatabaseConfig, QueryResult, Span, StatementResult};
use tracing_subscriber::EnvFilter;

/// Routes engine logs to the test output; set `RUST_LOG=linkdb=debug` to see them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn db() -> Database {
    init_tracing();
    Database::new(DatabaseConfig::default())
}

pub fn run(db: &Database, statement: Statement) -> StatementResult {
    match db.execute(&statement) {
        Ok(result) => result,
        Err(e) => panic!("statement {:?} failed: {}", statement, e),
    }
}

pub fn run_all(db: &Database, statements: Vec<Statement>) {
    for statement in statements {
        run(db, statement);
    }
}

/// Error message of a statement expected to fail
pub fn fails(db: &Database, statement: Statement) -> String {
    match db.execute(&statement) {
        Ok(result) => panic!("statement {:?} succeeded with {:?}", statement, result),
        Err(e) => e.to_string(),
    }
}

pub fn col(name: &str, data_type: DataType) -> ColumnDef {
    ColumnDef::new(name, data_type)
}

pub fn create(table: &str, columns: Vec<ColumnDef>, constraints: Vec<TableConstraint>) -> Statement {
    Statement::CreateTable(CreateTableStatement {
        table: Ident::new(table),
        columns,
        constraints,
    })
}

pub fn pk(name: &str, column: &str) -> TableConstraint {
    TableConstraint::primary_key(name, column)
}

/// Foreign key to the primary key of `ref_table`
pub fn fk(name: &str, column: &str, ref_table: &str) -> TableConstraint {
    TableConstraint::ForeignKey {
        name: Ident::new(name),
        column: Ident::new(column),
        ref_table: Ident::new(ref_table),
        ref_column: None,
        reverse_name: None,
    }
}

pub fn check(name: &str, expr: Expr) -> TableConstraint {
    TableConstraint::check(name, expr)
}

pub fn drop_table(table: &str) -> Statement {
    Statement::DropTable(DropTableStatement {
        table: Ident::new(table),
    })
}

pub fn alter(table: &str, action: AlterAction) -> Statement {
    Statement::AlterTable(AlterTableStatement {
        table: Ident::new(table),
        action,
    })
}

pub fn create_index(table: &str, column: &str) -> Statement {
    Statement::CreateIndex(IndexStatement {
        table: Ident::new(table),
        column: Ident::new(column),
    })
}

pub fn drop_index(table: &str, column: &str) -> Statement {
    Statement::DropIndex(IndexStatement {
        table: Ident::new(table),
        column: Ident::new(column),
    })
}

pub fn insert(table: &str, rows: Vec<Vec<Expr>>) -> Statement {
    Statement::Insert(InsertStatement {
        table: Ident::new(table),
        columns: None,
        values: rows,
    })
}

pub fn insert_into(table: &str, columns: &[&str], rows: Vec<Vec<Expr>>) -> Statement {
    Statement::Insert(InsertStatement {
        table: Ident::new(table),
        columns: Some(columns.iter().map(|c| Ident::new(c)).collect()),
        values: rows,
    })
}

/// `update <table> set c1 = v1, c2 = v2 [where ..]` with column spans placed
/// where they fall in that statement text
pub fn update(table: &str, assignments: Vec<(&str, Expr)>, filter: Option<Expr>) -> Statement {
    let mut start = "update ".len() + table.len() + " set ".len();
    let assignments = assignments
        .into_iter()
        .map(|(column, value)| {
            let end = start + column.len();
            let assignment = Assignment {
                column: Ident::new(column).at(Span::new(start, end)),
                value,
            };
            start = end + " = ".len() + assignment.value.to_string().len() + ", ".len();
            assignment
        })
        .collect();
    Statement::Update(UpdateStatement {
        table: Ident::new(table),
        assignments,
        where_clause: filter,
    })
}

pub fn delete(table: &str, filter: Option<Expr>) -> Statement {
    Statement::Delete(DeleteStatement {
        table: Ident::new(table),
        where_clause: filter,
    })
}

pub fn select(columns: &[&str], table: &str) -> SelectStatement {
    let items = if columns == ["*"] {
        vec![SelectItem::Wildcard]
    } else {
        columns
            .iter()
            .map(|c| SelectItem::expr(Expr::ident(c)))
            .collect()
    };
    SelectStatement::new(items, FromClause::table(table))
}

pub fn query(db: &Database, select: SelectStatement) -> QueryResult {
    match run(db, Statement::Select(select)) {
        StatementResult::Query(result) => result,
        other => panic!("expected rows, got {:?}", other),
    }
}

pub fn values(db: &Database, select: SelectStatement) -> Vec<Vec<Value>> {
    query(db, select).values()
}

pub fn bin(left: Expr, op: BinaryOperator, right: Expr) -> Expr {
    Expr::binary(left, op, right)
}

pub fn eq(column: &str, value: Expr) -> Expr {
    bin(Expr::ident(column), BinaryOperator::Eq, value)
}

/// Compares row sets ignoring order
pub fn assert_rows_unordered(mut actual: Vec<Vec<Value>>, mut expected: Vec<Vec<Value>>) {
    actual.sort();
    expected.sort();
    assert_eq!(actual, expected);
}
