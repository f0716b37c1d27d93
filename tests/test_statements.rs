mod common;

use std::sync::Arc;

use common::*;
use linkdb::catalog::{DataType, MaterializedTable, TableId};
use linkdb::error::{Error, Result};
use linkdb::sql::ast::{BinaryOperator as Op, Expr, SelectItem};
use linkdb::storage::{
    IndexReader, IterableTableReader, MemoryStorage, Row, RowId, SeekableTableReader, Storage,
    TableWriter, Value,
};
use linkdb::{Database, DatabaseConfig, ErrorKind, Statement, StatementResult};

fn s(v: &str) -> Value {
    Value::from(v)
}

fn i(v: i64) -> Value {
    Value::Integer(v)
}

fn table_t(db: &linkdb::Database) {
    run_all(
        db,
        vec![
            create(
                "t",
                vec![col("a", DataType::Varchar), col("b", DataType::Integer)],
                vec![],
            ),
            insert(
                "t",
                vec![
                    vec![Expr::string("x"), Expr::int(1)],
                    vec![Expr::string("y"), Expr::int(3)],
                ],
            ),
        ],
    );
}

#[test]
fn test_update_with_expression() {
    let db = db();
    table_t(&db);
    let result = run(
        &db,
        update(
            "t",
            vec![("b", bin(Expr::ident("b"), Op::Add, Expr::int(10)))],
            None,
        ),
    );
    assert_eq!(result, StatementResult::Affected(2));

    let result = query(&db, select(&["*"], "t"));
    assert_eq!(result.columns, vec!["a", "b"]);
    assert_rows_unordered(
        result.values(),
        vec![vec![s("x"), i(11)], vec![s("y"), i(13)]],
    );
}

#[test]
fn test_filtered_update_and_delete() {
    let db = db();
    table_t(&db);
    let result = run(
        &db,
        update("t", vec![("b", Expr::int(7))], Some(eq("a", Expr::string("y")))),
    );
    assert_eq!(result, StatementResult::Affected(1));
    assert_rows_unordered(
        values(&db, select(&["a", "b"], "t")),
        vec![vec![s("x"), i(1)], vec![s("y"), i(7)]],
    );

    let result = run(
        &db,
        delete("t", Some(bin(Expr::ident("b"), Op::Gt, Expr::int(5)))),
    );
    assert_eq!(result, StatementResult::Affected(1));
    assert_eq!(values(&db, select(&["a"], "t")), vec![vec![s("x")]]);

    assert_eq!(run(&db, delete("t", None)), StatementResult::Affected(1));
    assert!(values(&db, select(&["*"], "t")).is_empty());
}

#[test]
fn test_insert_named_columns_fills_nulls() {
    let db = db();
    table_t(&db);
    run(
        &db,
        insert_into("t", &["b"], vec![vec![Expr::int(5)]]),
    );
    let rows = values(
        &db,
        select(&["a", "b"], "t").filter(Expr::is_null(Expr::ident("a"), false)),
    );
    assert_eq!(rows, vec![vec![Value::Null, i(5)]]);
}

#[test]
fn test_order_by_and_expressions() {
    let db = db();
    table_t(&db);
    run(
        &db,
        insert("t", vec![vec![Expr::string("z"), Expr::int(2)]]),
    );
    let select = linkdb::sql::ast::SelectStatement::new(
        vec![
            SelectItem::expr(Expr::ident("a")),
            SelectItem::aliased(bin(Expr::ident("b"), Op::Mul, Expr::int(2)), "double"),
        ],
        linkdb::sql::ast::FromClause::table("t"),
    )
    .order_by(Expr::ident("b"), false);
    let result = query(&db, select);
    assert_eq!(result.columns, vec!["a", "double"]);
    assert_eq!(
        result.values(),
        vec![
            vec![s("y"), i(6)],
            vec![s("z"), i(4)],
            vec![s("x"), i(2)],
        ]
    );
}

#[test]
fn test_null_comparison_filters_row() {
    let db = db();
    table_t(&db);
    run(&db, insert("t", vec![vec![Expr::string("n"), Expr::null()]]));
    let rows = values(
        &db,
        select(&["a"], "t").filter(bin(Expr::ident("b"), Op::Lt, Expr::int(100))),
    );
    assert_rows_unordered(rows, vec![vec![s("x")], vec![s("y")]]);
}

#[test]
fn test_reference_column_named_by_last_segment() {
    let db = db();
    run_all(
        &db,
        vec![
            create(
                "t1",
                vec![col("a", DataType::Varchar), col("b", DataType::Integer)],
                vec![pk("pk_a", "a")],
            ),
            create(
                "t2",
                vec![col("a", DataType::Varchar), col("ref", DataType::Varchar)],
                vec![fk("fk", "ref", "t1")],
            ),
            insert("t1", vec![vec![Expr::string("k"), Expr::int(42)]]),
            insert("t2", vec![vec![Expr::string("r"), Expr::string("k")]]),
        ],
    );
    let result = query(&db, select(&["a", "fk.b"], "t2"));
    assert_eq!(result.columns, vec!["a", "b"]);
    assert_eq!(result.values(), vec![vec![s("r"), i(42)]]);
}

#[test]
fn test_unknown_column_is_model_error() {
    let db = db();
    table_t(&db);
    let err = db
        .execute(&Statement::Select(select(&["nope"], "t")))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Model);
    assert!(err.to_string().ends_with("Column 'nope' not found in table 't'."));

    let err = fails(&db, Statement::Select(select(&["a"], "missing")));
    assert!(err.contains("missing"));
}

#[test]
fn test_update_wrong_type_points_at_column() {
    let db = db();
    run(
        &db,
        create(
            "t27",
            vec![col("a", DataType::Varchar), col("b", DataType::Integer)],
            vec![],
        ),
    );
    assert_eq!(
        fails(&db, update("t27", vec![("a", Expr::int(1))], None)),
        "[15, 16]: Expected 'varchar' but got 'integer' for 'a'."
    );
    assert_eq!(
        fails(
            &db,
            update(
                "t27",
                vec![("a", Expr::string("x")), ("b", Expr::string("y"))],
                None
            )
        ),
        "[24, 25]: Expected 'integer' but got 'varchar' for 'b'."
    );
}

#[test]
fn test_string_coercion_on_write() {
    let db = db();
    run(
        &db,
        create(
            "t",
            vec![
                col("f", DataType::Float),
                col("g", DataType::Boolean),
                col("e", DataType::Enum(vec!["x".to_string(), "y".to_string()])),
            ],
            vec![],
        ),
    );
    run(
        &db,
        insert(
            "t",
            vec![vec![Expr::string("1.5"), Expr::string("true"), Expr::string("y")]],
        ),
    );
    assert_eq!(
        values(&db, select(&["*"], "t")),
        vec![vec![Value::Float(1.5), Value::Boolean(true), s("y")]]
    );

    let err = db
        .execute(&insert(
            "t",
            vec![vec![Expr::string("abc"), Expr::null(), Expr::null()]],
        ))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Rule);
    assert_eq!(err.to_string(), "Invalid float 'abc'.");

    assert_eq!(
        fails(
            &db,
            insert("t", vec![vec![Expr::null(), Expr::string("maybe"), Expr::null()]])
        ),
        "Invalid boolean 'maybe'."
    );
    assert_eq!(
        fails(
            &db,
            update("t", vec![("e", Expr::string("z"))], None)
        ),
        "Invalid enum value 'z'."
    );
    assert_eq!(values(&db, select(&["*"], "t")).len(), 1);
}

#[test]
fn test_not_null_column() {
    let db = db();
    run(
        &db,
        create(
            "t",
            vec![col("a", DataType::Varchar).not_null(), col("b", DataType::Integer)],
            vec![],
        ),
    );
    assert_eq!(
        fails(&db, insert_into("t", &["b"], vec![vec![Expr::int(1)]])),
        "Column 't.a' is not nullable."
    );
}

/// Memory storage that cannot delete rows, so undoing an insert fails
struct NoDeleteStorage {
    inner: MemoryStorage,
}

struct NoDeleteWriter {
    inner: Box<dyn TableWriter>,
}

impl TableWriter for NoDeleteWriter {
    fn insert(&mut self, row: Row) -> Result<RowId> {
        self.inner.insert(row)
    }

    fn update(&mut self, pos: RowId, row: Row) -> Result<Row> {
        self.inner.update(pos, row)
    }

    fn delete(&mut self, _pos: RowId) -> Result<Row> {
        Err(Error::Internal("disk unavailable".to_string()))
    }

    fn restore(&mut self, pos: RowId, row: Row) -> Result<()> {
        self.inner.restore(pos, row)
    }
}

impl Storage for NoDeleteStorage {
    fn create_table(&self, table: &MaterializedTable) -> Result<()> {
        self.inner.create_table(table)
    }

    fn drop_table(&self, table: TableId) -> Result<()> {
        self.inner.drop_table(table)
    }

    fn add_column(&self, table: TableId) -> Result<()> {
        self.inner.add_column(table)
    }

    fn drop_column(&self, table: TableId, column: usize) -> Result<()> {
        self.inner.drop_column(table, column)
    }

    fn create_index(&self, table: TableId, column: usize, name: &str, unique: bool) -> Result<()> {
        self.inner.create_index(table, column, name, unique)
    }

    fn drop_index(&self, table: TableId, column: usize) -> Result<()> {
        self.inner.drop_index(table, column)
    }

    fn positions(&self, table: TableId) -> Result<Vec<RowId>> {
        self.inner.positions(table)
    }

    fn seekable(&self, table: TableId, key_column: usize) -> Result<Box<dyn SeekableTableReader>> {
        self.inner.seekable(table, key_column)
    }

    fn iterable(&self, table: TableId) -> Result<Box<dyn IterableTableReader>> {
        self.inner.iterable(table)
    }

    fn index(&self, table: TableId, column: usize) -> Result<Box<dyn IndexReader>> {
        self.inner.index(table, column)
    }

    fn writer(&self, table: TableId) -> Result<Box<dyn TableWriter>> {
        Ok(Box::new(NoDeleteWriter {
            inner: self.inner.writer(table)?,
        }))
    }
}

#[test]
fn test_failed_rollback_surfaces() {
    init_tracing();
    let storage = Arc::new(NoDeleteStorage {
        inner: MemoryStorage::new(),
    });
    let db = Database::with_storage(DatabaseConfig::default(), storage);
    run(
        &db,
        create(
            "t",
            vec![col("a", DataType::Varchar), col("b", DataType::Integer)],
            vec![pk("pk_a", "a")],
        ),
    );

    // The second row collides, and undoing the first one cannot delete it
    let err = db
        .execute(&insert(
            "t",
            vec![
                vec![Expr::string("k"), Expr::int(1)],
                vec![Expr::string("k"), Expr::int(2)],
            ],
        ))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Internal);
    let message = err.to_string();
    assert!(message.contains("Key 'k' already present in index."), "{}", message);
    assert!(message.contains("disk unavailable"), "{}", message);
}
