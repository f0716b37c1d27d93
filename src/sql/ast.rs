//! Statement and expression tree
//!
//! This module defines the tree a parser produces for LinkDB. Every node that
//! can fail compilation carries a [`Span`] so model errors can point back at
//! the statement text. The `Expr` helpers build trees directly, which is how
//! embedders without a parser and the tests construct statements.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catalog::DataType;
use crate::error::Span;
use crate::storage::Value;

/// A statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// SELECT statement
    Select(SelectStatement),
    /// INSERT statement
    Insert(InsertStatement),
    /// UPDATE statement
    Update(UpdateStatement),
    /// DELETE statement
    Delete(DeleteStatement),
    /// CREATE TABLE statement
    CreateTable(CreateTableStatement),
    /// DROP TABLE statement
    DropTable(DropTableStatement),
    /// ALTER TABLE statement
    AlterTable(AlterTableStatement),
    /// CREATE INDEX statement
    CreateIndex(IndexStatement),
    /// DROP INDEX statement
    DropIndex(IndexStatement),
}

impl Statement {
    /// Schema statements run under the exclusive metadata lock
    pub fn is_meta(&self) -> bool {
        matches!(
            self,
            Statement::CreateTable(_)
                | Statement::DropTable(_)
                | Statement::AlterTable(_)
                | Statement::CreateIndex(_)
                | Statement::DropIndex(_)
        )
    }
}

/// A possibly dotted identifier such as `fk_a.fk_b.b`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ident {
    pub parts: Vec<String>,
    pub span: Span,
}

impl Ident {
    /// Splits a dotted name into its segments
    pub fn new(name: &str) -> Self {
        Self {
            parts: name.split('.').map(str::to_string).collect(),
            span: Span::default(),
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn head(&self) -> &str {
        &self.parts[0]
    }

    pub fn last(&self) -> &str {
        &self.parts[self.parts.len() - 1]
    }

    pub fn is_simple(&self) -> bool {
        self.parts.len() == 1
    }

    /// The identifier without its first segment
    pub fn tail(&self) -> Ident {
        Ident {
            parts: self.parts[1..].to_vec(),
            span: self.span,
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}

impl From<&str> for Ident {
    fn from(name: &str) -> Self {
        Ident::new(name)
    }
}

/// SELECT statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectStatement {
    /// Select list (columns or expressions)
    pub columns: Vec<SelectItem>,
    /// FROM clause
    pub from: FromClause,
    /// WHERE clause
    pub where_clause: Option<Expr>,
    /// GROUP BY clause
    pub group_by: Vec<Expr>,
    /// HAVING clause
    pub having: Option<Expr>,
    /// ORDER BY clause
    pub order_by: Vec<OrderByItem>,
    pub span: Span,
}

impl SelectStatement {
    /// `SELECT <columns> FROM <table>`
    pub fn new(columns: Vec<SelectItem>, from: FromClause) -> Self {
        Self {
            columns,
            from,
            where_clause: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            span: Span::default(),
        }
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(expr);
        self
    }

    pub fn group_by(mut self, keys: Vec<Expr>) -> Self {
        self.group_by = keys;
        self
    }

    pub fn having(mut self, expr: Expr) -> Self {
        self.having = Some(expr);
        self
    }

    pub fn order_by(mut self, expr: Expr, ascending: bool) -> Self {
        self.order_by.push(OrderByItem { expr, ascending });
        self
    }
}

/// A single item in the SELECT list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectItem {
    /// All columns (*)
    Wildcard,
    /// An expression with optional alias
    Expr { expr: Expr, alias: Option<String> },
}

impl SelectItem {
    pub fn expr(expr: Expr) -> Self {
        SelectItem::Expr { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: &str) -> Self {
        SelectItem::Expr {
            expr,
            alias: Some(alias.to_string()),
        }
    }
}

/// FROM clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FromClause {
    /// A named table, or a reverse foreign key inside a view definition
    Table { name: Ident, alias: Option<String> },
    /// A parenthesized select
    Subquery {
        select: Box<SelectStatement>,
        alias: Option<String>,
    },
    /// JOIN of two sources
    Join {
        left: Box<FromClause>,
        right: Box<FromClause>,
        join_type: JoinType,
        condition: Expr,
    },
}

impl FromClause {
    pub fn table(name: &str) -> Self {
        FromClause::Table {
            name: Ident::new(name),
            alias: None,
        }
    }

    pub fn aliased(name: &str, alias: &str) -> Self {
        FromClause::Table {
            name: Ident::new(name),
            alias: Some(alias.to_string()),
        }
    }
}

/// Type of JOIN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
}

/// ORDER BY item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByItem {
    /// Expression to order by
    pub expr: Expr,
    /// Ascending (true) or descending (false)
    pub ascending: bool,
}

/// INSERT statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertStatement {
    /// Target table name
    pub table: Ident,
    /// Column names (optional)
    pub columns: Option<Vec<Ident>>,
    /// Values to insert
    pub values: Vec<Vec<Expr>>,
}

/// UPDATE statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStatement {
    /// Target table name
    pub table: Ident,
    /// SET clause (column = value pairs)
    pub assignments: Vec<Assignment>,
    /// WHERE clause
    pub where_clause: Option<Expr>,
}

/// Column assignment (for UPDATE)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Column name
    pub column: Ident,
    /// New value
    pub value: Expr,
}

/// DELETE statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteStatement {
    /// Target table name
    pub table: Ident,
    /// WHERE clause
    pub where_clause: Option<Expr>,
}

/// CREATE TABLE statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTableStatement {
    /// Table name
    pub table: Ident,
    /// Column definitions
    pub columns: Vec<ColumnDef>,
    /// Table constraints
    pub constraints: Vec<TableConstraint>,
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: Ident,
    /// Data type
    pub data_type: DataType,
    /// NOT NULL constraint
    pub not_null: bool,
    /// UNIQUE constraint
    pub unique: bool,
    /// IMMUTABLE flag, the column cannot be updated
    pub immutable: bool,
}

impl ColumnDef {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: Ident::new(name),
            data_type,
            not_null: false,
            unique: false,
            immutable: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }
}

/// Table-level constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableConstraint {
    /// PRIMARY KEY constraint
    PrimaryKey { name: Option<Ident>, column: Ident },
    /// FOREIGN KEY constraint. The referenced column defaults to the primary
    /// key, the reverse name to `rev_<name>`.
    ForeignKey {
        name: Ident,
        column: Ident,
        ref_table: Ident,
        ref_column: Option<Ident>,
        reverse_name: Option<Ident>,
    },
    /// CHECK constraint
    Check { name: Ident, expr: Expr },
}

impl TableConstraint {
    pub fn primary_key(name: &str, column: &str) -> Self {
        TableConstraint::PrimaryKey {
            name: Some(Ident::new(name)),
            column: Ident::new(column),
        }
    }

    pub fn foreign_key(name: &str, column: &str, ref_table: &str, ref_column: &str) -> Self {
        TableConstraint::ForeignKey {
            name: Ident::new(name),
            column: Ident::new(column),
            ref_table: Ident::new(ref_table),
            ref_column: Some(Ident::new(ref_column)),
            reverse_name: None,
        }
    }

    pub fn check(name: &str, expr: Expr) -> Self {
        TableConstraint::Check {
            name: Ident::new(name),
            expr,
        }
    }
}

/// DROP TABLE statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropTableStatement {
    /// Table name
    pub table: Ident,
}

/// ALTER TABLE statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterTableStatement {
    pub table: Ident,
    pub action: AlterAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AlterAction {
    AddColumn(ColumnDef),
    DropColumn(Ident),
    AddConstraint(TableConstraint),
    /// Drops a check rule or a foreign key
    DropConstraint(Ident),
    /// Named aggregate over one reverse foreign key of the table
    AddView {
        name: Ident,
        select: Box<SelectStatement>,
    },
    DropView(Ident),
}

/// CREATE INDEX / DROP INDEX on a single column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStatement {
    pub table: Ident,
    pub column: Ident,
}

/// Expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Column, reference or view reference
    Ident(Ident),
    /// Literal carrying an already typed value
    Literal { value: Value, span: Span },
    /// Binary operation
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
        span: Span,
    },
    /// Unary operation
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expr>,
        span: Span,
    },
    /// Function or aggregator call
    Function {
        name: Ident,
        args: Vec<Expr>,
        span: Span,
    },
    /// IS NULL / IS NOT NULL
    IsNull {
        expr: Box<Expr>,
        negated: bool,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Ident(ident) => ident.span,
            Expr::Literal { span, .. }
            | Expr::BinaryOp { span, .. }
            | Expr::UnaryOp { span, .. }
            | Expr::Function { span, .. }
            | Expr::IsNull { span, .. } => *span,
        }
    }

    pub fn ident(name: &str) -> Expr {
        Expr::Ident(Ident::new(name))
    }

    pub fn literal(value: impl Into<Value>) -> Expr {
        Expr::Literal {
            value: value.into(),
            span: Span::default(),
        }
    }

    pub fn int(value: i64) -> Expr {
        Expr::literal(value)
    }

    pub fn float(value: f64) -> Expr {
        Expr::literal(value)
    }

    pub fn string(value: &str) -> Expr {
        Expr::literal(value)
    }

    pub fn boolean(value: bool) -> Expr {
        Expr::literal(value)
    }

    pub fn null() -> Expr {
        Expr::literal(Value::Null)
    }

    pub fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Expr {
        let span = left.span().union(&right.span());
        Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
            span,
        }
    }

    pub fn unary(op: UnaryOperator, expr: Expr) -> Expr {
        let span = expr.span();
        Expr::UnaryOp {
            op,
            expr: Box::new(expr),
            span,
        }
    }

    pub fn func(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Function {
            name: Ident::new(name),
            args,
            span: Span::default(),
        }
    }

    pub fn is_null(expr: Expr, negated: bool) -> Expr {
        let span = expr.span();
        Expr::IsNull {
            expr: Box::new(expr),
            negated,
            span,
        }
    }

    /// Replaces the span of this node
    pub fn at(mut self, new_span: Span) -> Expr {
        match &mut self {
            Expr::Ident(ident) => ident.span = new_span,
            Expr::Literal { span, .. }
            | Expr::BinaryOp { span, .. }
            | Expr::UnaryOp { span, .. }
            | Expr::Function { span, .. }
            | Expr::IsNull { span, .. } => *span = new_span,
        }
        self
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ident(ident) => write!(f, "{}", ident),
            Expr::Literal { value, .. } => match value {
                Value::String(s) => write!(f, "'{}'", s),
                other => write!(f, "{}", other),
            },
            Expr::BinaryOp {
                left, op, right, ..
            } => write!(f, "{} {} {}", Nested(left), op, Nested(right)),
            Expr::UnaryOp { op, expr, .. } => match op {
                UnaryOperator::Not => write!(f, "not {}", Nested(expr)),
                UnaryOperator::Minus => write!(f, "-{}", Nested(expr)),
            },
            Expr::Function { name, args, .. } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", name, args.join(", "))
            }
            Expr::IsNull { expr, negated, .. } => {
                if *negated {
                    write!(f, "{} is not null", Nested(expr))
                } else {
                    write!(f, "{} is null", Nested(expr))
                }
            }
        }
    }
}

/// Parenthesizes compound operands when printing
struct Nested<'a>(&'a Expr);

impl fmt::Display for Nested<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Expr::BinaryOp { .. } | Expr::IsNull { .. } => write!(f, "({})", self.0),
            other => write!(f, "{}", other),
        }
    }
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    // Comparison
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    // Logical
    And,
    Or,
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOperator {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::Neq
                | BinaryOperator::Lt
                | BinaryOperator::Gt
                | BinaryOperator::Lte
                | BinaryOperator::Gte
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::Neq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::Gt => ">",
            BinaryOperator::Lte => "<=",
            BinaryOperator::Gte => ">=",
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
        };
        write!(f, "{}", symbol)
    }
}

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    /// NOT
    Not,
    /// - (negation)
    Minus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_segments() {
        let ident = Ident::new("fk_a.fk_b.b");
        assert_eq!(ident.head(), "fk_a");
        assert_eq!(ident.last(), "b");
        assert!(!ident.is_simple());
        assert_eq!(ident.tail().to_string(), "fk_b.b");
    }

    #[test]
    fn test_expr_display() {
        let expr = Expr::binary(
            Expr::binary(Expr::ident("fk_a.b"), BinaryOperator::Add, Expr::ident("fk_a.c")),
            BinaryOperator::Gt,
            Expr::int(0),
        );
        assert_eq!(expr.to_string(), "(fk_a.b + fk_a.c) > 0");
        assert_eq!(
            Expr::func("sum", vec![Expr::ident("b")]).to_string(),
            "sum(b)"
        );
        assert_eq!(Expr::string("x").to_string(), "'x'");
    }

    #[test]
    fn test_binary_span_covers_operands() {
        let expr = Expr::binary(
            Expr::ident("a").at(Span::new(3, 4)),
            BinaryOperator::Eq,
            Expr::int(1).at(Span::new(7, 8)),
        );
        assert_eq!(expr.span(), Span::new(3, 8));
    }
}
