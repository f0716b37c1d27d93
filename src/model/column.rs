//! Compiled column accessors
//!
//! A [`ColumnMeta`] produces one value from a row of the table it was
//! compiled against. Rows of joined tables are concatenated, so accessors
//! compiled for the right side are shifted by the width of the left side.

use std::sync::Arc;

use super::dependencies::TableDependencies;
use super::functions::{AggregateFunction, Function};
use super::references::ReferencedTable;
use crate::catalog::DataType;
use crate::error::{Error, Result};
use crate::executor::context::{EvalContext, Resources};
use crate::sql::ast::{BinaryOperator, UnaryOperator};
use crate::storage::Value;

/// Stored slot, read directly or through a reference
#[derive(Debug, Clone)]
pub struct IndexColumn {
    pub name: String,
    /// Position inside the row of the table that owns the column
    pub index: usize,
    /// Start of the owning table's row inside the evaluated row
    pub offset: usize,
    pub data_type: DataType,
    /// Reference producing the owning row from the evaluated row
    pub reference: Option<Arc<ReferencedTable>>,
    pub dependencies: TableDependencies,
}

impl IndexColumn {
    fn value(&self, row: &[Value], res: &Resources<'_>, ctx: EvalContext<'_>) -> Result<Value> {
        let base = row.get(self.offset..).unwrap_or(&[]);
        match &self.reference {
            Some(reference) => {
                let target = reference.row(base, res, ctx)?;
                Ok(target.get(self.index).cloned().unwrap_or(Value::Null))
            }
            None => Ok(base.get(self.index).cloned().unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedKind {
    Binary(BinaryOperator),
    Unary(UnaryOperator),
    Function(Function),
    IsNull { negated: bool },
}

/// Expression over child accessors
#[derive(Debug, Clone)]
pub struct DerivedColumn {
    pub kind: DerivedKind,
    pub args: Vec<ColumnMeta>,
    pub data_type: DataType,
}

impl DerivedColumn {
    fn value(&self, row: &[Value], res: &Resources<'_>, ctx: EvalContext<'_>) -> Result<Value> {
        match self.kind {
            DerivedKind::Binary(BinaryOperator::And) => {
                let left = self.args[0].value(row, res, ctx)?;
                if left.as_bool() == Some(false) {
                    return Ok(Value::Boolean(false));
                }
                let right = self.args[1].value(row, res, ctx)?;
                Ok(match (left.as_bool(), right.as_bool()) {
                    (_, Some(false)) => Value::Boolean(false),
                    (Some(true), Some(true)) => Value::Boolean(true),
                    _ => Value::Null,
                })
            }
            DerivedKind::Binary(BinaryOperator::Or) => {
                let left = self.args[0].value(row, res, ctx)?;
                if left.as_bool() == Some(true) {
                    return Ok(Value::Boolean(true));
                }
                let right = self.args[1].value(row, res, ctx)?;
                Ok(match (left.as_bool(), right.as_bool()) {
                    (_, Some(true)) => Value::Boolean(true),
                    (Some(false), Some(false)) => Value::Boolean(false),
                    _ => Value::Null,
                })
            }
            DerivedKind::Binary(op) => {
                let left = self.args[0].value(row, res, ctx)?;
                let right = self.args[1].value(row, res, ctx)?;
                binary(op, &left, &right)
            }
            DerivedKind::Unary(op) => {
                let value = self.args[0].value(row, res, ctx)?;
                Ok(match (op, value) {
                    (UnaryOperator::Not, Value::Boolean(b)) => Value::Boolean(!b),
                    (UnaryOperator::Minus, Value::Integer(i)) => i
                        .checked_neg()
                        .map(Value::Integer)
                        .ok_or_else(|| overflow(format!("-{}", i)))?,
                    (UnaryOperator::Minus, Value::Float(f)) => Value::Float(-f),
                    _ => Value::Null,
                })
            }
            DerivedKind::Function(function) => {
                let args = self
                    .args
                    .iter()
                    .map(|a| a.value(row, res, ctx))
                    .collect::<Result<Vec<_>>>()?;
                Ok(function.apply(&args))
            }
            DerivedKind::IsNull { negated } => {
                let value = self.args[0].value(row, res, ctx)?;
                Ok(Value::Boolean(value.is_null() != negated))
            }
        }
    }
}

/// Non-logical binary operator; null if either side is null.
///
/// Integer overflow is an error, division by zero yields null.
fn binary(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let result = match op {
        BinaryOperator::Add => left.add(right),
        BinaryOperator::Sub => left.sub(right),
        BinaryOperator::Mul => left.mul(right),
        BinaryOperator::Div => left.div(right),
        BinaryOperator::Mod => left.rem(right),
        _ => left.compare(right).map(|ordering| {
            Value::Boolean(match op {
                BinaryOperator::Eq => ordering.is_eq(),
                BinaryOperator::Neq => ordering.is_ne(),
                BinaryOperator::Lt => ordering.is_lt(),
                BinaryOperator::Gt => ordering.is_gt(),
                BinaryOperator::Lte => ordering.is_le(),
                _ => ordering.is_ge(),
            })
        }),
    };
    match (result, left, right) {
        (Some(value), _, _) => Ok(value),
        (None, Value::Integer(_), Value::Integer(b)) if !op.is_comparison() && *b != 0 => {
            Err(overflow(format!("{} {} {}", left, op, right)))
        }
        (None, _, _) => Ok(Value::Null),
    }
}

fn overflow(expr: String) -> Error {
    Error::rule("overflow", format!("Numeric overflow in '{}'.", expr))
}

/// Aggregate output slot of an aggregation table
#[derive(Debug, Clone)]
pub struct AggrColumn {
    pub function: AggregateFunction,
    /// Evaluated against the rows being aggregated
    pub inner: Box<ColumnMeta>,
    /// Slot in the aggregated row, after the key columns
    pub index: usize,
    pub data_type: DataType,
}

#[derive(Debug, Clone)]
pub enum ColumnMeta {
    Index(IndexColumn),
    Literal(Value, DataType),
    Derived(DerivedColumn),
    Aggr(AggrColumn),
}

impl ColumnMeta {
    pub fn literal(value: Value) -> Self {
        let data_type = match &value {
            Value::Null => DataType::Null,
            Value::Boolean(_) => DataType::Boolean,
            Value::Integer(_) => DataType::Integer,
            Value::Float(_) => DataType::Float,
            Value::String(_) => DataType::Varchar,
            Value::Timestamp(_) => DataType::Timestamp,
        };
        ColumnMeta::Literal(value, data_type)
    }

    pub fn data_type(&self) -> &DataType {
        match self {
            ColumnMeta::Index(c) => &c.data_type,
            ColumnMeta::Literal(_, t) => t,
            ColumnMeta::Derived(c) => &c.data_type,
            ColumnMeta::Aggr(c) => &c.data_type,
        }
    }

    /// Tables read when evaluating this column
    pub fn dependencies(&self) -> TableDependencies {
        match self {
            ColumnMeta::Index(c) => c.dependencies.clone(),
            ColumnMeta::Literal(..) => TableDependencies::new(),
            ColumnMeta::Derived(c) => c
                .args
                .iter()
                .fold(TableDependencies::new(), |acc, a| acc.merged(&a.dependencies())),
            ColumnMeta::Aggr(c) => c.inner.dependencies(),
        }
    }

    /// Moves the accessor right by `n` slots of the evaluated row
    pub fn shift(&mut self, n: usize) {
        match self {
            ColumnMeta::Index(c) => c.offset += n,
            ColumnMeta::Literal(..) => {}
            ColumnMeta::Derived(c) => c.args.iter_mut().for_each(|a| a.shift(n)),
            ColumnMeta::Aggr(c) => c.index += n,
        }
    }

    pub fn value(&self, row: &[Value], res: &Resources<'_>, ctx: EvalContext<'_>) -> Result<Value> {
        match self {
            ColumnMeta::Index(c) => c.value(row, res, ctx),
            ColumnMeta::Literal(v, _) => Ok(v.clone()),
            ColumnMeta::Derived(c) => c.value(row, res, ctx),
            ColumnMeta::Aggr(c) => Ok(row.get(c.index).cloned().unwrap_or(Value::Null)),
        }
    }

    /// Evaluates a predicate; only `true` passes
    pub fn test(&self, row: &[Value], res: &Resources<'_>, ctx: EvalContext<'_>) -> Result<bool> {
        Ok(self.value(row, res, ctx)?.as_bool() == Some(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_binary_null_and_division() {
        assert_eq!(
            binary(BinaryOperator::Add, &Value::Integer(1), &Value::Null).unwrap(),
            Value::Null
        );
        assert_eq!(
            binary(BinaryOperator::Div, &Value::Integer(1), &Value::Integer(0)).unwrap(),
            Value::Null
        );
        assert_eq!(
            binary(BinaryOperator::Mod, &Value::Float(1.0), &Value::Integer(0)).unwrap(),
            Value::Null
        );
        assert_eq!(
            binary(BinaryOperator::Eq, &Value::Integer(1), &Value::Float(1.0)).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            binary(BinaryOperator::Add, &Value::from("a"), &Value::from("b")).unwrap(),
            Value::from("ab")
        );
    }

    #[test]
    fn test_binary_integer_overflow() {
        let max = Value::Integer(i64::MAX);
        let min = Value::Integer(i64::MIN);

        let err = binary(BinaryOperator::Add, &max, &Value::Integer(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rule);
        assert_eq!(
            err.to_string(),
            format!("Numeric overflow in '{} + 1'.", i64::MAX)
        );
        assert!(binary(BinaryOperator::Sub, &min, &Value::Integer(1)).is_err());
        assert!(binary(BinaryOperator::Mul, &max, &Value::Integer(2)).is_err());
        assert!(binary(BinaryOperator::Div, &min, &Value::Integer(-1)).is_err());
        assert!(binary(BinaryOperator::Mod, &min, &Value::Integer(-1)).is_err());

        // Float arithmetic does not trap
        assert_eq!(
            binary(BinaryOperator::Add, &max, &Value::Float(1.0)).unwrap(),
            Value::Float(i64::MAX as f64 + 1.0)
        );
    }

    #[test]
    fn test_shift_moves_index_columns() {
        let mut column = ColumnMeta::Derived(DerivedColumn {
            kind: DerivedKind::Binary(BinaryOperator::Add),
            args: vec![
                ColumnMeta::Index(IndexColumn {
                    name: "b".to_string(),
                    index: 1,
                    offset: 0,
                    data_type: DataType::Integer,
                    reference: None,
                    dependencies: TableDependencies::new(),
                }),
                ColumnMeta::literal(Value::Integer(1)),
            ],
            data_type: DataType::Integer,
        });
        column.shift(2);
        let ColumnMeta::Derived(derived) = &column else {
            panic!("expected derived column");
        };
        let ColumnMeta::Index(index) = &derived.args[0] else {
            panic!("expected index column");
        };
        assert_eq!(index.offset, 2);
        assert_eq!(column.data_type(), &DataType::Integer);
    }
}
