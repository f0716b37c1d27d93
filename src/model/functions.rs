//! Scalar functions and aggregators
//!
//! Scalar functions return null when any argument is null. Aggregators skip
//! nulls; `count` counts non-null arguments, so `count(1)` counts rows.

use std::cmp::Ordering;

use crate::catalog::DataType;
use crate::error::{Error, Result, Span};
use crate::storage::Value;

/// Built-in scalar function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Length,
    Upper,
    Lower,
    Abs,
    Concat,
    Substr,
}

impl Function {
    pub fn lookup(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "length" => Some(Function::Length),
            "upper" => Some(Function::Upper),
            "lower" => Some(Function::Lower),
            "abs" => Some(Function::Abs),
            "concat" => Some(Function::Concat),
            "substr" => Some(Function::Substr),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Length => "length",
            Function::Upper => "upper",
            Function::Lower => "lower",
            Function::Abs => "abs",
            Function::Concat => "concat",
            Function::Substr => "substr",
        }
    }

    /// Checks the argument types and returns the result type
    pub fn result_type(&self, args: &[DataType], span: Span) -> Result<DataType> {
        let arity_ok = match self {
            Function::Concat => !args.is_empty(),
            Function::Substr => args.len() == 2 || args.len() == 3,
            _ => args.len() == 1,
        };
        if !arity_ok {
            return Err(Error::model_at(
                format!("Invalid number of arguments for function '{}'.", self.name()),
                span,
            ));
        }
        let expect = |expected: DataType, got: &DataType| -> Result<()> {
            let ok = match expected {
                DataType::Varchar => got.is_string(),
                DataType::Integer => *got == DataType::Integer,
                _ => got.is_numeric(),
            };
            if ok || *got == DataType::Null {
                Ok(())
            } else {
                Err(Error::model_at(
                    format!(
                        "Expected '{}' but got '{}' for '{}'.",
                        expected,
                        got,
                        self.name()
                    ),
                    span,
                ))
            }
        };
        match self {
            Function::Length => {
                expect(DataType::Varchar, &args[0])?;
                Ok(DataType::Integer)
            }
            Function::Upper | Function::Lower => {
                expect(DataType::Varchar, &args[0])?;
                Ok(DataType::Varchar)
            }
            Function::Abs => {
                expect(DataType::Float, &args[0])?;
                Ok(match args[0] {
                    DataType::Null => DataType::Integer,
                    ref t => t.clone(),
                })
            }
            Function::Concat => Ok(DataType::Varchar),
            Function::Substr => {
                expect(DataType::Varchar, &args[0])?;
                for arg in &args[1..] {
                    expect(DataType::Integer, arg)?;
                }
                Ok(DataType::Varchar)
            }
        }
    }

    pub fn apply(&self, args: &[Value]) -> Value {
        if args.iter().any(Value::is_null) {
            return Value::Null;
        }
        match self {
            Function::Length => args[0]
                .as_string()
                .map(|s| Value::Integer(s.chars().count() as i64))
                .unwrap_or(Value::Null),
            Function::Upper => args[0]
                .as_string()
                .map(|s| Value::String(s.to_uppercase()))
                .unwrap_or(Value::Null),
            Function::Lower => args[0]
                .as_string()
                .map(|s| Value::String(s.to_lowercase()))
                .unwrap_or(Value::Null),
            Function::Abs => match &args[0] {
                Value::Integer(i) => i.checked_abs().map(Value::Integer).unwrap_or(Value::Null),
                Value::Float(f) => Value::Float(f.abs()),
                _ => Value::Null,
            },
            Function::Concat => Value::String(args.iter().map(|v| v.to_string()).collect()),
            Function::Substr => {
                let (Some(s), Some(start)) = (args[0].as_string(), args[1].as_i64()) else {
                    return Value::Null;
                };
                // 1-based start
                let skip = (start.max(1) - 1) as usize;
                let chars = s.chars().skip(skip);
                match args.get(2).and_then(Value::as_i64) {
                    Some(len) => Value::String(chars.take(len.max(0) as usize).collect()),
                    None => Value::String(chars.collect()),
                }
            }
        }
    }
}

/// Aggregate function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Sum,
    Count,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn lookup(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "sum" => Some(AggregateFunction::Sum),
            "count" => Some(AggregateFunction::Count),
            "avg" => Some(AggregateFunction::Avg),
            "min" => Some(AggregateFunction::Min),
            "max" => Some(AggregateFunction::Max),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "sum",
            AggregateFunction::Count => "count",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }

    pub fn result_type(&self, arg: &DataType, span: Span) -> Result<DataType> {
        let numeric = || {
            if arg.is_numeric() || *arg == DataType::Null {
                Ok(())
            } else {
                Err(Error::model_at(
                    format!("Expected 'float' but got '{}' for '{}'.", arg, self.name()),
                    span,
                ))
            }
        };
        match self {
            AggregateFunction::Sum => {
                numeric()?;
                Ok(match arg {
                    DataType::Float => DataType::Float,
                    _ => DataType::Integer,
                })
            }
            AggregateFunction::Count => Ok(DataType::Integer),
            AggregateFunction::Avg => {
                numeric()?;
                Ok(DataType::Float)
            }
            AggregateFunction::Min | AggregateFunction::Max => Ok(arg.clone()),
        }
    }

    /// Fresh running state for one group
    pub fn create(&self, result_type: &DataType) -> Aggregator {
        match self {
            AggregateFunction::Sum => Aggregator::Sum {
                total: match result_type {
                    DataType::Float => Value::Float(0.0),
                    _ => Value::Integer(0),
                },
            },
            AggregateFunction::Count => Aggregator::Count(0),
            AggregateFunction::Avg => Aggregator::Avg { total: 0.0, count: 0 },
            AggregateFunction::Min => Aggregator::Extremum {
                keep: Ordering::Less,
                current: None,
            },
            AggregateFunction::Max => Aggregator::Extremum {
                keep: Ordering::Greater,
                current: None,
            },
        }
    }
}

/// Running state of one aggregate over one group
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregator {
    Sum { total: Value },
    Count(i64),
    Avg { total: f64, count: i64 },
    /// Keeps the value comparing as `keep` against the current one
    Extremum { keep: Ordering, current: Option<Value> },
}

impl Aggregator {
    pub fn update(&mut self, value: &Value) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        match self {
            Aggregator::Sum { total } => {
                *total = total.add(value).ok_or_else(|| {
                    Error::rule("sum", format!("Numeric overflow adding '{}'.", value))
                })?;
            }
            Aggregator::Count(n) => *n += 1,
            Aggregator::Avg { total, count } => {
                *total += value.as_f64().unwrap_or(0.0);
                *count += 1;
            }
            Aggregator::Extremum { keep, current } => {
                let replace = match current {
                    None => true,
                    Some(c) => value.compare(c) == Some(*keep),
                };
                if replace {
                    *current = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    pub fn finish(&self) -> Value {
        match self {
            Aggregator::Sum { total } => total.clone(),
            Aggregator::Count(n) => Value::Integer(*n),
            Aggregator::Avg { total, count } => {
                if *count == 0 {
                    Value::Null
                } else {
                    Value::Float(total / *count as f64)
                }
            }
            Aggregator::Extremum { current, .. } => current.clone().unwrap_or(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(function: AggregateFunction, arg: DataType, values: &[Value]) -> Value {
        let result_type = function.result_type(&arg, Span::default()).unwrap();
        let mut aggregator = function.create(&result_type);
        for v in values {
            aggregator.update(v).unwrap();
        }
        aggregator.finish()
    }

    #[test]
    fn test_sum_skips_nulls() {
        let values = [Value::Integer(1), Value::Null, Value::Integer(3)];
        assert_eq!(
            run(AggregateFunction::Sum, DataType::Integer, &values),
            Value::Integer(4)
        );
        assert_eq!(
            run(AggregateFunction::Sum, DataType::Float, &[Value::Null]),
            Value::Float(0.0)
        );
    }

    #[test]
    fn test_count_avg_min_max() {
        let values = [Value::Integer(5), Value::Null, Value::Integer(2), Value::Integer(8)];
        assert_eq!(
            run(AggregateFunction::Count, DataType::Integer, &values),
            Value::Integer(3)
        );
        assert_eq!(
            run(AggregateFunction::Avg, DataType::Integer, &values),
            Value::Float(5.0)
        );
        assert_eq!(
            run(AggregateFunction::Min, DataType::Integer, &values),
            Value::Integer(2)
        );
        assert_eq!(
            run(AggregateFunction::Max, DataType::Integer, &values),
            Value::Integer(8)
        );
        assert_eq!(
            run(AggregateFunction::Max, DataType::Integer, &[Value::Null]),
            Value::Null
        );
    }

    #[test]
    fn test_aggregate_type_errors() {
        let err = AggregateFunction::Sum
            .result_type(&DataType::Varchar, Span::new(0, 6))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "[0, 6]: Expected 'float' but got 'varchar' for 'sum'."
        );
        assert_eq!(
            AggregateFunction::Min
                .result_type(&DataType::Varchar, Span::default())
                .unwrap(),
            DataType::Varchar
        );
    }

    #[test]
    fn test_scalar_functions() {
        assert_eq!(
            Function::Length.apply(&[Value::from("héllo")]),
            Value::Integer(5)
        );
        assert_eq!(Function::Upper.apply(&[Value::from("ab")]), Value::from("AB"));
        assert_eq!(Function::Abs.apply(&[Value::Integer(-3)]), Value::Integer(3));
        assert_eq!(
            Function::Concat.apply(&[Value::from("a"), Value::Integer(1)]),
            Value::from("a1")
        );
        assert_eq!(
            Function::Substr.apply(&[Value::from("abcdef"), Value::Integer(2), Value::Integer(3)]),
            Value::from("bcd")
        );
        assert_eq!(Function::Lower.apply(&[Value::Null]), Value::Null);
    }

    #[test]
    fn test_function_arity() {
        let err = Function::Length
            .result_type(&[DataType::Varchar, DataType::Varchar], Span::default())
            .unwrap_err();
        assert!(err.to_string().contains("Invalid number of arguments"));
        assert!(Function::lookup("UPPER").is_some());
        assert!(Function::lookup("sum").is_none());
    }
}
