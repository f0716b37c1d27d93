//! Data types for LinkDB
//!
//! This module defines the column types and their comparison and coercion
//! rules.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::storage::Value;

/// Column and expression types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Variable-length character string
    Varchar,
    /// 64-bit signed integer
    Integer,
    /// Double-precision floating point
    Float,
    /// Milliseconds since the epoch
    Timestamp,
    /// Boolean type
    Boolean,
    /// String restricted to a fixed set of values
    Enum(Vec<String>),
    /// Type of the NULL literal
    Null,
}

impl DataType {
    /// Check if this type is numeric
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Float)
    }

    /// Check if this type is a string type
    pub fn is_string(&self) -> bool {
        matches!(self, DataType::Varchar | DataType::Enum(_))
    }

    /// Check if values of the two types can be ordered against each other
    pub fn is_comparable_with(&self, other: &DataType) -> bool {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            (a, b) if a.is_string() && b.is_string() => true,
            (DataType::Timestamp, DataType::Timestamp) => true,
            (DataType::Boolean, DataType::Boolean) => true,
            _ => false,
        }
    }

    /// Check if an expression of type `other` can be stored in a column of
    /// this type. Some combinations are only checked when the value is known,
    /// see [`DataType::coerce`].
    pub fn accepts(&self, other: &DataType) -> bool {
        match (self, other) {
            (_, DataType::Null) => true,
            (a, b) if a == b => true,
            (DataType::Float, DataType::Integer) => true,
            (DataType::Enum(_), DataType::Varchar) => true,
            (DataType::Float, DataType::Varchar) => true,
            (DataType::Boolean, DataType::Varchar) => true,
            _ => false,
        }
    }

    /// Convert a value into the representation stored for this type.
    ///
    /// Returns a human readable reason when the value does not fit.
    pub fn coerce(&self, value: Value) -> std::result::Result<Value, String> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (DataType::Float, Value::Integer(i)) => Ok(Value::Float(i as f64)),
            (DataType::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| format!("Invalid float '{}'.", s)),
            (DataType::Boolean, Value::String(s)) => match s.to_lowercase().as_str() {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                _ => Err(format!("Invalid boolean '{}'.", s)),
            },
            (DataType::Enum(values), Value::String(s)) => {
                if values.iter().any(|v| v == &s) {
                    Ok(Value::String(s))
                } else {
                    Err(format!("Invalid enum value '{}'.", s))
                }
            }
            (_, value) => {
                if self.matches(&value) {
                    Ok(value)
                } else {
                    Err(format!("Expected '{}' but got '{}'.", self, value.type_name()))
                }
            }
        }
    }

    /// Check if a non-null value has this type
    pub fn matches(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (DataType::Varchar, Value::String(_))
                | (DataType::Enum(_), Value::String(_))
                | (DataType::Integer, Value::Integer(_))
                | (DataType::Float, Value::Float(_))
                | (DataType::Timestamp, Value::Timestamp(_))
                | (DataType::Boolean, Value::Boolean(_))
                | (_, Value::Null)
        )
    }

    /// Result type of arithmetic over two numeric types
    pub fn numeric_result(&self, other: &DataType) -> DataType {
        match (self, other) {
            (DataType::Integer, DataType::Integer) => DataType::Integer,
            _ => DataType::Float,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Varchar => write!(f, "varchar"),
            DataType::Integer => write!(f, "integer"),
            DataType::Float => write!(f, "float"),
            DataType::Timestamp => write!(f, "timestamp"),
            DataType::Boolean => write!(f, "boolean"),
            DataType::Enum(values) => {
                let quoted: Vec<String> = values.iter().map(|v| format!("'{}'", v)).collect();
                write!(f, "enum({})", quoted.join(", "))
            }
            DataType::Null => write!(f, "null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_comparison() {
        assert!(DataType::Integer.is_comparable_with(&DataType::Float));
        assert!(DataType::Varchar.is_comparable_with(&DataType::Enum(vec!["a".into()])));
        assert!(!DataType::Integer.is_comparable_with(&DataType::Varchar));
        assert!(!DataType::Null.is_comparable_with(&DataType::Integer));
    }

    #[test]
    fn test_type_accepts() {
        assert!(DataType::Integer.accepts(&DataType::Integer));
        assert!(DataType::Integer.accepts(&DataType::Null));
        assert!(DataType::Float.accepts(&DataType::Integer));
        assert!(!DataType::Integer.accepts(&DataType::Float));
        assert!(!DataType::Varchar.accepts(&DataType::Integer));
        assert!(!DataType::Timestamp.accepts(&DataType::Integer));
    }

    #[test]
    fn test_coerce() {
        let kind = DataType::Enum(vec!["x".to_string(), "y".to_string()]);
        assert_eq!(kind.coerce(Value::from("x")), Ok(Value::from("x")));
        assert_eq!(
            kind.coerce(Value::from("z")),
            Err("Invalid enum value 'z'.".to_string())
        );
        assert_eq!(
            DataType::Float.coerce(Value::Integer(2)),
            Ok(Value::Float(2.0))
        );
        assert!(DataType::Float.coerce(Value::from("x")).is_err());
        assert_eq!(
            DataType::Boolean.coerce(Value::from("TRUE")),
            Ok(Value::Boolean(true))
        );
        assert_eq!(DataType::Integer.coerce(Value::Null), Ok(Value::Null));
    }

    #[test]
    fn test_display() {
        assert_eq!(DataType::Integer.to_string(), "integer");
        assert_eq!(
            DataType::Enum(vec!["a".into(), "b".into()]).to_string(),
            "enum('a', 'b')"
        );
    }
}
