// Cell and Value Types
//
// `Cell` is the raw, backend-typed value of one column in one row as it
// arrives in a result page. `Value` is the typed object a cell coerces to.

use std::fmt;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Serialize, Deserialize};

/// Raw cell as delivered by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cell {
    Null,
    /// Scalar value in the backend's textual wire form
    Scalar(String),
    /// Elements of a repeated field
    Array(Vec<Cell>),
    /// Sub-field values of a record, in schema order
    Record(Vec<Cell>),
}

impl Cell {
    pub fn scalar(value: impl Into<String>) -> Self {
        Cell::Scalar(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Short description used in error messages
    pub(crate) fn describe(&self) -> String {
        match self {
            Cell::Null => "NULL".to_string(),
            Cell::Scalar(s) => s.clone(),
            Cell::Array(items) => format!("array of {} elements", items.len()),
            Cell::Record(fields) => format!("record of {} fields", fields.len()),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Scalar(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Scalar(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Scalar(value.to_string())
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Scalar(value.to_string())
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}

/// Typed object form of a cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Numeric(BigDecimal),
    /// Strings, bytes (base64 text), geography, JSON, intervals, and the JSON
    /// rendering of arrays and records
    String(String),
    Timestamp(DateTime<Utc>),
    Datetime(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int64(i) => write!(f, "{}", i),
            Value::Float64(fl) => write!(f, "{}", fl),
            Value::Numeric(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{}", s),
            Value::Timestamp(ts) => write!(f, "{}", ts),
            Value::Datetime(dt) => write!(f, "{}", dt),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
        }
    }
}
