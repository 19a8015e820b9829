// Result Schema
//
// Backend field descriptors and their mapping onto the generic column-type
// taxonomy reported through cursor metadata.

use std::collections::HashMap;
use std::fmt;
use once_cell::sync::Lazy;
use serde::{Serialize, Deserialize};

use crate::types::error::CoercionError;

/// Backend-declared type of a result field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    String,
    Bytes,
    Int64,
    Float64,
    Numeric,
    BigNumeric,
    Bool,
    Timestamp,
    Datetime,
    Date,
    Time,
    Geography,
    Json,
    Interval,
    Record,
}

/// Type names accepted from the backend, including legacy aliases
static FIELD_KIND_NAMES: Lazy<HashMap<&'static str, FieldKind>> = Lazy::new(|| {
    HashMap::from([
        ("STRING", FieldKind::String),
        ("BYTES", FieldKind::Bytes),
        ("INTEGER", FieldKind::Int64),
        ("INT64", FieldKind::Int64),
        ("FLOAT", FieldKind::Float64),
        ("FLOAT64", FieldKind::Float64),
        ("NUMERIC", FieldKind::Numeric),
        ("DECIMAL", FieldKind::Numeric),
        ("BIGNUMERIC", FieldKind::BigNumeric),
        ("BIGDECIMAL", FieldKind::BigNumeric),
        ("BOOLEAN", FieldKind::Bool),
        ("BOOL", FieldKind::Bool),
        ("TIMESTAMP", FieldKind::Timestamp),
        ("DATETIME", FieldKind::Datetime),
        ("DATE", FieldKind::Date),
        ("TIME", FieldKind::Time),
        ("GEOGRAPHY", FieldKind::Geography),
        ("JSON", FieldKind::Json),
        ("INTERVAL", FieldKind::Interval),
        ("RECORD", FieldKind::Record),
        ("STRUCT", FieldKind::Record),
    ])
});

impl FieldKind {
    /// Resolve a backend type name (case-insensitive)
    pub fn from_name(name: &str) -> Result<Self, CoercionError> {
        FIELD_KIND_NAMES
            .get(name.to_uppercase().as_str())
            .copied()
            .ok_or_else(|| CoercionError::UnknownType(name.to_string()))
    }

    /// Canonical backend type name
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "STRING",
            FieldKind::Bytes => "BYTES",
            FieldKind::Int64 => "INT64",
            FieldKind::Float64 => "FLOAT64",
            FieldKind::Numeric => "NUMERIC",
            FieldKind::BigNumeric => "BIGNUMERIC",
            FieldKind::Bool => "BOOL",
            FieldKind::Timestamp => "TIMESTAMP",
            FieldKind::Datetime => "DATETIME",
            FieldKind::Date => "DATE",
            FieldKind::Time => "TIME",
            FieldKind::Geography => "GEOGRAPHY",
            FieldKind::Json => "JSON",
            FieldKind::Interval => "INTERVAL",
            FieldKind::Record => "STRUCT",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Field mode as declared by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FieldMode {
    #[default]
    Nullable,
    Required,
    Repeated,
}

/// Generic column-type taxonomy exposed through cursor metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Double,
    Boolean,
    BigInt,
    Varchar,
    Timestamp,
    Date,
    Time,
    Numeric,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Double => "DOUBLE",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Varchar => "VARCHAR",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Date => "DATE",
            ColumnType::Time => "TIME",
            ColumnType::Numeric => "NUMERIC",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One field of a result schema. Record fields carry their sub-fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub mode: FieldMode,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl Field {
    /// Create a nullable scalar field
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Field {
            name: name.into(),
            kind,
            mode: FieldMode::Nullable,
            fields: Vec::new(),
        }
    }

    /// Create a nullable record field with the given sub-fields
    pub fn record(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Field {
            name: name.into(),
            kind: FieldKind::Record,
            mode: FieldMode::Nullable,
            fields,
        }
    }

    /// Mark the field as an array of its kind
    pub fn repeated(mut self) -> Self {
        self.mode = FieldMode::Repeated;
        self
    }

    /// Mark the field as non-nullable
    pub fn required(mut self) -> Self {
        self.mode = FieldMode::Required;
        self
    }

    pub fn is_repeated(&self) -> bool {
        self.mode == FieldMode::Repeated
    }

    pub fn is_nullable(&self) -> bool {
        self.mode == FieldMode::Nullable
    }

    /// The same field with the repetition stripped, used for array elements
    pub fn element(&self) -> Field {
        Field {
            mode: FieldMode::Nullable,
            ..self.clone()
        }
    }

    /// Backend type name, `ARRAY<...>` for repeated fields
    pub fn type_name(&self) -> String {
        if self.is_repeated() {
            format!("ARRAY<{}>", self.kind.name())
        } else {
            self.kind.name().to_string()
        }
    }

    /// Authoritative column-type mapping, independent of row values
    pub fn column_type(&self) -> ColumnType {
        if self.is_repeated() {
            return ColumnType::Varchar;
        }
        match self.kind {
            FieldKind::Float64 => ColumnType::Double,
            FieldKind::Bool => ColumnType::Boolean,
            FieldKind::Int64 => ColumnType::BigInt,
            FieldKind::Timestamp | FieldKind::Datetime => ColumnType::Timestamp,
            FieldKind::Date => ColumnType::Date,
            FieldKind::Time => ColumnType::Time,
            FieldKind::Numeric | FieldKind::BigNumeric => ColumnType::Numeric,
            FieldKind::String
            | FieldKind::Bytes
            | FieldKind::Geography
            | FieldKind::Json
            | FieldKind::Interval
            | FieldKind::Record => ColumnType::Varchar,
        }
    }
}
