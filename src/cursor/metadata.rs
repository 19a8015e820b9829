// Result Metadata
//
// Column descriptors derived from the backend schema.

use crate::common::types::ColumnIndex;
use crate::cursor::error::{CursorError, CursorResult};
use crate::types::{ColumnType, Field};

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    /// Backend type name, `ARRAY<..>` for repeated fields
    pub type_name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub field: Field,
}

impl ColumnMeta {
    pub fn from_field(field: &Field) -> Self {
        ColumnMeta {
            name: field.name.clone(),
            type_name: field.type_name(),
            column_type: field.column_type(),
            nullable: field.is_nullable(),
            field: field.clone(),
        }
    }
}

/// Ordered column descriptors; names need not be unique
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultMetadata {
    columns: Vec<ColumnMeta>,
}

impl ResultMetadata {
    pub fn from_schema(schema: &[Field]) -> Self {
        ResultMetadata {
            columns: schema.iter().map(ColumnMeta::from_field).collect(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Column by 1-based index
    pub fn column(&self, index: ColumnIndex) -> CursorResult<&ColumnMeta> {
        index
            .checked_sub(1)
            .and_then(|i| self.columns.get(i))
            .ok_or(CursorError::ColumnOutOfRange {
                index,
                count: self.columns.len(),
            })
    }

    /// 1-based index of the first column whose name matches, ignoring case
    pub fn find_column(&self, label: &str) -> Option<ColumnIndex> {
        self.columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(label))
            .map(|i| i + 1)
    }

    pub fn column_name(&self, index: ColumnIndex) -> CursorResult<&str> {
        Ok(&self.column(index)?.name)
    }

    pub fn column_type(&self, index: ColumnIndex) -> CursorResult<ColumnType> {
        Ok(self.column(index)?.column_type)
    }

    pub fn type_name(&self, index: ColumnIndex) -> CursorResult<&str> {
        Ok(&self.column(index)?.type_name)
    }

    pub fn is_nullable(&self, index: ColumnIndex) -> CursorResult<bool> {
        Ok(self.column(index)?.nullable)
    }
}
