// Type Coercion Module
//
// Backend schema descriptors, raw cells, and the pure conversions from cells
// to typed values and canonical strings.

pub mod cell;
pub mod coercion;
pub mod error;
pub mod schema;
pub mod temporal;

pub use cell::{Cell, Value};
pub use coercion::TypeCoercion;
pub use error::{CoercionError, CoercionResult};
pub use schema::{ColumnType, Field, FieldKind, FieldMode};
