// Type Coercion
//
// Converts raw backend cells into typed values and canonical strings. The
// conversions are pure; the only configuration is the reporting offset used to
// render TIMESTAMP cells and to anchor zone-less values when an instant is
// requested.

use std::str::FromStr;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use serde_json::{Map, Value as JsonValue};

use crate::types::cell::{Cell, Value};
use crate::types::error::{CoercionError, CoercionResult};
use crate::types::schema::{Field, FieldKind};
use crate::types::temporal;

/// Cell conversion rules shared by every cursor variant
#[derive(Debug, Clone, PartialEq)]
pub struct TypeCoercion {
    reporting_offset: FixedOffset,
}

impl Default for TypeCoercion {
    fn default() -> Self {
        Self::new()
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

fn unsupported(field: &Field, raw: &str, target: &'static str) -> CoercionError {
    CoercionError::Unsupported {
        kind: field.type_name(),
        raw: raw.to_string(),
        target,
    }
}

fn malformed(kind: FieldKind, raw: &str, reason: impl ToString) -> CoercionError {
    CoercionError::Malformed {
        kind,
        raw: raw.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse a FLOAT64 wire value, passing non-finite markers through
pub fn parse_float(raw: &str) -> CoercionResult<f64> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "nan" => Ok(f64::NAN),
        "inf" | "+inf" | "infinity" | "+infinity" => Ok(f64::INFINITY),
        "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
        other => other.parse::<f64>().map_err(|e| malformed(FieldKind::Float64, raw, e)),
    }
}

/// Parse a BOOL wire value
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Some(true),
        "false" | "f" | "0" => Some(false),
        _ => None,
    }
}

pub fn parse_decimal(raw: &str, kind: FieldKind) -> CoercionResult<BigDecimal> {
    BigDecimal::from_str(raw.trim()).map_err(|e| malformed(kind, raw, e))
}

impl TypeCoercion {
    /// Coercion reporting TIMESTAMP values in UTC
    pub fn new() -> Self {
        TypeCoercion {
            reporting_offset: utc_offset(),
        }
    }

    /// Coercion reporting TIMESTAMP values at a fixed offset
    pub fn with_reporting_offset(offset: FixedOffset) -> Self {
        TypeCoercion {
            reporting_offset: offset,
        }
    }

    pub fn reporting_offset(&self) -> FixedOffset {
        self.reporting_offset
    }

    /// Extract the scalar text of a cell. Nested cells are only legal for
    /// repeated or record fields, which callers route elsewhere.
    fn scalar<'a>(&self, cell: &'a Cell, field: &Field) -> CoercionResult<Option<&'a str>> {
        match cell {
            Cell::Null => Ok(None),
            Cell::Scalar(s) if !field.is_repeated() && field.kind != FieldKind::Record => Ok(Some(s)),
            other => Err(CoercionError::ShapeMismatch {
                field: field.name.clone(),
                reason: format!("unexpected {} for {}", other.describe(), field.type_name()),
            }),
        }
    }

    fn is_nested(field: &Field) -> bool {
        field.is_repeated() || field.kind == FieldKind::Record
    }

    /// Scalar text for a typed accessor. NULL is `None` whatever the declared
    /// type; non-null nested cells have no scalar form.
    fn typed_scalar<'a>(&self, cell: &'a Cell, field: &Field, target: &'static str) -> CoercionResult<Option<&'a str>> {
        if cell.is_null() {
            return Ok(None);
        }
        if Self::is_nested(field) {
            return Err(unsupported(field, &cell.describe(), target));
        }
        self.scalar(cell, field)
    }

    /// Canonical string form of a cell; `None` for NULL
    pub fn to_canonical_string(&self, cell: &Cell, field: &Field) -> CoercionResult<Option<String>> {
        if cell.is_null() {
            return Ok(None);
        }
        if Self::is_nested(field) {
            let json = self.to_json(cell, field)?;
            return Ok(Some(json.to_string()));
        }
        let Some(raw) = self.scalar(cell, field)? else {
            return Ok(None);
        };
        let text = match field.kind {
            FieldKind::Timestamp => {
                temporal::format_timestamp(&temporal::parse_timestamp(raw)?, &self.reporting_offset)
            }
            FieldKind::Datetime => temporal::format_datetime(&temporal::parse_datetime(raw)?),
            FieldKind::Date => temporal::format_date(&temporal::parse_date(raw)?),
            FieldKind::Time => temporal::format_time(&temporal::parse_time(raw)?),
            FieldKind::Numeric | FieldKind::BigNumeric => {
                parse_decimal(raw, field.kind)?;
                raw.trim().to_string()
            }
            _ => raw.to_string(),
        };
        Ok(Some(text))
    }

    /// JSON rendering used for arrays and records: scalars become their
    /// canonical strings, nesting is preserved.
    fn to_json(&self, cell: &Cell, field: &Field) -> CoercionResult<JsonValue> {
        if cell.is_null() {
            return Ok(JsonValue::Null);
        }
        if field.is_repeated() {
            let Cell::Array(items) = cell else {
                return Err(CoercionError::ShapeMismatch {
                    field: field.name.clone(),
                    reason: format!("expected array, found {}", cell.describe()),
                });
            };
            let element = field.element();
            let rendered = items
                .iter()
                .map(|item| self.to_json(item, &element))
                .collect::<CoercionResult<Vec<_>>>()?;
            return Ok(JsonValue::Array(rendered));
        }
        if field.kind == FieldKind::Record {
            let Cell::Record(values) = cell else {
                return Err(CoercionError::ShapeMismatch {
                    field: field.name.clone(),
                    reason: format!("expected record, found {}", cell.describe()),
                });
            };
            if values.len() != field.fields.len() {
                return Err(CoercionError::ShapeMismatch {
                    field: field.name.clone(),
                    reason: format!("record has {} values, schema declares {}", values.len(), field.fields.len()),
                });
            }
            let mut object = Map::new();
            for (sub_field, value) in field.fields.iter().zip(values) {
                object.insert(sub_field.name.clone(), self.to_json(value, sub_field)?);
            }
            return Ok(JsonValue::Object(object));
        }
        Ok(self
            .to_canonical_string(cell, field)?
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null))
    }

    /// Typed object form of a cell
    pub fn to_value(&self, cell: &Cell, field: &Field) -> CoercionResult<Value> {
        if cell.is_null() {
            return Ok(Value::Null);
        }
        if Self::is_nested(field) {
            return Ok(Value::String(self.to_json(cell, field)?.to_string()));
        }
        let Some(raw) = self.scalar(cell, field)? else {
            return Ok(Value::Null);
        };
        let value = match field.kind {
            FieldKind::Int64 => Value::Int64(raw.trim().parse::<i64>().map_err(|e| malformed(field.kind, raw, e))?),
            FieldKind::Float64 => Value::Float64(parse_float(raw)?),
            FieldKind::Numeric | FieldKind::BigNumeric => Value::Numeric(parse_decimal(raw, field.kind)?),
            FieldKind::Bool => Value::Bool(parse_bool(raw).ok_or_else(|| malformed(field.kind, raw, "expected true or false"))?),
            FieldKind::Timestamp => Value::Timestamp(temporal::parse_timestamp(raw)?),
            FieldKind::Datetime => Value::Datetime(temporal::parse_datetime(raw)?),
            FieldKind::Date => Value::Date(temporal::parse_date(raw)?),
            FieldKind::Time => Value::Time(temporal::parse_time(raw)?),
            _ => Value::String(raw.to_string()),
        };
        Ok(value)
    }

    pub fn to_i64(&self, cell: &Cell, field: &Field) -> CoercionResult<Option<i64>> {
        let Some(raw) = self.typed_scalar(cell, field, "BIGINT")? else {
            return Ok(None);
        };
        let value = match field.kind {
            FieldKind::Int64 | FieldKind::String => raw.trim().parse::<i64>().map_err(|_| unsupported(field, raw, "BIGINT"))?,
            FieldKind::Float64 => {
                let f = parse_float(raw)?;
                let truncated = f.trunc();
                // i64::MAX is not representable as f64; 2^63 is the first value out of range
                if !truncated.is_finite() || truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
                    return Err(unsupported(field, raw, "BIGINT"));
                }
                truncated as i64
            }
            FieldKind::Numeric | FieldKind::BigNumeric => {
                let d = parse_decimal(raw, field.kind)?;
                if d.with_scale(0) != d {
                    return Err(unsupported(field, raw, "BIGINT"));
                }
                d.to_i64().ok_or_else(|| unsupported(field, raw, "BIGINT"))?
            }
            FieldKind::Bool => match parse_bool(raw) {
                Some(b) => i64::from(b),
                None => return Err(malformed(field.kind, raw, "expected true or false")),
            },
            _ => return Err(unsupported(field, raw, "BIGINT")),
        };
        Ok(Some(value))
    }

    pub fn to_f64(&self, cell: &Cell, field: &Field) -> CoercionResult<Option<f64>> {
        let Some(raw) = self.typed_scalar(cell, field, "DOUBLE")? else {
            return Ok(None);
        };
        let value = match field.kind {
            FieldKind::Float64 | FieldKind::Int64 | FieldKind::Numeric | FieldKind::BigNumeric => parse_float(raw)?,
            FieldKind::String => parse_float(raw).map_err(|_| unsupported(field, raw, "DOUBLE"))?,
            FieldKind::Bool => match parse_bool(raw) {
                Some(true) => 1.0,
                Some(false) => 0.0,
                None => return Err(malformed(field.kind, raw, "expected true or false")),
            },
            _ => return Err(unsupported(field, raw, "DOUBLE")),
        };
        Ok(Some(value))
    }

    pub fn to_bool(&self, cell: &Cell, field: &Field) -> CoercionResult<Option<bool>> {
        let Some(raw) = self.typed_scalar(cell, field, "BOOLEAN")? else {
            return Ok(None);
        };
        let value = match field.kind {
            FieldKind::Bool | FieldKind::String => parse_bool(raw).ok_or_else(|| unsupported(field, raw, "BOOLEAN"))?,
            FieldKind::Int64 => raw.trim().parse::<i64>().map_err(|e| malformed(field.kind, raw, e))? != 0,
            _ => return Err(unsupported(field, raw, "BOOLEAN")),
        };
        Ok(Some(value))
    }

    pub fn to_decimal(&self, cell: &Cell, field: &Field) -> CoercionResult<Option<BigDecimal>> {
        let Some(raw) = self.typed_scalar(cell, field, "NUMERIC")? else {
            return Ok(None);
        };
        let value = match field.kind {
            FieldKind::Numeric | FieldKind::BigNumeric | FieldKind::Int64 => parse_decimal(raw, field.kind)?,
            FieldKind::Float64 => {
                if !parse_float(raw)?.is_finite() {
                    return Err(unsupported(field, raw, "NUMERIC"));
                }
                parse_decimal(raw, field.kind)?
            }
            FieldKind::String => BigDecimal::from_str(raw.trim()).map_err(|_| unsupported(field, raw, "NUMERIC"))?,
            _ => return Err(unsupported(field, raw, "NUMERIC")),
        };
        Ok(Some(value))
    }

    /// Instant of a TIMESTAMP; DATETIME and DATE are anchored at the reporting offset
    pub fn to_timestamp(&self, cell: &Cell, field: &Field) -> CoercionResult<Option<DateTime<Utc>>> {
        let Some(raw) = self.typed_scalar(cell, field, "TIMESTAMP")? else {
            return Ok(None);
        };
        let value = match field.kind {
            FieldKind::Timestamp => temporal::parse_timestamp(raw)?,
            FieldKind::Datetime => self.anchor(&temporal::parse_datetime(raw)?, field, raw)?,
            FieldKind::Date => {
                let midnight = temporal::parse_date(raw)?.and_time(NaiveTime::MIN);
                self.anchor(&midnight, field, raw)?
            }
            _ => return Err(unsupported(field, raw, "TIMESTAMP")),
        };
        Ok(Some(value))
    }

    fn anchor(&self, naive: &NaiveDateTime, field: &Field, raw: &str) -> CoercionResult<DateTime<Utc>> {
        self.reporting_offset
            .from_local_datetime(naive)
            .single()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| unsupported(field, raw, "TIMESTAMP"))
    }

    fn local(&self, ts: &DateTime<Utc>) -> NaiveDateTime {
        ts.with_timezone(&self.reporting_offset).naive_local()
    }

    pub fn to_datetime(&self, cell: &Cell, field: &Field) -> CoercionResult<Option<NaiveDateTime>> {
        let Some(raw) = self.typed_scalar(cell, field, "DATETIME")? else {
            return Ok(None);
        };
        let value = match field.kind {
            FieldKind::Datetime => temporal::parse_datetime(raw)?,
            FieldKind::Timestamp => self.local(&temporal::parse_timestamp(raw)?),
            FieldKind::Date => temporal::parse_date(raw)?.and_time(NaiveTime::MIN),
            _ => return Err(unsupported(field, raw, "DATETIME")),
        };
        Ok(Some(value))
    }

    pub fn to_date(&self, cell: &Cell, field: &Field) -> CoercionResult<Option<NaiveDate>> {
        let Some(raw) = self.typed_scalar(cell, field, "DATE")? else {
            return Ok(None);
        };
        let value = match field.kind {
            FieldKind::Date => temporal::parse_date(raw)?,
            FieldKind::Datetime => temporal::parse_datetime(raw)?.date(),
            FieldKind::Timestamp => self.local(&temporal::parse_timestamp(raw)?).date(),
            _ => return Err(unsupported(field, raw, "DATE")),
        };
        Ok(Some(value))
    }

    pub fn to_time(&self, cell: &Cell, field: &Field) -> CoercionResult<Option<NaiveTime>> {
        let Some(raw) = self.typed_scalar(cell, field, "TIME")? else {
            return Ok(None);
        };
        let value = match field.kind {
            FieldKind::Time => temporal::parse_time(raw)?,
            FieldKind::Datetime => temporal::parse_datetime(raw)?.time(),
            FieldKind::Timestamp => self.local(&temporal::parse_timestamp(raw)?).time(),
            _ => return Err(unsupported(field, raw, "TIME")),
        };
        Ok(Some(value))
    }
}
