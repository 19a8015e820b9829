use std::str::FromStr;
use anyhow::Result;
use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use bqdriver::backend::memory::ScriptedQuery;
use bqdriver::cursor::{CursorError, CursorKind};
use bqdriver::types::{Cell, CoercionError, Field, FieldKind, TypeCoercion, Value};

// Declare the common module for test utilities using a path attribute
#[path = "../common/mod.rs"]
mod common;
use common::setup;

const EVENTS_SQL: &str = "SELECT * FROM events";

fn events_schema() -> Vec<Field> {
    vec![
        Field::new("ts", FieldKind::Timestamp),
        Field::new("local", FieldKind::Datetime),
        Field::new("day", FieldKind::Date),
        Field::new("clock", FieldKind::Time),
        Field::new("amount", FieldKind::Numeric),
        Field::new("ratio", FieldKind::Float64),
        Field::new("flag", FieldKind::Bool),
        Field::new("tags", FieldKind::String).repeated(),
        Field::record("who", vec![Field::new("name", FieldKind::String), Field::new("age", FieldKind::Int64)]),
        Field::new("missing", FieldKind::Int64),
    ]
}

fn events_script() -> ScriptedQuery {
    let row = vec![
        Cell::from("1.40845206304567E9"),
        Cell::from("2019-02-17T11:24:00.000120"),
        Cell::from("2000-01-01"),
        Cell::from("23:59:59.5"),
        Cell::from("99999999999999999999999999999.999999999"),
        Cell::from("inf"),
        Cell::from("true"),
        Cell::Array(vec![Cell::from("a"), Cell::Null, Cell::from("c")]),
        Cell::Record(vec![Cell::from("Ada"), Cell::from(36i64)]),
        Cell::Null,
    ];
    ScriptedQuery::new(events_schema(), vec![row])
}

#[test]
fn test_scientific_seconds_timestamp_is_exact() -> Result<()> {
    let coercion = TypeCoercion::new();
    let field = Field::new("ts", FieldKind::Timestamp);
    let cell = Cell::from("1.40845206304567E9");

    assert_eq!(
        coercion.to_canonical_string(&cell, &field)?.as_deref(),
        Some("2014-08-19 12:41:03.04567 UTC")
    );
    let ts = coercion.to_timestamp(&cell, &field)?.expect("non-null timestamp");
    assert_eq!(ts.timestamp_micros(), 1_408_452_063_045_670);

    let shifted = TypeCoercion::with_reporting_offset(FixedOffset::east_opt(2 * 3600).expect("valid offset"));
    assert_eq!(
        shifted.to_canonical_string(&cell, &field)?.as_deref(),
        Some("2014-08-19 14:41:03.04567 +02:00")
    );
    // The instant itself does not depend on the reporting offset
    assert_eq!(shifted.to_timestamp(&cell, &field)?, Some(ts));
    Ok(())
}

#[test]
fn test_row_values_through_cursor() -> Result<()> {
    let (service, connection) = setup()?;
    service.script(EVENTS_SQL, events_script());

    for kind in [CursorKind::ForwardOnly, CursorKind::Scrollable] {
        let statement = connection.create_statement()?;
        statement.set_cursor_kind(kind);
        let mut cursor = statement.execute_query(EVENTS_SQL)?;
        assert!(cursor.next()?);

        assert_eq!(cursor.get_string(1)?.as_deref(), Some("2014-08-19 12:41:03.04567 UTC"));
        assert_eq!(cursor.get_string(2)?.as_deref(), Some("2019-02-17T11:24:00.00012"));
        assert_eq!(cursor.get_string(3)?.as_deref(), Some("2000-01-01"));
        assert_eq!(cursor.get_string(4)?.as_deref(), Some("23:59:59.5"));
        assert_eq!(
            cursor.get_string(5)?.as_deref(),
            Some("99999999999999999999999999999.999999999")
        );
        assert_eq!(cursor.get_f64(6)?, Some(f64::INFINITY));
        assert_eq!(cursor.get_bool(7)?, Some(true));
        assert_eq!(cursor.get_string(8)?.as_deref(), Some(r#"["a",null,"c"]"#));
        assert_eq!(cursor.get_string(9)?.as_deref(), Some(r#"{"name":"Ada","age":"36"}"#));

        assert_eq!(cursor.get_string(10)?, None);
        assert_eq!(cursor.get_i64(10)?, None);
        assert_eq!(cursor.get_object(10)?, Value::Null);
    }
    Ok(())
}

#[test]
fn test_reporting_offset_applies_to_statement_results() -> Result<()> {
    let (service, connection) = setup()?;
    service.script(EVENTS_SQL, events_script());

    let statement = connection.create_statement()?;
    statement.set_reporting_offset(FixedOffset::east_opt(2 * 3600).expect("valid offset"));
    let mut cursor = statement.execute_query(EVENTS_SQL)?;
    assert!(cursor.next()?);
    assert_eq!(cursor.get_string(1)?.as_deref(), Some("2014-08-19 14:41:03.04567 +02:00"));
    assert_eq!(cursor.get_time(1)?, NaiveTime::from_hms_micro_opt(14, 41, 3, 45_670));
    // DATETIME carries no zone and is unaffected
    assert_eq!(cursor.get_string(2)?.as_deref(), Some("2019-02-17T11:24:00.00012"));
    Ok(())
}

#[test]
fn test_typed_objects() -> Result<()> {
    let (service, connection) = setup()?;
    service.script(EVENTS_SQL, events_script());

    let statement = connection.create_statement()?;
    let mut cursor = statement.execute_query(EVENTS_SQL)?;
    assert!(cursor.next()?);

    let expected_ts = DateTime::<Utc>::from_timestamp_micros(1_408_452_063_045_670).expect("valid instant");
    assert_eq!(cursor.get_object(1)?, Value::Timestamp(expected_ts));
    assert_eq!(cursor.get_date(3)?, NaiveDate::from_ymd_opt(2000, 1, 1));
    assert_eq!(
        cursor.get_object(5)?,
        Value::Numeric(BigDecimal::from_str("99999999999999999999999999999.999999999")?)
    );
    assert_eq!(
        cursor.get_decimal(5)?,
        Some(BigDecimal::from_str("99999999999999999999999999999.999999999")?)
    );
    assert_eq!(cursor.get_object(7)?, Value::Bool(true));
    assert_eq!(cursor.get_object(8)?.as_str(), Some(r#"["a",null,"c"]"#));
    Ok(())
}

#[test]
fn test_unsupported_conversions_are_errors() -> Result<()> {
    let (service, connection) = setup()?;
    service.script(EVENTS_SQL, events_script());

    let statement = connection.create_statement()?;
    let mut cursor = statement.execute_query(EVENTS_SQL)?;
    assert!(cursor.next()?);

    // Infinite FLOAT64 has no BIGINT or NUMERIC form
    assert!(matches!(cursor.get_i64(6), Err(CursorError::Coercion(CoercionError::Unsupported { .. }))));
    assert!(matches!(cursor.get_decimal(6), Err(CursorError::Coercion(_))));
    // Arrays and records only render as strings or objects
    assert!(matches!(cursor.get_i64(8), Err(CursorError::Coercion(CoercionError::Unsupported { .. }))));
    assert!(matches!(cursor.get_bool(9), Err(CursorError::Coercion(_))));
    assert!(matches!(cursor.get_date(4), Err(CursorError::Coercion(_))));
    Ok(())
}

#[test]
fn test_malformed_cells_are_reported() {
    let coercion = TypeCoercion::new();
    let cases = [
        (FieldKind::Timestamp, "not a time"),
        (FieldKind::Date, "2000-13-01"),
        (FieldKind::Numeric, "12,5"),
        (FieldKind::Int64, "forty-two"),
        (FieldKind::Bool, "maybe"),
    ];
    for (kind, raw) in cases {
        let field = Field::new("c", kind);
        let err = coercion
            .to_value(&Cell::from(raw), &field)
            .expect_err("malformed cell should not coerce");
        assert!(matches!(err, CoercionError::Malformed { .. }), "{:?} for {:?}", err, kind);
    }
}

#[test]
fn test_float_markers_pass_through() {
    let coercion = TypeCoercion::new();
    let field = Field::new("ratio", FieldKind::Float64);
    for (raw, check) in [
        ("nan", f64::is_nan as fn(f64) -> bool),
        ("-inf", |f: f64| f == f64::NEG_INFINITY),
        ("1.5e-3", |f: f64| (f - 0.0015).abs() < 1e-12),
    ] {
        let value = coercion.to_f64(&Cell::from(raw), &field).expect("float coerces").expect("non-null");
        assert!(check(value), "{} coerced to {}", raw, value);
        assert_eq!(coercion.to_canonical_string(&Cell::from(raw), &field).expect("string form").as_deref(), Some(raw));
    }
}
