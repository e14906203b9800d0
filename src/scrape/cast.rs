//! Dynamic value coercion. Catalog queries project arbitrary column types;
//! rows are first decoded into a [`ScalarValue`], then coerced into metric
//! values, label strings or predicate booleans.

use crate::catalog::Column;
use bigdecimal::ToPrimitive;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::postgres::types::Oid;
use sqlx::{Row, TypeInfo, ValueRef};

/// A single decoded result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Time(DateTime<Utc>),
}

/// Decode one cell of a result row by ordinal. Unknown or undecodable types
/// fall back to their text form, and finally to `Null`.
#[must_use]
pub fn decode_scalar(row: &PgRow, idx: usize) -> ScalarValue {
    let type_name = match row.try_get_raw(idx) {
        Ok(raw) => {
            if raw.is_null() {
                return ScalarValue::Null;
            }
            raw.type_info().name().to_string()
        }
        Err(_) => return ScalarValue::Null,
    };

    match type_name.as_str() {
        "BOOL" => row.try_get::<bool, _>(idx).map_or(ScalarValue::Null, ScalarValue::Bool),
        "INT2" => row
            .try_get::<i16, _>(idx)
            .map_or(ScalarValue::Null, |v| ScalarValue::Int(i64::from(v))),
        "INT4" => row
            .try_get::<i32, _>(idx)
            .map_or(ScalarValue::Null, |v| ScalarValue::Int(i64::from(v))),
        "INT8" => row.try_get::<i64, _>(idx).map_or(ScalarValue::Null, ScalarValue::Int),
        "OID" => row
            .try_get::<Oid, _>(idx)
            .map_or(ScalarValue::Null, |v| ScalarValue::Int(i64::from(v.0))),
        "FLOAT4" => row
            .try_get::<f32, _>(idx)
            .map_or(ScalarValue::Null, |v| ScalarValue::Float(f64::from(v))),
        "FLOAT8" => row.try_get::<f64, _>(idx).map_or(ScalarValue::Null, ScalarValue::Float),
        "NUMERIC" => row
            .try_get::<bigdecimal::BigDecimal, _>(idx)
            .ok()
            .and_then(|d| d.to_f64())
            .map_or(ScalarValue::Null, ScalarValue::Float),
        "BYTEA" => row
            .try_get::<Vec<u8>, _>(idx)
            .map_or(ScalarValue::Null, ScalarValue::Bytes),
        "TIMESTAMPTZ" => row
            .try_get::<DateTime<Utc>, _>(idx)
            .map_or(ScalarValue::Null, ScalarValue::Time),
        "TIMESTAMP" => row
            .try_get::<NaiveDateTime, _>(idx)
            .map_or(ScalarValue::Null, |v| ScalarValue::Time(v.and_utc())),
        "DATE" => row
            .try_get::<NaiveDate, _>(idx)
            .ok()
            .and_then(|v| v.and_hms_opt(0, 0, 0))
            .map_or(ScalarValue::Null, |v| ScalarValue::Time(v.and_utc())),
        _ => row.try_get::<String, _>(idx).map_or(ScalarValue::Null, ScalarValue::Text),
    }
}

/// Coerce a decoded cell into a metric value, applying the column's `scale`
/// multiplier and substituting `default` for NULL. Unparseable values become
/// NaN rather than failing the scrape.
#[must_use]
pub fn cast_float64(value: &ScalarValue, column: Option<&Column>) -> f64 {
    let scale = column.and_then(|c| c.scale).unwrap_or(1.0);
    match value {
        ScalarValue::Null => column
            .and_then(|c| c.default)
            .map_or(f64::NAN, |d| d * scale),
        ScalarValue::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        ScalarValue::Int(i) => *i as f64 * scale,
        ScalarValue::Float(f) => f * scale,
        ScalarValue::Text(s) => s.trim().parse::<f64>().map_or(f64::NAN, |f| f * scale),
        ScalarValue::Bytes(b) => std::str::from_utf8(b)
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .map_or(f64::NAN, |f| f * scale),
        ScalarValue::Time(t) => t.timestamp() as f64,
    }
}

/// Coerce a decoded cell into a label value.
#[must_use]
pub fn cast_string(value: &ScalarValue) -> String {
    match value {
        ScalarValue::Null => String::new(),
        ScalarValue::Bool(b) => b.to_string(),
        ScalarValue::Int(i) => i.to_string(),
        ScalarValue::Float(f) => f.to_string(),
        ScalarValue::Text(s) => s.clone(),
        ScalarValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        ScalarValue::Time(t) => t.timestamp().to_string(),
    }
}

/// Predicate truthiness: NULL, false, zero, the empty string and no rows are
/// all false; anything else is true.
#[must_use]
pub fn truthy(value: &ScalarValue) -> bool {
    match value {
        ScalarValue::Null => false,
        ScalarValue::Bool(b) => *b,
        ScalarValue::Int(i) => *i != 0,
        ScalarValue::Float(f) => *f != 0.0,
        ScalarValue::Text(s) => truthy_str(s),
        ScalarValue::Bytes(b) => std::str::from_utf8(b).is_ok_and(truthy_str),
        ScalarValue::Time(_) => true,
    }
}

fn truthy_str(s: &str) -> bool {
    let s = s.trim();
    !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false") || s.eq_ignore_ascii_case("f"))
}
