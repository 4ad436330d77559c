//! Column type mappings.
//!
//! This module holds the fixed catalog of MySQL protocol column-type codes
//! and the helpers that turn driver column metadata and values into the
//! gateway's JSON shapes.
//!
//! # Architecture
//!
//! Type handling uses a two-phase approach:
//! 1. `TypeCatalog` names columns by their protocol code, so field metadata
//!    looks the same whichever driver produced it
//! 2. `TypeCategory` classifies driver type names so the MySQL decoder knows
//!    which Rust type to pull each value out as

use crate::db::driver::ColumnInfo;
use crate::models::{FieldDescriptor, Record};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlColumn, MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo};

// =============================================================================
// Type Catalog
// =============================================================================

/// Protocol code to canonical name, in protocol order.
const CATALOG: &[(u16, &str)] = &[
    (0, "DECIMAL"),
    (1, "TINY"),
    (2, "SHORT"),
    (3, "LONG"),
    (4, "FLOAT"),
    (5, "DOUBLE"),
    (6, "NULL"),
    (7, "TIMESTAMP"),
    (8, "LONGLONG"),
    (9, "INT24"),
    (10, "DATE"),
    (11, "TIME"),
    (12, "DATETIME"),
    (13, "YEAR"),
    (14, "NEWDATE"),
    (15, "VARCHAR"),
    (16, "BIT"),
    (17, "TIMESTAMP2"),
    (18, "DATETIME2"),
    (19, "TIME2"),
    (242, "VECTOR"),
    (245, "JSON"),
    (246, "NEWDECIMAL"),
    (247, "ENUM"),
    (248, "SET"),
    (249, "TINY_BLOB"),
    (250, "MEDIUM_BLOB"),
    (251, "LONG_BLOB"),
    (252, "BLOB"),
    (253, "VAR_STRING"),
    (254, "STRING"),
    (255, "GEOMETRY"),
];

/// Static mapping from numeric column-type code to canonical type name.
pub struct TypeCatalog;

impl TypeCatalog {
    /// Look up the canonical name for a protocol type code.
    pub fn lookup(code: u16) -> Option<&'static str> {
        CATALOG
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, name)| *name)
    }

    /// Canonical name for a code; unknown codes degrade to the stringified number.
    pub fn name_of(code: u16) -> String {
        Self::lookup(code)
            .map(str::to_string)
            .unwrap_or_else(|| code.to_string())
    }

    /// Build a field descriptor for driver column metadata.
    ///
    /// Columns the driver could not map to a protocol code keep the driver's
    /// own type name, uppercased.
    pub fn describe(column: &ColumnInfo) -> FieldDescriptor {
        let type_name = match column.type_code {
            Some(code) => Self::name_of(code),
            None => column.driver_type.to_uppercase(),
        };
        FieldDescriptor::new(&column.name, type_name, column.nullable)
    }

    /// Build field descriptors for a whole result set.
    pub fn describe_all(columns: &[ColumnInfo]) -> Vec<FieldDescriptor> {
        columns.iter().map(Self::describe).collect()
    }
}

/// Recover the protocol type code from a sqlx MySQL type name.
///
/// sqlx reports names such as `BIGINT UNSIGNED` or `VARBINARY` rather than
/// wire codes. Text and binary variants of the same wire type map to the
/// same code, as they do on the wire.
pub fn protocol_code(type_name: &str) -> Option<u16> {
    let upper = type_name.to_ascii_uppercase();
    let base = upper.trim_end_matches(" UNSIGNED");

    let code = match base {
        "DECIMAL" | "NUMERIC" => 246,
        "BOOLEAN" | "TINYINT" => 1,
        "SMALLINT" => 2,
        "INT" | "INTEGER" => 3,
        "FLOAT" => 4,
        "DOUBLE" => 5,
        "NULL" => 6,
        "TIMESTAMP" => 7,
        "BIGINT" => 8,
        "MEDIUMINT" => 9,
        "DATE" => 10,
        "TIME" => 11,
        "DATETIME" => 12,
        "YEAR" => 13,
        "BIT" => 16,
        "VECTOR" => 242,
        "JSON" => 245,
        "ENUM" => 247,
        "SET" => 248,
        "TINYBLOB" | "TINYTEXT" => 249,
        "MEDIUMBLOB" | "MEDIUMTEXT" => 250,
        "LONGBLOB" | "LONGTEXT" => 251,
        "BLOB" | "TEXT" => 252,
        "VARCHAR" | "VARBINARY" => 253,
        "CHAR" | "BINARY" => 254,
        "GEOMETRY" => 255,
        _ => return None,
    };
    Some(code)
}

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for MySQL column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Bit,
    Date,
    Time,
    DateTime,
    Timestamp,
    Text,
    Binary,
    Json,
    Null,
}

/// Classify a sqlx MySQL type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let upper = type_name.to_ascii_uppercase();
    let base = upper.trim_end_matches(" UNSIGNED");

    match base {
        "DECIMAL" | "NUMERIC" => TypeCategory::Decimal,
        "BOOLEAN" => TypeCategory::Boolean,
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" | "YEAR" => {
            TypeCategory::Integer
        }
        "FLOAT" | "DOUBLE" => TypeCategory::Float,
        "BIT" => TypeCategory::Bit,
        "DATE" => TypeCategory::Date,
        "TIME" => TypeCategory::Time,
        "DATETIME" => TypeCategory::DateTime,
        "TIMESTAMP" => TypeCategory::Timestamp,
        "JSON" => TypeCategory::Json,
        "NULL" => TypeCategory::Null,
        _ if base.contains("BLOB") || base.contains("BINARY") || base == "GEOMETRY" => {
            TypeCategory::Binary
        }
        // VARCHAR, CHAR, TEXT variants, ENUM, SET
        _ => TypeCategory::Text,
    }
}

/// Column metadata for a sqlx MySQL column.
///
/// Result rows do not carry the NOT NULL flag, so the column is reported as
/// nullable; statement descriptions refine it.
pub fn column_info(column: &MySqlColumn) -> ColumnInfo {
    let driver_type = column.type_info().name();
    ColumnInfo {
        name: column.name().to_string(),
        type_code: protocol_code(driver_type),
        driver_type: driver_type.to_string(),
        nullable: true,
    }
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_ascii_uppercase();
        name.contains("DECIMAL") || name.contains("NUMERIC")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Binary Encoding
// =============================================================================

/// Encode binary column data as a base64 JSON string.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    JsonValue::String(STANDARD.encode(bytes))
}

// =============================================================================
// Row Decoding
// =============================================================================

/// Convert a MySQL row into a JSON record keyed by column name.
pub fn row_to_record(row: &MySqlRow) -> Record {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let category = categorize_type(col.type_info().name());
            (col.name().to_string(), decode_column(row, idx, category))
        })
        .collect()
}

fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
    match category {
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => decode_boolean(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Bit => decode_bit(row, idx),
        TypeCategory::Date => decode_date(row, idx),
        TypeCategory::Time => decode_time(row, idx),
        TypeCategory::DateTime => decode_datetime(row, idx),
        TypeCategory::Timestamp => decode_timestamp(row, idx),
        TypeCategory::Binary => decode_binary(row, idx),
        TypeCategory::Json => decode_json(row, idx),
        TypeCategory::Null => JsonValue::Null,
        TypeCategory::Text => decode_text(row, idx),
    }
}

fn decode_decimal(row: &MySqlRow, idx: usize) -> JsonValue {
    match row.try_get::<Option<RawDecimal>, _>(idx) {
        Ok(Some(v)) => JsonValue::String(v.0),
        Ok(None) => JsonValue::Null,
        Err(e) => {
            tracing::error!(column = idx, error = %e, "Failed to decode DECIMAL");
            JsonValue::Null
        }
    }
}

fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
    if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
        return JsonValue::Null;
    }
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<u32>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<u16>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<u8>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    // YEAR and other widths no integer type accepts
    decode_text(row, idx)
}

fn decode_boolean(row: &MySqlRow, idx: usize) -> JsonValue {
    row.try_get::<Option<bool>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::Bool)
        .unwrap_or(JsonValue::Null)
}

fn decode_float(row: &MySqlRow, idx: usize) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
        return serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()));
    }
    if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
        return serde_json::Number::from_f64(v as f64)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()));
    }
    JsonValue::Null
}

fn decode_bit(row: &MySqlRow, idx: usize) -> JsonValue {
    row.try_get::<Option<u64>, _>(idx)
        .ok()
        .flatten()
        .map(|v| JsonValue::Number(v.into()))
        .unwrap_or(JsonValue::Null)
}

fn decode_date(row: &MySqlRow, idx: usize) -> JsonValue {
    row.try_get::<Option<chrono::NaiveDate>, _>(idx)
        .ok()
        .flatten()
        .map(|d| JsonValue::String(d.format("%Y-%m-%d").to_string()))
        .unwrap_or(JsonValue::Null)
}

fn decode_time(row: &MySqlRow, idx: usize) -> JsonValue {
    // TIME spans -838:59:59..838:59:59; values outside a wall clock fall back to text
    if let Ok(Some(t)) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
        return JsonValue::String(t.format("%H:%M:%S%.f").to_string());
    }
    decode_text(row, idx)
}

fn decode_datetime(row: &MySqlRow, idx: usize) -> JsonValue {
    row.try_get::<Option<chrono::NaiveDateTime>, _>(idx)
        .ok()
        .flatten()
        .map(|dt| JsonValue::String(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()))
        .unwrap_or(JsonValue::Null)
}

fn decode_timestamp(row: &MySqlRow, idx: usize) -> JsonValue {
    row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
        .ok()
        .flatten()
        .map(|ts| JsonValue::String(ts.to_rfc3339()))
        .unwrap_or(JsonValue::Null)
}

fn decode_binary(row: &MySqlRow, idx: usize) -> JsonValue {
    row.try_get::<Option<Vec<u8>>, _>(idx)
        .ok()
        .flatten()
        .map(|v| encode_binary_value(&v))
        .unwrap_or(JsonValue::Null)
}

fn decode_json(row: &MySqlRow, idx: usize) -> JsonValue {
    row.try_get::<Option<JsonValue>, _>(idx)
        .ok()
        .flatten()
        .unwrap_or(JsonValue::Null)
}

fn decode_text(row: &MySqlRow, idx: usize) -> JsonValue {
    row.try_get::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::String)
        .unwrap_or(JsonValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_known_codes() {
        assert_eq!(TypeCatalog::name_of(3), "LONG");
        assert_eq!(TypeCatalog::name_of(8), "LONGLONG");
        assert_eq!(TypeCatalog::name_of(246), "NEWDECIMAL");
        assert_eq!(TypeCatalog::name_of(245), "JSON");
        assert_eq!(TypeCatalog::name_of(242), "VECTOR");
        assert_eq!(TypeCatalog::name_of(255), "GEOMETRY");
    }

    #[test]
    fn test_catalog_unknown_code_degrades_to_number() {
        assert_eq!(TypeCatalog::lookup(99), None);
        assert_eq!(TypeCatalog::name_of(99), "99");
        assert_eq!(TypeCatalog::name_of(241), "241");
    }

    #[test]
    fn test_catalog_codes_are_unique() {
        let mut codes: Vec<u16> = CATALOG.iter().map(|(c, _)| *c).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), CATALOG.len());
    }

    #[test]
    fn test_protocol_code_from_sqlx_names() {
        assert_eq!(protocol_code("BIGINT UNSIGNED"), Some(8));
        assert_eq!(protocol_code("INT"), Some(3));
        assert_eq!(protocol_code("BOOLEAN"), Some(1));
        assert_eq!(protocol_code("VARCHAR"), Some(253));
        assert_eq!(protocol_code("VARBINARY"), Some(253));
        assert_eq!(protocol_code("TEXT"), Some(252));
        assert_eq!(protocol_code("DECIMAL"), Some(246));
        assert_eq!(protocol_code("datetime"), Some(12));
        assert_eq!(protocol_code("SOMETHING_NEW"), None);
    }

    #[test]
    fn test_describe_uses_catalog_or_driver_name() {
        let known = ColumnInfo {
            name: "id".to_string(),
            type_code: Some(8),
            driver_type: "BIGINT".to_string(),
            nullable: false,
        };
        assert_eq!(
            TypeCatalog::describe(&known),
            FieldDescriptor::new("id", "LONGLONG", false)
        );

        let unmapped = ColumnInfo {
            name: "v".to_string(),
            type_code: None,
            driver_type: "inet6".to_string(),
            nullable: true,
        };
        assert_eq!(TypeCatalog::describe(&unmapped).type_name, "INET6");
    }

    #[test]
    fn test_categorize_type() {
        assert_eq!(categorize_type("DECIMAL"), TypeCategory::Decimal);
        assert_eq!(categorize_type("BIGINT UNSIGNED"), TypeCategory::Integer);
        assert_eq!(categorize_type("BOOLEAN"), TypeCategory::Boolean);
        assert_eq!(categorize_type("DOUBLE"), TypeCategory::Float);
        assert_eq!(categorize_type("LONGBLOB"), TypeCategory::Binary);
        assert_eq!(categorize_type("VARBINARY"), TypeCategory::Binary);
        assert_eq!(categorize_type("LONGTEXT"), TypeCategory::Text);
        assert_eq!(categorize_type("ENUM"), TypeCategory::Text);
        assert_eq!(categorize_type("DATETIME"), TypeCategory::DateTime);
        assert_eq!(categorize_type("JSON"), TypeCategory::Json);
    }

    #[test]
    fn test_encode_binary_value() {
        assert_eq!(
            encode_binary_value(&[0xde, 0xad, 0xbe, 0xef]),
            JsonValue::String("3q2+7w==".to_string())
        );
    }
}
