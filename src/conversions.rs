use crate::error::GpkgError;
use crate::sql::real_to_integer;
use crate::types::{FieldType, GeometryKind, GeometryType, Value};
use rusqlite::types::Value as SqlValue;

// Matched as case-insensitive prefixes, in this order, so that `DATETIME`
// wins over `DATE` and `TEXT(32)` still reads as text.
// cf. https://www.geopackage.org/spec140/index.html#table_column_data_types
const FIELD_TYPE_PREFIXES: &[(&str, FieldType)] = &[
    ("BOOLEAN", FieldType::Integer),
    ("TINYINT", FieldType::Integer),
    ("BIGINT", FieldType::Integer),
    ("SMALLINT", FieldType::Integer),
    ("MEDIUMINT", FieldType::Integer),
    ("INT", FieldType::Integer),
    ("FLOAT", FieldType::Real),
    ("DOUBLE", FieldType::Real),
    ("REAL", FieldType::Real),
    ("TEXT", FieldType::String),
    ("BLOB", FieldType::Binary),
    ("DATETIME", FieldType::DateTime),
    ("DATE", FieldType::Date),
];

/// Map a declared column type to an attribute field type.
///
/// `None` means "not a standard field type"; the caller should then try
/// [`geometry_type_from_str`].
pub(crate) fn field_type_from_str(declared_type: &str) -> Option<FieldType> {
    let declared = declared_type.trim().to_ascii_uppercase();
    FIELD_TYPE_PREFIXES
        .iter()
        .find(|(prefix, _)| declared.starts_with(*prefix))
        .map(|(_, field_type)| *field_type)
}

#[inline]
pub(crate) fn field_type_to_str(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Integer => "INTEGER",
        FieldType::Real => "REAL",
        FieldType::String => "TEXT",
        FieldType::Binary => "BLOB",
        FieldType::Date => "DATE",
        FieldType::DateTime => "DATETIME",
    }
}

#[inline]
pub(crate) fn geometry_kind_to_str(kind: GeometryKind) -> &'static str {
    match kind {
        GeometryKind::Geometry => "GEOMETRY",
        GeometryKind::Point => "POINT",
        GeometryKind::LineString => "LINESTRING",
        GeometryKind::Polygon => "POLYGON",
        GeometryKind::MultiPoint => "MULTIPOINT",
        GeometryKind::MultiLineString => "MULTILINESTRING",
        GeometryKind::MultiPolygon => "MULTIPOLYGON",
        GeometryKind::GeometryCollection => "GEOMETRYCOLLECTION",
    }
}

#[inline]
pub(crate) fn geometry_kind_from_str(name: &str) -> Option<GeometryKind> {
    let s = name.trim();
    if s.eq_ignore_ascii_case("GEOMETRY") {
        Some(GeometryKind::Geometry)
    } else if s.eq_ignore_ascii_case("POINT") {
        Some(GeometryKind::Point)
    } else if s.eq_ignore_ascii_case("LINESTRING") {
        Some(GeometryKind::LineString)
    } else if s.eq_ignore_ascii_case("POLYGON") {
        Some(GeometryKind::Polygon)
    } else if s.eq_ignore_ascii_case("MULTIPOINT") {
        Some(GeometryKind::MultiPoint)
    } else if s.eq_ignore_ascii_case("MULTILINESTRING") {
        Some(GeometryKind::MultiLineString)
    } else if s.eq_ignore_ascii_case("MULTIPOLYGON") {
        Some(GeometryKind::MultiPolygon)
    } else if s.eq_ignore_ascii_case("GEOMETRYCOLLECTION") {
        Some(GeometryKind::GeometryCollection)
    } else {
        None
    }
}

/// Map a geometry type name plus the `z`/`m` presence flags to a geometry type.
#[inline]
pub(crate) fn geometry_type_from_str(name: &str, has_z: bool, has_m: bool) -> Option<GeometryType> {
    geometry_kind_from_str(name).map(|kind| GeometryType { kind, has_z, has_m })
}

#[inline]
pub(crate) fn dimension_to_zm(geometry_type: GeometryType) -> (i64, i64) {
    (i64::from(geometry_type.has_z), i64::from(geometry_type.has_m))
}

#[inline]
pub(crate) fn dimension_from_zm(z: i64, m: i64) -> Result<(bool, bool), GpkgError> {
    // 0: prohibited, 1: mandatory, 2: optional. Optional ordinates are read
    // as present so that they survive a read/write cycle.
    let flag = |value: i64| match value {
        0 => Some(false),
        1 | 2 => Some(true),
        _ => None,
    };
    match (flag(z), flag(m)) {
        (Some(has_z), Some(has_m)) => Ok((has_z, has_m)),
        _ => Err(GpkgError::InvalidDimension { z, m }),
    }
}

/// Convert a feature value into the SQLite value bound for a field of the
/// given type (integer, float, blob, or text binding).
pub(crate) fn bind_value(field_type: FieldType, value: &Value) -> Result<SqlValue, GpkgError> {
    let mismatch = |expected: &'static str| GpkgError::ValueTypeMismatch {
        expected,
        actual: value.type_name(),
    };

    let bound = match field_type {
        FieldType::Integer => match value {
            Value::Integer(v) => SqlValue::Integer(*v),
            Value::Real(v) => SqlValue::Integer(
                real_to_integer(*v).ok_or(GpkgError::ValueOutOfRange { target: "integer" })?,
            ),
            Value::Text(v) => {
                SqlValue::Integer(v.trim().parse().map_err(|_| mismatch("integer"))?)
            }
            Value::Blob(_) => return Err(mismatch("integer")),
        },
        FieldType::Real => match value {
            Value::Integer(v) => SqlValue::Real(*v as f64),
            Value::Real(v) => SqlValue::Real(*v),
            Value::Text(v) => SqlValue::Real(v.trim().parse().map_err(|_| mismatch("real"))?),
            Value::Blob(_) => return Err(mismatch("real")),
        },
        FieldType::Binary => match value {
            Value::Blob(v) => SqlValue::Blob(v.clone()),
            Value::Text(v) => SqlValue::Blob(v.as_bytes().to_vec()),
            _ => return Err(mismatch("blob")),
        },
        FieldType::String | FieldType::Date | FieldType::DateTime => match value {
            Value::Text(v) => SqlValue::Text(v.clone()),
            Value::Integer(v) => SqlValue::Text(v.to_string()),
            Value::Real(v) => SqlValue::Text(v.to_string()),
            Value::Blob(_) => return Err(mismatch("text")),
        },
    };
    Ok(bound)
}

pub(crate) fn sql_value_type_name(value: &SqlValue) -> &'static str {
    match value {
        SqlValue::Null => "null",
        SqlValue::Integer(_) => "integer",
        SqlValue::Real(_) => "real",
        SqlValue::Text(_) => "text",
        SqlValue::Blob(_) => "blob",
    }
}

/// Interpret a stored column value according to the field's declared type.
///
/// `NULL` yields `None` ("unset"), never a default value. A real stored in an
/// integer column stays a real unless it holds an exact integer.
pub(crate) fn decode_value(field_type: FieldType, value: SqlValue) -> Option<Value> {
    let decoded = match (field_type, value) {
        (_, SqlValue::Null) => return None,
        (FieldType::Integer, SqlValue::Real(v)) => {
            real_to_integer(v).map_or(Value::Real(v), Value::Integer)
        }
        (FieldType::Real, SqlValue::Integer(v)) => Value::Real(v as f64),
        (FieldType::Binary, SqlValue::Text(v)) => Value::Blob(v.into_bytes()),
        (FieldType::String | FieldType::Date | FieldType::DateTime, SqlValue::Integer(v)) => {
            Value::Text(v.to_string())
        }
        (FieldType::String | FieldType::Date | FieldType::DateTime, SqlValue::Real(v)) => {
            Value::Text(v.to_string())
        }
        (_, SqlValue::Integer(v)) => Value::Integer(v),
        (_, SqlValue::Real(v)) => Value::Real(v),
        (_, SqlValue::Text(v)) => Value::Text(v),
        (_, SqlValue::Blob(v)) => Value::Blob(v),
    };
    Some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_types_match_by_prefix() {
        assert_eq!(field_type_from_str("INTEGER"), Some(FieldType::Integer));
        assert_eq!(field_type_from_str("int"), Some(FieldType::Integer));
        assert_eq!(field_type_from_str("MediumInt"), Some(FieldType::Integer));
        assert_eq!(field_type_from_str("BOOLEAN"), Some(FieldType::Integer));
        assert_eq!(field_type_from_str("double"), Some(FieldType::Real));
        assert_eq!(field_type_from_str("FLOAT"), Some(FieldType::Real));
        assert_eq!(field_type_from_str("real"), Some(FieldType::Real));
        assert_eq!(field_type_from_str("TEXT(32)"), Some(FieldType::String));
        assert_eq!(field_type_from_str("blob"), Some(FieldType::Binary));
        assert_eq!(field_type_from_str("DATE"), Some(FieldType::Date));
        assert_eq!(field_type_from_str("datetime"), Some(FieldType::DateTime));
    }

    #[test]
    fn geometry_names_are_not_field_types() {
        for name in ["POINT", "MULTIPOINT", "LINESTRING", "POLYGON", "GEOMETRY"] {
            assert_eq!(field_type_from_str(name), None, "{name}");
        }
        assert_eq!(field_type_from_str("VARCHAR"), None);
    }

    #[test]
    fn field_types_roundtrip_through_names() {
        for field_type in [
            FieldType::Integer,
            FieldType::Real,
            FieldType::String,
            FieldType::Binary,
            FieldType::Date,
            FieldType::DateTime,
        ] {
            assert_eq!(
                field_type_from_str(field_type_to_str(field_type)),
                Some(field_type)
            );
        }
    }

    #[test]
    fn geometry_type_names() {
        let kinds = [
            GeometryKind::Geometry,
            GeometryKind::Point,
            GeometryKind::LineString,
            GeometryKind::Polygon,
            GeometryKind::MultiPoint,
            GeometryKind::MultiLineString,
            GeometryKind::MultiPolygon,
            GeometryKind::GeometryCollection,
        ];
        for kind in kinds {
            assert_eq!(geometry_kind_from_str(geometry_kind_to_str(kind)), Some(kind));
        }
        assert_eq!(geometry_kind_from_str("multipolygon"), Some(GeometryKind::MultiPolygon));
        assert_eq!(geometry_kind_from_str("CIRCULARSTRING"), None);
    }

    #[test]
    fn elevation_flag_promotes_to_3d() {
        let ty = geometry_type_from_str("POINT", true, false).expect("point");
        assert_eq!(ty, GeometryType::new(GeometryKind::Point).with_z());
        let ty = geometry_type_from_str("POINT", false, false).expect("point");
        assert!(!ty.has_z);
    }

    #[test]
    fn zm_flags() -> crate::Result<()> {
        assert_eq!(dimension_from_zm(0, 0)?, (false, false));
        assert_eq!(dimension_from_zm(1, 0)?, (true, false));
        assert_eq!(dimension_from_zm(2, 1)?, (true, true));
        assert!(matches!(
            dimension_from_zm(3, 0),
            Err(GpkgError::InvalidDimension { z: 3, m: 0 })
        ));
        assert_eq!(
            dimension_to_zm(GeometryType::new(GeometryKind::Polygon).with_z()),
            (1, 0)
        );
        Ok(())
    }

    #[test]
    fn binding_follows_field_type() -> crate::Result<()> {
        assert_eq!(
            bind_value(FieldType::Integer, &Value::Real(3.0))?,
            SqlValue::Integer(3)
        );
        for lossy in [2.9, f64::NAN, f64::INFINITY, 1e19] {
            assert!(
                matches!(
                    bind_value(FieldType::Integer, &Value::Real(lossy)),
                    Err(GpkgError::ValueOutOfRange { target: "integer" })
                ),
                "{lossy}"
            );
        }
        assert_eq!(
            bind_value(FieldType::Real, &Value::Integer(2))?,
            SqlValue::Real(2.0)
        );
        assert_eq!(
            bind_value(FieldType::String, &Value::Integer(42))?,
            SqlValue::Text("42".to_string())
        );
        assert_eq!(
            bind_value(FieldType::Date, &Value::from("2024-01-31"))?,
            SqlValue::Text("2024-01-31".to_string())
        );
        assert_eq!(
            bind_value(FieldType::Binary, &Value::Blob(vec![1, 2]))?,
            SqlValue::Blob(vec![1, 2])
        );
        assert!(matches!(
            bind_value(FieldType::Integer, &Value::from("abc")),
            Err(GpkgError::ValueTypeMismatch {
                expected: "integer",
                actual: "text"
            })
        ));
        Ok(())
    }

    #[test]
    fn null_decodes_as_unset() {
        assert_eq!(decode_value(FieldType::Integer, SqlValue::Null), None);
        assert_eq!(decode_value(FieldType::String, SqlValue::Null), None);
        assert_eq!(
            decode_value(FieldType::Integer, SqlValue::Integer(0)),
            Some(Value::Integer(0))
        );
        assert_eq!(
            decode_value(FieldType::Real, SqlValue::Integer(3)),
            Some(Value::Real(3.0))
        );
        assert_eq!(
            decode_value(FieldType::String, SqlValue::Text(String::new())),
            Some(Value::Text(String::new()))
        );
    }

    #[test]
    fn reals_in_integer_columns_keep_their_value() {
        assert_eq!(
            decode_value(FieldType::Integer, SqlValue::Real(4.0)),
            Some(Value::Integer(4))
        );
        assert_eq!(
            decode_value(FieldType::Integer, SqlValue::Real(2.5)),
            Some(Value::Real(2.5))
        );
        assert_eq!(
            decode_value(FieldType::Integer, SqlValue::Real(-1e20)),
            Some(Value::Real(-1e20))
        );
    }
}
