use crate::error::GpkgError;
use crate::srs::SpatialRef;

/// Semantic type of an attribute field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    Integer,
    Real,
    String,
    Binary,
    Date,
    DateTime,
}

/// An attribute field of a table.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDefn {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldDefn {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// The simple-feature geometry kinds a GeoPackage column can declare.
///
/// `Geometry` is the unqualified kind: the column accepts any of the others.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    Geometry,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
}

/// A geometry kind together with its extra ordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeometryType {
    pub kind: GeometryKind,
    pub has_z: bool,
    pub has_m: bool,
}

impl GeometryType {
    /// A 2D geometry type.
    pub fn new(kind: GeometryKind) -> Self {
        Self {
            kind,
            has_z: false,
            has_m: false,
        }
    }

    /// The 3D variant of the same kind.
    pub fn with_z(self) -> Self {
        Self {
            has_z: true,
            ..self
        }
    }

    pub fn with_m(self) -> Self {
        Self {
            has_m: true,
            ..self
        }
    }

    pub fn dimension(&self) -> wkb::reader::Dimension {
        match (self.has_z, self.has_m) {
            (false, false) => wkb::reader::Dimension::Xy,
            (true, false) => wkb::reader::Dimension::Xyz,
            (false, true) => wkb::reader::Dimension::Xym,
            (true, true) => wkb::reader::Dimension::Xyzm,
        }
    }
}

/// The geometry column of a table.
#[derive(Clone, Debug, PartialEq)]
pub struct GeometryFieldDefn {
    pub name: String,
    pub geometry_type: GeometryType,
    pub srs_id: i32,
    pub spatial_ref: Option<SpatialRef>,
}

/// In-memory description of a feature table.
///
/// Every table has exactly one identifier column and at most one geometry
/// column. Attribute fields keep the order of the underlying table.
#[derive(Clone, Debug, PartialEq)]
pub struct TableSchema {
    pub table_name: String,
    pub fid_column: String,
    pub geometry: Option<GeometryFieldDefn>,
    pub fields: Vec<FieldDefn>,
}

impl TableSchema {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Column names in cursor order: identifier, geometry (if any), attributes.
    pub fn column_names(&self) -> Vec<&str> {
        let mut columns = Vec::with_capacity(self.fields.len() + 2);
        columns.push(self.fid_column.as_str());
        if let Some(geometry) = &self.geometry {
            columns.push(geometry.name.as_str());
        }
        columns.extend(self.fields.iter().map(|field| field.name.as_str()));
        columns
    }
}

/// Owned attribute value of a feature.
///
/// An unset field is represented by the absence of a value, not by a variant.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Integer(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl TryFrom<Value> for i64 {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Integer(value) => Ok(value),
            other => Err(GpkgError::ValueTypeMismatch {
                expected: "integer",
                actual: other.type_name(),
            }),
        }
    }
}

impl TryFrom<Value> for i32 {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let value: i64 = value.try_into()?;
        i32::try_from(value).map_err(|_| GpkgError::ValueOutOfRange { target: "i32" })
    }
}

impl TryFrom<Value> for bool {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Integer(0) => Ok(false),
            Value::Integer(1) => Ok(true),
            Value::Integer(_) => Err(GpkgError::ValueOutOfRange { target: "bool" }),
            other => Err(GpkgError::ValueTypeMismatch {
                expected: "integer",
                actual: other.type_name(),
            }),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Real(value) => Ok(value),
            Value::Integer(value) => Ok(value as f64),
            other => Err(GpkgError::ValueTypeMismatch {
                expected: "real",
                actual: other.type_name(),
            }),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Text(value) => Ok(value),
            other => Err(GpkgError::ValueTypeMismatch {
                expected: "text",
                actual: other.type_name(),
            }),
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Blob(value) => Ok(value),
            other => Err(GpkgError::ValueTypeMismatch {
                expected: "blob",
                actual: other.type_name(),
            }),
        }
    }
}
