use std::error::Error;
use std::fmt;
use std::path::PathBuf;

/// Crate error type for GeoPackage operations.
#[derive(Debug)]
pub enum GpkgError {
    /// Wraps errors returned by `rusqlite`.
    Sql(rusqlite::Error),
    /// A SQL statement failed; carries the statement text for diagnosis.
    Statement {
        sql: String,
        source: rusqlite::Error,
    },
    /// Wraps errors returned by the `wkb` crate.
    Wkb(wkb::error::WkbError),
    /// The file name does not end with `.gpkg`.
    InvalidFileExtension {
        path: PathBuf,
    },
    /// The file to open does not exist.
    FileNotFound {
        path: PathBuf,
    },
    /// The path exists but is not a regular file.
    NotARegularFile {
        path: PathBuf,
    },
    /// The file to create already exists.
    FileAlreadyExists {
        path: PathBuf,
    },
    /// The SQLite `application_id` is not the GeoPackage signature.
    ApplicationIdMismatch {
        found: i64,
    },
    /// `PRAGMA integrity_check` reported something other than `ok`.
    IntegrityCheckFailed(String),
    /// The table is not registered as `features` in `gpkg_contents`.
    LayerNotRegistered {
        layer_name: String,
        rows: usize,
    },
    /// The table does not have exactly one row in `gpkg_geometry_columns`.
    GeometryColumnNotRegistered {
        layer_name: String,
        rows: usize,
    },
    /// The table does not exist, or has no columns.
    TableNotFound {
        layer_name: String,
    },
    /// A geometry type in metadata could not be mapped to a supported geometry type.
    UnsupportedGeometryType(String),
    /// Invalid `z` / `m` dimension flags in GeoPackage metadata.
    InvalidDimension {
        z: i64,
        m: i64,
    },
    /// The geometry column type declared in the table disagrees with `gpkg_geometry_columns`.
    InconsistentGeometryType {
        layer_name: String,
        table_type: String,
        catalog_type: String,
    },
    /// The geometry column in the table is not the one registered in `gpkg_geometry_columns`.
    GeometryColumnNameMismatch {
        layer_name: String,
        table_column: String,
        catalog_column: String,
    },
    /// Layer schema has more than one geometry column.
    MultipleGeometryColumns {
        layer_name: String,
    },
    /// Layer schema has multiple primary key columns, which is unsupported.
    CompositePrimaryKeyUnsupported {
        layer_name: String,
    },
    /// Layer schema has no primary key column.
    MissingPrimaryKeyColumn {
        layer_name: String,
    },
    /// Layer schema has no geometry column.
    MissingGeometryColumn {
        layer_name: String,
    },
    /// A table, column or field name is not acceptable.
    InvalidName {
        name: String,
        reason: &'static str,
    },
    /// A layer with the same name already exists.
    LayerAlreadyExists {
        layer_name: String,
    },
    /// Referenced `srs_id` does not exist in `gpkg_spatial_ref_sys`.
    MissingSpatialRefSysId {
        srs_id: i32,
    },
    /// A spatial reference definition could not be parsed.
    InvalidWkt(String),
    /// GeoPackage geometry blob does not start with `GP`.
    InvalidGpkgGeometryMagic([u8; 2]),
    /// GeoPackage geometry blob has a version other than 0.
    UnsupportedGpkgGeometryVersion(u8),
    /// Invalid GeoPackage geometry flags byte.
    InvalidGpkgGeometryFlags(u8),
    /// GeoPackage geometry blob is too short.
    InvalidGpkgGeometryLength {
        len: usize,
        minimum: usize,
    },
    /// GeoPackage geometry blob is too short for the declared envelope payload.
    InvalidGpkgGeometryEnvelope {
        len: usize,
        required: usize,
    },
    /// The empty flag is set but WKB bytes follow the header.
    EmptyGeometryWithPayload {
        payload_len: usize,
    },
    /// The envelope in the header declares ordinates the WKB payload does not have.
    GeometryDimensionMismatch {
        envelope: &'static str,
        has_z: bool,
        has_m: bool,
    },
    /// The WKB payload is malformed.
    InvalidWkb(String),
    /// The feature has no identifier but the operation needs one.
    MissingFeatureId,
    /// Property count did not match the layer schema.
    InvalidPropertyCount {
        expected: usize,
        got: usize,
    },
    /// Requested feature property does not exist in the feature.
    MissingProperty {
        property: String,
    },
    /// Dynamic `Value` type did not match the expected conversion target.
    ValueTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    /// Numeric conversion failed because the value is out of range.
    ValueOutOfRange {
        target: &'static str,
    },
    ReadOnly,
}

impl fmt::Display for GpkgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sql(err) => write!(f, "{err}"),
            Self::Statement { sql, source } => write!(f, "{source} (statement: {sql})"),
            Self::Wkb(err) => write!(f, "{err}"),
            Self::InvalidFileExtension { path } => {
                write!(f, "not a GeoPackage file name (expected .gpkg): {}", path.display())
            }
            Self::FileNotFound { path } => {
                write!(f, "GeoPackage file does not exist: {}", path.display())
            }
            Self::NotARegularFile { path } => {
                write!(f, "not a regular file: {}", path.display())
            }
            Self::FileAlreadyExists { path } => {
                write!(f, "GeoPackage file already exists: {}", path.display())
            }
            Self::ApplicationIdMismatch { found } => {
                write!(f, "not a GeoPackage: application_id is {found:#010x}")
            }
            Self::IntegrityCheckFailed(report) => write!(f, "integrity check failed: {report}"),
            Self::LayerNotRegistered { layer_name, rows } => write!(
                f,
                "expected one features row in gpkg_contents for layer {layer_name}, got {rows}"
            ),
            Self::GeometryColumnNotRegistered { layer_name, rows } => write!(
                f,
                "expected one row in gpkg_geometry_columns for layer {layer_name}, got {rows}"
            ),
            Self::TableNotFound { layer_name } => write!(f, "table not found: {layer_name}"),
            Self::UnsupportedGeometryType(ty) => write!(f, "unsupported geometry type: {ty}"),
            Self::InvalidDimension { z, m } => {
                write!(f, "invalid geometry dimension flags (z={z}, m={m})")
            }
            Self::InconsistentGeometryType {
                layer_name,
                table_type,
                catalog_type,
            } => write!(
                f,
                "geometry column type in table and gpkg_geometry_columns is inconsistent for layer {layer_name}: {table_type} vs {catalog_type}"
            ),
            Self::GeometryColumnNameMismatch {
                layer_name,
                table_column,
                catalog_column,
            } => write!(
                f,
                "geometry column '{table_column}' of layer {layer_name} is registered as '{catalog_column}'"
            ),
            Self::MultipleGeometryColumns { layer_name } => {
                write!(f, "multiple geometry columns found for layer: {layer_name}")
            }
            Self::CompositePrimaryKeyUnsupported { layer_name } => write!(
                f,
                "composite primary keys are not supported for layer: {layer_name}"
            ),
            Self::MissingPrimaryKeyColumn { layer_name } => {
                write!(f, "no primary key column found for layer: {layer_name}")
            }
            Self::MissingGeometryColumn { layer_name } => {
                write!(f, "no geometry column found for layer: {layer_name}")
            }
            Self::InvalidName { name, reason } => write!(f, "invalid name '{name}': {reason}"),
            Self::LayerAlreadyExists { layer_name } => {
                write!(f, "layer already exists: {layer_name}")
            }
            Self::MissingSpatialRefSysId { srs_id } => {
                write!(f, "srs_id {srs_id} not found in gpkg_spatial_ref_sys")
            }
            Self::InvalidWkt(reason) => write!(f, "invalid WKT: {reason}"),
            Self::InvalidGpkgGeometryMagic(magic) => {
                write!(f, "invalid gpkg geometry magic: {:#04x} {:#04x}", magic[0], magic[1])
            }
            Self::UnsupportedGpkgGeometryVersion(version) => {
                write!(f, "unsupported gpkg geometry version: {version}")
            }
            Self::InvalidGpkgGeometryFlags(flags) => {
                write!(f, "invalid gpkg geometry flags: {flags:#04x}")
            }
            Self::InvalidGpkgGeometryLength { len, minimum } => write!(
                f,
                "invalid gpkg geometry length: got {len} bytes, expected at least {minimum}"
            ),
            Self::InvalidGpkgGeometryEnvelope { len, required } => write!(
                f,
                "invalid gpkg geometry envelope length: got {len} bytes, required {required}"
            ),
            Self::EmptyGeometryWithPayload { payload_len } => write!(
                f,
                "gpkg geometry is flagged empty but carries {payload_len} payload bytes"
            ),
            Self::GeometryDimensionMismatch {
                envelope,
                has_z,
                has_m,
            } => write!(
                f,
                "gpkg geometry envelope is {envelope} but payload has z={has_z}, m={has_m}"
            ),
            Self::InvalidWkb(reason) => write!(f, "invalid WKB: {reason}"),
            Self::MissingFeatureId => write!(f, "feature has no identifier"),
            Self::InvalidPropertyCount { expected, got } => {
                write!(f, "invalid property count: expected {expected}, got {got}")
            }
            Self::MissingProperty { property } => write!(f, "missing property: {property}"),
            Self::ValueTypeMismatch { expected, actual } => {
                write!(f, "expected {expected}, got {actual}")
            }
            Self::ValueOutOfRange { target } => write!(f, "value out of range for {target}"),
            Self::ReadOnly => write!(f, "operation not allowed on read-only connection"),
        }
    }
}

impl Error for GpkgError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sql(err) => Some(err),
            Self::Statement { source, .. } => Some(source),
            Self::Wkb(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for GpkgError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sql(err)
    }
}

impl From<wkb::error::WkbError> for GpkgError {
    fn from(err: wkb::error::WkbError) -> Self {
        Self::Wkb(err)
    }
}

pub type Result<T> = std::result::Result<T, GpkgError>;
