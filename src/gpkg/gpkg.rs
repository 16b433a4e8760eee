use crate::conversions::{
    dimension_from_zm, dimension_to_zm, field_type_from_str, geometry_kind_to_str,
    geometry_type_from_str,
};
use crate::error::{GpkgError, Result};
use crate::geometry::Envelope;
use crate::ogc_sql::{
    GPKG_APPLICATION_ID, SQL_DELETE_CONTENTS, SQL_DELETE_GEOMETRY_COLUMNS, SQL_INSERT_GPKG_CONTENTS,
    SQL_INSERT_GPKG_GEOMETRY_COLUMNS, SQL_INSERT_SRS, SQL_LIST_LAYERS, SQL_SELECT_CONTENTS,
    SQL_SELECT_GEOMETRY_COLUMN_META, SQL_TABLE_COLUMNS, SQL_TABLE_EXISTS, initialize_gpkg,
    sql_create_table, sql_drop_table,
};
use crate::options::{GpkgOptions, LayerOptions};
use crate::sql::{quote_identifier, sql_command, sql_execute, sql_get_integer, sql_query};
use crate::srs::{SpatialRef, find_srs_id, lookup_srs, resolve_srs_id};
use crate::types::{FieldDefn, GeometryFieldDefn, GeometryType, TableSchema};
use rusqlite::OpenFlags;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::layer::GpkgLayer;

const GPKG_EXTENSION: &str = "gpkg";

// Characters that would need escaping in generated SQL or that GeoPackage
// readers commonly choke on.
const RESERVED_NAME_CHARS: &[char] = &['"', '\'', '`', ';', '[', ']', '\0'];
const RESERVED_TABLE_PREFIXES: &[&str] = &["gpkg_", "sqlite_"];

/// An open GeoPackage container.
///
/// Layers borrow the container, so every layer must be closed or dropped
/// before the container itself can be closed.
#[derive(Debug)]
pub struct Gpkg {
    conn: rusqlite::Connection,
    path: Option<PathBuf>,
    read_only: bool,
    options: GpkgOptions,
}

impl Gpkg {
    /// Open an existing GeoPackage.
    ///
    /// `update` selects read-write access. The file must have the `.gpkg`
    /// extension, be a regular file, carry the GeoPackage `application_id`
    /// and pass `PRAGMA integrity_check`; the checks run in that order.
    ///
    /// ```no_run
    /// use gpkg_features::Gpkg;
    ///
    /// let gpkg = Gpkg::open("data/example.gpkg", false)?;
    /// for name in gpkg.list_layers()? {
    ///     println!("{name}");
    /// }
    /// # Ok::<(), gpkg_features::GpkgError>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, update: bool) -> Result<Self> {
        Self::open_with_options(path, update, GpkgOptions::default())
    }

    /// Open an existing GeoPackage without write access.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, false, GpkgOptions::default())
    }

    pub fn open_with_options<P: AsRef<Path>>(
        path: P,
        update: bool,
        options: GpkgOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        check_extension(path)?;
        match path.metadata() {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => {
                return Err(GpkgError::NotARegularFile {
                    path: path.to_path_buf(),
                });
            }
            Err(_) => {
                return Err(GpkgError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
        }

        let flags = if update {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        };
        let conn = rusqlite::Connection::open_with_flags(path, flags)?;

        let application_id = sql_get_integer(&conn, "PRAGMA application_id", [])?;
        if application_id != GPKG_APPLICATION_ID {
            return Err(GpkgError::ApplicationIdMismatch {
                found: application_id,
            });
        }

        let report = sql_query(&conn, "PRAGMA integrity_check", [])?;
        if report.row_count() != 1 || report.text(0, 0) != Some("ok") {
            let lines = (0..report.row_count())
                .filter_map(|row| report.text(0, row))
                .collect::<Vec<&str>>()
                .join("; ");
            return Err(GpkgError::IntegrityCheckFailed(lines));
        }

        let gpkg = Self {
            conn,
            path: Some(path.to_path_buf()),
            read_only: !update,
            options,
        };
        gpkg.apply_options()?;
        debug!(path = %path.display(), update, "opened GeoPackage");
        Ok(gpkg)
    }

    /// Create a new GeoPackage file with the mandatory catalog tables.
    ///
    /// Fails if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with_options(path, GpkgOptions::default())
    }

    pub fn create_with_options<P: AsRef<Path>>(path: P, options: GpkgOptions) -> Result<Self> {
        let path = path.as_ref();
        check_extension(path)?;
        if path.exists() {
            return Err(GpkgError::FileAlreadyExists {
                path: path.to_path_buf(),
            });
        }

        let conn = rusqlite::Connection::open(path)?;
        if let Err(err) = bootstrap(&conn) {
            // Leave nothing behind that `open` would mistake for a container.
            drop(conn);
            if let Err(remove_err) = std::fs::remove_file(path) {
                warn!(
                    path = %path.display(),
                    error = %remove_err,
                    "failed to remove partially created GeoPackage"
                );
            }
            return Err(err);
        }

        let gpkg = Self {
            conn,
            path: Some(path.to_path_buf()),
            read_only: false,
            options,
        };
        gpkg.apply_options()?;
        info!(path = %path.display(), "created GeoPackage");
        Ok(gpkg)
    }

    /// Create a transient GeoPackage in memory.
    pub fn create_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        bootstrap(&conn)?;
        Ok(Self {
            conn,
            path: None,
            read_only: false,
            options: GpkgOptions::default(),
        })
    }

    fn apply_options(&self) -> Result<()> {
        if !self.options.synchronous {
            sql_command(&self.conn, "PRAGMA synchronous = OFF")?;
        }
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn options(&self) -> &GpkgOptions {
        &self.options
    }

    pub(crate) fn connection(&self) -> &rusqlite::Connection {
        &self.conn
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(GpkgError::ReadOnly);
        }
        Ok(())
    }

    /// List the names of the feature tables registered in `gpkg_contents`.
    pub fn list_layers(&self) -> Result<Vec<String>> {
        let result = sql_query(&self.conn, SQL_LIST_LAYERS, [])?;
        Ok((0..result.row_count())
            .filter_map(|row| result.text(0, row).map(str::to_string))
            .collect())
    }

    /// Resolve a spatial reference to its `srs_id`, registering it if needed.
    ///
    /// On a read-only container only already registered references resolve.
    pub fn srs_id(&self, srs: Option<&SpatialRef>) -> Result<i32> {
        match (srs, self.read_only) {
            (Some(srs), true) => find_srs_id(&self.conn, srs)?.ok_or(GpkgError::ReadOnly),
            _ => resolve_srs_id(&self.conn, srs),
        }
    }

    /// Load the spatial reference stored under `srs_id`.
    pub fn spatial_ref(&self, srs_id: i32) -> Result<SpatialRef> {
        lookup_srs(&self.conn, srs_id)
    }

    /// Expert-only: register a spatial reference system in `gpkg_spatial_ref_sys`.
    ///
    /// This performs a direct insert with all required columns and does no
    /// validation of the WKT or authority fields. Prefer [`Gpkg::srs_id`],
    /// which reuses matching rows.
    ///
    /// ```
    /// # use gpkg_features::Gpkg;
    /// let gpkg = Gpkg::create_in_memory()?;
    /// gpkg.register_srs(
    ///     "WGS 84 / Pseudo-Mercator",
    ///     3857,
    ///     "EPSG",
    ///     3857,
    ///     r#"PROJCS["WGS 84 / Pseudo-Mercator",AUTHORITY["EPSG","3857"]]"#,
    ///     "Web Mercator",
    /// )?;
    /// assert_eq!(gpkg.spatial_ref(3857)?.name(), Some("WGS 84 / Pseudo-Mercator"));
    /// # Ok::<(), gpkg_features::GpkgError>(())
    /// ```
    pub fn register_srs(
        &self,
        srs_name: &str,
        srs_id: i32,
        organization: &str,
        organization_coordsys_id: i32,
        definition: &str,
        description: &str,
    ) -> Result<()> {
        self.ensure_writable()?;
        sql_execute(
            &self.conn,
            SQL_INSERT_SRS,
            rusqlite::params![
                srs_name,
                srs_id,
                organization,
                organization_coordsys_id,
                definition,
                description
            ],
        )?;
        Ok(())
    }

    /// Open an existing feature table.
    pub fn open_layer(&self, layer_name: &str) -> Result<GpkgLayer<'_>> {
        let (schema, extent) = self.read_schema(layer_name)?;
        Ok(GpkgLayer::new(self, schema, extent))
    }

    /// Build the in-memory schema of a table from the catalog and from
    /// `pragma_table_info`.
    fn read_schema(&self, layer_name: &str) -> Result<(TableSchema, Option<Envelope>)> {
        let contents = sql_query(&self.conn, SQL_SELECT_CONTENTS, [layer_name])?;
        if contents.row_count() != 1 {
            return Err(GpkgError::LayerNotRegistered {
                layer_name: layer_name.to_string(),
                rows: contents.row_count(),
            });
        }

        let geometry_meta = sql_query(&self.conn, SQL_SELECT_GEOMETRY_COLUMN_META, [layer_name])?;
        if geometry_meta.row_count() != 1 {
            return Err(GpkgError::GeometryColumnNotRegistered {
                layer_name: layer_name.to_string(),
                rows: geometry_meta.row_count(),
            });
        }

        let columns = sql_query(&self.conn, SQL_TABLE_COLUMNS, [layer_name])?;
        if columns.row_count() == 0 {
            return Err(GpkgError::TableNotFound {
                layer_name: layer_name.to_string(),
            });
        }

        let catalog_column = geometry_meta.text(0, 0).unwrap_or_default().to_string();
        let catalog_type_name = geometry_meta.text(1, 0).unwrap_or_default().to_string();
        let (has_z, has_m) = dimension_from_zm(
            geometry_meta.integer(2, 0).unwrap_or_default(),
            geometry_meta.integer(3, 0).unwrap_or_default(),
        )?;
        let catalog_type = geometry_type_from_str(&catalog_type_name, has_z, has_m)
            .ok_or_else(|| GpkgError::UnsupportedGeometryType(catalog_type_name.clone()))?;
        let srs_id = geometry_meta
            .integer(4, 0)
            .and_then(|id| i32::try_from(id).ok())
            .ok_or(GpkgError::ValueOutOfRange { target: "srs_id" })?;

        let mut fid_column: Option<String> = None;
        let mut geometry: Option<GeometryFieldDefn> = None;
        let mut fields = Vec::new();
        for row in 0..columns.row_count() {
            let name = columns.text(0, row).unwrap_or_default();
            let declared_type = columns.text(1, row).unwrap_or_default();
            let is_primary_key = columns.integer(2, row).unwrap_or_default() != 0;

            if let Some(field_type) = field_type_from_str(declared_type) {
                if is_primary_key {
                    if fid_column.is_some() {
                        return Err(GpkgError::CompositePrimaryKeyUnsupported {
                            layer_name: layer_name.to_string(),
                        });
                    }
                    fid_column = Some(name.to_string());
                } else {
                    fields.push(FieldDefn::new(name, field_type));
                }
                continue;
            }

            let Some(table_type) = geometry_type_from_str(declared_type, has_z, has_m) else {
                warn!(
                    layer = layer_name,
                    column = name,
                    declared_type,
                    "skipping column with unsupported type"
                );
                continue;
            };
            if geometry.is_some() {
                return Err(GpkgError::MultipleGeometryColumns {
                    layer_name: layer_name.to_string(),
                });
            }
            if !name.eq_ignore_ascii_case(&catalog_column) {
                return Err(GpkgError::GeometryColumnNameMismatch {
                    layer_name: layer_name.to_string(),
                    table_column: name.to_string(),
                    catalog_column,
                });
            }
            if table_type.kind != catalog_type.kind {
                return Err(GpkgError::InconsistentGeometryType {
                    layer_name: layer_name.to_string(),
                    table_type: declared_type.to_string(),
                    catalog_type: catalog_type_name,
                });
            }

            let spatial_ref = match srs_id {
                0 | -1 => None,
                _ => match lookup_srs(&self.conn, srs_id) {
                    Ok(srs) => Some(srs),
                    Err(err) => {
                        warn!(layer = layer_name, srs_id, error = %err, "ignoring unusable spatial reference");
                        None
                    }
                },
            };
            geometry = Some(GeometryFieldDefn {
                name: name.to_string(),
                geometry_type: catalog_type,
                srs_id,
                spatial_ref,
            });
        }

        let fid_column = fid_column.ok_or_else(|| GpkgError::MissingPrimaryKeyColumn {
            layer_name: layer_name.to_string(),
        })?;
        if geometry.is_none() {
            return Err(GpkgError::MissingGeometryColumn {
                layer_name: layer_name.to_string(),
            });
        }

        // Partial extrema mean "no cached extent".
        let extent = match (
            contents.double(4, 0),
            contents.double(5, 0),
            contents.double(6, 0),
            contents.double(7, 0),
        ) {
            (Some(min_x), Some(min_y), Some(max_x), Some(max_y)) => {
                Some(Envelope::new(min_x, min_y, max_x, max_y))
            }
            _ => None,
        };

        let schema = TableSchema {
            table_name: layer_name.to_string(),
            fid_column,
            geometry,
            fields,
        };
        Ok((schema, extent))
    }

    /// Create a new feature table.
    ///
    /// `geometry_type == None` creates a table without geometry column; such
    /// a table is not registered in the catalog. The spatial reference is
    /// resolved (and registered if new) with [`Gpkg::srs_id`].
    ///
    /// ```
    /// use gpkg_features::{Gpkg, GeometryKind, GeometryType, LayerOptions, SpatialRef};
    ///
    /// let gpkg = Gpkg::create_in_memory()?;
    /// let layer = gpkg.create_layer(
    ///     "points",
    ///     Some(&SpatialRef::wgs84()),
    ///     Some(GeometryType::new(GeometryKind::Point)),
    ///     &LayerOptions::default(),
    /// )?;
    /// assert_eq!(layer.schema().fid_column, "FID");
    /// # Ok::<(), gpkg_features::GpkgError>(())
    /// ```
    pub fn create_layer(
        &self,
        layer_name: &str,
        spatial_ref: Option<&SpatialRef>,
        geometry_type: Option<GeometryType>,
        options: &LayerOptions,
    ) -> Result<GpkgLayer<'_>> {
        validate_table_name(layer_name)?;
        validate_column_name(&options.fid_column)?;
        if geometry_type.is_some() {
            validate_column_name(&options.geometry_column)?;
            if options.geometry_column.eq_ignore_ascii_case(&options.fid_column) {
                return Err(GpkgError::InvalidName {
                    name: options.geometry_column.clone(),
                    reason: "geometry column has the same name as the identifier column",
                });
            }
        }
        self.ensure_writable()?;

        let tx = self.conn.unchecked_transaction()?;

        if sql_get_integer(&self.conn, SQL_TABLE_EXISTS, [layer_name])? > 0 {
            if !options.overwrite {
                return Err(GpkgError::LayerAlreadyExists {
                    layer_name: layer_name.to_string(),
                });
            }
            sql_execute(&self.conn, SQL_DELETE_GEOMETRY_COLUMNS, [layer_name])?;
            sql_execute(&self.conn, SQL_DELETE_CONTENTS, [layer_name])?;
            sql_command(&self.conn, &sql_drop_table(layer_name))?;
        }

        let srs_id = resolve_srs_id(&self.conn, spatial_ref)?;

        let mut column_defs = vec![format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT",
            quote_identifier(&options.fid_column)
        )];
        if let Some(geometry_type) = geometry_type {
            column_defs.push(format!(
                "{} {}",
                quote_identifier(&options.geometry_column),
                geometry_kind_to_str(geometry_type.kind)
            ));
        }
        sql_command(
            &self.conn,
            &sql_create_table(layer_name, &column_defs.join(", ")),
        )?;

        let geometry = match geometry_type {
            Some(geometry_type) => {
                let identifier = options.identifier.as_deref().unwrap_or(layer_name);
                let description = options.description.as_deref().unwrap_or("");
                sql_execute(
                    &self.conn,
                    SQL_INSERT_GPKG_CONTENTS,
                    rusqlite::params![layer_name, identifier, description, srs_id],
                )?;
                let (z, m) = dimension_to_zm(geometry_type);
                sql_execute(
                    &self.conn,
                    SQL_INSERT_GPKG_GEOMETRY_COLUMNS,
                    rusqlite::params![
                        layer_name,
                        options.geometry_column,
                        geometry_kind_to_str(geometry_type.kind),
                        srs_id,
                        z,
                        m
                    ],
                )?;
                Some(GeometryFieldDefn {
                    name: options.geometry_column.clone(),
                    geometry_type,
                    srs_id,
                    spatial_ref: spatial_ref.cloned(),
                })
            }
            None => None,
        };

        tx.commit()?;

        if options.spatial_index && geometry.is_some() {
            debug!(layer = layer_name, "spatial index requested; not built");
        }
        info!(layer = layer_name, srs_id, "created layer");

        let schema = TableSchema {
            table_name: layer_name.to_string(),
            fid_column: options.fid_column.clone(),
            geometry,
            fields: Vec::new(),
        };
        Ok(GpkgLayer::new(self, schema, None))
    }

    /// Close the underlying connection, reporting any failure.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, err)| GpkgError::Sql(err))
    }
}

fn bootstrap(conn: &rusqlite::Connection) -> Result<()> {
    sql_command(conn, &format!("PRAGMA application_id = {GPKG_APPLICATION_ID}"))?;
    let tx = conn.unchecked_transaction()?;
    initialize_gpkg(conn)?;
    tx.commit()?;
    Ok(())
}

fn check_extension(path: &Path) -> Result<()> {
    let matches = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(GPKG_EXTENSION));
    if matches {
        Ok(())
    } else {
        Err(GpkgError::InvalidFileExtension {
            path: path.to_path_buf(),
        })
    }
}

pub(crate) fn validate_column_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(GpkgError::InvalidName {
            name: name.to_string(),
            reason: "name is empty",
        });
    }
    if name.contains(RESERVED_NAME_CHARS) {
        return Err(GpkgError::InvalidName {
            name: name.to_string(),
            reason: "name contains a reserved character",
        });
    }
    Ok(())
}

fn validate_table_name(name: &str) -> Result<()> {
    validate_column_name(name)?;
    let lower = name.to_ascii_lowercase();
    if RESERVED_TABLE_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(*prefix))
    {
        return Err(GpkgError::InvalidName {
            name: name.to_string(),
            reason: "name starts with a reserved prefix",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Gpkg;
    use crate::Result;
    use crate::error::GpkgError;
    use crate::geometry::Envelope;
    use crate::options::LayerOptions;
    use crate::sql::{sql_command, sql_get_integer, sql_query};
    use crate::srs::SpatialRef;
    use crate::types::{FieldType, GeometryKind, GeometryType};

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn point_type() -> Option<GeometryType> {
        Some(GeometryType::new(GeometryKind::Point))
    }

    fn catalog_row_counts(gpkg: &Gpkg) -> Result<(i64, i64, i64)> {
        let conn = gpkg.connection();
        Ok((
            sql_get_integer(conn, "SELECT COUNT(*) FROM gpkg_contents", [])?,
            sql_get_integer(conn, "SELECT COUNT(*) FROM gpkg_geometry_columns", [])?,
            sql_get_integer(conn, "SELECT COUNT(*) FROM gpkg_spatial_ref_sys", [])?,
        ))
    }

    #[test]
    fn create_writes_signature_and_catalog() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fresh.gpkg");
        let gpkg = Gpkg::create(&path)?;
        assert_eq!(gpkg.path(), Some(path.as_path()));
        gpkg.close()?;

        let bytes = std::fs::read(&path)?;
        // The SQLite header stores application_id at offset 68.
        assert_eq!(&bytes[68..72], b"GP10");

        let gpkg = Gpkg::open(&path, false)?;
        assert!(gpkg.is_read_only());
        let srs_ids = sql_query(
            gpkg.connection(),
            "SELECT srs_id FROM gpkg_spatial_ref_sys ORDER BY srs_id",
            [],
        )?;
        assert_eq!(
            (0..3).map(|row| srs_ids.integer(0, row)).collect::<Vec<_>>(),
            vec![Some(-1), Some(0), Some(4326)]
        );
        Ok(())
    }

    #[test]
    fn create_refuses_existing_file() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("exists.gpkg");
        std::fs::write(&path, b"")?;
        assert!(matches!(
            Gpkg::create(&path),
            Err(GpkgError::FileAlreadyExists { .. })
        ));
        Ok(())
    }

    #[test]
    fn open_checks_run_in_order() -> TestResult {
        let dir = tempfile::tempdir()?;

        assert!(matches!(
            Gpkg::open(dir.path().join("data.sqlite"), false),
            Err(GpkgError::InvalidFileExtension { .. })
        ));
        assert!(matches!(
            Gpkg::open(dir.path().join("missing.gpkg"), false),
            Err(GpkgError::FileNotFound { .. })
        ));

        let folder = dir.path().join("folder.gpkg");
        std::fs::create_dir(&folder)?;
        assert!(matches!(
            Gpkg::open(&folder, false),
            Err(GpkgError::NotARegularFile { .. })
        ));

        let garbage = dir.path().join("garbage.gpkg");
        std::fs::write(&garbage, vec![0x42_u8; 4096])?;
        assert!(Gpkg::open(&garbage, false).is_err());

        let plain = dir.path().join("plain.gpkg");
        let conn = rusqlite::Connection::open(&plain)?;
        sql_command(&conn, "CREATE TABLE t (x)")?;
        drop(conn);
        assert!(matches!(
            Gpkg::open(&plain, true),
            Err(GpkgError::ApplicationIdMismatch { found: 0 })
        ));
        Ok(())
    }

    #[test]
    fn open_rejects_inconsistent_index() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("damaged.gpkg");
        Gpkg::create(&path)?.close()?;

        // Point each index at the other's b-tree so their entries no longer
        // match the table rows.
        let conn = rusqlite::Connection::open(&path)?;
        sql_command(
            &conn,
            "CREATE TABLE a (x INTEGER);
             CREATE INDEX a_x ON a (x);
             INSERT INTO a VALUES (1), (2), (3);
             CREATE TABLE b (x INTEGER);
             CREATE INDEX b_x ON b (x);
             INSERT INTO b VALUES (10), (20);",
        )?;
        let root_of = |name: &str| {
            sql_get_integer(&conn, "SELECT rootpage FROM sqlite_master WHERE name = ?1", [name])
        };
        let (a_root, b_root) = (root_of("a_x")?, root_of("b_x")?);
        sql_command(&conn, "PRAGMA writable_schema = ON")?;
        conn.execute(
            "UPDATE sqlite_master SET rootpage = ?1 WHERE name = 'a_x'",
            [b_root],
        )?;
        conn.execute(
            "UPDATE sqlite_master SET rootpage = ?1 WHERE name = 'b_x'",
            [a_root],
        )?;
        drop(conn);

        match Gpkg::open(&path, false) {
            Err(GpkgError::IntegrityCheckFailed(report)) => {
                assert!(report.contains("a_x"), "{report}");
            }
            other => panic!("expected an integrity failure, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn extension_is_case_insensitive() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("UPPER.GPKG");
        Gpkg::create(&path)?.close()?;
        Gpkg::open(&path, true)?.close()?;
        Ok(())
    }

    #[test]
    fn create_layer_registers_catalog_rows() -> Result<()> {
        let gpkg = Gpkg::create_in_memory()?;
        let options = LayerOptions {
            geometry_column: "geom".to_string(),
            description: Some("sample points".to_string()),
            ..Default::default()
        };
        gpkg.create_layer("points", Some(&SpatialRef::wgs84()), point_type(), &options)?;

        let contents = sql_query(
            gpkg.connection(),
            "SELECT table_name, data_type, identifier, description, srs_id, min_x FROM gpkg_contents",
            [],
        )?;
        assert_eq!(contents.row_count(), 1);
        assert_eq!(contents.text(0, 0), Some("points"));
        assert_eq!(contents.text(1, 0), Some("features"));
        assert_eq!(contents.text(2, 0), Some("points"));
        assert_eq!(contents.text(3, 0), Some("sample points"));
        assert_eq!(contents.integer(4, 0), Some(4326));
        assert_eq!(contents.double(5, 0), None);

        let geometry_columns = sql_query(
            gpkg.connection(),
            "SELECT column_name, geometry_type_name, srs_id, z, m FROM gpkg_geometry_columns",
            [],
        )?;
        assert_eq!(geometry_columns.text(0, 0), Some("geom"));
        assert_eq!(geometry_columns.text(1, 0), Some("POINT"));
        assert_eq!(geometry_columns.integer(2, 0), Some(4326));
        assert_eq!(geometry_columns.integer(3, 0), Some(0));
        assert_eq!(geometry_columns.integer(4, 0), Some(0));

        assert_eq!(gpkg.list_layers()?, vec!["points".to_string()]);
        Ok(())
    }

    #[test]
    fn reserved_names_leave_catalog_untouched() -> Result<()> {
        let gpkg = Gpkg::create_in_memory()?;
        let before = catalog_row_counts(&gpkg)?;

        for name in ["gpkg_points", "GPKG_x", "bad\"name", "semi;colon", "brack[et", ""] {
            let err = gpkg
                .create_layer(name, None, point_type(), &LayerOptions::default())
                .expect_err("reserved name");
            assert!(matches!(err, GpkgError::InvalidName { .. }), "{name}");
        }
        let options = LayerOptions {
            fid_column: "f'id".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            gpkg.create_layer("points", None, point_type(), &options),
            Err(GpkgError::InvalidName { .. })
        ));

        assert_eq!(catalog_row_counts(&gpkg)?, before);
        assert_eq!(
            sql_get_integer(
                gpkg.connection(),
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'points'",
                []
            )?,
            0
        );
        Ok(())
    }

    #[test]
    fn existing_table_fails_unless_overwrite() -> Result<()> {
        let gpkg = Gpkg::create_in_memory()?;
        gpkg.create_layer("roads", None, point_type(), &LayerOptions::default())?;

        assert!(matches!(
            gpkg.create_layer("roads", None, point_type(), &LayerOptions::default()),
            Err(GpkgError::LayerAlreadyExists { .. })
        ));

        let options = LayerOptions {
            overwrite: true,
            ..Default::default()
        };
        let line = GeometryType::new(GeometryKind::LineString).with_z();
        gpkg.create_layer("roads", None, Some(line), &options)?;

        let layer = gpkg.open_layer("roads")?;
        let geometry = layer.schema().geometry.as_ref().map(|g| g.geometry_type);
        assert_eq!(geometry, Some(line));
        assert_eq!(catalog_row_counts(&gpkg)?.0, 1);
        Ok(())
    }

    #[test]
    fn overwrite_replaces_catalog_rows_of_differently_cased_name() -> Result<()> {
        let gpkg = Gpkg::create_in_memory()?;
        gpkg.create_layer("Roads", None, point_type(), &LayerOptions::default())?;

        let options = LayerOptions {
            overwrite: true,
            ..Default::default()
        };
        let line = GeometryType::new(GeometryKind::LineString);
        gpkg.create_layer("roads", None, Some(line), &options)?;

        assert_eq!(gpkg.list_layers()?, vec!["roads".to_string()]);
        let (contents, geometry_columns, _) = catalog_row_counts(&gpkg)?;
        assert_eq!((contents, geometry_columns), (1, 1));
        let layer = gpkg.open_layer("roads")?;
        let geometry = layer.schema().geometry.as_ref().map(|g| g.geometry_type);
        assert_eq!(geometry, Some(line));
        Ok(())
    }

    #[test]
    fn out_of_range_srs_id_is_reported() -> Result<()> {
        let gpkg = Gpkg::create_in_memory()?;
        gpkg.create_layer("places", None, point_type(), &LayerOptions::default())?;
        sql_command(
            gpkg.connection(),
            "PRAGMA foreign_keys = OFF;
             UPDATE gpkg_geometry_columns SET srs_id = 4294967296 WHERE table_name = 'places';",
        )?;
        assert!(matches!(
            gpkg.open_layer("places"),
            Err(GpkgError::ValueOutOfRange { target: "srs_id" })
        ));
        Ok(())
    }

    #[test]
    fn open_layer_reads_schema() -> Result<()> {
        let gpkg = Gpkg::create_in_memory()?;
        let mut layer = gpkg.create_layer(
            "places",
            Some(&SpatialRef::wgs84()),
            point_type(),
            &LayerOptions::default(),
        )?;
        layer.add_field(crate::FieldDefn::new("name", FieldType::String))?;
        layer.add_field(crate::FieldDefn::new("population", FieldType::Integer))?;
        layer.add_field(crate::FieldDefn::new("area", FieldType::Real))?;
        drop(layer);
        sql_command(
            gpkg.connection(),
            r#"ALTER TABLE places ADD COLUMN "mystery" VARCHAR;
               UPDATE gpkg_contents SET min_x = 1, min_y = 2, max_x = 3 WHERE table_name = 'places';"#,
        )?;

        let layer = gpkg.open_layer("places")?;
        let schema = layer.schema();
        assert_eq!(schema.fid_column, "FID");
        let names = schema.fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["name", "population", "area"]);
        assert_eq!(schema.fields[2].field_type, FieldType::Real);
        let geometry = schema.geometry.as_ref().ok_or(GpkgError::MissingGeometryColumn {
            layer_name: "places".to_string(),
        })?;
        assert_eq!(geometry.name, "geometry");
        assert_eq!(geometry.srs_id, 4326);
        assert_eq!(geometry.spatial_ref, Some(SpatialRef::wgs84()));
        // max_y is NULL
        assert_eq!(layer.extent(), None);
        drop(layer);

        sql_command(
            gpkg.connection(),
            "UPDATE gpkg_contents SET max_y = 4 WHERE table_name = 'places'",
        )?;
        assert_eq!(
            gpkg.open_layer("places")?.extent(),
            Some(Envelope::new(1.0, 2.0, 3.0, 4.0))
        );
        Ok(())
    }

    #[test]
    fn schema_inconsistencies_are_rejected() -> Result<()> {
        let gpkg = Gpkg::create_in_memory()?;
        let conn = gpkg.connection();

        assert!(matches!(
            gpkg.open_layer("nothing"),
            Err(GpkgError::LayerNotRegistered { rows: 0, .. })
        ));

        sql_command(
            conn,
            "INSERT INTO gpkg_contents (table_name, data_type, srs_id) VALUES ('orphan', 'features', 0)",
        )?;
        assert!(matches!(
            gpkg.open_layer("orphan"),
            Err(GpkgError::GeometryColumnNotRegistered { rows: 0, .. })
        ));
        sql_command(
            conn,
            "INSERT INTO gpkg_geometry_columns VALUES ('orphan', 'geom', 'POINT', 0, 0, 0)",
        )?;
        assert!(matches!(
            gpkg.open_layer("orphan"),
            Err(GpkgError::TableNotFound { .. })
        ));

        sql_command(
            conn,
            "CREATE TABLE mismatch (fid INTEGER PRIMARY KEY, geom LINESTRING);
             INSERT INTO gpkg_contents (table_name, data_type, srs_id) VALUES ('mismatch', 'features', 0);
             INSERT INTO gpkg_geometry_columns VALUES ('mismatch', 'geom', 'POINT', 0, 0, 0);",
        )?;
        assert!(matches!(
            gpkg.open_layer("mismatch"),
            Err(GpkgError::InconsistentGeometryType { .. })
        ));

        sql_command(
            conn,
            "CREATE TABLE two_geoms (fid INTEGER PRIMARY KEY, geom POINT, other POINT);
             INSERT INTO gpkg_contents (table_name, data_type, srs_id) VALUES ('two_geoms', 'features', 0);
             INSERT INTO gpkg_geometry_columns VALUES ('two_geoms', 'geom', 'POINT', 0, 0, 0);",
        )?;
        assert!(matches!(
            gpkg.open_layer("two_geoms"),
            Err(GpkgError::MultipleGeometryColumns { .. })
        ));

        sql_command(
            conn,
            "CREATE TABLE no_pk (id INTEGER, geom POINT);
             INSERT INTO gpkg_contents (table_name, data_type, srs_id) VALUES ('no_pk', 'features', 0);
             INSERT INTO gpkg_geometry_columns VALUES ('no_pk', 'geom', 'POINT', 0, 0, 0);",
        )?;
        assert!(matches!(
            gpkg.open_layer("no_pk"),
            Err(GpkgError::MissingPrimaryKeyColumn { .. })
        ));

        sql_command(
            conn,
            "CREATE TABLE composite (a INTEGER, b INTEGER, geom POINT, PRIMARY KEY (a, b));
             INSERT INTO gpkg_contents (table_name, data_type, srs_id) VALUES ('composite', 'features', 0);
             INSERT INTO gpkg_geometry_columns VALUES ('composite', 'geom', 'POINT', 0, 0, 0);",
        )?;
        assert!(matches!(
            gpkg.open_layer("composite"),
            Err(GpkgError::CompositePrimaryKeyUnsupported { .. })
        ));

        sql_command(
            conn,
            "CREATE TABLE renamed (fid INTEGER PRIMARY KEY, shape POINT);
             INSERT INTO gpkg_contents (table_name, data_type, srs_id) VALUES ('renamed', 'features', 0);
             INSERT INTO gpkg_geometry_columns VALUES ('renamed', 'geom', 'POINT', 0, 0, 0);",
        )?;
        assert!(matches!(
            gpkg.open_layer("renamed"),
            Err(GpkgError::GeometryColumnNameMismatch { .. })
        ));

        sql_command(
            conn,
            "CREATE TABLE bare (fid INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO gpkg_contents (table_name, data_type, srs_id) VALUES ('bare', 'features', 0);
             INSERT INTO gpkg_geometry_columns VALUES ('bare', 'geom', 'POINT', 0, 0, 0);",
        )?;
        assert!(matches!(
            gpkg.open_layer("bare"),
            Err(GpkgError::MissingGeometryColumn { .. })
        ));

        sql_command(
            conn,
            "CREATE TABLE bad_dims (fid INTEGER PRIMARY KEY, geom POINT);
             INSERT INTO gpkg_contents (table_name, data_type, srs_id) VALUES ('bad_dims', 'features', 0);
             INSERT INTO gpkg_geometry_columns VALUES ('bad_dims', 'geom', 'POINT', 0, 7, 0);",
        )?;
        assert!(matches!(
            gpkg.open_layer("bad_dims"),
            Err(GpkgError::InvalidDimension { z: 7, m: 0 })
        ));
        Ok(())
    }

    #[test]
    fn read_only_rejects_writes() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ro.gpkg");
        let gpkg = Gpkg::create(&path)?;
        gpkg.create_layer("points", None, point_type(), &LayerOptions::default())?;
        gpkg.close()?;

        let gpkg = Gpkg::open_read_only(&path)?;
        assert!(matches!(
            gpkg.create_layer("more", None, point_type(), &LayerOptions::default()),
            Err(GpkgError::ReadOnly)
        ));
        assert!(matches!(
            gpkg.register_srs("x", 1, "NONE", 1, "undefined", "x"),
            Err(GpkgError::ReadOnly)
        ));
        assert_eq!(gpkg.srs_id(Some(&SpatialRef::wgs84()))?, 4326);
        assert_eq!(gpkg.srs_id(None)?, 0);

        let mut layer = gpkg.open_layer("points")?;
        let mut feature = layer.new_feature();
        assert!(matches!(
            layer.insert_feature(&mut feature),
            Err(GpkgError::ReadOnly)
        ));
        assert!(matches!(layer.delete_feature(1), Err(GpkgError::ReadOnly)));
        Ok(())
    }
}
