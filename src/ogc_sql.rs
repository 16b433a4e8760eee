// cf. https://www.geopackage.org/spec140/index.html#table_definition_sql

use crate::error::Result;
use crate::sql::{quote_identifier, sql_command, sql_execute};

/// `PRAGMA application_id` of a GeoPackage 1.x file ("GP10").
pub(crate) const GPKG_APPLICATION_ID: i64 = 0x4750_3130;

// gpkg_spatial_ref_sys: the SRS catalog referenced by gpkg_contents and
// gpkg_geometry_columns to describe spatial reference systems.
pub(crate) const SQL_GPKG_SPATIAL_REF_SYS: &str = "
CREATE TABLE gpkg_spatial_ref_sys (
  srs_name TEXT NOT NULL,
  srs_id INTEGER PRIMARY KEY,
  organization TEXT NOT NULL,
  organization_coordsys_id INTEGER NOT NULL,
  definition  TEXT NOT NULL,
  description TEXT
);
";

// gpkg_contents: lists all geospatial contents in the package with identifying
// and descriptive metadata for user display and access.
pub(crate) const SQL_GPKG_CONTENTS: &str = "
CREATE TABLE gpkg_contents (
  table_name TEXT NOT NULL PRIMARY KEY,
  data_type TEXT NOT NULL,
  identifier TEXT UNIQUE,
  description TEXT DEFAULT '',
  last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
  min_x DOUBLE,
  min_y DOUBLE,
  max_x DOUBLE,
  max_y DOUBLE,
  srs_id INTEGER,
  CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
";

// gpkg_geometry_columns: identifies geometry columns and geometry types for
// vector feature user data tables.
pub(crate) const SQL_GPKG_GEOMETRY_COLUMNS: &str = "
CREATE TABLE gpkg_geometry_columns (
  table_name TEXT NOT NULL,
  column_name TEXT NOT NULL,
  geometry_type_name TEXT NOT NULL,
  srs_id INTEGER NOT NULL,
  z TINYINT NOT NULL,
  m TINYINT NOT NULL,
  CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
  CONSTRAINT uk_gc_table_name UNIQUE (table_name),
  CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
  CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
);
";

pub(crate) const EPSG4326_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AXIS["Latitude",NORTH],AXIS["Longitude",EAST],AUTHORITY["EPSG","4326"]]"#;

pub(crate) const SQL_INSERT_SRS: &str = "
INSERT INTO gpkg_spatial_ref_sys
  (srs_name, srs_id, organization, organization_coordsys_id, definition, description)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6)
";

pub(crate) const SQL_SELECT_SRS_BY_ID: &str = "
SELECT definition, organization, organization_coordsys_id
FROM gpkg_spatial_ref_sys
WHERE srs_id = ?1
";

pub(crate) const SQL_SELECT_SRS_BY_AUTHORITY: &str = "
SELECT srs_id FROM gpkg_spatial_ref_sys
WHERE upper(organization) = upper(?1) AND organization_coordsys_id = ?2
";

pub(crate) const SQL_SELECT_SRS_BY_DEFINITION: &str =
    "SELECT srs_id FROM gpkg_spatial_ref_sys WHERE definition = ?1";

pub(crate) const SQL_MAX_SRS_ID: &str = "SELECT COALESCE(MAX(srs_id), 0) FROM gpkg_spatial_ref_sys";

pub(crate) const SQL_LIST_LAYERS: &str =
    "SELECT table_name FROM gpkg_contents WHERE lower(data_type) = 'features' ORDER BY table_name";

pub(crate) const SQL_SELECT_CONTENTS: &str = "
SELECT table_name, data_type, identifier, description, min_x, min_y, max_x, max_y, srs_id
FROM gpkg_contents
WHERE table_name = ?1 AND lower(data_type) = 'features'
";

pub(crate) const SQL_INSERT_GPKG_CONTENTS: &str = "
INSERT INTO gpkg_contents
  (table_name, data_type, identifier, description, srs_id)
VALUES
  (?1, 'features', ?2, ?3, ?4)
";

pub(crate) const SQL_UPDATE_CONTENTS_EXTENT: &str = "
UPDATE gpkg_contents
SET min_x = ?2, min_y = ?3, max_x = ?4, max_y = ?5,
    last_change = strftime('%Y-%m-%dT%H:%M:%fZ','now')
WHERE table_name = ?1
";

pub(crate) const SQL_DELETE_CONTENTS: &str =
    "DELETE FROM gpkg_contents WHERE lower(table_name) = lower(?1)";

pub(crate) const SQL_INSERT_GPKG_GEOMETRY_COLUMNS: &str = "
INSERT INTO gpkg_geometry_columns
  (table_name, column_name, geometry_type_name, srs_id, z, m)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6)
";

pub(crate) const SQL_SELECT_GEOMETRY_COLUMN_META: &str = "
SELECT column_name, geometry_type_name, z, m, srs_id
FROM gpkg_geometry_columns
WHERE table_name = ?1
";

pub(crate) const SQL_DELETE_GEOMETRY_COLUMNS: &str =
    "DELETE FROM gpkg_geometry_columns WHERE lower(table_name) = lower(?1)";

pub(crate) const SQL_TABLE_EXISTS: &str =
    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND lower(name) = lower(?1)";

pub(crate) const SQL_TABLE_COLUMNS: &str =
    "SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid";

pub(crate) fn sql_create_table(layer_name: &str, column_defs: &str) -> String {
    format!("CREATE TABLE {} ({})", quote_identifier(layer_name), column_defs)
}

pub(crate) fn sql_drop_table(layer_name: &str) -> String {
    format!("DROP TABLE {}", quote_identifier(layer_name))
}

pub(crate) fn sql_add_column(layer_name: &str, column_name: &str, column_type: &str) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_identifier(layer_name),
        quote_identifier(column_name),
        column_type
    )
}

pub(crate) fn sql_insert_feature(layer_name: &str, columns: &[&str]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote_identifier(layer_name));
    }
    let joined = columns
        .iter()
        .map(|name| quote_identifier(name))
        .collect::<Vec<String>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|idx| format!("?{idx}"))
        .collect::<Vec<String>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(layer_name),
        joined,
        placeholders
    )
}

/// `UPDATE ... WHERE fid = ?1`; the assigned columns bind from `?2` onwards.
pub(crate) fn sql_update_feature(layer_name: &str, fid_column: &str, columns: &[&str]) -> String {
    let assignments = columns
        .iter()
        .enumerate()
        .map(|(idx, name)| format!("{} = ?{}", quote_identifier(name), idx + 2))
        .collect::<Vec<String>>()
        .join(", ");
    format!(
        "UPDATE {} SET {} WHERE {} = ?1",
        quote_identifier(layer_name),
        assignments,
        quote_identifier(fid_column)
    )
}

pub(crate) fn sql_delete_feature(layer_name: &str, fid_column: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?1",
        quote_identifier(layer_name),
        quote_identifier(fid_column)
    )
}

fn select_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|name| quote_identifier(name))
        .collect::<Vec<String>>()
        .join(", ")
}

/// One page of a keyset scan. `?1` is the last identifier seen, or `NULL`
/// for the first page. `columns[0]` must be the identifier column.
pub(crate) fn sql_select_features(
    layer_name: &str,
    columns: &[&str],
    filter: Option<&str>,
    page_size: usize,
) -> String {
    let fid = quote_identifier(columns[0]);
    let filter_clause = match filter {
        Some(filter) => format!(" AND ({filter})"),
        None => String::new(),
    };
    format!(
        "SELECT {} FROM {} WHERE (?1 IS NULL OR {fid} > ?1){filter_clause} ORDER BY {fid} LIMIT {page_size}",
        select_list(columns),
        quote_identifier(layer_name),
    )
}

pub(crate) fn sql_select_feature_by_id(layer_name: &str, columns: &[&str]) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        select_list(columns),
        quote_identifier(layer_name),
        quote_identifier(columns[0])
    )
}

pub(crate) fn sql_count_features(layer_name: &str, filter: Option<&str>) -> String {
    match filter {
        Some(filter) => format!(
            "SELECT COUNT(*) FROM {} WHERE ({filter})",
            quote_identifier(layer_name)
        ),
        None => format!("SELECT COUNT(*) FROM {}", quote_identifier(layer_name)),
    }
}

/// Create the mandatory catalog tables, in dependency order, with the three
/// baseline spatial reference rows.
pub(crate) fn initialize_gpkg(conn: &rusqlite::Connection) -> Result<()> {
    sql_command(conn, SQL_GPKG_SPATIAL_REF_SYS)?;
    register_default_srs_ids(conn)?;
    sql_command(conn, SQL_GPKG_CONTENTS)?;
    sql_command(conn, SQL_GPKG_GEOMETRY_COLUMNS)?;
    Ok(())
}

fn register_default_srs_ids(conn: &rusqlite::Connection) -> Result<()> {
    sql_execute(
        conn,
        SQL_INSERT_SRS,
        rusqlite::params!["WGS 84", 4326, "EPSG", 4326, EPSG4326_WKT, "WGS 84"],
    )?;
    sql_execute(
        conn,
        SQL_INSERT_SRS,
        rusqlite::params![
            "Undefined Cartesian SRS",
            -1,
            "NONE",
            -1,
            "undefined",
            "undefined Cartesian coordinate reference system"
        ],
    )?;
    sql_execute(
        conn,
        SQL_INSERT_SRS,
        rusqlite::params![
            "Undefined geographic SRS",
            0,
            "NONE",
            0,
            "undefined",
            "undefined geographic coordinate reference system"
        ],
    )?;
    Ok(())
}
