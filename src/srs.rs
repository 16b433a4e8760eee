//! Spatial references and the `gpkg_spatial_ref_sys` registry.

use crate::error::{GpkgError, Result};
use crate::ogc_sql::{
    EPSG4326_WKT, SQL_INSERT_SRS, SQL_MAX_SRS_ID, SQL_SELECT_SRS_BY_AUTHORITY,
    SQL_SELECT_SRS_BY_DEFINITION, SQL_SELECT_SRS_BY_ID,
};
use crate::sql::{sql_execute, sql_get_integer, sql_query};
use rusqlite::Connection;
use tracing::debug;

/// An authority/code pair such as `EPSG:4326`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Authority {
    pub name: String,
    pub code: i64,
}

impl Authority {
    pub fn new(name: impl Into<String>, code: i64) -> Self {
        Self {
            name: name.into(),
            code,
        }
    }
}

/// A coordinate reference system described by WKT.
#[derive(Clone, Debug, PartialEq)]
pub struct SpatialRef {
    wkt: String,
    name: Option<String>,
    authority: Option<Authority>,
    wgs84_geographic: bool,
}

impl SpatialRef {
    /// Parse a WKT1 or WKT2 definition.
    ///
    /// Only the structure is checked. The top-level `AUTHORITY` (WKT1) or
    /// `ID` (WKT2) node, when present, becomes the authority.
    pub fn from_wkt(wkt: &str) -> Result<Self> {
        let root = WktParser::parse(wkt)?;

        let name = match root.children.first() {
            Some(WktItem::Text(name)) => Some(name.clone()),
            _ => None,
        };
        let authority = root
            .child("AUTHORITY")
            .or_else(|| root.child("ID"))
            .map(authority_from_node)
            .transpose()?;

        let geographic = matches!(
            root.keyword.as_str(),
            "GEOGCS" | "GEOGCRS" | "GEODCRS" | "GEOGRAPHICCRS"
        );
        let datum_name = root.child("DATUM").and_then(|datum| match datum.children.first() {
            Some(WktItem::Text(name)) => Some(name.as_str()),
            _ => None,
        });
        let wgs84_geographic = geographic
            && (name
                .as_deref()
                .is_some_and(|name| name.eq_ignore_ascii_case("WGS 84"))
                || datum_name.is_some_and(|datum| {
                    datum.eq_ignore_ascii_case("WGS_1984")
                        || datum.eq_ignore_ascii_case("World Geodetic System 1984")
                }));

        Ok(Self {
            wkt: wkt.trim().to_string(),
            name,
            authority,
            wgs84_geographic,
        })
    }

    /// Geographic WGS 84 (`EPSG:4326`).
    pub fn wgs84() -> Self {
        Self {
            wkt: EPSG4326_WKT.to_string(),
            name: Some("WGS 84".to_string()),
            authority: Some(Authority::new("EPSG", 4326)),
            wgs84_geographic: true,
        }
    }

    pub fn with_authority(self, name: impl Into<String>, code: i64) -> Self {
        Self {
            authority: Some(Authority::new(name, code)),
            ..self
        }
    }

    pub fn to_wkt(&self) -> &str {
        &self.wkt
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The authority declared in the definition, as written.
    pub fn authority(&self) -> Option<&Authority> {
        self.authority.as_ref()
    }

    /// The canonical authority of this reference system, if it can be
    /// determined. Authority names are normalized to upper case, and a WGS 84
    /// geographic definition without an authority is identified as
    /// `EPSG:4326`.
    pub fn auto_identify(&self) -> Option<Authority> {
        match &self.authority {
            Some(authority) => Some(Authority::new(
                authority.name.to_ascii_uppercase(),
                authority.code,
            )),
            None if self.wgs84_geographic => Some(Authority::new("EPSG", 4326)),
            None => None,
        }
    }
}

fn authority_from_node(node: &WktNode) -> Result<Authority> {
    let invalid = || GpkgError::InvalidWkt(format!("malformed {} node", node.keyword));
    let name = match node.children.first() {
        Some(WktItem::Text(name)) => name.clone(),
        _ => return Err(invalid()),
    };
    let code = match node.children.get(1) {
        Some(WktItem::Text(code)) | Some(WktItem::Word(code)) => {
            code.trim().parse::<i64>().map_err(|_| invalid())?
        }
        _ => return Err(invalid()),
    };
    Ok(Authority { name, code })
}

/// Resolve a spatial reference to a `gpkg_spatial_ref_sys` id, registering
/// it when no row matches.
///
/// `None` resolves to the undefined geographic SRS (`0`).
pub(crate) fn resolve_srs_id(conn: &Connection, srs: Option<&SpatialRef>) -> Result<i32> {
    let Some(srs) = srs else {
        return Ok(0);
    };
    match find_srs_id(conn, srs)? {
        Some(id) => Ok(id),
        None => register_srs(conn, srs),
    }
}

/// Look up a registered id by authority, then by definition text.
pub(crate) fn find_srs_id(conn: &Connection, srs: &SpatialRef) -> Result<Option<i32>> {
    if let Some(authority) = srs.auto_identify() {
        let found = sql_query(
            conn,
            SQL_SELECT_SRS_BY_AUTHORITY,
            rusqlite::params![authority.name, authority.code],
        )?;
        if let Some(id) = found.integer(0, 0) {
            return srs_id_from_i64(id).map(Some);
        }
    }

    let found = sql_query(conn, SQL_SELECT_SRS_BY_DEFINITION, [srs.to_wkt()])?;
    found.integer(0, 0).map(srs_id_from_i64).transpose()
}

// New ids are max(srs_id) + 1.
fn register_srs(conn: &Connection, srs: &SpatialRef) -> Result<i32> {
    let authority = srs.auto_identify();
    let new_id = srs_id_from_i64(sql_get_integer(conn, SQL_MAX_SRS_ID, [])? + 1)?;
    let (organization, code) = match &authority {
        Some(authority) => (authority.name.as_str(), authority.code),
        None => ("NONE", i64::from(new_id)),
    };
    sql_execute(
        conn,
        SQL_INSERT_SRS,
        rusqlite::params![
            srs.name().unwrap_or("Unknown"),
            new_id,
            organization,
            code,
            srs.to_wkt(),
            Option::<&str>::None
        ],
    )?;
    debug!(srs_id = new_id, organization, code, "registered spatial reference");
    Ok(new_id)
}

/// Load the spatial reference registered under `srs_id`.
pub(crate) fn lookup_srs(conn: &Connection, srs_id: i32) -> Result<SpatialRef> {
    let found = sql_query(conn, SQL_SELECT_SRS_BY_ID, [srs_id])?;
    if found.row_count() != 1 {
        return Err(GpkgError::MissingSpatialRefSysId { srs_id });
    }
    let definition = found
        .text(0, 0)
        .ok_or_else(|| GpkgError::InvalidWkt(format!("srs_id {srs_id} has no definition")))?;
    let srs = SpatialRef::from_wkt(definition)?;
    if srs.authority.is_some() {
        return Ok(srs);
    }
    match (found.text(1, 0), found.integer(2, 0)) {
        (Some(organization), Some(code)) if !organization.eq_ignore_ascii_case("NONE") => {
            Ok(srs.with_authority(organization, code))
        }
        _ => Ok(srs),
    }
}

fn srs_id_from_i64(id: i64) -> Result<i32> {
    i32::try_from(id).map_err(|_| GpkgError::ValueOutOfRange { target: "srs_id" })
}

#[derive(Debug)]
struct WktNode {
    keyword: String,
    children: Vec<WktItem>,
}

impl WktNode {
    fn child(&self, keyword: &str) -> Option<&WktNode> {
        self.children.iter().find_map(|item| match item {
            WktItem::Node(node) if node.keyword == keyword => Some(node),
            _ => None,
        })
    }
}

#[derive(Debug)]
enum WktItem {
    Node(WktNode),
    Text(String),
    // numbers and enumerations such as NORTH
    Word(String),
}

struct WktParser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> WktParser<'a> {
    fn parse(text: &'a str) -> Result<WktNode> {
        let mut parser = Self { text, pos: 0 };
        parser.skip_whitespace();
        let keyword = parser.word();
        let root = parser.node(keyword)?;
        parser.skip_whitespace();
        if parser.pos != text.len() {
            return Err(parser.error("unexpected trailing characters"));
        }
        Ok(root)
    }

    fn error(&self, reason: &str) -> GpkgError {
        GpkgError::InvalidWkt(format!("{reason} at offset {}", self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn word(&mut self) -> &'a str {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| !b.is_ascii_whitespace() && !b"[](),\"".contains(&b))
        {
            self.pos += 1;
        }
        &self.text[start..self.pos]
    }

    fn node(&mut self, keyword: &str) -> Result<WktNode> {
        if keyword.is_empty() || !keyword.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(self.error("expected a keyword"));
        }
        self.skip_whitespace();
        let close = match self.peek() {
            Some(b'[') => b']',
            Some(b'(') => b')',
            _ => return Err(self.error("expected '[' or '('")),
        };
        self.pos += 1;

        let mut children = Vec::new();
        loop {
            self.skip_whitespace();
            children.push(self.item()?);
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b) if b == close => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.error("expected ',' or closing bracket")),
            }
        }

        Ok(WktNode {
            keyword: keyword.to_ascii_uppercase(),
            children,
        })
    }

    fn item(&mut self) -> Result<WktItem> {
        if self.peek() == Some(b'"') {
            return self.quoted().map(WktItem::Text);
        }
        let word = self.word();
        if word.is_empty() {
            return Err(self.error("expected a value"));
        }
        self.skip_whitespace();
        match self.peek() {
            Some(b'[') | Some(b'(') => self.node(word).map(WktItem::Node),
            _ => Ok(WktItem::Word(word.to_string())),
        }
    }

    // `""` inside a quoted string is an escaped quote.
    fn quoted(&mut self) -> Result<String> {
        self.pos += 1;
        let mut value = String::new();
        loop {
            let rest = &self.text[self.pos..];
            let Some(end) = rest.find('"') else {
                return Err(self.error("unterminated string"));
            };
            value.push_str(&rest[..end]);
            self.pos += end + 1;
            if self.peek() == Some(b'"') {
                value.push('"');
                self.pos += 1;
            } else {
                return Ok(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ogc_sql::initialize_gpkg;

    const WEB_MERCATOR_WKT2: &str = r#"PROJCRS["WGS 84 / Pseudo-Mercator",BASEGEOGCRS["WGS 84",DATUM["World Geodetic System 1984",ELLIPSOID["WGS 84",6378137,298.257223563]]],CONVERSION["Popular Visualisation Pseudo-Mercator",METHOD["Popular Visualisation Pseudo Mercator"]],CS[Cartesian,2],AXIS["easting (X)",east],AXIS["northing (Y)",north],LENGTHUNIT["metre",1],ID["EPSG",3857]]"#;

    const LOCAL_WKT: &str = r#"LOCAL_CS["site grid",LOCAL_DATUM["site",0],UNIT["metre",1],AXIS["X",EAST],AXIS["Y",NORTH]]"#;

    fn catalog() -> Result<Connection> {
        let conn = Connection::open_in_memory()?;
        initialize_gpkg(&conn)?;
        Ok(conn)
    }

    fn srs_row_count(conn: &Connection) -> Result<i64> {
        sql_get_integer(conn, "SELECT COUNT(*) FROM gpkg_spatial_ref_sys", [])
    }

    #[test]
    fn parses_authority_from_wkt1_and_wkt2() -> Result<()> {
        let wgs84 = SpatialRef::from_wkt(EPSG4326_WKT)?;
        assert_eq!(wgs84.name(), Some("WGS 84"));
        assert_eq!(wgs84.authority(), Some(&Authority::new("EPSG", 4326)));
        assert_eq!(wgs84, SpatialRef::wgs84());

        let mercator = SpatialRef::from_wkt(WEB_MERCATOR_WKT2)?;
        assert_eq!(mercator.name(), Some("WGS 84 / Pseudo-Mercator"));
        assert_eq!(mercator.auto_identify(), Some(Authority::new("EPSG", 3857)));

        let local = SpatialRef::from_wkt(LOCAL_WKT)?;
        assert_eq!(local.auto_identify(), None);
        Ok(())
    }

    #[test]
    fn identifies_bare_wgs84() -> Result<()> {
        let srs = SpatialRef::from_wkt(
            r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433]]"#,
        )?;
        assert_eq!(srs.authority(), None);
        assert_eq!(srs.auto_identify(), Some(Authority::new("EPSG", 4326)));

        let lower = SpatialRef::from_wkt(r#"GEOGCS["x",AUTHORITY["epsg","4326"]]"#)?;
        assert_eq!(lower.auto_identify(), Some(Authority::new("EPSG", 4326)));
        Ok(())
    }

    #[test]
    fn rejects_malformed_wkt() {
        for text in [
            "",
            "undefined",
            r#"GEOGCS["WGS 84""#,
            r#"GEOGCS["WGS 84"]]"#,
            r#"GEOGCS["WGS 84" DATUM["x"]]"#,
            r#"GEOGCS["x",AUTHORITY["EPSG","abc"]]"#,
        ] {
            assert!(
                matches!(SpatialRef::from_wkt(text), Err(GpkgError::InvalidWkt(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn resolve_null_is_undefined_geographic() -> Result<()> {
        let conn = catalog()?;
        assert_eq!(resolve_srs_id(&conn, None)?, 0);
        assert_eq!(srs_row_count(&conn)?, 3);
        Ok(())
    }

    #[test]
    fn resolve_matches_registered_authority() -> Result<()> {
        let conn = catalog()?;
        let bare = SpatialRef::from_wkt(r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563]]]"#)?;
        assert_eq!(resolve_srs_id(&conn, Some(&SpatialRef::wgs84()))?, 4326);
        assert_eq!(resolve_srs_id(&conn, Some(&bare))?, 4326);
        assert_eq!(srs_row_count(&conn)?, 3);
        Ok(())
    }

    #[test]
    fn resolve_registers_once() -> Result<()> {
        let conn = catalog()?;

        let mercator = SpatialRef::from_wkt(WEB_MERCATOR_WKT2)?;
        assert_eq!(resolve_srs_id(&conn, Some(&mercator))?, 4327);
        assert_eq!(resolve_srs_id(&conn, Some(&mercator))?, 4327);
        assert_eq!(srs_row_count(&conn)?, 4);

        let row = sql_query(
            &conn,
            "SELECT srs_name, organization, organization_coordsys_id, definition FROM gpkg_spatial_ref_sys WHERE srs_id = 4327",
            [],
        )?;
        assert_eq!(row.text(0, 0), Some("WGS 84 / Pseudo-Mercator"));
        assert_eq!(row.text(1, 0), Some("EPSG"));
        assert_eq!(row.integer(2, 0), Some(3857));
        assert_eq!(row.text(3, 0), Some(WEB_MERCATOR_WKT2));

        let local = SpatialRef::from_wkt(LOCAL_WKT)?;
        assert_eq!(resolve_srs_id(&conn, Some(&local))?, 4328);
        assert_eq!(resolve_srs_id(&conn, Some(&local))?, 4328);
        assert_eq!(srs_row_count(&conn)?, 5);

        let row = sql_query(
            &conn,
            "SELECT organization, organization_coordsys_id FROM gpkg_spatial_ref_sys WHERE srs_id = 4328",
            [],
        )?;
        assert_eq!(row.text(0, 0), Some("NONE"));
        assert_eq!(row.integer(1, 0), Some(4328));
        Ok(())
    }

    #[test]
    fn lookup_reads_definition() -> Result<()> {
        let conn = catalog()?;
        let srs = lookup_srs(&conn, 4326)?;
        assert_eq!(srs.auto_identify(), Some(Authority::new("EPSG", 4326)));

        let local = SpatialRef::from_wkt(LOCAL_WKT)?.with_authority("ACME", 17);
        let id = resolve_srs_id(&conn, Some(&local))?;
        assert_eq!(lookup_srs(&conn, id)?.authority(), Some(&Authority::new("ACME", 17)));

        assert!(matches!(
            lookup_srs(&conn, 999),
            Err(GpkgError::MissingSpatialRefSysId { srs_id: 999 })
        ));
        assert!(matches!(lookup_srs(&conn, 0), Err(GpkgError::InvalidWkt(_))));
        Ok(())
    }
}
