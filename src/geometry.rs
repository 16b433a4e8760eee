//! GeoPackage binary geometry codec.
//!
//! A stored geometry is a small header followed by standard WKB:
//!
//! ```text
//! "GP" | version (0) | flags | srs_id (i32) | envelope (0, 4, 6 or 8 f64) | WKB
//! ```
//!
//! cf. https://www.geopackage.org/spec140/index.html#gpb_format

use crate::error::{GpkgError, Result};
use crate::types::{GeometryKind, GeometryType};
use geo_traits::{
    CoordTrait, GeometryCollectionTrait, GeometryTrait, LineStringTrait, MultiLineStringTrait,
    MultiPointTrait, MultiPolygonTrait, PointTrait, PolygonTrait,
};
use wkb::reader::Wkb;

const GPKG_MAGIC: [u8; 2] = [0x47, 0x50];
const GPKG_HEADER_LEN: usize = 8;
const FLAG_LITTLE_ENDIAN: u8 = 0b0000_0001;
const FLAG_ENVELOPE_MASK: u8 = 0b0000_1110;
const FLAG_EMPTY: u8 = 0b0001_0000;
// extended geometry type (bit 5) and the two reserved bits
const FLAG_UNSUPPORTED_MASK: u8 = 0b1110_0000;

// Byte-order marker, GEOMETRYCOLLECTION type code, zero members.
const EMPTY_COLLECTION_WKB: [u8; 9] = [0x01, 0x07, 0, 0, 0, 0, 0, 0, 0];

const MAX_WKB_DEPTH: usize = 64;

/// A 2D bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Grow this envelope to cover `other`. Never shrinks.
    pub fn merge(&mut self, other: &Envelope) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    fn expand(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }
}

/// An owned geometry held as validated WKB.
#[derive(Clone, Debug, PartialEq)]
pub struct Geometry {
    wkb: Vec<u8>,
    geometry_type: GeometryType,
    envelope: Option<Envelope>,
}

impl Geometry {
    /// Serialize any geometry into WKB.
    ///
    /// ```
    /// use gpkg_features::{Geometry, GeometryKind};
    ///
    /// let point = Geometry::new(&geo_types::Point::new(1.0, 2.0))?;
    /// assert_eq!(point.geometry_type().kind, GeometryKind::Point);
    /// # Ok::<(), gpkg_features::GpkgError>(())
    /// ```
    pub fn new<G: GeometryTrait<T = f64>>(geometry: &G) -> Result<Self> {
        let mut wkb = Vec::new();
        wkb::writer::write_geometry(&mut wkb, geometry, &Default::default())?;
        Self::from_wkb(wkb)
    }

    /// Take ownership of WKB bytes after checking that they describe exactly
    /// one well-formed geometry.
    pub fn from_wkb(wkb: Vec<u8>) -> Result<Self> {
        let mut walker = WkbWalker { buf: &wkb, pos: 0 };
        let geometry_type = walker.geometry(0)?;
        if walker.pos != wkb.len() {
            return Err(GpkgError::InvalidWkb(format!(
                "{} trailing bytes after geometry",
                wkb.len() - walker.pos
            )));
        }

        let envelope = bounds_from_geometry(&Wkb::try_new(&wkb)?);
        Ok(Self {
            wkb,
            geometry_type,
            envelope,
        })
    }

    /// View the geometry through `geo_traits`.
    pub fn wkb(&self) -> Result<Wkb<'_>> {
        Ok(Wkb::try_new(&self.wkb)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.wkb
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.wkb
    }

    pub fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    /// XY bounds; `None` for an empty geometry.
    pub fn envelope(&self) -> Option<Envelope> {
        self.envelope
    }

    pub fn is_empty(&self) -> bool {
        self.envelope.is_none()
    }
}

/// Result of [`decode_gpkg_geometry`].
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedGeometry {
    pub srs_id: i32,
    /// The envelope stored in the header, if any.
    pub envelope: Option<Envelope>,
    pub geometry: Geometry,
}

/// Encode a geometry as a GeoPackage blob.
///
/// Writes little endian. Non-empty geometries other than points carry an XY
/// envelope.
pub fn encode_gpkg_geometry(geometry: &Geometry, srs_id: i32) -> Vec<u8> {
    let envelope = match geometry.geometry_type.kind {
        GeometryKind::Point => None,
        _ => geometry.envelope,
    };

    let envelope_len = if envelope.is_some() { 32 } else { 0 };
    let mut blob = Vec::with_capacity(GPKG_HEADER_LEN + envelope_len + geometry.wkb.len());
    let flags = match envelope {
        Some(_) => FLAG_LITTLE_ENDIAN | (1 << 1),
        None => FLAG_LITTLE_ENDIAN,
    };
    blob.extend_from_slice(&GPKG_MAGIC);
    blob.push(0x00);
    blob.push(flags);
    blob.extend_from_slice(&srs_id.to_le_bytes());
    if let Some(env) = envelope {
        for value in [env.min_x, env.max_x, env.min_y, env.max_y] {
            blob.extend_from_slice(&value.to_le_bytes());
        }
    }
    blob.extend_from_slice(&geometry.wkb);
    blob
}

/// Decode a GeoPackage blob. Never panics on malformed input.
pub fn decode_gpkg_geometry(blob: &[u8]) -> Result<DecodedGeometry> {
    if blob.len() < GPKG_HEADER_LEN {
        return Err(GpkgError::InvalidGpkgGeometryLength {
            len: blob.len(),
            minimum: GPKG_HEADER_LEN,
        });
    }
    if blob[0..2] != GPKG_MAGIC {
        return Err(GpkgError::InvalidGpkgGeometryMagic([blob[0], blob[1]]));
    }
    if blob[2] != 0 {
        return Err(GpkgError::UnsupportedGpkgGeometryVersion(blob[2]));
    }

    let flags = blob[3];
    if flags & FLAG_UNSUPPORTED_MASK != 0 {
        return Err(GpkgError::InvalidGpkgGeometryFlags(flags));
    }
    let little_endian = flags & FLAG_LITTLE_ENDIAN != 0;
    let indicator = (flags & FLAG_ENVELOPE_MASK) >> 1;
    let envelope_len: usize = match indicator {
        0 => 0,  // no envelope
        1 => 32, // [minx, maxx, miny, maxy]
        2 => 48, // [minx, maxx, miny, maxy, minz, maxz]
        3 => 48, // [minx, maxx, miny, maxy, minm, maxm]
        4 => 64, // [minx, maxx, miny, maxy, minz, maxz, minm, maxm]
        _ => return Err(GpkgError::InvalidGpkgGeometryFlags(flags)),
    };

    let srs_bytes = [blob[4], blob[5], blob[6], blob[7]];
    let srs_id = if little_endian {
        i32::from_le_bytes(srs_bytes)
    } else {
        i32::from_be_bytes(srs_bytes)
    };

    let payload_offset = GPKG_HEADER_LEN + envelope_len;
    if blob.len() < payload_offset {
        return Err(GpkgError::InvalidGpkgGeometryEnvelope {
            len: blob.len(),
            required: payload_offset,
        });
    }
    let envelope = (envelope_len > 0).then(|| {
        let read = |idx: usize| {
            let start = GPKG_HEADER_LEN + idx * 8;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&blob[start..start + 8]);
            if little_endian {
                f64::from_le_bytes(bytes)
            } else {
                f64::from_be_bytes(bytes)
            }
        };
        Envelope::new(read(0), read(2), read(1), read(3))
    });

    let payload = &blob[payload_offset..];
    if flags & FLAG_EMPTY != 0 {
        if !payload.is_empty() {
            return Err(GpkgError::EmptyGeometryWithPayload {
                payload_len: payload.len(),
            });
        }
        return Ok(DecodedGeometry {
            srs_id,
            envelope,
            geometry: Geometry::from_wkb(EMPTY_COLLECTION_WKB.to_vec())?,
        });
    }

    let geometry = Geometry::from_wkb(payload.to_vec())?;
    let ty = geometry.geometry_type;
    let (envelope_z, envelope_m, name) = match indicator {
        2 => (true, false, "XYZ"),
        3 => (false, true, "XYM"),
        4 => (true, true, "XYZM"),
        _ => (false, false, "XY"),
    };
    if (envelope_z && !ty.has_z) || (envelope_m && !ty.has_m) {
        return Err(GpkgError::GeometryDimensionMismatch {
            envelope: name,
            has_z: ty.has_z,
            has_m: ty.has_m,
        });
    }

    Ok(DecodedGeometry {
        srs_id,
        envelope,
        geometry,
    })
}

// Walks the WKB structure without materializing coordinates, so that
// truncated buffers and trailing garbage are reported before the bytes are
// handed to `Wkb::try_new`.
struct WkbWalker<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WkbWalker<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                GpkgError::InvalidWkb(format!(
                    "truncated at byte {} (needed {n} more, {} left)",
                    self.pos,
                    self.buf.len() - self.pos
                ))
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u32(&mut self, little_endian: bool) -> Result<u32> {
        let b = self.take(4)?;
        let bytes = [b[0], b[1], b[2], b[3]];
        Ok(if little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    fn skip_coords(&mut self, count: u32, dims: usize) -> Result<()> {
        let len = (count as usize)
            .checked_mul(dims * 8)
            .ok_or_else(|| GpkgError::InvalidWkb(format!("coordinate count {count} overflows")))?;
        self.take(len).map(|_| ())
    }

    fn geometry(&mut self, depth: usize) -> Result<GeometryType> {
        if depth > MAX_WKB_DEPTH {
            return Err(GpkgError::InvalidWkb(
                "geometry collections nested too deeply".to_string(),
            ));
        }
        let little_endian = match self.take(1)?[0] {
            0 => false,
            1 => true,
            other => {
                return Err(GpkgError::InvalidWkb(format!(
                    "invalid byte order marker {other}"
                )));
            }
        };
        let ty = wkb_geometry_type(self.read_u32(little_endian)?)?;
        let dims = 2 + usize::from(ty.has_z) + usize::from(ty.has_m);

        match ty.kind {
            GeometryKind::Point => self.skip_coords(1, dims)?,
            GeometryKind::LineString => {
                let count = self.read_u32(little_endian)?;
                self.skip_coords(count, dims)?;
            }
            GeometryKind::Polygon => {
                let rings = self.read_u32(little_endian)?;
                for _ in 0..rings {
                    let count = self.read_u32(little_endian)?;
                    self.skip_coords(count, dims)?;
                }
            }
            GeometryKind::MultiPoint
            | GeometryKind::MultiLineString
            | GeometryKind::MultiPolygon
            | GeometryKind::GeometryCollection => {
                let members = self.read_u32(little_endian)?;
                for _ in 0..members {
                    self.geometry(depth + 1)?;
                }
            }
            GeometryKind::Geometry => {
                return Err(GpkgError::InvalidWkb("missing geometry type".to_string()));
            }
        }
        Ok(ty)
    }
}

// ISO type codes: 1-7, plus 1000 for Z, 2000 for M, 3000 for ZM.
fn wkb_geometry_type(code: u32) -> Result<GeometryType> {
    let (has_z, has_m) = match code / 1000 {
        0 => (false, false),
        1 => (true, false),
        2 => (false, true),
        3 => (true, true),
        _ => return Err(GpkgError::InvalidWkb(format!("unsupported WKB type code {code}"))),
    };
    let kind = match code % 1000 {
        1 => GeometryKind::Point,
        2 => GeometryKind::LineString,
        3 => GeometryKind::Polygon,
        4 => GeometryKind::MultiPoint,
        5 => GeometryKind::MultiLineString,
        6 => GeometryKind::MultiPolygon,
        7 => GeometryKind::GeometryCollection,
        _ => return Err(GpkgError::InvalidWkb(format!("unsupported WKB type code {code}"))),
    };
    Ok(GeometryType { kind, has_z, has_m })
}

fn bounds_from_geometry<G: GeometryTrait<T = f64>>(geom: &G) -> Option<Envelope> {
    use geo_traits::GeometryType as GeoType;

    let mut bounds: Option<Envelope> = None;
    match geom.as_type() {
        GeoType::Point(point) => {
            if let Some(coord) = point.coord() {
                add_coord(&mut bounds, &coord);
            }
        }
        GeoType::LineString(line) => add_line_string(&mut bounds, line),
        GeoType::Polygon(poly) => add_polygon(&mut bounds, poly),
        GeoType::MultiPoint(multi) => {
            for point in multi.points() {
                if let Some(coord) = point.coord() {
                    add_coord(&mut bounds, &coord);
                }
            }
        }
        GeoType::MultiLineString(multi) => {
            for line in multi.line_strings() {
                add_line_string(&mut bounds, &line);
            }
        }
        GeoType::MultiPolygon(multi) => {
            for poly in multi.polygons() {
                add_polygon(&mut bounds, &poly);
            }
        }
        GeoType::GeometryCollection(collection) => {
            for sub_geom in collection.geometries() {
                if let Some(sub_bounds) = bounds_from_geometry(&sub_geom) {
                    match bounds.as_mut() {
                        Some(existing) => existing.merge(&sub_bounds),
                        None => bounds = Some(sub_bounds),
                    }
                }
            }
        }
        // WKB has no encoding for these.
        GeoType::Rect(_) | GeoType::Triangle(_) | GeoType::Line(_) => {}
    }

    bounds
}

fn add_polygon<P: PolygonTrait<T = f64>>(bounds: &mut Option<Envelope>, poly: &P) {
    if let Some(ring) = poly.exterior() {
        add_line_string(bounds, &ring);
    }
    for ring in poly.interiors() {
        add_line_string(bounds, &ring);
    }
}

fn add_line_string<L: LineStringTrait<T = f64>>(bounds: &mut Option<Envelope>, line: &L) {
    for coord in line.coords() {
        add_coord(bounds, &coord);
    }
}

fn add_coord<C: CoordTrait<T = f64>>(bounds: &mut Option<Envelope>, coord: &C) {
    let (x, y) = coord.x_y();
    // empty points are written as NaN coordinates
    if x.is_nan() || y.is_nan() {
        return;
    }
    match bounds {
        Some(existing) => existing.expand(x, y),
        None => *bounds = Some(Envelope::new(x, y, x, y)),
    }
}
