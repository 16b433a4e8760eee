//! GeoPackage vector feature store built on top of rusqlite.
//!
//! ## Overview
//!
//! - `Gpkg` is an open GeoPackage container: a SQLite file carrying the
//!   GeoPackage `application_id` and the mandatory catalog tables.
//! - `GpkgLayer` is one feature table, with its schema, cached extent and a
//!   forward-only cursor.
//! - `GpkgFeature` is one row: an identifier, ordered attribute values and at
//!   most one geometry.
//! - `Value` is a single attribute value. An attribute that is not set has
//!   no value at all, which is different from `0` or `""`.
//!
//! `Gpkg` supports several open modes:
//!
//! - `Gpkg::open(path, update)`: open an existing file, read-write when
//!   `update` is true.
//! - `Gpkg::open_read_only(path)`: open an existing file without write access.
//! - `Gpkg::create(path)`: create a new file and its catalog tables.
//! - `Gpkg::create_in_memory()`: create a transient in-memory GeoPackage.
//!
//! You access a `GpkgLayer` via `Gpkg::open_layer(name)` for existing tables
//! or `Gpkg::create_layer(...)` for a new one. Geometries are built from
//! anything that implements `geo_traits::GeometryTrait<T = f64>` (for example
//! `geo_types::Point` or `wkt::Wkt`) and can be viewed the same way through
//! `Geometry::wkb()`.
//!
//! ## Writing
//!
//! ```
//! use gpkg_features::{
//!     FieldDefn, FieldType, Geometry, GeometryKind, GeometryType, Gpkg, LayerOptions, SpatialRef,
//! };
//!
//! let gpkg = Gpkg::create_in_memory()?;
//! let mut layer = gpkg.create_layer(
//!     "cities",
//!     Some(&SpatialRef::wgs84()),
//!     Some(GeometryType::new(GeometryKind::Point)),
//!     &LayerOptions::default(),
//! )?;
//! layer.add_field(FieldDefn::new("name", FieldType::String))?;
//! layer.add_field(FieldDefn::new("population", FieldType::Integer))?;
//!
//! let mut feature = layer.new_feature();
//! feature.set_geometry(Some(Geometry::new(&geo_types::Point::new(139.69, 35.69))?));
//! feature.set_property("name", "Tokyo")?;
//! layer.insert_feature(&mut feature)?;
//!
//! // the extent is written to gpkg_contents here
//! layer.close()?;
//! # Ok::<(), gpkg_features::GpkgError>(())
//! ```
//!
//! ## Reading
//!
//! ```no_run
//! use gpkg_features::{Envelope, Gpkg};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gpkg = Gpkg::open_read_only("data/example.gpkg")?;
//!     for layer_name in gpkg.list_layers()? {
//!         let mut layer = gpkg.open_layer(&layer_name)?;
//!         layer.set_attribute_filter(Some("population > 1000000"))?;
//!         layer.set_spatial_filter(Some(Envelope::new(120.0, 20.0, 150.0, 50.0)));
//!
//!         while let Some(feature) = layer.next_feature()? {
//!             let name: Option<String> = feature.property("name").map(String::try_from).transpose()?;
//!             println!("{layer_name} #{:?}: {name:?}", feature.fid());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Geometry blobs
//!
//! The codec is usable on its own:
//!
//! ```
//! use gpkg_features::{Geometry, decode_gpkg_geometry, encode_gpkg_geometry};
//!
//! let line = geo_types::LineString::from(vec![(0.0, 0.0), (3.0, 4.0)]);
//! let blob = encode_gpkg_geometry(&Geometry::new(&line)?, 4326);
//! let decoded = decode_gpkg_geometry(&blob)?;
//! assert_eq!(decoded.srs_id, 4326);
//! assert_eq!(decoded.geometry.envelope(), decoded.envelope);
//! # Ok::<(), gpkg_features::GpkgError>(())
//! ```
mod conversions;
mod error;
mod geometry;
mod gpkg;
mod ogc_sql;
mod options;
mod sql;
mod srs;
mod types;

pub use error::{GpkgError, Result};
pub use geometry::{
    DecodedGeometry, Envelope, Geometry, decode_gpkg_geometry, encode_gpkg_geometry,
};
pub use gpkg::{Gpkg, GpkgFeature, GpkgFeatures, GpkgLayer};
pub use options::{GpkgOptions, LayerOptions};
pub use srs::{Authority, SpatialRef};
pub use types::{
    FieldDefn, FieldType, GeometryFieldDefn, GeometryKind, GeometryType, TableSchema, Value,
};

// Re-export Dimension for `GeometryType::dimension`.
pub use wkb::reader::Dimension;
