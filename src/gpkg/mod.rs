//! Container, table engine and feature types.

mod feature;
mod gpkg;
mod layer;

pub use feature::GpkgFeature;
pub use gpkg::Gpkg;
pub use layer::{GpkgFeatures, GpkgLayer};
