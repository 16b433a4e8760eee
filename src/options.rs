/// Container-level settings.
#[derive(Clone, Debug, PartialEq)]
pub struct GpkgOptions {
    /// Number of rows a layer cursor fetches per round trip.
    pub page_size: usize,
    /// When `false`, `PRAGMA synchronous = OFF` is issued after opening.
    ///
    /// This speeds up bulk loads but the file may be corrupted if the
    /// process or the OS crashes in the middle of a write.
    pub synchronous: bool,
}

impl Default for GpkgOptions {
    fn default() -> Self {
        Self {
            page_size: 256,
            synchronous: true,
        }
    }
}

/// Options consumed by `Gpkg::create_layer`.
///
/// ```
/// use gpkg_features::LayerOptions;
///
/// let options = LayerOptions {
///     geometry_column: "geom".to_string(),
///     overwrite: true,
///     ..Default::default()
/// };
/// assert_eq!(options.fid_column, "FID");
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct LayerOptions {
    pub geometry_column: String,
    pub fid_column: String,
    /// Drop and recreate a table with the same name instead of failing.
    pub overwrite: bool,
    /// Accepted for compatibility; no spatial index is built.
    pub spatial_index: bool,
    /// `gpkg_contents.identifier`; defaults to the table name.
    pub identifier: Option<String>,
    pub description: Option<String>,
}

impl Default for LayerOptions {
    fn default() -> Self {
        Self {
            geometry_column: "geometry".to_string(),
            fid_column: "FID".to_string(),
            overwrite: false,
            spatial_index: false,
            identifier: None,
            description: None,
        }
    }
}
