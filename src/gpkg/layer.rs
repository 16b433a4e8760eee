use crate::conversions::{bind_value, decode_value, field_type_to_str, sql_value_type_name};
use crate::error::{GpkgError, Result};
use crate::geometry::{Envelope, decode_gpkg_geometry, encode_gpkg_geometry};
use crate::ogc_sql::{
    SQL_UPDATE_CONTENTS_EXTENT, sql_add_column, sql_count_features, sql_delete_feature,
    sql_insert_feature, sql_select_feature_by_id, sql_select_features, sql_update_feature,
};
use crate::sql::{sql_command, sql_execute, sql_get_integer, sql_prepare, sql_query};
use crate::types::{FieldDefn, TableSchema};
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use super::gpkg::validate_column_name;
use super::{Gpkg, GpkgFeature};

mod cursor;

use cursor::Cursor;

type FeaturePredicate<'a> = Box<dyn Fn(&GpkgFeature) -> Option<bool> + 'a>;

/// An open feature table.
///
/// A layer caches the table extent and flushes it to `gpkg_contents` on
/// [`GpkgLayer::sync`], [`GpkgLayer::close`] or drop. Reading goes through
/// a single forward-only cursor driven by [`GpkgLayer::next_feature`].
pub struct GpkgLayer<'a> {
    gpkg: &'a Gpkg,
    schema: TableSchema,
    field_index_by_name: Arc<HashMap<String, usize>>,
    extent: Option<Envelope>,
    extent_dirty: bool,
    attribute_filter: Option<String>,
    spatial_filter: Option<Envelope>,
    predicate: Option<FeaturePredicate<'a>>,
    cursor: Option<Cursor<'a>>,
}

impl fmt::Debug for GpkgLayer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpkgLayer")
            .field("schema", &self.schema)
            .field("extent", &self.extent)
            .field("extent_dirty", &self.extent_dirty)
            .field("attribute_filter", &self.attribute_filter)
            .field("spatial_filter", &self.spatial_filter)
            .field("has_predicate", &self.predicate.is_some())
            .finish_non_exhaustive()
    }
}

impl<'a> GpkgLayer<'a> {
    pub(super) fn new(gpkg: &'a Gpkg, schema: TableSchema, extent: Option<Envelope>) -> Self {
        let field_index_by_name = Arc::new(build_field_index_by_name(&schema.fields));
        Self {
            gpkg,
            schema,
            field_index_by_name,
            extent,
            extent_dirty: false,
            attribute_filter: None,
            spatial_filter: None,
            predicate: None,
            cursor: None,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.schema.table_name
    }

    /// The cached extent, including features added through this layer.
    pub fn extent(&self) -> Option<Envelope> {
        self.extent
    }

    /// An empty feature matching the current schema.
    pub fn new_feature(&self) -> GpkgFeature {
        GpkgFeature::new(Arc::clone(&self.field_index_by_name))
    }

    /// Add an attribute column to the table.
    ///
    /// Features created before this call no longer match the schema.
    pub fn add_field(&mut self, field: FieldDefn) -> Result<()> {
        validate_column_name(&field.name)?;
        self.gpkg.ensure_writable()?;
        let taken = self
            .schema
            .column_names()
            .into_iter()
            .any(|column| column.eq_ignore_ascii_case(&field.name));
        if taken {
            return Err(GpkgError::InvalidName {
                name: field.name,
                reason: "column already exists",
            });
        }

        self.reset_cursor();
        sql_command(
            self.gpkg.connection(),
            &sql_add_column(
                &self.schema.table_name,
                &field.name,
                field_type_to_str(field.field_type),
            ),
        )?;
        self.schema.fields.push(field);
        self.field_index_by_name = Arc::new(build_field_index_by_name(&self.schema.fields));
        Ok(())
    }

    /// Insert a feature and assign its new identifier.
    ///
    /// Only the geometry (when present) and the fields that are set are
    /// written; everything else takes the column default. A feature that
    /// already carries an identifier is written with it.
    ///
    /// ```
    /// use gpkg_features::{FieldDefn, FieldType, Geometry, GeometryKind, GeometryType, Gpkg, LayerOptions};
    ///
    /// let gpkg = Gpkg::create_in_memory()?;
    /// let mut layer = gpkg.create_layer(
    ///     "points",
    ///     None,
    ///     Some(GeometryType::new(GeometryKind::Point)),
    ///     &LayerOptions::default(),
    /// )?;
    /// layer.add_field(FieldDefn::new("name", FieldType::String))?;
    ///
    /// let mut feature = layer.new_feature();
    /// feature.set_geometry(Some(Geometry::new(&geo_types::Point::new(1.0, 2.0))?));
    /// feature.set_property("name", "alpha")?;
    /// layer.insert_feature(&mut feature)?;
    /// assert_eq!(feature.fid(), Some(1));
    /// # Ok::<(), gpkg_features::GpkgError>(())
    /// ```
    pub fn insert_feature(&mut self, feature: &mut GpkgFeature) -> Result<()> {
        self.gpkg.ensure_writable()?;
        self.check_field_count(feature)?;

        let (sql, values) = {
            let mut columns = Vec::new();
            let mut values = Vec::new();
            if let Some(fid) = feature.fid {
                columns.push(self.schema.fid_column.as_str());
                values.push(SqlValue::Integer(fid));
            }
            self.bind_columns(feature, &mut columns, &mut values)?;
            (sql_insert_feature(&self.schema.table_name, &columns), values)
        };

        let conn = self.gpkg.connection();
        sql_execute(conn, &sql, params_from_iter(values))?;
        feature.fid = Some(conn.last_insert_rowid());

        if let Some(envelope) = feature.geometry().and_then(|geometry| geometry.envelope()) {
            self.merge_extent(&envelope);
        }
        Ok(())
    }

    /// Rewrite the stored row with the feature's identifier.
    ///
    /// Returns `false` when no row has that identifier.
    pub fn replace_feature(&mut self, feature: &GpkgFeature) -> Result<bool> {
        self.gpkg.ensure_writable()?;
        let fid = feature.fid.ok_or(GpkgError::MissingFeatureId)?;
        self.check_field_count(feature)?;

        let (sql, values) = {
            let mut columns = Vec::new();
            let mut values = vec![SqlValue::Integer(fid)];
            self.bind_columns(feature, &mut columns, &mut values)?;
            if columns.is_empty() {
                // still report whether the row exists
                columns.push(self.schema.fid_column.as_str());
                values.push(SqlValue::Integer(fid));
            }
            (
                sql_update_feature(&self.schema.table_name, &self.schema.fid_column, &columns),
                values,
            )
        };

        let changed = sql_execute(self.gpkg.connection(), &sql, params_from_iter(values))? > 0;
        if changed {
            if let Some(envelope) = feature.geometry().and_then(|geometry| geometry.envelope()) {
                self.merge_extent(&envelope);
            }
        }
        Ok(changed)
    }

    /// Delete the row with identifier `fid`. Deleting a missing row is not an
    /// error; the return value tells whether a row was removed.
    ///
    /// The extent is left as is.
    pub fn delete_feature(&self, fid: i64) -> Result<bool> {
        self.gpkg.ensure_writable()?;
        let sql = sql_delete_feature(&self.schema.table_name, &self.schema.fid_column);
        Ok(sql_execute(self.gpkg.connection(), &sql, [fid])? > 0)
    }

    /// Fetch one feature by identifier, ignoring every filter.
    ///
    /// This resets the cursor.
    pub fn feature(&mut self, fid: i64) -> Result<Option<GpkgFeature>> {
        self.reset_cursor();
        let columns = self.schema.column_names();
        let sql = sql_select_feature_by_id(&self.schema.table_name, &columns);
        sql_query(self.gpkg.connection(), &sql, [fid])?
            .into_rows()
            .into_iter()
            .next()
            .map(|row| self.decode_row(row))
            .transpose()
    }

    /// Drop the active cursor; the next read starts from the beginning.
    pub fn reset_cursor(&mut self) {
        self.cursor = None;
    }

    /// The next feature passing every filter, or `None` at the end.
    ///
    /// Once the end is reached this keeps returning `None` until
    /// [`GpkgLayer::reset_cursor`] is called.
    pub fn next_feature(&mut self) -> Result<Option<GpkgFeature>> {
        if self.cursor.is_none() {
            self.cursor = Some(self.prepare_cursor()?);
        }
        loop {
            let Some(cursor) = self.cursor.as_mut() else {
                return Ok(None);
            };
            let row = match cursor.next_row() {
                Ok(Some(row)) => row,
                Ok(None) => return Ok(None),
                Err(err) => {
                    self.cursor = None;
                    return Err(err);
                }
            };
            let feature = self.decode_row(row)?;
            if self.passes_filters(&feature) {
                return Ok(Some(feature));
            }
        }
    }

    /// Iterate over the features passing every filter, from the beginning.
    ///
    /// ```
    /// use gpkg_features::{Gpkg, LayerOptions};
    ///
    /// let gpkg = Gpkg::create_in_memory()?;
    /// let mut layer = gpkg.create_layer("rows", None, None, &LayerOptions::default())?;
    /// for _ in 0..3 {
    ///     layer.insert_feature(&mut layer.new_feature())?;
    /// }
    /// let fids = layer
    ///     .features()
    ///     .map(|feature| feature.map(|f| f.fid()))
    ///     .collect::<Result<Vec<_>, _>>()?;
    /// assert_eq!(fids, vec![Some(1), Some(2), Some(3)]);
    /// # Ok::<(), gpkg_features::GpkgError>(())
    /// ```
    pub fn features(&mut self) -> GpkgFeatures<'_, 'a> {
        self.reset_cursor();
        GpkgFeatures {
            layer: self,
            done: false,
        }
    }

    /// Restrict reads to rows matching a SQL `WHERE` expression.
    ///
    /// `None` or a blank expression clears the filter. An expression that
    /// does not prepare is rejected and the previous filter is kept.
    pub fn set_attribute_filter(&mut self, filter: Option<&str>) -> Result<()> {
        let filter = filter
            .map(str::trim)
            .filter(|filter| !filter.is_empty())
            .map(str::to_string);
        if let Some(expression) = filter.as_deref() {
            sql_prepare(
                self.gpkg.connection(),
                &sql_count_features(&self.schema.table_name, Some(expression)),
            )?;
        }
        self.attribute_filter = filter;
        self.reset_cursor();
        Ok(())
    }

    pub fn attribute_filter(&self) -> Option<&str> {
        self.attribute_filter.as_deref()
    }

    /// Only return features whose geometry envelope intersects `envelope`.
    /// Features without geometry never match.
    pub fn set_spatial_filter(&mut self, envelope: Option<Envelope>) {
        self.spatial_filter = envelope;
        self.reset_cursor();
    }

    /// Only return features for which `predicate` yields `Some(true)`.
    /// `None` and `Some(false)` both skip the row.
    pub fn set_feature_predicate<F>(&mut self, predicate: F)
    where
        F: Fn(&GpkgFeature) -> Option<bool> + 'a,
    {
        self.predicate = Some(Box::new(predicate));
        self.reset_cursor();
    }

    pub fn clear_feature_predicate(&mut self) {
        self.predicate = None;
        self.reset_cursor();
    }

    /// Number of rows matching the attribute filter.
    ///
    /// The spatial filter and the predicate are not evaluated.
    pub fn feature_count(&self) -> Result<i64> {
        let sql = sql_count_features(&self.schema.table_name, self.attribute_filter.as_deref());
        sql_get_integer(self.gpkg.connection(), &sql, [])
    }

    /// Write the cached extent to `gpkg_contents` if it changed.
    pub fn sync(&mut self) -> Result<()> {
        if !self.extent_dirty {
            return Ok(());
        }
        if let Some(extent) = self.extent {
            sql_execute(
                self.gpkg.connection(),
                SQL_UPDATE_CONTENTS_EXTENT,
                rusqlite::params![
                    self.schema.table_name,
                    extent.min_x,
                    extent.min_y,
                    extent.max_x,
                    extent.max_y
                ],
            )?;
        }
        self.extent_dirty = false;
        Ok(())
    }

    /// Flush the extent and release the layer.
    pub fn close(mut self) -> Result<()> {
        self.cursor = None;
        self.sync()
    }

    fn check_field_count(&self, feature: &GpkgFeature) -> Result<()> {
        if feature.fields.len() != self.schema.fields.len() {
            return Err(GpkgError::InvalidPropertyCount {
                expected: self.schema.fields.len(),
                got: feature.fields.len(),
            });
        }
        Ok(())
    }

    /// Collect the geometry column (when the feature has a geometry) and every
    /// set field, with their bound values.
    fn bind_columns<'s>(
        &'s self,
        feature: &GpkgFeature,
        columns: &mut Vec<&'s str>,
        values: &mut Vec<SqlValue>,
    ) -> Result<()> {
        if let Some(geometry) = feature.geometry() {
            let column = self
                .schema
                .geometry
                .as_ref()
                .ok_or_else(|| GpkgError::MissingGeometryColumn {
                    layer_name: self.schema.table_name.clone(),
                })?;
            columns.push(column.name.as_str());
            values.push(SqlValue::Blob(encode_gpkg_geometry(geometry, column.srs_id)));
        }

        for (defn, value) in self.schema.fields.iter().zip(&feature.fields) {
            if let Some(value) = value {
                columns.push(defn.name.as_str());
                values.push(bind_value(defn.field_type, value)?);
            }
        }
        Ok(())
    }

    fn merge_extent(&mut self, envelope: &Envelope) {
        self.extent = Some(match self.extent {
            Some(mut extent) => {
                extent.merge(envelope);
                extent
            }
            None => *envelope,
        });
        self.extent_dirty = true;
    }

    fn prepare_cursor(&self) -> Result<Cursor<'a>> {
        let gpkg: &'a Gpkg = self.gpkg;
        // a zero page size would emit `LIMIT 0` and end every scan at once
        let page_size = gpkg.options().page_size.max(1);
        let columns = self.schema.column_names();
        let sql = sql_select_features(
            &self.schema.table_name,
            &columns,
            self.attribute_filter.as_deref(),
            page_size,
        );
        Cursor::new(gpkg.connection(), sql, page_size)
    }

    /// Turn a row in [`TableSchema::column_names`] order into a feature.
    fn decode_row(&self, row: Vec<SqlValue>) -> Result<GpkgFeature> {
        let mut values = row.into_iter();

        let fid = match values.next() {
            Some(SqlValue::Integer(fid)) => fid,
            Some(SqlValue::Null) | None => return Err(GpkgError::MissingFeatureId),
            Some(other) => {
                return Err(GpkgError::ValueTypeMismatch {
                    expected: "integer",
                    actual: sql_value_type_name(&other),
                });
            }
        };

        let geometry = if self.schema.geometry.is_some() {
            match values.next() {
                Some(SqlValue::Blob(blob)) => Some(decode_gpkg_geometry(&blob)?.geometry),
                Some(SqlValue::Null) | None => None,
                Some(other) => {
                    return Err(GpkgError::ValueTypeMismatch {
                        expected: "blob",
                        actual: sql_value_type_name(&other),
                    });
                }
            }
        } else {
            None
        };

        let fields = self
            .schema
            .fields
            .iter()
            .zip(values)
            .map(|(defn, value)| decode_value(defn.field_type, value))
            .collect();

        Ok(GpkgFeature {
            fid: Some(fid),
            geometry,
            fields,
            field_index_by_name: Arc::clone(&self.field_index_by_name),
        })
    }

    fn passes_filters(&self, feature: &GpkgFeature) -> bool {
        if let Some(filter) = &self.spatial_filter {
            let hit = feature
                .geometry()
                .and_then(|geometry| geometry.envelope())
                .is_some_and(|envelope| envelope.intersects(filter));
            if !hit {
                return false;
            }
        }
        match &self.predicate {
            Some(predicate) => predicate(feature) == Some(true),
            None => true,
        }
    }
}

impl Drop for GpkgLayer<'_> {
    fn drop(&mut self) {
        self.cursor = None;
        if let Err(err) = self.sync() {
            warn!(layer = %self.schema.table_name, error = %err, "failed to write layer extent");
        }
    }
}

/// Iterator returned by [`GpkgLayer::features`].
///
/// Stops after the first error.
pub struct GpkgFeatures<'l, 'a> {
    layer: &'l mut GpkgLayer<'a>,
    done: bool,
}

impl Iterator for GpkgFeatures<'_, '_> {
    type Item = Result<GpkgFeature>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.layer.next_feature() {
            Ok(Some(feature)) => Some(Ok(feature)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

fn build_field_index_by_name(fields: &[FieldDefn]) -> HashMap<String, usize> {
    fields
        .iter()
        .enumerate()
        .map(|(idx, field)| (field.name.clone(), idx))
        .collect()
}
