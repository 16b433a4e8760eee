use crate::error::{GpkgError, Result};
use crate::geometry::Geometry;
use crate::types::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A single row of a feature table.
///
/// Fields follow the order of the layer schema. A field that has never been
/// set (or was read back as `NULL`) is unset, which is distinct from zero or
/// an empty string: unset fields are left out of `INSERT`/`UPDATE`
/// statements.
#[derive(Clone, Debug, PartialEq)]
pub struct GpkgFeature {
    pub(super) fid: Option<i64>,
    pub(super) geometry: Option<Geometry>,
    pub(super) fields: Vec<Option<Value>>,
    pub(super) field_index_by_name: Arc<HashMap<String, usize>>,
}

impl GpkgFeature {
    pub(super) fn new(field_index_by_name: Arc<HashMap<String, usize>>) -> Self {
        Self {
            fid: None,
            geometry: None,
            fields: vec![None; field_index_by_name.len()],
            field_index_by_name,
        }
    }

    /// The identifier, once the feature has been stored or read.
    pub fn fid(&self) -> Option<i64> {
        self.fid
    }

    pub fn set_fid(&mut self, fid: Option<i64>) {
        self.fid = fid;
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    pub fn set_geometry(&mut self, geometry: Option<Geometry>) {
        self.geometry = geometry;
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// The value of the field at `idx`, or `None` if it is unset.
    pub fn field(&self, idx: usize) -> Option<&Value> {
        self.fields.get(idx).and_then(Option::as_ref)
    }

    /// Look up a field by name.
    pub fn property(&self, name: &str) -> Option<Value> {
        let idx = *self.field_index_by_name.get(name)?;
        self.field(idx).cloned()
    }

    pub fn is_field_set(&self, idx: usize) -> bool {
        self.field(idx).is_some()
    }

    pub fn set_field(&mut self, idx: usize, value: impl Into<Value>) -> Result<()> {
        let slot = self
            .fields
            .get_mut(idx)
            .ok_or_else(|| GpkgError::MissingProperty {
                property: format!("#{idx}"),
            })?;
        *slot = Some(value.into());
        Ok(())
    }

    pub fn set_property(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let idx = self.index_of(name)?;
        self.set_field(idx, value)
    }

    pub fn unset_field(&mut self, idx: usize) {
        if let Some(slot) = self.fields.get_mut(idx) {
            *slot = None;
        }
    }

    pub fn unset_property(&mut self, name: &str) -> Result<()> {
        let idx = self.index_of(name)?;
        self.unset_field(idx);
        Ok(())
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.field_index_by_name
            .get(name)
            .copied()
            .ok_or_else(|| GpkgError::MissingProperty {
                property: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::GpkgFeature;
    use crate::Result;
    use crate::error::GpkgError;
    use crate::types::Value;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn feature() -> GpkgFeature {
        let index = HashMap::from([("name".to_string(), 0), ("lanes".to_string(), 1)]);
        GpkgFeature::new(Arc::new(index))
    }

    #[test]
    fn fields_start_unset() {
        let feature = feature();
        assert_eq!(feature.fid(), None);
        assert_eq!(feature.field_count(), 2);
        assert!(!feature.is_field_set(0));
        assert_eq!(feature.property("name"), None);
        assert!(feature.geometry().is_none());
    }

    #[test]
    fn set_and_unset_by_name() -> Result<()> {
        let mut feature = feature();
        feature.set_property("lanes", 4_i64)?;
        assert_eq!(feature.field(1), Some(&Value::Integer(4)));
        let lanes: i64 = feature.property("lanes").ok_or(GpkgError::MissingProperty {
            property: "lanes".to_string(),
        })?
        .try_into()?;
        assert_eq!(lanes, 4);

        feature.unset_property("lanes")?;
        assert!(!feature.is_field_set(1));
        Ok(())
    }

    #[test]
    fn unknown_fields_are_reported() {
        let mut feature = feature();
        let err = feature.set_property("width", 1.0).expect_err("no such field");
        assert!(matches!(err, GpkgError::MissingProperty { property } if property == "width"));
        let err = feature.set_field(5, "x").expect_err("out of range");
        assert!(matches!(err, GpkgError::MissingProperty { .. }));
    }
}
