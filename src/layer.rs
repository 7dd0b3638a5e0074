//! Classified polygon layers: land-cover regions tagged with class and provenance.

use std::path::Path;

use geo::MultiPolygon;
use geojson::{JsonObject, JsonValue};

use crate::classes::{ClassId, ClassSet};
use crate::error::Result;
use crate::geom;
use crate::vector;

/// One land-cover region.
#[derive(Debug, Clone)]
pub struct ClassifiedPolygon {
    pub geometry: MultiPolygon<f64>,
    pub class_id: ClassId,
    /// Mission the region was predicted from; `None` after merging missions.
    pub mission_id: Option<String>,
    pub year: Option<i32>,
    /// Share of the layer's total area, filled in for merged layers.
    pub area_fraction: Option<f64>,
}

impl ClassifiedPolygon {
    pub fn new(geometry: MultiPolygon<f64>, class_id: ClassId) -> Self {
        Self {
            geometry,
            class_id,
            mission_id: None,
            year: None,
            area_fraction: None,
        }
    }

    pub fn with_mission(mut self, mission_id: impl Into<String>, year: Option<i32>) -> Self {
        self.mission_id = Some(mission_id.into());
        self.year = year;
        self
    }

    pub fn area(&self) -> f64 {
        geom::area(&self.geometry)
    }

    /// Same attributes, different geometry.
    pub fn with_geometry(&self, geometry: MultiPolygon<f64>) -> Self {
        Self {
            geometry,
            ..self.clone()
        }
    }
}

/// An ordered set of classified regions in a metric CRS.
#[derive(Debug, Clone, Default)]
pub struct ClassLayer {
    pub records: Vec<ClassifiedPolygon>,
}

impl ClassLayer {
    pub fn new(records: Vec<ClassifiedPolygon>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_area(&self) -> f64 {
        self.records.iter().map(|r| r.area()).sum()
    }

    /// Union of every record's geometry.
    pub fn footprint(&self) -> MultiPolygon<f64> {
        geom::dissolve(self.records.iter().map(|r| &r.geometry))
    }

    /// Sum of the areas shared by every pair of records. Zero for a non-overlapping layer.
    pub fn self_overlap_area(&self) -> f64 {
        use geo::BooleanOps;
        let mut total = 0.0;
        for (i, a) in self.records.iter().enumerate() {
            for b in &self.records[i + 1..] {
                total += geom::area(&a.geometry.intersection(&b.geometry));
            }
        }
        total
    }

    /// Set `area_fraction` on every record to its share of the total area.
    pub fn fill_area_fractions(&mut self) {
        let total = self.total_area();
        for r in &mut self.records {
            r.area_fraction = Some(if total > 0.0 { r.area() / total } else { 0.0 });
        }
    }

    /// Area per class id.
    pub fn class_areas(&self, n_classes: usize) -> Vec<f64> {
        let mut areas = vec![0.0; n_classes];
        for r in &self.records {
            if r.class_id < n_classes {
                areas[r.class_id] += r.area();
            }
        }
        areas
    }

    pub fn extend(&mut self, other: ClassLayer) {
        self.records.extend(other.records);
    }

    /// Apply a geometry transformation to every record, keeping attributes.
    pub fn map_geometry(&self, f: impl Fn(&MultiPolygon<f64>) -> MultiPolygon<f64>) -> ClassLayer {
        ClassLayer::new(
            self.records
                .iter()
                .map(|r| r.with_geometry(f(&r.geometry)))
                .collect(),
        )
    }

    // -----------------------------------------------------------------------
    // GeoJSON
    // -----------------------------------------------------------------------

    /// Read a layer; `class_id` is required, `class_name` is used as a fallback.
    pub fn read_geojson(path: &Path, classes: &ClassSet) -> Result<ClassLayer> {
        let mut records = Vec::new();
        for feature in vector::read_features(path)? {
            let Some(geometry) = vector::feature_polygons(&feature)? else {
                continue;
            };
            let class_id = match vector::prop_i64(&feature, "class_id") {
                Some(id) if id >= 0 => classes.check(id as ClassId)?,
                _ => match vector::prop_string(&feature, "class_name") {
                    Some(name) => classes.id_of(&name)?,
                    None => return Err(vector::missing(path, "class_id")),
                },
            };
            records.push(ClassifiedPolygon {
                geometry,
                class_id,
                mission_id: vector::prop_string(&feature, "mission_id"),
                year: vector::prop_i64(&feature, "year").map(|y| y as i32),
                area_fraction: vector::prop_f64(&feature, "area_fraction"),
            });
        }
        Ok(ClassLayer::new(records))
    }

    pub fn write_geojson(&self, path: &Path, classes: &ClassSet) -> Result<()> {
        let features = self
            .records
            .iter()
            .map(|r| {
                let mut props = JsonObject::new();
                props.insert("class_id".into(), JsonValue::from(r.class_id));
                props.insert(
                    "class_name".into(),
                    JsonValue::from(classes.name(r.class_id).unwrap_or_default()),
                );
                if let Some(m) = &r.mission_id {
                    props.insert("mission_id".into(), JsonValue::from(m.as_str()));
                }
                if let Some(y) = r.year {
                    props.insert("year".into(), JsonValue::from(y));
                }
                if let Some(f) = r.area_fraction {
                    props.insert("area_fraction".into(), JsonValue::from(f));
                }
                vector::make_feature(&r.geometry, props)
            })
            .collect();
        vector::write_features(path, features)
    }
}
