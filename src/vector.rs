//! GeoJSON feature I/O shared by the catalog, shift tables and class layers.

use std::path::Path;

use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject, JsonValue};

use crate::error::{Error, Result};

pub fn read_features(path: &Path) -> Result<Vec<Feature>> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let gj: GeoJson = text.parse()?;
    Ok(FeatureCollection::try_from(gj)?.features)
}

pub fn write_features(path: &Path, features: Vec<Feature>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let fc = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };
    std::fs::write(path, GeoJson::from(fc).to_string()).map_err(|e| Error::io(path, e))
}

/// Polygonal part of any geometry; points and lines are discarded.
pub fn polygons_of(geometry: geo::Geometry<f64>) -> MultiPolygon<f64> {
    match geometry {
        geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
        geo::Geometry::MultiPolygon(mp) => mp,
        geo::Geometry::Rect(r) => MultiPolygon::new(vec![r.to_polygon()]),
        geo::Geometry::Triangle(t) => MultiPolygon::new(vec![t.to_polygon()]),
        geo::Geometry::GeometryCollection(gc) => MultiPolygon::new(
            gc.0.into_iter()
                .flat_map(|g| polygons_of(g).0)
                .collect(),
        ),
        _ => MultiPolygon::new(Vec::new()),
    }
}

/// Geometry of a feature as a multipolygon, `None` if it has no geometry.
pub fn feature_polygons(feature: &Feature) -> Result<Option<MultiPolygon<f64>>> {
    match &feature.geometry {
        None => Ok(None),
        Some(g) => {
            let geometry = geo::Geometry::<f64>::try_from(g.clone())?;
            Ok(Some(polygons_of(geometry)))
        }
    }
}

pub fn make_feature(geometry: &MultiPolygon<f64>, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geojson::Value::from(geometry))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// String property; numbers are formatted so integer ids and string ids compare equal.
pub fn prop_string(feature: &Feature, key: &str) -> Option<String> {
    match feature.property(key)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(
            n.as_i64()
                .map(|i| i.to_string())
                .unwrap_or_else(|| n.to_string()),
        ),
        _ => None,
    }
}

pub fn prop_f64(feature: &Feature, key: &str) -> Option<f64> {
    match feature.property(key)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn prop_i64(feature: &Feature, key: &str) -> Option<i64> {
    prop_f64(feature, key).map(|v| v as i64)
}

/// Missing-property error for a feature in `path`.
pub fn missing(path: &Path, key: &str) -> Error {
    Error::InvalidGeometry(format!(
        "{}: feature without '{}' property",
        path.display(),
        key
    ))
}
