//! Turning per-face class probabilities of a photogrammetry mesh into a class layer.
//!
//! Projecting image predictions onto mesh faces is done by an external
//! collaborator behind [`FaceAggregator`]; this module takes its output (a
//! top-down footprint and a probability row per face) from there.

use std::path::PathBuf;

use geo::MultiPolygon;
use geojson::JsonValue;
use log::{debug, info};

use crate::classes::{ClassId, ClassSet};
use crate::error::{Error, Result};
use crate::geom;
use crate::layer::{ClassLayer, ClassifiedPolygon};
use crate::mission::Mission;
use crate::vector;

/// Per-face output of the mesh aggregation.
#[derive(Debug, Clone, Default)]
pub struct FaceValues {
    /// Top-down footprint of every face.
    pub footprints: Vec<MultiPolygon<f64>>,
    /// One row per face, one column per class.
    pub probabilities: Vec<Vec<f64>>,
}

/// Aggregates per-image predictions onto mesh faces for one mission.
pub trait FaceAggregator {
    fn face_values(&self, mission: &Mission) -> Result<FaceValues>;
}

/// Face values exported ahead of time as `{dir}/{mission}.geojson`, one
/// feature per face with a `values` array property.
#[derive(Debug, Clone)]
pub struct FaceValuesFolder {
    pub dir: PathBuf,
}

impl FaceValuesFolder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, mission_id: &str) -> PathBuf {
        self.dir.join(format!("{mission_id}.geojson"))
    }
}

impl FaceAggregator for FaceValuesFolder {
    fn face_values(&self, mission: &Mission) -> Result<FaceValues> {
        let path = self.path_for(&mission.id);
        if !path.is_file() {
            return Err(Error::MissingInput {
                mission: mission.id.clone(),
                what: format!("face values {}", path.display()),
            });
        }
        let mut out = FaceValues::default();
        for feature in vector::read_features(&path)? {
            let Some(footprint) = vector::feature_polygons(&feature)? else {
                continue;
            };
            let row = match feature.property("values") {
                Some(JsonValue::Array(values)) => values
                    .iter()
                    .map(|v| v.as_f64().unwrap_or(f64::NAN))
                    .collect(),
                _ => return Err(vector::missing(&path, "values")),
            };
            out.footprints.push(footprint);
            out.probabilities.push(row);
        }
        Ok(out)
    }
}

/// Index of the largest strictly positive value, ignoring NaN.
fn argmax_nonzero(row: &[f64]) -> Option<(ClassId, f64)> {
    row.iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| *v > 0.0)
        .fold(None, |best, (i, v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((i, v)),
        })
}

/// Label each face with its most probable class and dissolve faces by class.
///
/// Faces whose largest probability is below `confidence_threshold`, or with
/// no positive probability at all, stay unlabelled.
pub fn faces_to_layer(
    faces: &FaceValues,
    confidence_threshold: f64,
    classes: &ClassSet,
    mission: &Mission,
) -> Result<ClassLayer> {
    if faces.footprints.len() != faces.probabilities.len() {
        return Err(Error::InvalidGeometry(format!(
            "mission {}: {} face footprints but {} probability rows",
            mission.id,
            faces.footprints.len(),
            faces.probabilities.len()
        )));
    }

    let mut per_class: Vec<Vec<&MultiPolygon<f64>>> = vec![Vec::new(); classes.len()];
    let mut unlabelled = 0;
    for (footprint, row) in faces.footprints.iter().zip(&faces.probabilities) {
        if row.len() != classes.len() {
            return Err(Error::UnknownClass(format!(
                "mission {}: face row has {} values for {} classes",
                mission.id,
                row.len(),
                classes.len()
            )));
        }
        match argmax_nonzero(row) {
            Some((class_id, p)) if p >= confidence_threshold => per_class[class_id].push(footprint),
            _ => unlabelled += 1,
        }
    }

    let records: Vec<_> = per_class
        .into_iter()
        .enumerate()
        .filter(|(_, parts)| !parts.is_empty())
        .map(|(class_id, parts)| {
            debug!("mission {}: {} faces of class {}", mission.id, parts.len(), class_id);
            ClassifiedPolygon::new(geom::dissolve(parts), class_id).with_mission(mission.id.as_str(), Some(mission.year))
        })
        .filter(|r| !r.geometry.0.is_empty())
        .collect();

    info!(
        "mission {}: {} faces, {} left unlabelled, {} class regions",
        mission.id,
        faces.footprints.len(),
        unlabelled,
        records.len()
    );
    Ok(ClassLayer::new(records))
}
