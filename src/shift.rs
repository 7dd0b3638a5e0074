//! Rigid translations per mission and their application to maps.

use std::collections::BTreeMap;
use std::path::Path;

use geo::Translate;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::layer::ClassLayer;
use crate::mission::normalize_id;
use crate::projection::Projection;
use crate::raster::Raster;

/// A planar translation in metres. Serialised as `[dx, dy]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Shift {
    pub dx: f64,
    pub dy: f64,
}

impl Shift {
    pub const ZERO: Shift = Shift { dx: 0.0, dy: 0.0 };

    pub fn new(dx: f64, dy: f64) -> Self {
        Self { dx, dy }
    }

    pub fn norm(&self) -> f64 {
        self.dx.hypot(self.dy)
    }

    pub fn is_finite(&self) -> bool {
        self.dx.is_finite() && self.dy.is_finite()
    }
}

impl From<[f64; 2]> for Shift {
    fn from([dx, dy]: [f64; 2]) -> Self {
        Self { dx, dy }
    }
}

impl From<Shift> for [f64; 2] {
    fn from(s: Shift) -> Self {
        [s.dx, s.dy]
    }
}

impl std::ops::Sub for Shift {
    type Output = Shift;
    fn sub(self, rhs: Shift) -> Shift {
        Shift::new(self.dx - rhs.dx, self.dy - rhs.dy)
    }
}

// ---------------------------------------------------------------------------
// ShiftTable
// ---------------------------------------------------------------------------

/// Resolved shift per mission. Missions absent from the table do not move.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShiftTable {
    shifts: BTreeMap<String, Shift>,
}

impl ShiftTable {
    pub fn insert(&mut self, mission_id: &str, shift: Shift) {
        self.shifts.insert(normalize_id(mission_id), shift);
    }

    pub fn get(&self, mission_id: &str) -> Option<Shift> {
        self.shifts.get(&normalize_id(mission_id)).copied()
    }

    /// Shift for a mission, (0, 0) when it was not solved for.
    pub fn get_or_zero(&self, mission_id: &str) -> Shift {
        self.get(mission_id).unwrap_or_else(|| {
            debug!("mission {mission_id} not in shift table, using (0, 0)");
            Shift::ZERO
        })
    }

    pub fn len(&self) -> usize {
        self.shifts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shifts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Shift)> {
        self.shifts.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let raw: BTreeMap<String, Shift> = serde_json::from_str(&text)?;
        let mut table = ShiftTable::default();
        for (id, shift) in raw {
            table.insert(&id, shift);
        }
        Ok(table)
    }

    /// Pretty-printed JSON with sorted keys.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| Error::io(path, e))
    }
}

// ---------------------------------------------------------------------------
// MapShifter
// ---------------------------------------------------------------------------

/// Applies the solved translation of a mission to its outputs.
///
/// Translation only: rotation, scale and cell size are never touched.
pub struct MapShifter<'a> {
    table: &'a ShiftTable,
}

impl<'a> MapShifter<'a> {
    pub fn new(table: &'a ShiftTable) -> Self {
        Self { table }
    }

    /// Translate every geometry of a vector layer.
    ///
    /// The layer is mapped into the metric plane of `projection`, moved, and
    /// mapped back, so the output stays in the input's CRS.
    pub fn shift_layer(
        &self,
        layer: &ClassLayer,
        mission_id: &str,
        projection: &dyn Projection,
    ) -> ClassLayer {
        let s = self.table.get_or_zero(mission_id);
        info!("mission {mission_id}: shifting map by ({:.3}, {:.3})", s.dx, s.dy);
        layer.map_geometry(|g| {
            let planar = projection.forward_geometry(g);
            projection.inverse_geometry(&planar.translate(s.dx, s.dy))
        })
    }

    /// Move the affine origin of a raster; cells are not resampled.
    pub fn shift_raster(&self, raster: &Raster, mission_id: &str) -> Raster {
        let s = self.table.get_or_zero(mission_id);
        info!("mission {mission_id}: shifting raster by ({:.3}, {:.3})", s.dx, s.dy);
        raster.translated(s.dx, s.dy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom;
    use crate::layer::tests::rect;
    use crate::layer::ClassifiedPolygon;
    use crate::projection::{Equirectangular, Identity};

    #[test]
    fn test_zero_shift_is_identity() {
        let table = ShiftTable::default();
        let layer = ClassLayer::new(vec![ClassifiedPolygon::new(rect(1.0, 2.0, 3.0, 5.0), 2)]);
        let shifted = MapShifter::new(&table).shift_layer(&layer, "17", &Identity);
        let diff = geom::symmetric_difference_area(&layer.records[0].geometry, &shifted.records[0].geometry);
        assert!(diff < 1e-12);
        assert_eq!(shifted.records[0].class_id, 2);
    }

    #[test]
    fn test_shift_layer_translates_exactly() {
        let mut table = ShiftTable::default();
        table.insert("0042", Shift::new(2.0, -1.0));
        let layer = ClassLayer::new(vec![ClassifiedPolygon::new(rect(0.0, 0.0, 1.0, 1.0), 0)]);
        let shifted = MapShifter::new(&table).shift_layer(&layer, "42", &Identity);
        let expected = rect(2.0, -1.0, 3.0, 0.0);
        assert!(geom::symmetric_difference_area(&expected, &shifted.records[0].geometry) < 1e-12);
    }

    #[test]
    fn test_shift_layer_restores_geographic_crs() {
        let mut table = ShiftTable::default();
        table.insert("1", Shift::new(111.0, 0.0));
        let proj = Equirectangular::new(-121.5, 36.5);
        let layer = ClassLayer::new(vec![ClassifiedPolygon::new(
            rect(-121.501, 36.499, -121.499, 36.501),
            0,
        )]);
        let shifted = MapShifter::new(&table).shift_layer(&layer, "1", &proj);
        let c = shifted.records[0].geometry.0[0].exterior().0[0];
        // Still degrees, moved east by ~0.00124° (111 m at 36.5°N).
        assert!((c.x - (-121.501 + 0.001241)).abs() < 1e-5);
        assert!((c.y - 36.499).abs() < 1e-9);
    }

    #[test]
    fn test_shift_raster_keeps_resolution() {
        let mut table = ShiftTable::default();
        table.insert("7", Shift::new(0.5, 0.25));
        let raster = Raster::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        let shifted = MapShifter::new(&table).shift_raster(&raster, "7");
        assert_eq!(shifted.xmin, 0.5);
        assert_eq!(shifted.ymax, 2.25);
        assert_eq!(shifted.res_x, raster.res_x);
        assert_eq!(shifted.data, raster.data);
    }

    #[test]
    fn test_table_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shifts.json");
        let mut table = ShiftTable::default();
        table.insert("12", Shift::new(0.25, -0.5));
        table.insert("3", Shift::new(1.0, 2.0));
        table.write_json(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"12\": ["));

        let back = ShiftTable::read_json(&path).unwrap();
        assert_eq!(back, table);
        assert_eq!(back.get_or_zero("99"), Shift::ZERO);
    }
}
