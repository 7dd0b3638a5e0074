//! Pipeline parameters.
//!
//! Every stage takes its own parameter struct; [`PipelineConfig`] groups them so
//! a whole run can be described by one JSON file. Missing fields fall back to the
//! defaults below, which reproduce the values used for the reserve maps.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classes::{default_tiebreak_order, ClassSet};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Stage parameters
// ---------------------------------------------------------------------------

/// Parameters for pairwise CHM registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationParams {
    /// Footprint overlaps at or below this area (m²) are never registered.
    pub min_overlap_area: f64,
    /// Ground sample distance (m) both rasters are compared at.
    pub target_gsd: f64,
    /// Largest translation (m) searched on either axis.
    pub max_search_shift: f64,
    /// Minimum fraction of overlap cells that must be valid in both rasters.
    pub min_valid_fraction: f64,
    /// Minimum absolute number of valid cells in the comparison window.
    pub min_valid_cells: usize,
    /// Register missions from the same year against each other too.
    pub register_same_epoch: bool,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            min_overlap_area: 10_000.0,
            target_gsd: 0.25,
            max_search_shift: 10.0,
            min_valid_fraction: 0.25,
            min_valid_cells: 64,
            register_same_epoch: false,
        }
    }
}

/// Weights and filters for the global least-squares shift solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    /// Weight of the "stay where you are" equation of every mission. Must be > 0.
    pub anchor_weight: f64,
    /// Weight of each pairwise measurement.
    pub pairwise_weight: f64,
    /// Pairwise shifts with a larger magnitude (m) are treated as mis-registrations.
    pub outlier_threshold: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            anchor_weight: 0.01,
            pairwise_weight: 1.0,
            outlier_threshold: 10.0,
        }
    }
}

/// Sliver removal applied to each per-mission map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupParams {
    /// Douglas-Peucker tolerance (m).
    pub simplify_tol: f64,
    /// Buffer distance (m) for the in/out/in sequence.
    pub buffer_amount: f64,
    /// Clip each cleaned map to its mission footprint (maps share the catalog CRS).
    pub clip_to_footprint: bool,
}

impl Default for CleanupParams {
    fn default() -> Self {
        Self {
            simplify_tol: 0.1,
            buffer_amount: 0.2,
            clip_to_footprint: true,
        }
    }
}

/// How overlapping class polygons are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Area-weighted vote; the output never overlaps.
    Vote,
    /// Dissolve by class and keep overlaps between classes.
    Dissolve,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationParams {
    pub policy: MergePolicy,
    /// Coordinates are snapped to this grid (m) before overlay.
    pub precision_grid: f64,
    /// Class names (or abbreviations), most preferred first.
    pub tiebreak_order: Vec<String>,
    /// Atomic regions smaller than this (m²) are discarded as overlay noise.
    pub min_region_area: f64,
}

impl Default for ConsolidationParams {
    fn default() -> Self {
        Self {
            policy: MergePolicy::Vote,
            precision_grid: 0.01,
            tiebreak_order: default_tiebreak_order(),
            min_region_area: 1e-6,
        }
    }
}

/// Keeps only missions flown while leaves are on.
///
/// Bounds are month-day integers (`MMDD`, e.g. 415 for April 15th) and are
/// exclusive on both ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeasonFilter {
    pub enabled: bool,
    pub start_mmdd: u32,
    pub end_mmdd: u32,
}

impl Default for SeasonFilter {
    fn default() -> Self {
        Self {
            enabled: true,
            start_mmdd: 415,
            end_mmdd: 1100,
        }
    }
}

impl SeasonFilter {
    pub fn accepts(&self, mmdd: u32) -> bool {
        !self.enabled || (mmdd > self.start_mmdd && mmdd < self.end_mmdd)
    }
}

/// Coordinate system of the mission catalog footprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogCrs {
    /// Longitude/latitude degrees; footprints get a local metric plane for areas.
    #[default]
    Geographic,
    /// Already planar and metric.
    Projected,
}

/// A named reserve with generous bounds in the catalog's CRS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionBounds {
    pub name: String,
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

/// Years merged into one epoch in addition to the per-year maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedEpoch {
    pub years: Vec<i32>,
}

impl CombinedEpoch {
    pub fn label(&self) -> String {
        self.years
            .iter()
            .map(|y| y.to_string())
            .collect::<Vec<_>>()
            .join("_")
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub classes: ClassSet,
    pub catalog_crs: CatalogCrs,
    pub registration: RegistrationParams,
    pub solver: SolverParams,
    pub cleanup: CleanupParams,
    pub consolidation: ConsolidationParams,
    pub season: SeasonFilter,
    pub regions: Vec<RegionBounds>,
    pub combined_epochs: Vec<CombinedEpoch>,
    /// Per-face class probabilities below this are left unlabeled.
    pub face_confidence_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classes: ClassSet::default(),
            catalog_crs: CatalogCrs::Geographic,
            registration: RegistrationParams::default(),
            solver: SolverParams::default(),
            cleanup: CleanupParams::default(),
            consolidation: ConsolidationParams::default(),
            season: SeasonFilter::default(),
            regions: Vec::new(),
            combined_epochs: vec![CombinedEpoch {
                years: vec![2023, 2024],
            }],
            face_confidence_threshold: 0.0,
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config; fields not present keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameter combinations the stages cannot honour.
    pub fn validate(&self) -> Result<()> {
        if !(self.solver.anchor_weight > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "solver.anchor_weight must be > 0, got {}",
                self.solver.anchor_weight
            )));
        }
        if !(self.solver.pairwise_weight > 0.0) {
            return Err(Error::InvalidConfig(
                "solver.pairwise_weight must be > 0".into(),
            ));
        }
        if !(self.registration.target_gsd > 0.0) {
            return Err(Error::InvalidConfig(
                "registration.target_gsd must be > 0".into(),
            ));
        }
        if self.consolidation.precision_grid < 0.0 || self.cleanup.buffer_amount < 0.0 {
            return Err(Error::InvalidConfig(
                "precision_grid and buffer_amount must be non-negative".into(),
            ));
        }
        self.classes
            .resolve_order(&self.consolidation.tiebreak_order)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{"solver": {"anchor_weight": 0.5}, "cleanup": {"buffer_amount": 0.3}}"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.solver.anchor_weight, 0.5);
        assert_eq!(config.solver.pairwise_weight, 1.0);
        assert_eq!(config.cleanup.buffer_amount, 0.3);
        assert_eq!(config.cleanup.simplify_tol, 0.1);
        assert_eq!(config.consolidation.policy, MergePolicy::Vote);
        assert_eq!(config.catalog_crs, CatalogCrs::Geographic);
    }

    #[test]
    fn test_projected_catalog_from_json() {
        let config: PipelineConfig = serde_json::from_str(r#"{"catalog_crs": "projected"}"#).unwrap();
        assert_eq!(config.catalog_crs, CatalogCrs::Projected);
    }

    #[test]
    fn test_zero_anchor_weight_rejected() {
        let mut config = PipelineConfig::default();
        config.solver.anchor_weight = 0.0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_season_filter_bounds_are_exclusive() {
        let season = SeasonFilter::default();
        assert!(!season.accepts(415));
        assert!(season.accepts(416));
        assert!(season.accepts(1031));
        assert!(!season.accepts(1100));
        let off = SeasonFilter {
            enabled: false,
            ..Default::default()
        };
        assert!(off.accepts(101));
    }
}
