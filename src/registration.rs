//! Pairwise registration of CHM rasters between missions.
//!
//! Pipeline: candidate_pairs (footprint overlap filter) → RasterSource (load the
//! pair's CHMs) → RasterAligner (estimate translation) → PairwiseShift records.
//!
//! A pair that cannot be registered is kept with `shift = None`; it is never
//! an error for the batch.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use geo::{BooleanOps, MultiPolygon};
use geojson::{JsonObject, JsonValue};
use log::{debug, info, warn};

use crate::config::RegistrationParams;
use crate::error::{Error, RegistrationFailure, Result};
use crate::geom;
use crate::geotiff::read_geotiff;
use crate::mission::{normalize_id, Mission};
use crate::raster::Raster;
use crate::shift::Shift;
use crate::vector;

// ---------------------------------------------------------------------------
// Collaborator interfaces
// ---------------------------------------------------------------------------

/// Estimates the translation that moves `moving` onto `fixed`.
///
/// The returned shift `d` satisfies `moving.translated(d) ≈ fixed` over the
/// shared area, compared at `target_gsd`.
pub trait RasterAligner {
    fn align(
        &self,
        fixed: &Raster,
        moving: &Raster,
        target_gsd: f64,
    ) -> std::result::Result<Shift, RegistrationFailure>;
}

/// Provides the CHM raster of a mission.
pub trait RasterSource {
    fn load(&self, mission_id: &str) -> Result<Raster>;
}

/// CHMs stored as `chm-mesh-{mission}.tif` in one folder.
#[derive(Debug, Clone)]
pub struct ChmFolder {
    pub dir: PathBuf,
}

impl ChmFolder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, mission_id: &str) -> PathBuf {
        self.dir.join(format!("chm-mesh-{}.tif", normalize_id(mission_id)))
    }
}

impl RasterSource for ChmFolder {
    fn load(&self, mission_id: &str) -> Result<Raster> {
        let path = self.path_for(mission_id);
        if !path.is_file() {
            return Err(Error::MissingInput {
                mission: mission_id.to_string(),
                what: format!("CHM raster {}", path.display()),
            });
        }
        read_geotiff(&path)
    }
}

// ---------------------------------------------------------------------------
// IntensityAligner
// ---------------------------------------------------------------------------

/// Translation-only registration minimising the mean squared height difference.
///
/// Both rasters are compared on a grid at the target GSD over their shared
/// extent. An exhaustive search over whole-cell offsets within
/// `max_search_shift` is followed by a pattern search down to 1/32 of a cell.
#[derive(Debug, Clone)]
pub struct IntensityAligner {
    pub max_search_shift: f64,
    pub min_valid_fraction: f64,
    pub min_valid_cells: usize,
}

impl IntensityAligner {
    pub fn from_params(params: &RegistrationParams) -> Self {
        Self {
            max_search_shift: params.max_search_shift,
            min_valid_fraction: params.min_valid_fraction,
            min_valid_cells: params.min_valid_cells,
        }
    }
}

/// Fixed-side samples of the comparison window.
struct Window {
    points: Vec<(f64, f64, f64)>,
    required: usize,
}

impl Window {
    /// Mean squared difference for a candidate shift, `None` if too few samples overlap.
    fn cost(&self, moving: &Raster, d: Shift) -> Option<f64> {
        let mut n = 0usize;
        let mut sum = 0.0;
        for &(x, y, f) in &self.points {
            if let Some(m) = moving.sample_bilinear(x - d.dx, y - d.dy) {
                let diff = f - m;
                sum += diff * diff;
                n += 1;
            }
        }
        (n >= self.required).then(|| sum / n as f64)
    }
}

const DEGENERATE_VARIANCE: f64 = 1e-9;
const REFINE_LEVELS: u32 = 5;
const MAX_MOVES_PER_LEVEL: usize = 32;

impl RasterAligner for IntensityAligner {
    fn align(
        &self,
        fixed: &Raster,
        moving: &Raster,
        target_gsd: f64,
    ) -> std::result::Result<Shift, RegistrationFailure> {
        let overlap = fixed
            .extent()
            .intersection(&moving.extent())
            .ok_or(RegistrationFailure::InsufficientOverlap {
                valid: 0,
                required: self.min_valid_cells,
            })?;
        // Keep the window away from the borders so shifted samples stay inside `moving`.
        let window = overlap.shrink(self.max_search_shift).unwrap_or(overlap);
        let grid = fixed.resample(window, target_gsd);

        let points: Vec<(f64, f64, f64)> = (0..grid.nrow)
            .flat_map(|r| (0..grid.ncol).map(move |c| (r, c)))
            .filter_map(|(r, c)| {
                let v = grid[(r, c)];
                v.is_finite().then(|| {
                    let (x, y) = grid.rc_to_xy(r, c);
                    (x, y, v)
                })
            })
            .collect();
        if points.len() < self.min_valid_cells {
            return Err(RegistrationFailure::InsufficientOverlap {
                valid: points.len(),
                required: self.min_valid_cells,
            });
        }
        let (_, variance) = grid.valid_stats().unwrap_or((0.0, 0.0));
        if variance < DEGENERATE_VARIANCE {
            return Err(RegistrationFailure::DegenerateContent { variance });
        }

        let required = ((points.len() as f64 * self.min_valid_fraction).ceil() as usize)
            .max(self.min_valid_cells);
        let window = Window { points, required };

        // Exhaustive whole-cell search.
        let radius = (self.max_search_shift / target_gsd).ceil() as i64;
        let mut best: Option<(f64, i64, i64)> = None;
        for i in -radius..=radius {
            for j in -radius..=radius {
                let d = Shift::new(i as f64 * target_gsd, j as f64 * target_gsd);
                if let Some(cost) = window.cost(moving, d) {
                    if best.map_or(true, |(b, _, _)| cost < b) {
                        best = Some((cost, i, j));
                    }
                }
            }
        }
        let (mut best_cost, bi, bj) = best.ok_or_else(|| {
            RegistrationFailure::NoConvergence("no candidate shift had enough valid samples".into())
        })?;
        if radius > 0 && (bi.abs() == radius || bj.abs() == radius) {
            return Err(RegistrationFailure::NoConvergence(format!(
                "optimum on search boundary ({:.2}, {:.2})",
                bi as f64 * target_gsd,
                bj as f64 * target_gsd
            )));
        }

        // Sub-cell pattern search.
        let mut current = Shift::new(bi as f64 * target_gsd, bj as f64 * target_gsd);
        let mut step = target_gsd / 2.0;
        for _ in 0..REFINE_LEVELS {
            for _ in 0..MAX_MOVES_PER_LEVEL {
                let mut improved = false;
                for (sx, sy) in [
                    (1.0, 0.0),
                    (-1.0, 0.0),
                    (0.0, 1.0),
                    (0.0, -1.0),
                    (1.0, 1.0),
                    (1.0, -1.0),
                    (-1.0, 1.0),
                    (-1.0, -1.0),
                ] {
                    let candidate = Shift::new(current.dx + sx * step, current.dy + sy * step);
                    if let Some(cost) = window.cost(moving, candidate) {
                        if cost < best_cost {
                            best_cost = cost;
                            current = candidate;
                            improved = true;
                        }
                    }
                }
                if !improved {
                    break;
                }
            }
            step /= 2.0;
        }

        debug!(
            "aligned: shift=({:.3}, {:.3}) mse={:.4} over {} cells",
            current.dx,
            current.dy,
            best_cost,
            window.points.len()
        );
        Ok(current)
    }
}

// ---------------------------------------------------------------------------
// PairwiseShift records
// ---------------------------------------------------------------------------

/// Measured relative shift between two overlapping missions.
///
/// `mission_a` is the fixed side and `mission_b` the moving side:
/// `shift(b) - shift(a) = shift`.
#[derive(Debug, Clone)]
pub struct PairwiseShift {
    pub mission_a: String,
    pub mission_b: String,
    pub year_a: i32,
    pub year_b: i32,
    pub overlap: MultiPolygon<f64>,
    /// `None` when registration failed.
    pub shift: Option<Shift>,
}

pub fn write_pairwise(path: &Path, records: &[PairwiseShift]) -> Result<()> {
    let features = records
        .iter()
        .map(|r| {
            let mut props = JsonObject::new();
            props.insert("mission_a".into(), JsonValue::from(r.mission_a.as_str()));
            props.insert("mission_b".into(), JsonValue::from(r.mission_b.as_str()));
            props.insert("year_a".into(), JsonValue::from(r.year_a));
            props.insert("year_b".into(), JsonValue::from(r.year_b));
            let (dx, dy) = match r.shift {
                Some(s) if s.is_finite() => (JsonValue::from(s.dx), JsonValue::from(s.dy)),
                _ => (JsonValue::Null, JsonValue::Null),
            };
            props.insert("dx".into(), dx);
            props.insert("dy".into(), dy);
            vector::make_feature(&r.overlap, props)
        })
        .collect();
    vector::write_features(path, features)
}

pub fn read_pairwise(path: &Path) -> Result<Vec<PairwiseShift>> {
    let mut records = Vec::new();
    for feature in vector::read_features(path)? {
        let get_id = |key: &str| {
            vector::prop_string(&feature, key)
                .map(|s| normalize_id(&s))
                .ok_or_else(|| vector::missing(path, key))
        };
        let get_year = |key: &str| {
            vector::prop_i64(&feature, key)
                .map(|y| y as i32)
                .ok_or_else(|| vector::missing(path, key))
        };
        let shift = match (vector::prop_f64(&feature, "dx"), vector::prop_f64(&feature, "dy")) {
            (Some(dx), Some(dy)) => Some(Shift::new(dx, dy)),
            _ => None,
        };
        records.push(PairwiseShift {
            mission_a: get_id("mission_a")?,
            mission_b: get_id("mission_b")?,
            year_a: get_year("year_a")?,
            year_b: get_year("year_b")?,
            overlap: vector::feature_polygons(&feature)?.unwrap_or_else(geom::empty),
            shift,
        });
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// PairwiseRegistrar
// ---------------------------------------------------------------------------

/// A mission pair worth registering: (fixed index, moving index, overlap).
#[derive(Debug, Clone)]
pub struct CandidatePair {
    pub fixed: usize,
    pub moving: usize,
    pub overlap: MultiPolygon<f64>,
}

/// Pairs whose footprints overlap by more than `min_overlap_area`.
///
/// The overlap area is measured on the planar footprints (m²); the recorded
/// overlap polygon stays in catalog coordinates. The earlier mission is the
/// fixed side; same-year pairs are skipped unless `register_same_epoch` is set.
pub fn candidate_pairs(missions: &[Mission], params: &RegistrationParams) -> Vec<CandidatePair> {
    let mut pairs = Vec::new();
    for i in 0..missions.len() {
        for j in (i + 1)..missions.len() {
            let (a, b) = (&missions[i], &missions[j]);
            if a.year == b.year && !params.register_same_epoch {
                continue;
            }
            let area = geom::area(&a.planar_footprint.intersection(&b.planar_footprint));
            if area <= params.min_overlap_area {
                continue;
            }
            let overlap = a.footprint.intersection(&b.footprint);
            let (fixed, moving) = match a.year.cmp(&b.year) {
                Ordering::Greater => (j, i),
                _ => (i, j),
            };
            pairs.push(CandidatePair {
                fixed,
                moving,
                overlap,
            });
        }
    }
    pairs
}

/// Runs the aligner on every qualifying mission pair.
pub struct PairwiseRegistrar<'a, A: RasterAligner, S: RasterSource> {
    pub aligner: &'a A,
    pub source: &'a S,
    pub params: &'a RegistrationParams,
}

impl<'a, A: RasterAligner, S: RasterSource> PairwiseRegistrar<'a, A, S> {
    pub fn new(aligner: &'a A, source: &'a S, params: &'a RegistrationParams) -> Self {
        Self {
            aligner,
            source,
            params,
        }
    }

    /// Register one pair; only the two rasters of this pair are held in memory.
    fn register_pair(&self, fixed: &Mission, moving: &Mission) -> std::result::Result<Shift, RegistrationFailure> {
        let fixed_chm = self
            .source
            .load(&fixed.id)
            .map_err(|e| RegistrationFailure::Input(e.to_string()))?;
        let moving_chm = self
            .source
            .load(&moving.id)
            .map_err(|e| RegistrationFailure::Input(e.to_string()))?;
        self.aligner
            .align(&fixed_chm, &moving_chm, self.params.target_gsd)
    }

    pub fn compute_pairwise(&self, missions: &[Mission]) -> Vec<PairwiseShift> {
        let pairs = candidate_pairs(missions, self.params);
        info!(
            "{} mission pairs overlap by more than {:.0} m²",
            pairs.len(),
            self.params.min_overlap_area
        );

        let mut failed = 0usize;
        let records: Vec<PairwiseShift> = pairs
            .into_iter()
            .map(|pair| {
                let (a, b) = (&missions[pair.fixed], &missions[pair.moving]);
                info!("registering {} ({}) and {} ({})", a.id, a.year, b.id, b.year);
                let shift = match self.register_pair(a, b) {
                    Ok(s) => {
                        info!("  predicted shift: ({:.3}, {:.3})", s.dx, s.dy);
                        Some(s)
                    }
                    Err(e) => {
                        warn!("  registration failed for {} and {}: {}", a.id, b.id, e);
                        failed += 1;
                        None
                    }
                };
                PairwiseShift {
                    mission_a: a.id.clone(),
                    mission_b: b.id.clone(),
                    year_a: a.year,
                    year_b: b.year,
                    overlap: pair.overlap,
                    shift,
                }
            })
            .collect();

        info!(
            "pairwise registration: {} attempted, {} succeeded, {} failed",
            records.len(),
            records.len() - failed,
            failed
        );
        records
    }
}
