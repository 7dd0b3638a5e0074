//! Sliver and noise removal for per-mission class maps.
//!
//! Sequence per record: simplify → buffer(-b) → buffer(+2b) → buffer(-b) →
//! simplify. The negative/positive/negative buffers open thin spikes and close
//! narrow gaps left by per-face boundaries; the simplifications keep vertex
//! counts bounded for the overlays that follow.
//!
//! Mitre joins bevel sharp corners and the final simplify can sharpen them
//! again, so one pass is not a fixed point on irregular shapes. The sequence is
//! repeated until a pass moves no vertex by `simplify_tol` or more; the settled
//! geometry is returned, and cleaning it again returns it unchanged.

use geo::{BooleanOps, HausdorffDistance, MultiPolygon};
use log::{debug, info, warn};

use crate::config::CleanupParams;
use crate::geom;
use crate::layer::ClassLayer;

/// Upper bound on repeated passes before giving up on settling.
const MAX_PASSES: usize = 8;

/// One simplify/buffer/simplify pass.
fn clean_pass(mp: &MultiPolygon<f64>, simplify_tol: f64, buffer_amount: f64) -> MultiPolygon<f64> {
    let g = geom::simplify(mp, simplify_tol);
    let g = geom::buffer(&g, -buffer_amount);
    let g = geom::buffer(&g, 2.0 * buffer_amount);
    let g = geom::buffer(&g, -buffer_amount);
    geom::polygonal(geom::simplify(&g, simplify_tol), 0.0)
}

/// A pass took `before` to `after` without moving anything by `tol` or more.
fn settled(before: &MultiPolygon<f64>, after: &MultiPolygon<f64>, tol: f64) -> bool {
    match (before.0.is_empty(), after.0.is_empty()) {
        (true, true) => true,
        (false, false) => before.hausdorff_distance(after) <= tol,
        _ => false,
    }
}

/// Clean one geometry; may come back empty.
///
/// Geometry that a pass would leave in place is returned as is.
pub fn clean_geometry(mp: &MultiPolygon<f64>, simplify_tol: f64, buffer_amount: f64) -> MultiPolygon<f64> {
    let mut current = mp.clone();
    for _ in 0..MAX_PASSES {
        let next = clean_pass(&current, simplify_tol, buffer_amount);
        if settled(&current, &next, simplify_tol) {
            return current;
        }
        current = next;
    }
    debug!("cleanup did not settle after {MAX_PASSES} passes");
    current
}

/// Clean every record, keeping its attributes. Records with nothing polygonal left are dropped.
pub fn clean(layer: &ClassLayer, simplify_tol: f64, buffer_amount: f64) -> ClassLayer {
    let before = layer.len();
    let records: Vec<_> = layer
        .records
        .iter()
        .filter_map(|r| {
            let cleaned = clean_geometry(&r.geometry, simplify_tol, buffer_amount);
            (!cleaned.0.is_empty()).then(|| r.with_geometry(cleaned))
        })
        .collect();
    if records.len() < before {
        info!("cleanup removed {} records with no area left", before - records.len());
    }
    ClassLayer::new(records)
}

/// Earlier records win: each record loses whatever earlier records already cover.
pub fn ensure_non_overlapping(layer: &ClassLayer) -> ClassLayer {
    let mut covered = geom::empty();
    let mut records = Vec::with_capacity(layer.len());
    for r in &layer.records {
        let remaining = if covered.0.is_empty() {
            r.geometry.clone()
        } else {
            r.geometry.difference(&covered)
        };
        let remaining = geom::polygonal(remaining, 0.0);
        if remaining.0.is_empty() {
            continue;
        }
        covered = if covered.0.is_empty() {
            remaining.clone()
        } else {
            covered.union(&remaining)
        };
        records.push(r.with_geometry(remaining));
    }
    ClassLayer::new(records)
}

/// Clip every record to `mask`; records falling outside are dropped.
pub fn clip_to(layer: &ClassLayer, mask: &MultiPolygon<f64>) -> ClassLayer {
    ClassLayer::new(
        layer
            .records
            .iter()
            .filter_map(|r| {
                let clipped = geom::polygonal(r.geometry.intersection(mask), 0.0);
                (!clipped.0.is_empty()).then(|| r.with_geometry(clipped))
            })
            .collect(),
    )
}

/// Full per-mission post-processing: clean, de-overlap, optionally clip to the footprint.
pub fn post_process(
    layer: &ClassLayer,
    params: &CleanupParams,
    footprint: Option<&MultiPolygon<f64>>,
) -> ClassLayer {
    let cleaned = clean(layer, params.simplify_tol, params.buffer_amount);
    let nonoverlapping = ensure_non_overlapping(&cleaned);
    match footprint {
        Some(mask) if params.clip_to_footprint => clip_to(&nonoverlapping, mask),
        Some(_) => nonoverlapping,
        None => {
            if params.clip_to_footprint {
                warn!("no footprint available, map left unclipped");
            }
            nonoverlapping
        }
    }
}
