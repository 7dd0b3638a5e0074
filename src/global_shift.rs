//! Global least-squares reconciliation of pairwise shifts.
//!
//! Every surviving pairwise measurement contributes `s(b) - s(a) = d`, weighted
//! by `pairwise_weight`; every mission additionally contributes `s(m) = 0`,
//! weighted by `anchor_weight`. The x and y axes are independent and share the
//! same design matrix, so it is factored once with an SVD and solved for both.

use std::collections::{BTreeMap, BTreeSet};

use log::{info, warn};
use nalgebra::{DMatrix, DVector};

use crate::config::SolverParams;
use crate::error::{Error, Result};
use crate::registration::PairwiseShift;
use crate::shift::{Shift, ShiftTable};

/// Counts reported after a solve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolveReport {
    pub input_records: usize,
    pub failed: usize,
    pub outliers: usize,
    pub duplicates: usize,
    pub used: usize,
    pub missions: usize,
}

/// Relative singular-value cutoff below which a direction counts as unconstrained.
const RANK_TOLERANCE: f64 = 1e-12;

/// Keep the measurements the solve can trust, keyed by (fixed, moving).
///
/// Failed registrations and shifts longer than `outlier_threshold` are
/// dropped. A pair measured twice keeps its last measurement.
fn usable_measurements(
    pairwise: &[PairwiseShift],
    params: &SolverParams,
    report: &mut SolveReport,
) -> BTreeMap<(String, String), Shift> {
    let mut kept = BTreeMap::new();
    for r in pairwise {
        let Some(shift) = r.shift.filter(|s| s.is_finite()) else {
            report.failed += 1;
            continue;
        };
        if shift.norm() > params.outlier_threshold {
            warn!(
                "dropping outlier shift {} -> {}: ({:.2}, {:.2}), |d| = {:.2} m",
                r.mission_a,
                r.mission_b,
                shift.dx,
                shift.dy,
                shift.norm()
            );
            report.outliers += 1;
            continue;
        }
        if kept
            .insert((r.mission_a.clone(), r.mission_b.clone()), shift)
            .is_some()
        {
            warn!("pair {} -> {} measured twice, keeping the last", r.mission_a, r.mission_b);
            report.duplicates += 1;
        }
    }
    report.used = kept.len();
    kept
}

/// Solve for one absolute shift per mission appearing in a usable measurement.
///
/// Missions that only appear in failed or outlier records are not emitted;
/// downstream they shift by (0, 0).
pub fn solve(pairwise: &[PairwiseShift], params: &SolverParams) -> Result<(ShiftTable, SolveReport)> {
    let mut report = SolveReport {
        input_records: pairwise.len(),
        ..Default::default()
    };
    let measurements = usable_measurements(pairwise, params, &mut report);

    let ids: Vec<&str> = measurements
        .keys()
        .flat_map(|(a, b)| [a.as_str(), b.as_str()])
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    report.missions = ids.len();
    info!(
        "global shift solve: {} records, {} failed, {} outliers, {} used, {} missions",
        report.input_records, report.failed, report.outliers, report.used, report.missions
    );
    if ids.is_empty() {
        return Ok((ShiftTable::default(), report));
    }
    let index: BTreeMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let n = ids.len();
    let rows = measurements.len() + n;
    let wp = params.pairwise_weight.max(0.0).sqrt();
    let wa = params.anchor_weight.max(0.0).sqrt();

    let mut a = DMatrix::<f64>::zeros(rows, n);
    let mut bx = DVector::<f64>::zeros(rows);
    let mut by = DVector::<f64>::zeros(rows);
    for (row, ((ma, mb), d)) in measurements.iter().enumerate() {
        a[(row, index[ma.as_str()])] = -wp;
        a[(row, index[mb.as_str()])] = wp;
        bx[row] = wp * d.dx;
        by[row] = wp * d.dy;
    }
    for i in 0..n {
        a[(measurements.len() + i, i)] = wa;
    }

    let svd = a.svd(true, true);
    let eps = RANK_TOLERANCE * svd.singular_values.max();
    let rank = svd.rank(eps);
    if rank < n {
        return Err(Error::UnderconstrainedSystem {
            axis: 'x',
            rank,
            unknowns: n,
        });
    }
    let underconstrained = |axis| Error::UnderconstrainedSystem {
        axis,
        rank,
        unknowns: n,
    };
    let sx = svd.solve(&bx, eps).map_err(|_| underconstrained('x'))?;
    let sy = svd.solve(&by, eps).map_err(|_| underconstrained('y'))?;

    let mut table = ShiftTable::default();
    for (i, id) in ids.iter().enumerate() {
        let s = Shift::new(sx[i], sy[i]);
        info!("  mission {id}: ({:.3}, {:.3})", s.dx, s.dy);
        table.insert(id, s);
    }

    let max_pairwise = measurements.values().map(|s| s.norm()).fold(0.0, f64::max);
    let max_global = table.iter().map(|(_, s)| s.norm()).fold(0.0, f64::max);
    info!(
        "largest pairwise shift {:.3} m, largest global shift {:.3} m",
        max_pairwise, max_global
    );
    Ok((table, report))
}
