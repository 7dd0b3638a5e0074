//! Voting merge of overlapping classified polygons into one non-overlapping layer.
//!
//! Pipeline: snap to the precision grid → repair → build the arrangement of
//! atomic regions (each tagged with how many input records of every class
//! cover it) → resolve each region by area-weighted vote with a fixed
//! tiebreak order → dissolve regions by winning class → repair.
//!
//! The support of a class over a region is the region's area summed over every
//! input record of that class covering it. All candidates of a region share
//! its area, so comparing supports is comparing cover counts, and ties are
//! exact integer ties.

use geo::{BooleanOps, BoundingRect, MultiPolygon, Rect};
use log::{debug, info, warn};

use crate::classes::{ClassId, ClassSet};
use crate::config::{ConsolidationParams, MergePolicy};
use crate::error::Result;
use crate::geom;
use crate::layer::{ClassLayer, ClassifiedPolygon};

/// Counts reported after a consolidation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsolidationReport {
    pub input_records: usize,
    pub rejected_inputs: usize,
    pub atomic_regions: usize,
    pub contested_regions: usize,
    pub tiebreaks: usize,
    pub dropped_outputs: usize,
}

/// A piece of the arrangement and its cover count per class.
struct Atom {
    geometry: MultiPolygon<f64>,
    bbox: Rect<f64>,
    votes: Vec<u32>,
}

impl Atom {
    fn new(geometry: MultiPolygon<f64>, votes: Vec<u32>) -> Option<Self> {
        let bbox = geometry.bounding_rect()?;
        Some(Self {
            geometry,
            bbox,
            votes,
        })
    }
}

pub struct ClassConsolidator<'a> {
    classes: &'a ClassSet,
    params: &'a ConsolidationParams,
    /// Priority of every class id; lower wins ties.
    rank: Vec<usize>,
}

impl<'a> ClassConsolidator<'a> {
    /// Tiebreak order taken from `params.tiebreak_order`.
    pub fn new(classes: &'a ClassSet, params: &'a ConsolidationParams) -> Result<Self> {
        let order = classes.resolve_order(&params.tiebreak_order)?;
        Ok(Self::with_tiebreak(classes, params, &order))
    }

    /// Explicit tiebreak order, most preferred first.
    ///
    /// Classes missing from `order` rank after every listed class, by id.
    pub fn with_tiebreak(classes: &'a ClassSet, params: &'a ConsolidationParams, order: &[ClassId]) -> Self {
        let n = classes.len();
        let mut rank: Vec<usize> = (0..n).map(|id| order.len() + id).collect();
        for (pos, &id) in order.iter().enumerate() {
            if id < n && rank[id] >= order.len() {
                rank[id] = pos;
            }
        }
        Self {
            classes,
            params,
            rank,
        }
    }

    /// Snap, repair and drop unusable inputs.
    fn prepare(&self, layers: &[ClassLayer], report: &mut ConsolidationReport) -> Vec<ClassifiedPolygon> {
        let mut prepared = Vec::new();
        for r in layers.iter().flat_map(|l| &l.records) {
            report.input_records += 1;
            if r.class_id >= self.classes.len() {
                warn!("record with unknown class id {} ignored", r.class_id);
                report.rejected_inputs += 1;
                continue;
            }
            let snapped = geom::snap_to_grid(&r.geometry, self.params.precision_grid);
            match geom::repair(&snapped, self.params.min_region_area) {
                Some(g) => prepared.push(r.with_geometry(g)),
                None => {
                    warn!(
                        "input region of class {} (mission {}) could not be repaired, dropped",
                        r.class_id,
                        r.mission_id.as_deref().unwrap_or("?")
                    );
                    report.rejected_inputs += 1;
                }
            }
        }
        prepared
    }

    /// Overlay one record onto the arrangement.
    fn insert(&self, atoms: &mut Vec<Atom>, record: &ClassifiedPolygon) {
        let Some(bbox) = record.geometry.bounding_rect() else {
            return;
        };
        let min_area = self.params.min_region_area;
        let n = self.classes.len();
        let mut remaining = record.geometry.clone();
        let mut next = Vec::with_capacity(atoms.len() + 2);

        for atom in atoms.drain(..) {
            if !geom::rects_overlap(&atom.bbox, &bbox) {
                next.push(atom);
                continue;
            }
            let inside = geom::polygonal(atom.geometry.intersection(&record.geometry), min_area);
            if inside.0.is_empty() {
                next.push(atom);
                continue;
            }
            let outside = geom::polygonal(atom.geometry.difference(&record.geometry), min_area);
            remaining = remaining.difference(&atom.geometry);

            let mut votes = atom.votes.clone();
            votes[record.class_id] += 1;
            next.extend(Atom::new(inside, votes));
            next.extend(Atom::new(outside, atom.votes));
        }

        let remaining = geom::polygonal(remaining, min_area);
        if !remaining.0.is_empty() {
            let mut votes = vec![0; n];
            votes[record.class_id] = 1;
            next.extend(Atom::new(remaining, votes));
        }
        *atoms = next;
    }

    /// Winning class of a region and whether the tiebreak order decided it.
    fn resolve(&self, votes: &[u32]) -> Option<(ClassId, bool)> {
        let best = *votes.iter().max()?;
        if best == 0 {
            return None;
        }
        let tied: Vec<ClassId> = (0..votes.len()).filter(|&c| votes[c] == best).collect();
        let winner = *tied.iter().min_by_key(|&&c| self.rank[c])?;
        Some((winner, tied.len() > 1))
    }

    /// Union of the given pieces per class, repaired; one record per class.
    fn dissolve_by_class(
        &self,
        pieces: Vec<(ClassId, MultiPolygon<f64>)>,
        year: Option<i32>,
        report: &mut ConsolidationReport,
    ) -> ClassLayer {
        let n = self.classes.len();
        let mut per_class: Vec<Vec<MultiPolygon<f64>>> = vec![Vec::new(); n];
        for (class_id, g) in pieces {
            per_class[class_id].push(g);
        }

        let mut records = Vec::new();
        for (class_id, parts) in per_class.into_iter().enumerate() {
            if parts.is_empty() {
                continue;
            }
            let merged = geom::dissolve(parts.iter());
            match geom::repair(&merged, self.params.min_region_area) {
                Some(g) => {
                    let mut r = ClassifiedPolygon::new(g, class_id);
                    r.year = year;
                    records.push(r);
                }
                None => {
                    warn!(
                        "merged region for class {} is invalid after repair, dropped",
                        self.classes.name(class_id).unwrap_or("?")
                    );
                    report.dropped_outputs += 1;
                }
            }
        }
        let mut layer = ClassLayer::new(records);
        layer.fill_area_fractions();
        layer
    }

    /// Merge `layers` into one layer according to the configured policy.
    pub fn consolidate(&self, layers: &[ClassLayer]) -> (ClassLayer, ConsolidationReport) {
        let mut report = ConsolidationReport::default();
        let prepared = self.prepare(layers, &mut report);
        let year = common_year(&prepared);

        let layer = match self.params.policy {
            MergePolicy::Dissolve => {
                let pieces = prepared.into_iter().map(|r| (r.class_id, r.geometry)).collect();
                self.dissolve_by_class(pieces, year, &mut report)
            }
            MergePolicy::Vote => {
                let mut atoms: Vec<Atom> = Vec::new();
                for (i, r) in prepared.iter().enumerate() {
                    self.insert(&mut atoms, r);
                    if (i + 1) % 100 == 0 {
                        debug!("overlaid {}/{} records, {} regions", i + 1, prepared.len(), atoms.len());
                    }
                }
                report.atomic_regions = atoms.len();

                let mut pieces = Vec::with_capacity(atoms.len());
                for atom in atoms {
                    if atom.votes.iter().filter(|&&v| v > 0).count() > 1 {
                        report.contested_regions += 1;
                    }
                    if let Some((class_id, tiebroken)) = self.resolve(&atom.votes) {
                        if tiebroken {
                            report.tiebreaks += 1;
                        }
                        pieces.push((class_id, atom.geometry));
                    }
                }
                self.dissolve_by_class(pieces, year, &mut report)
            }
        };

        info!(
            "consolidated {} records ({} rejected) into {} class regions: {} atomic regions, {} contested, {} decided by tiebreak",
            report.input_records,
            report.rejected_inputs,
            layer.len(),
            report.atomic_regions,
            report.contested_regions,
            report.tiebreaks
        );
        (layer, report)
    }
}

fn common_year(records: &[ClassifiedPolygon]) -> Option<i32> {
    let first = records.first()?.year?;
    records.iter().all(|r| r.year == Some(first)).then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::tests::rect;

    fn params(policy: MergePolicy) -> ConsolidationParams {
        ConsolidationParams {
            policy,
            ..Default::default()
        }
    }

    fn layer(records: Vec<(MultiPolygon<f64>, ClassId)>) -> ClassLayer {
        ClassLayer::new(
            records
                .into_iter()
                .map(|(g, c)| ClassifiedPolygon::new(g, c))
                .collect(),
        )
    }

    fn class_area(layer: &ClassLayer, class_id: ClassId) -> f64 {
        layer.class_areas(8)[class_id]
    }

    #[test]
    fn test_full_overlap_tie_uses_tiebreak_order() {
        let classes = ClassSet::default();
        let p = params(MergePolicy::Vote);
        let inputs = [
            layer(vec![(rect(0.0, 0.0, 10.0, 10.0), 4)]),
            layer(vec![(rect(0.0, 0.0, 10.0, 10.0), 6)]),
        ];

        let (out, report) = ClassConsolidator::with_tiebreak(&classes, &p, &[4, 6]).consolidate(&inputs);
        assert_eq!(out.len(), 1);
        assert_eq!(out.records[0].class_id, 4);
        assert!((out.total_area() - 100.0).abs() < 1e-6);
        assert_eq!(report.tiebreaks, 1);

        let (out, _) = ClassConsolidator::with_tiebreak(&classes, &p, &[6, 4]).consolidate(&inputs);
        assert_eq!(out.records[0].class_id, 6);
    }

    #[test]
    fn test_majority_beats_tiebreak() {
        let classes = ClassSet::default();
        let p = params(MergePolicy::Vote);
        let inputs = [
            layer(vec![(rect(0.0, 0.0, 10.0, 10.0), 1)]),
            layer(vec![(rect(0.0, 0.0, 10.0, 10.0), 1)]),
            layer(vec![(rect(0.0, 0.0, 10.0, 10.0), 3)]),
        ];
        let (out, report) = ClassConsolidator::with_tiebreak(&classes, &p, &[3, 1]).consolidate(&inputs);
        assert_eq!(out.len(), 1);
        assert_eq!(out.records[0].class_id, 1);
        assert_eq!(report.tiebreaks, 0);
        assert_eq!(report.contested_regions, 1);
    }

    #[test]
    fn test_disjoint_inputs_pass_through() {
        let classes = ClassSet::default();
        let p = params(MergePolicy::Vote);
        let inputs = [
            layer(vec![(rect(0.0, 0.0, 5.0, 5.0), 0)]),
            layer(vec![(rect(10.0, 0.0, 12.0, 3.0), 7)]),
        ];
        let (out, report) = ClassConsolidator::new(&classes, &p).unwrap().consolidate(&inputs);
        assert_eq!(out.len(), 2);
        assert!((class_area(&out, 0) - 25.0).abs() < 1e-9);
        assert!((class_area(&out, 7) - 6.0).abs() < 1e-9);
        assert_eq!(report.contested_regions, 0);
    }

    #[test]
    fn test_partial_overlap_only_contests_shared_area() {
        let classes = ClassSet::default();
        let p = params(MergePolicy::Vote);
        let inputs = [
            layer(vec![(rect(0.0, 0.0, 6.0, 4.0), 6)]),
            layer(vec![(rect(4.0, 0.0, 10.0, 4.0), 4)]),
        ];
        // SL (4) precedes TL (6) in the default order.
        let (out, _) = ClassConsolidator::new(&classes, &p).unwrap().consolidate(&inputs);
        assert!((class_area(&out, 4) - 24.0).abs() < 1e-6);
        assert!((class_area(&out, 6) - 16.0).abs() < 1e-6);
        assert!(out.self_overlap_area() < 1e-6);
    }

    #[test]
    fn test_output_never_overlaps_and_covers_union() {
        let classes = ClassSet::default();
        let p = params(MergePolicy::Vote);
        let inputs = [
            layer(vec![
                (rect(0.0, 0.0, 7.0, 7.0), 6),
                (rect(7.0, 0.0, 12.0, 7.0), 1),
            ]),
            layer(vec![
                (rect(3.0, 3.0, 10.0, 10.0), 4),
                (rect(-2.0, 5.0, 4.0, 9.0), 6),
            ]),
            layer(vec![(rect(2.5, 2.5, 8.5, 8.5), 4), (rect(9.0, -1.0, 11.0, 4.0), 0)]),
        ];
        let union_area = geom::area(&geom::dissolve(
            inputs.iter().flat_map(|l| l.records.iter().map(|r| &r.geometry)),
        ));
        let (out, _) = ClassConsolidator::new(&classes, &p).unwrap().consolidate(&inputs);
        assert!(out.self_overlap_area() < 1e-6);
        assert!((out.total_area() - union_area).abs() < 1e-6);
        let fractions: f64 = out.records.iter().map(|r| r.area_fraction.unwrap()).sum();
        assert!((fractions - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_dissolve_policy_keeps_overlaps() {
        let classes = ClassSet::default();
        let p = params(MergePolicy::Dissolve);
        let inputs = [
            layer(vec![(rect(0.0, 0.0, 4.0, 4.0), 1), (rect(2.0, 0.0, 6.0, 4.0), 1)]),
            layer(vec![(rect(0.0, 0.0, 4.0, 4.0), 5)]),
        ];
        let (out, _) = ClassConsolidator::new(&classes, &p).unwrap().consolidate(&inputs);
        assert_eq!(out.len(), 2);
        assert!((class_area(&out, 1) - 24.0).abs() < 1e-9);
        assert!((out.self_overlap_area() - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_input_is_repaired() {
        use geo::polygon;
        let classes = ClassSet::default();
        let p = params(MergePolicy::Vote);
        let bowtie = geom::to_multi(polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 2.0, y: 0.0),
            (x: 0.0, y: 2.0),
            (x: 0.0, y: 0.0),
        ]);
        let inputs = [layer(vec![(bowtie, 2)])];
        let (out, report) = ClassConsolidator::new(&classes, &p).unwrap().consolidate(&inputs);
        assert_eq!(report.rejected_inputs, 0);
        assert!((out.total_area() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_unlisted_classes_rank_last_by_id() {
        let classes = ClassSet::default();
        let p = params(MergePolicy::Vote);
        let c = ClassConsolidator::with_tiebreak(&classes, &p, &[5]);
        assert_eq!(c.resolve(&[0, 1, 0, 1, 0, 1, 0, 0]), Some((5, true)));
        assert_eq!(c.resolve(&[0, 1, 0, 1, 0, 0, 0, 0]), Some((1, true)));
        assert_eq!(c.resolve(&[0; 8]), None);
    }
}
