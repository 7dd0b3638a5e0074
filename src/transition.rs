//! Area-weighted class transition matrices between two epochs of the same ground.

use std::path::{Path, PathBuf};

use geo::{BooleanOps, BoundingRect};
use log::{info, warn};
use nalgebra::DMatrix;

use crate::classes::ClassSet;
use crate::error::{Error, Result};
use crate::geom;
use crate::layer::ClassLayer;
use crate::merge::ComparisonSet;
use crate::region::{clip_to_shared, ClassFractionTable};

/// `matrix[(i, j)]` is the area that was class `i` in the first epoch and class `j` in the second.
#[derive(Debug, Clone)]
pub struct TransitionMatrix {
    pub matrix: DMatrix<f64>,
    /// Rows scaled to sum to one; rows with no area stay all zero.
    pub row_normalized: DMatrix<f64>,
    /// Area observed in both epochs.
    pub shared_area: f64,
    /// Area of the union of both layers.
    pub union_area: f64,
}

impl TransitionMatrix {
    /// Overlay two non-overlapping layers and accumulate intersection areas.
    pub fn build(first: &ClassLayer, second: &ClassLayer, n_classes: usize) -> TransitionMatrix {
        let mut matrix = DMatrix::<f64>::zeros(n_classes, n_classes);
        let boxes: Vec<_> = second.records.iter().map(|r| r.geometry.bounding_rect()).collect();

        for a in &first.records {
            let Some(abox) = a.geometry.bounding_rect() else {
                continue;
            };
            for (b, bbox) in second.records.iter().zip(&boxes) {
                let Some(bbox) = bbox else { continue };
                if !geom::rects_overlap(&abox, bbox) || a.class_id >= n_classes || b.class_id >= n_classes {
                    continue;
                }
                matrix[(a.class_id, b.class_id)] += geom::area(&a.geometry.intersection(&b.geometry));
            }
        }

        let union_area = geom::area(&first.footprint().union(&second.footprint()));
        let shared_area = matrix.sum();
        let result = TransitionMatrix {
            row_normalized: row_normalize(&matrix),
            matrix,
            shared_area,
            union_area,
        };
        info!(
            "{:.2}% of union area excluded due to imperfect alignment/coverage",
            100.0 * result.dropped_fraction()
        );
        result
    }

    /// Share of the union area seen in only one epoch.
    pub fn dropped_fraction(&self) -> f64 {
        if self.union_area > 0.0 {
            (1.0 - self.shared_area / self.union_area).max(0.0)
        } else {
            0.0
        }
    }

    /// Write `{region}_{first}_{second}.csv` and its `_row_normalized` sibling into `dir`.
    pub fn write_csv(
        &self,
        dir: &Path,
        region: &str,
        first: &str,
        second: &str,
        classes: &ClassSet,
    ) -> Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        let stem = format!("{region}_{first}_{second}");
        let raw = dir.join(format!("{stem}.csv"));
        let normalized = dir.join(format!("{stem}_row_normalized.csv"));
        write_matrix(&raw, &self.matrix, classes)?;
        write_matrix(&normalized, &self.row_normalized, classes)?;
        Ok((raw, normalized))
    }
}

// ---------------------------------------------------------------------------
// Comparison sets
// ---------------------------------------------------------------------------

/// Outputs of one comparison set. A failed write is counted and skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComparisonOutcome {
    pub layers: usize,
    pub matrices: usize,
    pub failed: usize,
}

impl std::ops::AddAssign for ComparisonOutcome {
    fn add_assign(&mut self, other: Self) {
        self.layers += other.layers;
        self.matrices += other.matrices;
        self.failed += other.failed;
    }
}

/// Clip the epochs of `set` to their shared region and write everything derived from them.
///
/// Clipped layers go to `clipped_dir` as `{region}_{epoch}_{set}.geojson`; the
/// class-fraction table and one matrix pair per epoch pair go to `out_dir`.
pub fn write_comparison(
    set: &ComparisonSet<'_>,
    clipped_dir: &Path,
    out_dir: &Path,
    classes: &ClassSet,
) -> ComparisonOutcome {
    let mut outcome = ComparisonOutcome::default();
    let layers: Vec<ClassLayer> = set.epochs.iter().map(|e| e.layer.clone()).collect();
    let clipped = clip_to_shared(&layers);

    for (e, layer) in set.epochs.iter().zip(&clipped) {
        let path = clipped_dir.join(format!("{}_{}_{}.geojson", set.region, e.epoch, set.name));
        match layer.write_geojson(&path, classes) {
            Ok(()) => outcome.layers += 1,
            Err(err) => {
                warn!("{}: {}", path.display(), err);
                outcome.failed += 1;
            }
        }
    }

    let labelled: Vec<(String, &ClassLayer)> = set.epochs.iter().map(|e| e.epoch.clone()).zip(&clipped).collect();
    let table_path = out_dir.join(format!("{}_{}_class_fractions.csv", set.region, set.name));
    if let Err(err) = ClassFractionTable::build(&labelled, classes).write_csv(&table_path, classes) {
        warn!("{}: {}", table_path.display(), err);
        outcome.failed += 1;
    }

    for i in 0..set.epochs.len() {
        for j in (i + 1)..set.epochs.len() {
            let (first, second) = (set.epochs[i], set.epochs[j]);
            info!("{} {} → {}", set.region, first.epoch, second.epoch);
            let t = TransitionMatrix::build(&clipped[i], &clipped[j], classes.len());
            match t.write_csv(out_dir, &set.region, &first.epoch, &second.epoch, classes) {
                Ok(_) => outcome.matrices += 1,
                Err(err) => {
                    warn!("{} {} → {}: {}", set.region, first.epoch, second.epoch, err);
                    outcome.failed += 1;
                }
            }
        }
    }
    outcome
}

fn row_normalize(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = matrix.clone();
    for mut row in out.row_iter_mut() {
        let total = row.sum();
        if total > 0.0 {
            row /= total;
        }
    }
    out
}

fn write_matrix(path: &Path, matrix: &DMatrix<f64>, classes: &ClassSet) -> Result<()> {
    let abbrevs = classes.abbreviations();
    let mut wtr = csv::Writer::from_path(path)?;

    let mut header = vec![String::new()];
    header.extend(abbrevs.iter().take(matrix.ncols()).map(|s| s.to_string()));
    wtr.write_record(&header)?;

    for (i, row) in matrix.row_iter().enumerate() {
        let mut record = vec![abbrevs.get(i).map(|s| s.to_string()).unwrap_or_else(|| i.to_string())];
        record.extend(row.iter().map(|v| v.to_string()));
        wtr.write_record(&record)?;
    }
    wtr.flush().map_err(|e| Error::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::tests::rect;
    use crate::layer::ClassifiedPolygon;
    use crate::merge::EpochLayer;

    fn two_class_layer() -> ClassLayer {
        ClassLayer::new(vec![
            ClassifiedPolygon::new(rect(0.0, 0.0, 4.0, 10.0), 6),
            ClassifiedPolygon::new(rect(4.0, 0.0, 10.0, 10.0), 0),
        ])
    }

    #[test]
    fn test_identical_layers_give_diagonal() {
        let layer = two_class_layer();
        let t = TransitionMatrix::build(&layer, &layer, 8);
        for i in 0..8 {
            for j in 0..8 {
                if i != j {
                    assert!(t.matrix[(i, j)].abs() < 1e-9);
                }
            }
        }
        assert!((t.matrix[(6, 6)] - 40.0).abs() < 1e-9);
        assert!((t.matrix[(0, 0)] - 60.0).abs() < 1e-9);
        assert!((t.row_normalized[(6, 6)] - 1.0).abs() < 1e-12);
        assert!((t.row_normalized[(0, 0)] - 1.0).abs() < 1e-12);
        assert!(t.dropped_fraction() < 1e-12);
    }

    #[test]
    fn test_empty_rows_stay_zero() {
        let layer = two_class_layer();
        let t = TransitionMatrix::build(&layer, &layer, 8);
        assert!(t.row_normalized.row(3).iter().all(|v| *v == 0.0));
        assert!(t.row_normalized.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_transitions_and_dropped_area() {
        let first = two_class_layer();
        // Trees spread two metres east; the second survey misses the eastern strip.
        let second = ClassLayer::new(vec![
            ClassifiedPolygon::new(rect(0.0, 0.0, 6.0, 10.0), 6),
            ClassifiedPolygon::new(rect(6.0, 0.0, 8.0, 10.0), 0),
        ]);
        let t = TransitionMatrix::build(&first, &second, 8);
        assert!((t.matrix[(6, 6)] - 40.0).abs() < 1e-9);
        assert!((t.matrix[(0, 6)] - 20.0).abs() < 1e-9);
        assert!((t.matrix[(0, 0)] - 20.0).abs() < 1e-9);
        assert!((t.row_normalized[(0, 6)] - 0.5).abs() < 1e-12);
        assert!((t.dropped_fraction() - 0.2).abs() < 1e-9);
    }

    fn epoch_layer(epoch: &str, layer: ClassLayer) -> EpochLayer {
        EpochLayer {
            region: "north".into(),
            epoch: epoch.into(),
            years: vec![epoch.parse().unwrap()],
            missions: Vec::new(),
            layer,
        }
    }

    #[test]
    fn test_comparison_writes_clipped_layers_table_and_matrices() {
        let classes = ClassSet::default();
        let dir = tempfile::tempdir().unwrap();
        let epochs = [
            epoch_layer("2020", two_class_layer()),
            epoch_layer("2023", two_class_layer()),
            epoch_layer("2024", two_class_layer()),
        ];
        let set = ComparisonSet {
            region: "north".into(),
            name: "separate_years",
            epochs: epochs.iter().collect(),
        };
        let (clipped_dir, out_dir) = (dir.path().join("clipped"), dir.path().join("transitions"));
        let outcome = write_comparison(&set, &clipped_dir, &out_dir, &classes);
        assert_eq!(outcome, ComparisonOutcome { layers: 3, matrices: 3, failed: 0 });
        assert!(clipped_dir.join("north_2023_separate_years.geojson").is_file());
        assert!(out_dir.join("north_separate_years_class_fractions.csv").is_file());
        assert!(out_dir.join("north_2023_2024.csv").is_file());
    }

    #[test]
    fn test_comparison_failed_writes_are_counted_not_fatal() {
        let classes = ClassSet::default();
        let dir = tempfile::tempdir().unwrap();
        let epochs = [epoch_layer("2020", two_class_layer()), epoch_layer("2023", two_class_layer())];
        let set = ComparisonSet {
            region: "north".into(),
            name: "separate_years",
            epochs: epochs.iter().collect(),
        };
        // A plain file where the output folder should be.
        let blocked = dir.path().join("transitions");
        std::fs::write(&blocked, "").unwrap();
        let clipped_dir = dir.path().join("clipped");

        let outcome = write_comparison(&set, &clipped_dir, &blocked, &classes);
        assert_eq!(outcome, ComparisonOutcome { layers: 2, matrices: 0, failed: 2 });
        assert!(clipped_dir.join("north_2020_separate_years.geojson").is_file());
    }

    #[test]
    fn test_csv_files_have_abbreviation_headers() {
        let classes = ClassSet::default();
        let dir = tempfile::tempdir().unwrap();
        let layer = two_class_layer();
        let t = TransitionMatrix::build(&layer, &layer, classes.len());
        let (raw, normalized) = t.write_csv(dir.path(), "north", "2020", "2023_2024", &classes).unwrap();
        assert!(raw.ends_with("north_2020_2023_2024.csv"));
        assert!(normalized.ends_with("north_2020_2023_2024_row_normalized.csv"));

        let mut rdr = csv::Reader::from_path(&raw).unwrap();
        let header = rdr.headers().unwrap().clone();
        assert_eq!(header.get(1), Some("BE"));
        assert_eq!(header.get(8), Some("W"));
        let rows: Vec<_> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 8);
        assert_eq!(rows[6].get(0), Some("TL"));
        let tl_tl: f64 = rows[6].get(7).unwrap().parse().unwrap();
        assert!((tl_tl - 40.0).abs() < 1e-9);
    }
}
