//! The ground every epoch of a reserve observed, and per-epoch class shares over it.

use std::path::Path;

use geo::MultiPolygon;
use log::{info, warn};

use crate::classes::ClassSet;
use crate::cleanup;
use crate::error::{Error, Result};
use crate::geom;
use crate::layer::ClassLayer;

/// Intersection of the dissolved footprints of every non-empty layer.
///
/// `None` when fewer than two layers have data: there is nothing to compare and
/// nothing is clipped.
pub fn shared_region<'a>(layers: impl IntoIterator<Item = &'a ClassLayer>) -> Option<MultiPolygon<f64>> {
    let footprints: Vec<_> = layers
        .into_iter()
        .filter(|l| !l.is_empty())
        .map(|l| l.footprint())
        .collect();
    if footprints.len() < 2 {
        return None;
    }
    let shared = geom::intersect_all(&footprints);
    if shared.0.is_empty() {
        warn!("the {} epoch layers share no ground", footprints.len());
    } else {
        info!(
            "shared region over {} epochs: {:.1} m²",
            footprints.len(),
            geom::area(&shared)
        );
    }
    Some(shared)
}

/// Clip every layer to the shared region; layers are returned unchanged when there is none.
pub fn clip_to_shared(layers: &[ClassLayer]) -> Vec<ClassLayer> {
    match shared_region(layers) {
        Some(shared) => layers
            .iter()
            .map(|l| {
                let mut clipped = cleanup::clip_to(l, &shared);
                clipped.fill_area_fractions();
                clipped
            })
            .collect(),
        None => layers.to_vec(),
    }
}

/// Share of each epoch's area held by every class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFractionTable {
    pub epochs: Vec<String>,
    /// `fractions[c][e]`: fraction of epoch `e` covered by class `c`.
    pub fractions: Vec<Vec<f64>>,
}

impl ClassFractionTable {
    pub fn build(epochs: &[(String, &ClassLayer)], classes: &ClassSet) -> Self {
        let n = classes.len();
        let mut fractions = vec![vec![0.0; epochs.len()]; n];
        for (e, (_, layer)) in epochs.iter().enumerate() {
            let areas = layer.class_areas(n);
            let total: f64 = areas.iter().sum();
            if total <= 0.0 {
                continue;
            }
            for (c, a) in areas.iter().enumerate() {
                fractions[c][e] = a / total;
            }
        }
        Self {
            epochs: epochs.iter().map(|(label, _)| label.clone()).collect(),
            fractions,
        }
    }

    /// One row per class, one column per epoch.
    pub fn write_csv(&self, path: &Path, classes: &ClassSet) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let mut wtr = csv::Writer::from_path(path)?;
        let mut header = vec!["class".to_string()];
        header.extend(self.epochs.iter().cloned());
        wtr.write_record(&header)?;
        for (label, row) in classes.labels().iter().zip(&self.fractions) {
            let mut record = vec![label.name.clone()];
            record.extend(row.iter().map(|f| format!("{f:.6}")));
            wtr.write_record(&record)?;
        }
        wtr.flush().map_err(|e| Error::io(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::tests::rect;
    use crate::layer::ClassifiedPolygon;

    fn layer(parts: &[(MultiPolygon<f64>, usize)]) -> ClassLayer {
        ClassLayer::new(
            parts
                .iter()
                .map(|(g, c)| ClassifiedPolygon::new(g.clone(), *c))
                .collect(),
        )
    }

    #[test]
    fn test_shared_region_is_intersection_of_all_epochs() {
        let a = layer(&[(rect(0.0, 0.0, 10.0, 10.0), 0)]);
        let b = layer(&[(rect(5.0, 0.0, 15.0, 10.0), 1)]);
        let c = layer(&[(rect(0.0, 2.0, 20.0, 8.0), 2)]);
        let shared = shared_region([&a, &b, &c]).unwrap();
        assert!((geom::area(&shared) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_or_empty_epochs_do_not_clip() {
        let a = layer(&[(rect(0.0, 0.0, 10.0, 10.0), 0)]);
        let empty = ClassLayer::default();
        assert!(shared_region([&a, &empty]).is_none());

        let clipped = clip_to_shared(&[a.clone(), empty]);
        assert!((clipped[0].total_area() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_clip_to_shared_refreshes_fractions() {
        let a = layer(&[(rect(0.0, 0.0, 5.0, 10.0), 0), (rect(5.0, 0.0, 10.0, 10.0), 6)]);
        let b = layer(&[(rect(5.0, 0.0, 15.0, 10.0), 6)]);
        let clipped = clip_to_shared(&[a, b]);
        assert_eq!(clipped[0].len(), 1);
        assert_eq!(clipped[0].records[0].class_id, 6);
        assert_eq!(clipped[0].records[0].area_fraction, Some(1.0));
        assert!((clipped[1].total_area() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_class_fraction_table() {
        let classes = ClassSet::default();
        let a = layer(&[(rect(0.0, 0.0, 1.0, 4.0), 0), (rect(1.0, 0.0, 4.0, 4.0), 6)]);
        let b = layer(&[(rect(0.0, 0.0, 4.0, 4.0), 6)]);
        let table = ClassFractionTable::build(&[("2020".into(), &a), ("2023".into(), &b)], &classes);
        assert_eq!(table.fractions[0], vec![0.25, 0.0]);
        assert_eq!(table.fractions[6], vec![0.75, 1.0]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fractions.csv");
        table.write_csv(&path, &classes).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("class,2020,2023"));
        assert!(text.contains("TL_tree_live,0.750000,1.000000"));
    }
}
