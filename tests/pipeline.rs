//! End-to-end: three missions over the same canopy, one of them misplaced by (2, -1).

use std::collections::BTreeMap;

use geo::{polygon, Centroid, MultiPolygon};

use reservechange::config::{RegistrationParams, SolverParams};
use reservechange::geotiff::write_geotiff;
use reservechange::global_shift;
use reservechange::projection::Identity;
use reservechange::registration::{read_pairwise, write_pairwise, ChmFolder};
use reservechange::{
    ClassLayer, ClassifiedPolygon, Extent, IntensityAligner, MapShifter, Mission, PairwiseRegistrar, Raster, Shift,
    TransitionMatrix,
};

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![polygon![
        (x: x0, y: y0),
        (x: x1, y: y0),
        (x: x1, y: y1),
        (x: x0, y: y1),
        (x: x0, y: y0),
    ]])
}

fn canopy(x: f64, y: f64) -> f64 {
    let crowns = [
        (14.0, 16.0, 10.0, 3.0),
        (28.0, 30.0, 13.0, 4.0),
        (42.0, 20.0, 8.0, 2.5),
        (35.0, 46.0, 11.0, 3.5),
        (20.0, 42.0, 12.0, 5.0),
    ];
    let mut h = 0.015 * x + 0.01 * y;
    for (cx, cy, height, sigma) in crowns {
        let d2 = (x - cx).powi(2) + (y - cy).powi(2);
        h += height * (-d2 / (2.0 * sigma * sigma)).exp();
    }
    h
}

/// A mission whose georeferencing is off: ground at `p` is recorded at `p - error`.
struct Survey {
    mission: Mission,
    extent: Extent,
    error: Shift,
}

impl Survey {
    fn new(id: &str, year: i32, extent: Extent, error: Shift) -> Self {
        let mission = Mission::new(id, year, MultiPolygon::new(vec![extent.to_polygon()]));
        Self { mission, extent, error }
    }

    fn chm(&self) -> Raster {
        Raster::from_fn(self.extent, 1.0, |x, y| canopy(x + self.error.dx, y + self.error.dy))
    }

    /// Map of a tree stand that truly covers [20, 40]².
    fn map(&self) -> ClassLayer {
        let (dx, dy) = (self.error.dx, self.error.dy);
        ClassLayer::new(vec![
            ClassifiedPolygon::new(rect(20.0 - dx, 20.0 - dy, 40.0 - dx, 40.0 - dy), 6)
                .with_mission(self.mission.id.as_str(), Some(self.mission.year)),
        ])
    }
}

fn surveys() -> Vec<Survey> {
    vec![
        Survey::new("1", 2020, Extent::new(0.0, 0.0, 60.0, 60.0), Shift::ZERO),
        Survey::new("2", 2023, Extent::new(3.0, 2.0, 63.0, 62.0), Shift::new(2.0, -1.0)),
        Survey::new("3", 2024, Extent::new(-2.0, 1.0, 58.0, 61.0), Shift::new(0.5, 0.75)),
    ]
}

#[test]
fn test_planted_shift_is_recovered_and_maps_align() {
    let dir = tempfile::tempdir().unwrap();
    let chm_dir = dir.path().join("chms");
    let surveys = surveys();
    let source = ChmFolder::new(&chm_dir);
    for s in &surveys {
        write_geotiff(&source.path_for(&s.mission.id), &s.chm()).unwrap();
    }

    let params = RegistrationParams {
        min_overlap_area: 1000.0,
        target_gsd: 1.0,
        max_search_shift: 4.0,
        ..Default::default()
    };
    let aligner = IntensityAligner::from_params(&params);
    let missions: Vec<Mission> = surveys.iter().map(|s| s.mission.clone()).collect();
    let records = PairwiseRegistrar::new(&aligner, &source, &params).compute_pairwise(&missions);
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.shift.is_some()));

    let pairwise_path = dir.path().join("pairwise.geojson");
    write_pairwise(&pairwise_path, &records).unwrap();
    let records = read_pairwise(&pairwise_path).unwrap();

    let solver = SolverParams {
        anchor_weight: 1e-4,
        ..Default::default()
    };
    let (table, report) = global_shift::solve(&records, &solver).unwrap();
    assert_eq!(report.used, 3);
    assert_eq!(table.len(), 3);

    let rel = table.get("2").unwrap() - table.get("1").unwrap();
    assert!((rel.dx - 2.0).abs() < 0.15, "dx = {}", rel.dx);
    assert!((rel.dy + 1.0).abs() < 0.15, "dy = {}", rel.dy);

    // Shifted maps of every mission land on the same ground.
    let shifter = MapShifter::new(&table);
    let shifted: BTreeMap<&str, ClassLayer> = surveys
        .iter()
        .map(|s| (s.mission.id.as_str(), shifter.shift_layer(&s.map(), &s.mission.id, &Identity)))
        .collect();
    let centre = |id: &str| shifted[id].records[0].geometry.centroid().unwrap();
    let (a, b, c) = (centre("1"), centre("2"), centre("3"));
    assert!((a.x() - b.x()).hypot(a.y() - b.y()) < 0.2);
    assert!((a.x() - c.x()).hypot(a.y() - c.y()) < 0.2);

    // Unchanged ground gives an (almost) purely diagonal transition.
    let t = TransitionMatrix::build(&shifted["1"], &shifted["2"], 8);
    assert!(t.matrix[(6, 6)] > 390.0);
    assert!((t.row_normalized[(6, 6)] - 1.0).abs() < 1e-12);
    assert!(t.dropped_fraction() < 0.02);
}

#[test]
fn test_missing_raster_is_recorded_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let source = ChmFolder::new(dir.path());
    let surveys = surveys();
    // Only the 2020 and 2024 missions have CHMs.
    for s in [&surveys[0], &surveys[2]] {
        write_geotiff(&source.path_for(&s.mission.id), &s.chm()).unwrap();
    }

    let params = RegistrationParams {
        min_overlap_area: 1000.0,
        target_gsd: 1.0,
        max_search_shift: 4.0,
        ..Default::default()
    };
    let aligner = IntensityAligner::from_params(&params);
    let missions: Vec<Mission> = surveys.iter().map(|s| s.mission.clone()).collect();
    let records = PairwiseRegistrar::new(&aligner, &source, &params).compute_pairwise(&missions);
    assert_eq!(records.len(), 3);
    assert_eq!(records.iter().filter(|r| r.shift.is_none()).count(), 2);

    let (table, report) = global_shift::solve(&records, &SolverParams::default()).unwrap();
    assert_eq!(report.failed, 2);
    assert!(table.get("2").is_none());
    assert_eq!(table.get_or_zero("2"), Shift::ZERO);
}
