//! Polygon engine: the small set of planar operations the pipeline relies on.
//!
//! Everything works on `MultiPolygon<f64>` in a metric CRS. Boolean operations
//! and buffering come from `geo`; this module pins down the conventions
//! (mitre joins, grid snapping, what counts as empty, how validity is repaired).

use geo::algorithm::buffer::{BufferStyle, LineJoin};
use geo::{Area, BooleanOps, Buffer, CoordsIter, MapCoords, MultiPolygon, Polygon, Rect, Simplify};

/// Mitre limit for buffering, as a ratio of the buffer distance.
const MITRE_LIMIT: f64 = 2.0;

pub fn empty() -> MultiPolygon<f64> {
    MultiPolygon::new(Vec::new())
}

pub fn area(mp: &MultiPolygon<f64>) -> f64 {
    mp.unsigned_area()
}

/// Round every vertex to a multiple of `grid`. A zero grid is a no-op.
pub fn snap_to_grid(mp: &MultiPolygon<f64>, grid: f64) -> MultiPolygon<f64> {
    if grid <= 0.0 {
        return mp.clone();
    }
    mp.map_coords(|c| geo::coord! {
        x: (c.x / grid).round() * grid,
        y: (c.y / grid).round() * grid,
    })
}

/// Drop polygons with no area, keeping only the polygonal part of a result.
pub fn polygonal(mp: MultiPolygon<f64>, min_area: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(
        mp.0.into_iter()
            .filter(|p| p.exterior().0.len() >= 4 && p.unsigned_area() > min_area)
            .collect(),
    )
}

/// Re-node a geometry so it is topologically valid (the `buffer(0)` idiom).
///
/// Returns `None` when the geometry is beyond repair: non-finite coordinates
/// or nothing left after normalisation.
pub fn repair(mp: &MultiPolygon<f64>, min_area: f64) -> Option<MultiPolygon<f64>> {
    if mp.coords_iter().any(|c| !(c.x.is_finite() && c.y.is_finite())) {
        return None;
    }
    let fixed = polygonal(mp.union(&empty()), min_area);
    (!fixed.0.is_empty()).then_some(fixed)
}

/// Union of any number of geometries.
pub fn dissolve<'a>(parts: impl IntoIterator<Item = &'a MultiPolygon<f64>>) -> MultiPolygon<f64> {
    parts.into_iter().fold(empty(), |acc, mp| {
        if acc.0.is_empty() {
            mp.union(&empty())
        } else {
            acc.union(mp)
        }
    })
}

/// Intersection of every geometry, empty if there are none.
pub fn intersect_all<'a>(
    parts: impl IntoIterator<Item = &'a MultiPolygon<f64>>,
) -> MultiPolygon<f64> {
    let mut iter = parts.into_iter();
    match iter.next() {
        None => empty(),
        Some(first) => iter.fold(first.clone(), |acc, mp| acc.intersection(mp)),
    }
}

/// Positive distances grow, negative distances shrink. Mitre joins keep corners square.
pub fn buffer(mp: &MultiPolygon<f64>, distance: f64) -> MultiPolygon<f64> {
    if distance == 0.0 {
        return mp.clone();
    }
    let style = BufferStyle::new(distance).line_join(LineJoin::Miter(MITRE_LIMIT));
    mp.buffer_with_style(style)
}

/// Douglas-Peucker simplification; rings that collapse are dropped.
pub fn simplify(mp: &MultiPolygon<f64>, tolerance: f64) -> MultiPolygon<f64> {
    if tolerance <= 0.0 {
        return mp.clone();
    }
    polygonal(mp.simplify(tolerance), 0.0)
}

/// Closed bounding boxes intersect; touching boxes count.
pub fn rects_overlap(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x && b.min().x <= a.max().x && a.min().y <= b.max().y && b.min().y <= a.max().y
}

pub fn to_multi(poly: Polygon<f64>) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![poly])
}

/// Area covered by exactly one of the two geometries.
pub fn symmetric_difference_area(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> f64 {
    area(&a.xor(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square(x0: f64, y0: f64, size: f64) -> MultiPolygon<f64> {
        to_multi(polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
            (x: x0, y: y0),
        ])
    }

    #[test]
    fn test_dissolve_overlapping_squares() {
        let a = square(0.0, 0.0, 2.0);
        let b = square(1.0, 0.0, 2.0);
        let u = dissolve([&a, &b]);
        assert!((area(&u) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_intersect_all() {
        let a = square(0.0, 0.0, 2.0);
        let b = square(1.0, 1.0, 2.0);
        let c = square(1.5, 0.0, 3.0);
        let i = intersect_all([&a, &b, &c]);
        assert!((area(&i) - 0.25).abs() < 1e-9);
        assert!(intersect_all(std::iter::empty()).0.is_empty());
    }

    #[test]
    fn test_buffer_grow_and_shrink_square() {
        let a = square(0.0, 0.0, 4.0);
        let grown = buffer(&a, 1.0);
        // Mitre joins keep the square corners.
        assert!((area(&grown) - 36.0).abs() < 1e-6);
        let shrunk = buffer(&a, -1.0);
        assert!((area(&shrunk) - 4.0).abs() < 1e-6);
        assert!(buffer(&a, -3.0).0.is_empty());
    }

    #[test]
    fn test_repair_self_intersecting_bowtie() {
        let bowtie = to_multi(polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 2.0, y: 0.0),
            (x: 0.0, y: 2.0),
            (x: 0.0, y: 0.0),
        ]);
        let fixed = repair(&bowtie, 0.0).unwrap();
        assert!((area(&fixed) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_repair_rejects_non_finite() {
        let bad = to_multi(polygon![
            (x: 0.0, y: 0.0),
            (x: f64::NAN, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]);
        assert!(repair(&bad, 0.0).is_none());
    }

    #[test]
    fn test_rects_overlap() {
        let r = |x0: f64, y0: f64, x1: f64, y1: f64| {
            Rect::new(geo::coord! { x: x0, y: y0 }, geo::coord! { x: x1, y: y1 })
        };
        let a = r(0.0, 0.0, 2.0, 2.0);
        assert!(rects_overlap(&a, &r(1.0, 1.0, 3.0, 3.0)));
        assert!(rects_overlap(&a, &r(2.0, 0.0, 4.0, 2.0)));
        assert!(!rects_overlap(&a, &r(2.5, 0.0, 4.0, 2.0)));
        assert!(!rects_overlap(&r(0.0, 3.0, 1.0, 4.0), &a));
    }

    #[test]
    fn test_snap_to_grid() {
        let a = square(0.004, 0.006, 1.0);
        let s = snap_to_grid(&a, 0.01);
        let first = s.0[0].exterior().0[0];
        assert!((first.x - 0.0).abs() < 1e-12);
        assert!((first.y - 0.01).abs() < 1e-12);
    }
}
