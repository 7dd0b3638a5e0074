//! North-up single-band raster grid used for CHM tiles and orthomosaics.

use std::ops::{Index, IndexMut};

/// Axis-aligned rectangle in map units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Extent {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    pub fn is_empty(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    pub fn area(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.width() * self.height()
        }
    }

    /// Overlapping part of two extents, `None` when they do not overlap.
    pub fn intersection(&self, other: &Extent) -> Option<Extent> {
        let e = Extent::new(
            self.xmin.max(other.xmin),
            self.ymin.max(other.ymin),
            self.xmax.min(other.xmax),
            self.ymax.min(other.ymax),
        );
        (!e.is_empty()).then_some(e)
    }

    /// Shrink by `margin` on every side.
    pub fn shrink(&self, margin: f64) -> Option<Extent> {
        let e = Extent::new(
            self.xmin + margin,
            self.ymin + margin,
            self.xmax - margin,
            self.ymax - margin,
        );
        (!e.is_empty()).then_some(e)
    }

    pub fn to_polygon(&self) -> geo::Polygon<f64> {
        geo::Rect::new(
            geo::coord! { x: self.xmin, y: self.ymin },
            geo::coord! { x: self.xmax, y: self.ymax },
        )
        .to_polygon()
    }
}

/// A 2D raster (row-major, origin top-left). NaN marks "no data".
///
/// Geo-referencing: pixel (r, c) has its centre at
///   x = xmin + (c + 0.5) * res_x
///   y = ymax - (r + 0.5) * res_y
#[derive(Debug, Clone)]
pub struct Raster {
    pub nrow: usize,
    pub ncol: usize,
    pub data: Vec<f64>,
    /// Cell width.
    pub res_x: f64,
    /// Cell height (positive, rows run southwards).
    pub res_y: f64,
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl Raster {
    /// Raster from row-major values; extent defaults to one unit per cell.
    pub fn from_vec(nrow: usize, ncol: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), nrow * ncol);
        Self {
            nrow,
            ncol,
            data,
            res_x: 1.0,
            res_y: 1.0,
            xmin: 0.0,
            xmax: ncol as f64,
            ymin: 0.0,
            ymax: nrow as f64,
        }
    }

    /// Georeference the grid over an extent; resolution follows from it.
    pub fn with_extent(mut self, xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Self {
        self.xmin = xmin;
        self.xmax = xmax;
        self.ymin = ymin;
        self.ymax = ymax;
        self.res_x = (xmax - xmin) / self.ncol as f64;
        self.res_y = (ymax - ymin) / self.nrow as f64;
        self
    }

    /// Sample `f(x, y)` at every cell centre of a grid covering `extent` at `gsd`.
    pub fn from_fn(extent: Extent, gsd: f64, f: impl Fn(f64, f64) -> f64) -> Self {
        let ncol = (extent.width() / gsd).round().max(1.0) as usize;
        let nrow = (extent.height() / gsd).round().max(1.0) as usize;
        let mut data = Vec::with_capacity(nrow * ncol);
        for r in 0..nrow {
            for c in 0..ncol {
                let x = extent.xmin + (c as f64 + 0.5) * gsd;
                let y = extent.ymax - (r as f64 + 0.5) * gsd;
                data.push(f(x, y));
            }
        }
        Raster::from_vec(nrow, ncol, data).with_extent(
            extent.xmin,
            extent.xmin + ncol as f64 * gsd,
            extent.ymax - nrow as f64 * gsd,
            extent.ymax,
        )
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.xmin, self.ymin, self.xmax, self.ymax)
    }

    /// Value at (row, col), NaN if out of bounds.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        if row < self.nrow && col < self.ncol {
            self.data[row * self.ncol + col]
        } else {
            f64::NAN
        }
    }

    /// Cell centre of (row, col) in world coordinates.
    pub fn rc_to_xy(&self, row: usize, col: usize) -> (f64, f64) {
        let x = self.xmin + (col as f64 + 0.5) * self.res_x;
        let y = self.ymax - (row as f64 + 0.5) * self.res_y;
        (x, y)
    }

    /// Bilinear interpolation at a world position.
    ///
    /// Returns `None` outside the grid or when any contributing cell is NaN.
    /// Within half a cell of the border the nearest edge cells are used.
    pub fn sample_bilinear(&self, x: f64, y: f64) -> Option<f64> {
        if self.nrow == 0 || self.ncol == 0 {
            return None;
        }
        let u = (x - self.xmin) / self.res_x - 0.5;
        let v = (self.ymax - y) / self.res_y - 0.5;
        let max_u = (self.ncol - 1) as f64;
        let max_v = (self.nrow - 1) as f64;
        if !(u >= -0.5 && u <= max_u + 0.5 && v >= -0.5 && v <= max_v + 0.5) {
            return None;
        }
        let u = u.clamp(0.0, max_u);
        let v = v.clamp(0.0, max_v);

        let c0 = u.floor() as usize;
        let r0 = v.floor() as usize;
        let c1 = (c0 + 1).min(self.ncol - 1);
        let r1 = (r0 + 1).min(self.nrow - 1);
        let fu = u - c0 as f64;
        let fv = v - r0 as f64;

        let q00 = self.get(r0, c0);
        let q01 = self.get(r0, c1);
        let q10 = self.get(r1, c0);
        let q11 = self.get(r1, c1);
        let value = q00 * (1.0 - fu) * (1.0 - fv)
            + q01 * fu * (1.0 - fv)
            + q10 * (1.0 - fu) * fv
            + q11 * fu * fv;
        value.is_finite().then_some(value)
    }

    /// Resample onto a grid covering `extent` at `gsd` (bilinear, NaN where undefined).
    pub fn resample(&self, extent: Extent, gsd: f64) -> Raster {
        Raster::from_fn(extent, gsd, |x, y| {
            self.sample_bilinear(x, y).unwrap_or(f64::NAN)
        })
    }

    /// Same cells, georeferencing moved by (dx, dy). Resolution is unchanged.
    pub fn translated(&self, dx: f64, dy: f64) -> Raster {
        let mut out = self.clone();
        out.xmin += dx;
        out.xmax += dx;
        out.ymin += dy;
        out.ymax += dy;
        out
    }

    /// Mean and variance of the finite cells, `None` if there are none.
    pub fn valid_stats(&self) -> Option<(f64, f64)> {
        let (n, sum, sum_sq) = self
            .data
            .iter()
            .filter(|v| v.is_finite())
            .fold((0usize, 0.0, 0.0), |(n, s, s2), v| (n + 1, s + v, s2 + v * v));
        if n == 0 {
            return None;
        }
        let mean = sum / n as f64;
        Some((mean, (sum_sq / n as f64 - mean * mean).max(0.0)))
    }

    pub fn len(&self) -> usize {
        self.nrow * self.ncol
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Index<(usize, usize)> for Raster {
    type Output = f64;
    fn index(&self, (r, c): (usize, usize)) -> &f64 {
        &self.data[r * self.ncol + c]
    }
}

impl IndexMut<(usize, usize)> for Raster {
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut f64 {
        &mut self.data[r * self.ncol + c]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Raster {
        // value = x + 10 y at cell centres
        Raster::from_fn(Extent::new(0.0, 0.0, 4.0, 4.0), 1.0, |x, y| x + 10.0 * y)
    }

    #[test]
    fn test_from_fn_georeferencing() {
        let r = ramp();
        assert_eq!((r.nrow, r.ncol), (4, 4));
        assert_eq!(r.rc_to_xy(0, 0), (0.5, 3.5));
        assert_eq!(r[(0, 0)], 0.5 + 35.0);
    }

    #[test]
    fn test_bilinear_reproduces_linear_field() {
        let r = ramp();
        let v = r.sample_bilinear(1.7, 2.2).unwrap();
        assert!((v - (1.7 + 22.0)).abs() < 1e-9);
        assert!(r.sample_bilinear(-1.0, 2.0).is_none());
    }

    #[test]
    fn test_bilinear_skips_nodata() {
        let mut r = ramp();
        r[(1, 1)] = f64::NAN;
        assert!(r.sample_bilinear(1.5, 2.5).is_none());
        assert!(r.sample_bilinear(3.5, 0.5).is_some());
    }

    #[test]
    fn test_translated_keeps_cells() {
        let r = ramp();
        let t = r.translated(2.0, -1.0);
        assert_eq!(t.data, r.data);
        assert_eq!(t.extent(), Extent::new(2.0, -1.0, 6.0, 3.0));
        assert_eq!(t.res_x, r.res_x);
    }

    #[test]
    fn test_extent_intersection() {
        let a = Extent::new(0.0, 0.0, 10.0, 10.0);
        let b = Extent::new(5.0, 8.0, 20.0, 20.0);
        assert_eq!(a.intersection(&b), Some(Extent::new(5.0, 8.0, 10.0, 10.0)));
        assert!(a.intersection(&Extent::new(11.0, 0.0, 12.0, 1.0)).is_none());
        assert_eq!(a.shrink(6.0), None);
    }
}
