//! Planar projections used around rigid shifts.
//!
//! Shifts are metric, so layers stored in geographic coordinates are projected
//! to a local metric plane, translated, and projected back to their original
//! coordinates.

use geo::{Coord, MapCoords, MultiPolygon};

/// Forward/inverse mapping between a layer's native CRS and a metric plane.
pub trait Projection {
    fn forward(&self, c: Coord<f64>) -> Coord<f64>;
    fn inverse(&self, c: Coord<f64>) -> Coord<f64>;

    fn forward_geometry(&self, mp: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        mp.map_coords(|c| self.forward(c))
    }

    fn inverse_geometry(&self, mp: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        mp.map_coords(|c| self.inverse(c))
    }
}

/// The layer is already in a metric CRS.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Projection for Identity {
    fn forward(&self, c: Coord<f64>) -> Coord<f64> {
        c
    }

    fn inverse(&self, c: Coord<f64>) -> Coord<f64> {
        c
    }
}

/// Equirectangular projection of lon/lat degrees around a reference point.
///
/// Accurate to well under a centimetre per metre over the extent of a single
/// reserve, which is all a translation needs.
#[derive(Debug, Clone, Copy)]
pub struct Equirectangular {
    lon0: f64,
    lat0: f64,
    m_per_deg_x: f64,
    m_per_deg_y: f64,
}

const EARTH_RADIUS_M: f64 = 6_371_008.8;

impl Equirectangular {
    pub fn new(lon0: f64, lat0: f64) -> Self {
        let m_per_deg_y = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
        Self {
            lon0,
            lat0,
            m_per_deg_x: m_per_deg_y * lat0.to_radians().cos(),
            m_per_deg_y,
        }
    }
}

impl Projection for Equirectangular {
    fn forward(&self, c: Coord<f64>) -> Coord<f64> {
        geo::coord! {
            x: (c.x - self.lon0) * self.m_per_deg_x,
            y: (c.y - self.lat0) * self.m_per_deg_y,
        }
    }

    fn inverse(&self, c: Coord<f64>) -> Coord<f64> {
        geo::coord! {
            x: c.x / self.m_per_deg_x + self.lon0,
            y: c.y / self.m_per_deg_y + self.lat0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equirectangular_round_trip() {
        let p = Equirectangular::new(-121.7, 36.4);
        let c = geo::coord! { x: -121.6935, y: 36.4012 };
        let back = p.inverse(p.forward(c));
        assert!((back.x - c.x).abs() < 1e-12);
        assert!((back.y - c.y).abs() < 1e-12);
    }

    #[test]
    fn test_equirectangular_scale() {
        let p = Equirectangular::new(0.0, 60.0);
        let east = p.forward(geo::coord! { x: 1.0, y: 60.0 });
        let north = p.forward(geo::coord! { x: 0.0, y: 61.0 });
        // One degree of longitude at 60° is half a degree of latitude.
        assert!((east.x / north.y - 0.5).abs() < 1e-9);
    }
}
