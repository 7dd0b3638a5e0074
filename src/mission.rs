//! Drone missions and the metadata catalog they are enumerated from.

use std::path::Path;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use geo::{BooleanOps, BoundingRect, CoordsIter, MultiPolygon};
use log::{info, warn};

use crate::config::{CatalogCrs, RegionBounds, SeasonFilter};
use crate::error::{Error, Result};
use crate::geom;
use crate::projection::{Equirectangular, Projection};
use crate::raster::Extent;
use crate::vector;

/// One drone data-collection event.
#[derive(Debug, Clone)]
pub struct Mission {
    /// Stable key, leading zeros stripped so "000451" and 451 are the same mission.
    pub id: String,
    pub year: i32,
    pub datetime: Option<NaiveDateTime>,
    /// Footprint as stored in the catalog (lon/lat for a geographic catalog).
    pub footprint: MultiPolygon<f64>,
    /// The same footprint in a metric plane; all areas are measured on this one.
    pub planar_footprint: MultiPolygon<f64>,
}

impl Mission {
    /// Mission whose footprint is already planar and metric.
    pub fn new(id: impl Into<String>, year: i32, footprint: MultiPolygon<f64>) -> Self {
        Self {
            id: id.into(),
            year,
            datetime: None,
            planar_footprint: footprint.clone(),
            footprint,
        }
    }

    pub fn with_datetime(mut self, datetime: Option<NaiveDateTime>) -> Self {
        self.datetime = datetime;
        self
    }

    /// Month and day as an `MMDD` integer, e.g. 0704 -> 704.
    pub fn month_day(&self) -> Option<u32> {
        self.datetime.map(|d| d.month() * 100 + d.day())
    }
}

/// Canonical form of a mission id.
pub fn normalize_id(id: &str) -> String {
    let trimmed = id.trim().trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Local metric plane centred on the bounding box of every footprint.
///
/// Fails when a coordinate is outside the lon/lat range, which means the
/// catalog is projected and `catalog_crs` is wrong.
fn catalog_plane(missions: &[Mission]) -> Result<Option<Equirectangular>> {
    let out_of_range = missions
        .iter()
        .flat_map(|m| m.footprint.coords_iter())
        .any(|c| !(c.x.abs() <= 180.0 && c.y.abs() <= 90.0));
    if out_of_range {
        return Err(Error::InvalidConfig(
            "catalog footprints are not lon/lat degrees; set catalog_crs to \"projected\"".into(),
        ));
    }
    let bbox = missions
        .iter()
        .filter_map(|m| m.footprint.bounding_rect())
        .reduce(|a, b| {
            geo::Rect::new(
                geo::coord! { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
                geo::coord! { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
            )
        });
    Ok(bbox.map(|r| {
        let c = r.center();
        Equirectangular::new(c.x, c.y)
    }))
}

/// All missions known to the pipeline, in catalog order.
#[derive(Debug, Clone, Default)]
pub struct MissionCatalog {
    pub missions: Vec<Mission>,
}

impl MissionCatalog {
    pub fn new(missions: Vec<Mission>) -> Self {
        Self { missions }
    }

    /// Read the catalog GeoJSON.
    ///
    /// Each feature needs `mission_id` and either `year` or a parseable
    /// `datetime`; features without polygonal geometry are skipped with a warning.
    /// Geographic footprints are projected onto an equirectangular plane centred
    /// on the catalog to obtain `planar_footprint`.
    pub fn from_geojson(path: &Path, crs: CatalogCrs) -> Result<Self> {
        let mut missions: Vec<Mission> = Vec::new();
        for feature in vector::read_features(path)? {
            let id = vector::prop_string(&feature, "mission_id")
                .map(|s| normalize_id(&s))
                .ok_or_else(|| vector::missing(path, "mission_id"))?;
            let datetime = vector::prop_string(&feature, "datetime").and_then(|s| parse_datetime(&s));
            let year = match vector::prop_i64(&feature, "year") {
                Some(y) => y as i32,
                None => match datetime {
                    Some(d) => d.year(),
                    None => return Err(vector::missing(path, "year")),
                },
            };
            let footprint = match vector::feature_polygons(&feature)? {
                Some(mp) if !mp.0.is_empty() => mp,
                _ => {
                    warn!("mission {id}: catalog entry has no footprint polygon, skipping");
                    continue;
                }
            };
            missions.push(Mission::new(id, year, footprint).with_datetime(datetime));
        }
        if crs == CatalogCrs::Geographic {
            let Some(projection) = catalog_plane(&missions)? else {
                return Ok(Self { missions });
            };
            for m in &mut missions {
                m.planar_footprint = projection.forward_geometry(&m.footprint);
            }
        }
        info!("catalog {}: {} missions", path.display(), missions.len());
        Ok(Self { missions })
    }

    pub fn get(&self, id: &str) -> Option<&Mission> {
        let id = normalize_id(id);
        self.missions.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.missions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.missions.is_empty()
    }

    /// Keep only missions flown inside the season window.
    ///
    /// Missions without a date are kept; the filter cannot judge them.
    pub fn filter_season(&self, season: &SeasonFilter) -> MissionCatalog {
        let kept: Vec<Mission> = self
            .missions
            .iter()
            .filter(|m| m.month_day().map_or(true, |md| season.accepts(md)))
            .cloned()
            .collect();
        info!(
            "{} missions outside the leaf-on season were dropped",
            self.missions.len() - kept.len()
        );
        MissionCatalog::new(kept)
    }

    /// Name of the first region whose bounds intersect the mission footprint.
    pub fn region_of<'a>(mission: &Mission, regions: &'a [RegionBounds]) -> Option<&'a str> {
        regions
            .iter()
            .find(|r| {
                let bounds = geom::to_multi(Extent::new(r.xmin, r.ymin, r.xmax, r.ymax).to_polygon());
                geom::area(&bounds.intersection(&mission.footprint)) > 0.0
            })
            .map(|r| r.name.as_str())
    }
}
