//! # reservechange: multi-year land-cover change from repeat drone surveys
//!
//! Drone missions over the same reserves, flown in different years, each come
//! with a canopy height model (CHM) and a per-mission land-cover map. This crate
//! brings them into agreement and measures change between years:
//!
//! - **Registration**: `RasterAligner`, `PairwiseRegistrar` (pairwise CHM
//!   translations between overlapping missions of different years)
//! - **Global shift solve**: `global_shift::solve` (one least-squares translation per mission)
//! - **Shifting**: `MapShifter` (vector maps and rasters)
//! - **Map post-processing**: `faces_to_layer`, `cleanup::post_process`
//! - **Consolidation**: `ClassConsolidator` (non-overlapping voting merge per
//!   region and epoch), `merge::merge_epochs`
//! - **Change analysis**: `region::clip_to_shared`, `TransitionMatrix`
//!
//! All geometry is planar and metric; layers in geographic coordinates go
//! through a [`projection::Projection`] before any shift is applied.

pub mod aggregation;
pub mod classes;
pub mod cleanup;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod geom;
pub mod geotiff;
pub mod global_shift;
pub mod layer;
pub mod merge;
pub mod mission;
pub mod projection;
pub mod raster;
pub mod region;
pub mod registration;
pub mod shift;
pub mod transition;
pub mod vector;

pub use aggregation::{faces_to_layer, FaceAggregator, FaceValues, FaceValuesFolder};
pub use classes::{ClassId, ClassLabel, ClassSet};
pub use config::PipelineConfig;
pub use consolidate::ClassConsolidator;
pub use error::{Error, RegistrationFailure, Result};
pub use layer::{ClassLayer, ClassifiedPolygon};
pub use mission::{Mission, MissionCatalog};
pub use raster::{Extent, Raster};
pub use registration::{IntensityAligner, PairwiseRegistrar, PairwiseShift, RasterAligner, RasterSource};
pub use shift::{MapShifter, Shift, ShiftTable};
pub use transition::TransitionMatrix;
