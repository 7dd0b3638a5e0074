//! Error types shared by every pipeline stage.
//!
//! Registration failures are deliberately kept out of the fatal path: aligners
//! return [`RegistrationFailure`], and the registrar records the pair as a
//! missing measurement instead of propagating an [`Error`].

use std::path::PathBuf;

/// Reasons an aligner could not produce a translation for a raster pair.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistrationFailure {
    /// Too few valid cells shared by both rasters.
    #[error("insufficient overlap: {valid} valid cells, {required} required")]
    InsufficientOverlap { valid: usize, required: usize },
    /// The fixed raster has (almost) no intensity variation in the overlap.
    #[error("degenerate intensity content (variance {variance:.3e})")]
    DegenerateContent { variance: f64 },
    /// The optimum sits on the search boundary or the cost never became finite.
    #[error("optimizer did not converge: {0}")]
    NoConvergence(String),
    /// The raster for one side of the pair could not be read.
    #[error("input unavailable: {0}")]
    Input(String),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("unsupported raster {path}: {reason}")]
    UnsupportedRaster { path: PathBuf, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("mission {mission}: missing {what}")]
    MissingInput { mission: String, what: String },

    #[error("registration failed: {0}")]
    Registration(#[from] RegistrationFailure),

    /// The least-squares system cannot be solved uniquely for one axis.
    #[error("underconstrained shift system on {axis} axis: rank {rank} < {unknowns} unknowns (is anchor_weight > 0?)")]
    UnderconstrainedSystem {
        axis: char,
        rank: usize,
        unknowns: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("unknown class: {0}")]
    UnknownClass(String),
}

impl Error {
    /// Wrap an `std::io::Error` with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
