use thiserror::Error;

use crate::geometry::TileIndex;

/// Errors in image or tile geometry.
///
/// These are contract violations: a correctly driven engine never produces
/// them, so callers inside the crate treat them as assertions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// Image spec has a zero dimension or an inverted level range
    #[error("Invalid image spec: {reason}")]
    InvalidImageSpec { reason: String },

    /// Level outside the image's [min, max] level range
    #[error("Invalid level {level}: valid levels are {min}..={max}")]
    InvalidLevel { level: u32, min: u32, max: u32 },

    /// Tile index outside the grid of its level
    #[error("Invalid tile index {index}: grid at level {} is {columns}x{rows}", index.level)]
    InvalidTileIndex {
        index: TileIndex,
        columns: u32,
        rows: u32,
    },
}

/// Errors reported by a tile data source.
///
/// Fetch errors are recoverable: the engine marks the tile as failed and
/// reports it to the observer, it never stops because of one.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// The source has no tile for this index
    #[error("Tile not found: {0}")]
    NotFound(TileIndex),

    /// HTTP request failed or returned a non-success status
    #[error("HTTP error for {url}: {message}")]
    Http { url: String, message: String },

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Tile payload could not be interpreted
    #[error("Decode error: {0}")]
    Decode(String),

    /// Any other source-specific failure
    #[error("Source error: {0}")]
    Source(String),
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Io(err.to_string())
    }
}

/// Errors from placing an annotation on screen.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PositionError {
    /// Annotation lies outside the image by more than the allowed tolerance
    #[error("Point ({x}, {y}) is outside the image bounds")]
    OutOfImageBounds { x: f64, y: f64 },
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A numeric setting is outside its accepted range
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },

    /// A required setting is missing
    #[error("Missing setting: {0}")]
    Missing(&'static str),

    /// Image geometry from the configuration is invalid
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}
