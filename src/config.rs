//! Configuration management for tiled-map.
//!
//! This module provides:
//! - [`EngineConfig`], the library-side settings of a [`TiledImageEngine`]
//! - [`Cli`], the command-line interface of the `tiled-map` binary, parsed
//!   with clap from arguments and `TILED_MAP_` environment variables
//!
//! # Environment Variables
//!
//! - `TILED_MAP_IMAGE_WIDTH` / `TILED_MAP_IMAGE_HEIGHT` - Full image size
//! - `TILED_MAP_TILE_SIZE` - Tile edge length (default: 256)
//! - `TILED_MAP_MIN_LEVEL` / `TILED_MAP_MAX_LEVEL` - Pyramid level range
//! - `TILED_MAP_MARGIN` - Prefetch margin in tiles (default: 0)
//! - `TILED_MAP_TILES_DIR` - Directory tile source
//! - `TILED_MAP_URL_TEMPLATE` - URL tile source
//! - `TILED_MAP_CACHE_SIZE` - Tile cache capacity in bytes (default: 64MB)
//! - `TILED_MAP_CACHE_ENTRIES` - Maximum cached tiles (default: 1024)
//!
//! [`TiledImageEngine`]: crate::engine::TiledImageEngine

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::annotation::{AnnotationBounds, BoundsPolicy};
use crate::error::{ConfigError, GeometryError};
use crate::geometry::{ImageSpec, LodPolicy, Point, Size, Viewport, DEFAULT_LOD_EPSILON};
use crate::tile::{DEFAULT_TILE_CACHE_CAPACITY, DEFAULT_TILE_CACHE_ENTRIES};

// =============================================================================
// Default Values
// =============================================================================

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Default prefetch margin in tiles.
pub const DEFAULT_PREFETCH_MARGIN: u32 = 0;

/// Default screen size used by the CLI.
pub const DEFAULT_SCREEN_WIDTH: f64 = 1024.0;
pub const DEFAULT_SCREEN_HEIGHT: f64 = 768.0;

/// Default time the CLI waits for tiles, in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Default tile file extension for directory sources.
pub const DEFAULT_TILE_EXTENSION: &str = "jpg";

/// Deepest level of a pyramid that halves down to a single pixel.
///
/// `ceil(log2(max(width, height)))`, the Deep Zoom convention.
pub fn full_pyramid_max_level(width: u32, height: u32) -> u32 {
    let max_dim = width.max(height);
    if max_dim <= 1 {
        return 0;
    }
    u32::BITS - (max_dim - 1).leading_zeros()
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Settings of a tiled image engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Tiles fetched beyond each viewport edge
    pub prefetch_margin: u32,

    /// Level selection tuning
    pub lod: LodPolicy,

    /// Tile cache capacity in bytes
    pub cache_capacity: usize,

    /// Maximum number of cached tiles
    pub cache_entries: usize,

    /// Placement of annotations near the image edge
    pub annotation_bounds: AnnotationBounds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prefetch_margin: DEFAULT_PREFETCH_MARGIN,
            lod: LodPolicy::default(),
            cache_capacity: DEFAULT_TILE_CACHE_CAPACITY,
            cache_entries: DEFAULT_TILE_CACHE_ENTRIES,
            annotation_bounds: AnnotationBounds::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefetch_margin(mut self, margin: u32) -> Self {
        self.prefetch_margin = margin;
        self
    }

    pub fn with_lod_policy(mut self, lod: LodPolicy) -> Self {
        self.lod = lod;
        self
    }

    pub fn with_cache_capacity(mut self, bytes: usize, entries: usize) -> Self {
        self.cache_capacity = bytes;
        self.cache_entries = entries;
        self
    }

    pub fn with_annotation_bounds(mut self, bounds: AnnotationBounds) -> Self {
        self.annotation_bounds = bounds;
        self
    }

    /// Check every setting is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.lod.slack.is_finite() && self.lod.slack >= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "lod.slack",
                message: format!("must be a finite value >= 1.0, got {}", self.lod.slack),
            });
        }
        if !(0.0..1.0).contains(&self.lod.epsilon) {
            return Err(ConfigError::InvalidValue {
                field: "lod.epsilon",
                message: format!("must be in [0, 1), got {}", self.lod.epsilon),
            });
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache_capacity",
                message: "must be greater than 0".to_string(),
            });
        }
        if self.cache_entries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache_entries",
                message: "must be greater than 0".to_string(),
            });
        }
        let tolerance = self.annotation_bounds.tolerance;
        if !(tolerance.is_finite() && tolerance >= 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "annotation_bounds.tolerance",
                message: format!("must be a finite value >= 0, got {tolerance}"),
            });
        }
        Ok(())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// tiled-map - Plan and fetch tiles of an image pyramid for a viewport.
#[derive(Parser, Debug, Clone)]
#[command(name = "tiled-map")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the level and visible tiles for a viewport.
    Plan(PlanConfig),

    /// Fetch the visible tiles for a viewport from a tile source.
    Fetch(FetchConfig),
}

/// Geometry of the image pyramid.
#[derive(Args, Debug, Clone)]
pub struct ImageArgs {
    /// Full-resolution image width in pixels.
    #[arg(long, env = "TILED_MAP_IMAGE_WIDTH")]
    pub image_width: u32,

    /// Full-resolution image height in pixels.
    #[arg(long, env = "TILED_MAP_IMAGE_HEIGHT")]
    pub image_height: u32,

    /// Tile edge length in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "TILED_MAP_TILE_SIZE")]
    pub tile_size: u32,

    /// Lowest pyramid level.
    #[arg(long, default_value_t = 0, env = "TILED_MAP_MIN_LEVEL")]
    pub min_level: u32,

    /// Full-resolution pyramid level.
    ///
    /// Defaults to the level at which a pyramid halving down to one pixel
    /// reaches full resolution.
    #[arg(long, env = "TILED_MAP_MAX_LEVEL")]
    pub max_level: Option<u32>,
}

impl ImageArgs {
    pub fn max_level(&self) -> u32 {
        self.max_level
            .unwrap_or_else(|| full_pyramid_max_level(self.image_width, self.image_height))
    }

    pub fn image_spec(&self) -> Result<ImageSpec, GeometryError> {
        ImageSpec::new(
            Size::new(self.image_width, self.image_height),
            Size::new(self.tile_size, self.tile_size),
            self.min_level,
            self.max_level(),
        )
    }
}

/// The viewport to plan or fetch for.
#[derive(Args, Debug, Clone)]
pub struct ViewportArgs {
    /// Image-space x of the viewport's top-left corner.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub x: f64,

    /// Image-space y of the viewport's top-left corner.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub y: f64,

    /// Screen width in pixels.
    #[arg(long, default_value_t = DEFAULT_SCREEN_WIDTH)]
    pub screen_width: f64,

    /// Screen height in pixels.
    #[arg(long, default_value_t = DEFAULT_SCREEN_HEIGHT)]
    pub screen_height: f64,

    /// Screen pixels per image pixel.
    #[arg(long, default_value_t = 1.0)]
    pub scale: f64,

    /// Extra tiles fetched beyond each viewport edge.
    #[arg(long, default_value_t = DEFAULT_PREFETCH_MARGIN, env = "TILED_MAP_MARGIN")]
    pub margin: u32,

    /// How far a level may be magnified before switching to the next one.
    #[arg(long, default_value_t = 1.0)]
    pub lod_slack: f64,
}

impl ViewportArgs {
    pub fn viewport(&self) -> Viewport {
        Viewport::from_screen(
            Point::new(self.x, self.y),
            self.screen_width,
            self.screen_height,
            self.scale,
        )
    }

    pub fn lod_policy(&self) -> LodPolicy {
        LodPolicy {
            slack: self.lod_slack,
            epsilon: DEFAULT_LOD_EPSILON,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "scale",
                message: format!("must be positive, got {}", self.scale),
            });
        }
        if !(self.screen_width > 0.0 && self.screen_height > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "screen size",
                message: format!(
                    "must be positive, got {}x{}",
                    self.screen_width, self.screen_height
                ),
            });
        }
        Ok(())
    }
}

/// Arguments of `tiled-map plan`.
#[derive(Args, Debug, Clone)]
pub struct PlanConfig {
    #[command(flatten)]
    pub image: ImageArgs,

    #[command(flatten)]
    pub viewport: ViewportArgs,

    /// Print JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl PlanConfig {
    pub fn validate(&self) -> Result<ImageSpec, ConfigError> {
        self.viewport.validate()?;
        let spec = self.image.image_spec()?;
        self.engine_config().validate()?;
        Ok(spec)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_prefetch_margin(self.viewport.margin)
            .with_lod_policy(self.viewport.lod_policy())
    }
}

/// Arguments of `tiled-map fetch`.
#[derive(Args, Debug, Clone)]
pub struct FetchConfig {
    #[command(flatten)]
    pub image: ImageArgs,

    #[command(flatten)]
    pub viewport: ViewportArgs,

    /// Directory holding tiles as `{level}/{col}_{row}.{ext}`.
    #[arg(long, env = "TILED_MAP_TILES_DIR", conflicts_with = "url_template")]
    pub tiles_dir: Option<PathBuf>,

    /// Tile file extension for `--tiles-dir`.
    #[arg(long, default_value = DEFAULT_TILE_EXTENSION)]
    pub extension: String,

    /// URL template with `{level}`, `{x}` and `{y}` placeholders.
    #[arg(long, env = "TILED_MAP_URL_TEMPLATE")]
    pub url_template: Option<String>,

    /// Tile cache capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_CAPACITY, env = "TILED_MAP_CACHE_SIZE")]
    pub cache_size: usize,

    /// Maximum number of cached tiles.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_ENTRIES, env = "TILED_MAP_CACHE_ENTRIES")]
    pub cache_entries: usize,

    /// Seconds to wait for all tiles before giving up.
    #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Annotations to place, as `x,y` image points.
    #[arg(long = "annotation", value_parser = parse_point)]
    pub annotations: Vec<Point>,

    /// Snap annotations just outside the image onto its edge.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub clamp_annotations: bool,

    /// Print JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl FetchConfig {
    pub fn validate(&self) -> Result<ImageSpec, ConfigError> {
        if self.tiles_dir.is_none() && self.url_template.is_none() {
            return Err(ConfigError::Missing(
                "tile source: set --tiles-dir or --url-template",
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeout_secs",
                message: "must be greater than 0".to_string(),
            });
        }
        self.viewport.validate()?;
        let spec = self.image.image_spec()?;
        self.engine_config().validate()?;
        Ok(spec)
    }

    pub fn engine_config(&self) -> EngineConfig {
        let policy = if self.clamp_annotations {
            BoundsPolicy::Clamp
        } else {
            BoundsPolicy::Unclamped
        };
        EngineConfig::default()
            .with_prefetch_margin(self.viewport.margin)
            .with_lod_policy(self.viewport.lod_policy())
            .with_cache_capacity(self.cache_size, self.cache_entries)
            .with_annotation_bounds(AnnotationBounds {
                policy,
                ..AnnotationBounds::default()
            })
    }
}

fn parse_point(value: &str) -> Result<Point, String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("expected `x,y`, got `{value}`"))?;
    let x: f64 = x.trim().parse().map_err(|e| format!("invalid x: {e}"))?;
    let y: f64 = y.trim().parse().map_err(|e| format!("invalid y: {e}"))?;
    Ok(Point::new(x, y))
}

// =============================================================================
// Tests
// =============================================================================
