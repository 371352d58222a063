//! # tiled-map
//!
//! A tiled image pyramid engine for zoomable maps and large images.
//!
//! A very large image is stored as a pyramid of zoom levels, each cut into
//! fixed-size tiles. For any viewport this library works out which tiles
//! at which level are needed, fetches them asynchronously from a pluggable
//! data source, caches them under a memory budget, cancels fetches that the
//! user scrolled away from, and places point annotations on screen.
//!
//! ## Features
//!
//! - **Level selection**: picks the coarsest level sharp enough for the zoom
//! - **De-duplicated fetches**: at most one fetch per tile, shared by every caller
//! - **Cancellation**: tiles leaving the view are cancelled, late results discarded
//! - **Bounded caching**: LRU tile cache limited by bytes and entry count
//! - **Annotations**: image-space points mapped to screen positions
//!
//! ## Architecture
//!
//! - [`geometry`] - Image spec, grid math and level-of-detail selection
//! - [`tile`] - Tile bitmaps, cache and fetch coordinator
//! - [`source`] - Data source trait with directory and HTTP implementations
//! - [`engine`] - The viewport-driven state machine and observer trait
//! - [`annotation`] - Annotations and their screen placement
//! - [`config`] - Engine settings and CLI types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tiled_map::{
//!     DirectoryTileSource, EngineConfig, ImageSpec, MapObserver, Point, Size, TileBitmap,
//!     TileIndex, TiledImageEngine, Viewport,
//! };
//!
//! struct Renderer;
//!
//! impl MapObserver for Renderer {
//!     fn on_tile_ready(&mut self, index: TileIndex, bitmap: TileBitmap) {
//!         println!("draw {index} ({} bytes)", bitmap.len());
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let spec = ImageSpec::new(Size::new(8192, 8192), Size::new(256, 256), 0, 5)?;
//!     let source = Arc::new(DirectoryTileSource::new("slide_files", "jpg", spec));
//!     let mut engine = TiledImageEngine::new(source, Renderer, EngineConfig::default())?;
//!
//!     engine.set_viewport(Viewport::from_screen(Point::new(0.0, 0.0), 1024.0, 768.0, 0.125));
//!     engine.run_until_idle().await;
//!     Ok(())
//! }
//! ```

pub mod annotation;
pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod source;
pub mod tile;

// Re-export commonly used types
pub use annotation::{
    Annotation, AnnotationBounds, AnnotationId, AnnotationPositioner, BoundsPolicy, ScreenPoint,
};
pub use config::{Cli, Command, EngineConfig, FetchConfig, PlanConfig};
pub use engine::{EngineStats, MapObserver, TileState, TiledImageEngine};
pub use error::{ConfigError, FetchError, GeometryError, PositionError};
pub use geometry::{
    GridPolicy, ImageSpec, LevelOfDetailSelector, LodPolicy, Point, Rect, Size, TileIndex,
    TileRange, Viewport,
};
pub use source::{DirectoryTileSource, HttpTileSource, TileDataSource, UrlTemplate};
pub use tile::{
    CacheStats, FetchEvent, FetchHandle, FetchOutcome, FetchStats, OperationId, TileBitmap,
    TileCache, TileFetchCoordinator,
};
