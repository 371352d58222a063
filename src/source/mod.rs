//! Tile data sources.
//!
//! A data source is the engine's only way to obtain tile bitmaps. It also
//! describes the static geometry of the image it serves.
//!
//! # Implementations
//!
//! - [`DirectoryTileSource`]: tiles stored as `{root}/{level}/{col}_{row}.{ext}`
//! - [`HttpTileSource`]: tiles fetched from a URL template
//!
//! # Example
//!
//! ```ignore
//! use tiled_map::source::{TileDataSource, DirectoryTileSource};
//! use tiled_map::geometry::{ImageSpec, Size, TileIndex};
//!
//! let spec = ImageSpec::new(Size::new(4096, 4096), Size::new(256, 256), 0, 4)?;
//! let source = DirectoryTileSource::new("tiles/", "jpg", spec);
//! let bitmap = source.fetch_tile(TileIndex::new(4, 0, 0)).await?;
//! ```

mod directory;
mod http;

use async_trait::async_trait;
use url::Url;

use crate::error::FetchError;
use crate::geometry::{Size, TileIndex};
use crate::tile::TileBitmap;

pub use directory::DirectoryTileSource;
pub use http::{HttpTileSource, UrlTemplate, DEFAULT_HTTP_TIMEOUT};

/// Capability interface for supplying tiles.
///
/// Implementations must be thread-safe: `fetch_tile` runs on worker tasks
/// while the static configuration is read from the control thread.
#[async_trait]
pub trait TileDataSource: Send + Sync {
    /// Fetch the bitmap for one tile.
    ///
    /// The future may be dropped before completion when the tile is
    /// cancelled.
    async fn fetch_tile(&self, index: TileIndex) -> Result<TileBitmap, FetchError>;

    /// Tile size in pixels.
    fn tile_size(&self) -> Size;

    /// Full-resolution image size in pixels.
    fn image_size(&self) -> Size;

    /// Lowest pyramid level.
    fn min_level(&self) -> u32;

    /// Highest (full resolution) pyramid level.
    fn max_level(&self) -> u32;

    /// Location of a tile, for sources that fetch by URL.
    fn tile_url(&self, _index: TileIndex) -> Option<Url> {
        None
    }
}
