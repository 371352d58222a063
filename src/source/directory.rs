//! Tiles stored as files in a directory tree.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::trace;

use crate::error::FetchError;
use crate::geometry::{ImageSpec, Size, TileIndex};
use crate::tile::TileBitmap;

use super::TileDataSource;

/// Reads tiles from `{root}/{level}/{col}_{row}.{ext}`.
///
/// This is the Deep Zoom `_files` layout. Tile bytes are returned as stored;
/// decoding is left to the observer.
#[derive(Debug, Clone)]
pub struct DirectoryTileSource {
    root: PathBuf,
    extension: String,
    spec: ImageSpec,
}

impl DirectoryTileSource {
    /// Create a source for the pyramid described by `spec`.
    ///
    /// # Arguments
    ///
    /// * `root` - Directory holding one subdirectory per level
    /// * `extension` - Tile file extension, without the dot
    /// * `spec` - Geometry of the stored pyramid
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>, spec: ImageSpec) -> Self {
        let extension = extension.into();
        Self {
            root: root.into(),
            extension: extension.trim_start_matches('.').to_string(),
            spec,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn spec(&self) -> &ImageSpec {
        &self.spec
    }

    /// Path of the file holding `index`.
    pub fn tile_path(&self, index: TileIndex) -> PathBuf {
        self.root.join(index.level.to_string()).join(format!(
            "{}_{}.{}",
            index.column, index.row, self.extension
        ))
    }
}

#[async_trait]
impl TileDataSource for DirectoryTileSource {
    async fn fetch_tile(&self, index: TileIndex) -> Result<TileBitmap, FetchError> {
        if !self.spec.contains_tile(index) {
            return Err(FetchError::NotFound(index));
        }

        let path = self.tile_path(index);
        trace!(%index, path = %path.display(), "Reading tile file");
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(TileBitmap::new(index, data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(FetchError::NotFound(index)),
            Err(err) => Err(err.into()),
        }
    }

    fn tile_size(&self) -> Size {
        self.spec.tile_size()
    }

    fn image_size(&self) -> Size {
        self.spec.image_size()
    }

    fn min_level(&self) -> u32 {
        self.spec.min_level()
    }

    fn max_level(&self) -> u32 {
        self.spec.max_level()
    }
}
