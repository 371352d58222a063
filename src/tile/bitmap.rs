use bytes::Bytes;

use crate::geometry::TileIndex;

/// A decoded tile image.
///
/// The payload is opaque to the engine. Cloning is cheap and shares the
/// underlying buffer, so one bitmap can be held by the cache, the renderer
/// and any number of fetch handles at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileBitmap {
    index: TileIndex,
    data: Bytes,
}

impl TileBitmap {
    pub fn new(index: TileIndex, data: impl Into<Bytes>) -> Self {
        Self {
            index,
            data: data.into(),
        }
    }

    pub fn index(&self) -> TileIndex {
        self.index
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload size in bytes, used for cache accounting.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
