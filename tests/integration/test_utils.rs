//! Test utilities for integration tests.
//!
//! This module provides a mock tile source with fetch tracking and an
//! observer that records every engine notification.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use tiled_map::{
    AnnotationId, FetchError, ImageSpec, MapObserver, PositionError, Rect, ScreenPoint, Size,
    TileBitmap, TileDataSource, TileIndex, Viewport,
};

// =============================================================================
// Mock Tile Source
// =============================================================================

/// A mock tile source that tracks every fetch.
///
/// Tiles are generated on demand. A gated source holds every fetch until
/// [`MockTileSource::open`] is called.
pub struct MockTileSource {
    spec: ImageSpec,
    fetch_count: AtomicUsize,
    fetched: Mutex<Vec<TileIndex>>,
    failing: HashSet<TileIndex>,
    gate: watch::Sender<bool>,
}

impl MockTileSource {
    pub fn new(spec: ImageSpec) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            spec,
            fetch_count: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
            failing: HashSet::new(),
            gate,
        }
    }

    /// Hold all fetches until `open` is called.
    pub fn gated(self) -> Self {
        self.gate.send_replace(false);
        self
    }

    /// Make fetches of `index` fail.
    pub fn with_failure(mut self, index: TileIndex) -> Self {
        self.failing.insert(index);
        self
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn fetched(&self) -> Vec<TileIndex> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn fetches_of(&self, index: TileIndex) -> usize {
        self.fetched().iter().filter(|&&i| i == index).count()
    }
}

#[async_trait]
impl TileDataSource for MockTileSource {
    async fn fetch_tile(&self, index: TileIndex) -> Result<TileBitmap, FetchError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.fetched.lock().unwrap().push(index);

        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|e| FetchError::Source(e.to_string()))?;

        if self.failing.contains(&index) {
            return Err(FetchError::NotFound(index));
        }
        Ok(tile_bitmap(index))
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

/// Deterministic payload for a tile.
pub fn tile_bitmap(index: TileIndex) -> TileBitmap {
    let mut data = vec![0u8; 1024];
    data[0] = index.level as u8;
    data[1] = index.column as u8;
    data[2] = index.row as u8;
    TileBitmap::new(index, data)
}

// =============================================================================
// Recording Observer
// =============================================================================

/// Observer that records every notification in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub ready: Vec<TileIndex>,
    pub failed: Vec<(TileIndex, FetchError)>,
    pub moved: Vec<(AnnotationId, ScreenPoint)>,
    pub out_of_bounds: Vec<(AnnotationId, PositionError)>,
    pub selected: Vec<(AnnotationId, Option<Viewport>)>,
}

impl RecordingObserver {
    pub fn ready_set(&self) -> HashSet<TileIndex> {
        self.ready.iter().copied().collect()
    }

    /// Latest position reported for `id`.
    pub fn position_of(&self, id: AnnotationId) -> Option<ScreenPoint> {
        self.moved
            .iter()
            .rev()
            .find(|(moved, _)| *moved == id)
            .map(|&(_, position)| position)
    }
}

impl MapObserver for RecordingObserver {
    fn on_tile_ready(&mut self, index: TileIndex, bitmap: TileBitmap) {
        assert_eq!(bitmap.index(), index);
        self.ready.push(index);
    }

    fn on_tile_failed(&mut self, index: TileIndex, error: &FetchError) {
        self.failed.push((index, error.clone()));
    }

    fn on_annotation_moved(&mut self, id: AnnotationId, position: ScreenPoint) {
        self.moved.push((id, position));
    }

    fn on_annotation_out_of_bounds(&mut self, id: AnnotationId, error: &PositionError) {
        self.out_of_bounds.push((id, error.clone()));
    }

    fn on_annotation_selected(&mut self, id: AnnotationId, centred: Option<&Viewport>) {
        self.selected.push((id, centred.copied()));
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// 2048x2048 image, 256px tiles, levels 0..=3.
pub fn square_spec() -> ImageSpec {
    ImageSpec::new(Size::new(2048, 2048), Size::new(256, 256), 0, 3).unwrap()
}

pub fn viewport(x: f64, y: f64, width: f64, height: f64, scale: f64) -> Viewport {
    Viewport::new(Rect::new(x, y, width, height), scale)
}

/// Let spawned fetch tasks reach their await points.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// All tiles of `level` in the given column and row ranges.
pub fn tiles(
    level: u32,
    columns: std::ops::RangeInclusive<u32>,
    rows: std::ops::RangeInclusive<u32>,
) -> HashSet<TileIndex> {
    let mut set = HashSet::new();
    for row in rows {
        for column in columns.clone() {
            set.insert(TileIndex::new(level, column, row));
        }
    }
    set
}

pub fn shared(source: MockTileSource) -> Arc<MockTileSource> {
    Arc::new(source)
}
