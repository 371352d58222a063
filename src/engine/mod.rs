//! The tiled image engine.
//!
//! [`TiledImageEngine`] is the control-thread state machine that ties the
//! geometry, level selection, cache and fetch coordinator together. It owns
//! the per-tile states and the annotation table, and reports everything a
//! renderer needs through a [`MapObserver`].
//!
//! # Event Flow
//!
//! ```text
//!  set_viewport(V)
//!        │
//!        ▼
//!  LevelOfDetailSelector ──► visible set V
//!        │
//!        ├── previous − V: cancel fetch, NotVisible
//!        └── V − previous: cache hit ──► on_tile_ready
//!                          miss      ──► request ──► Requested
//!
//!  process_completions() / next_completion()
//!        │
//!        └── FetchEvent for a pending operation
//!                Loaded ──► Cached, on_tile_ready
//!                Failed ──► Failed, on_tile_failed
//! ```
//!
//! All engine methods take `&mut self` and are meant to be driven from a
//! single control thread or task. Fetches run on the tokio runtime.

mod map;
mod state;

pub use map::TiledImageEngine;
pub use state::{EngineStats, TileState};

use crate::annotation::{AnnotationId, ScreenPoint};
use crate::error::{FetchError, PositionError};
use crate::geometry::{TileIndex, Viewport};
use crate::tile::TileBitmap;

/// Receiver of engine notifications.
///
/// Every method defaults to a no-op, so observers implement only what they
/// draw. Notifications are delivered on the thread driving the engine.
pub trait MapObserver {
    /// A visible tile's bitmap is available.
    fn on_tile_ready(&mut self, _index: TileIndex, _bitmap: TileBitmap) {}

    /// A visible tile could not be fetched.
    fn on_tile_failed(&mut self, _index: TileIndex, _error: &FetchError) {}

    /// An annotation's marker belongs at `position`, relative to the
    /// viewport's top-left corner.
    fn on_annotation_moved(&mut self, _id: AnnotationId, _position: ScreenPoint) {}

    /// An annotation cannot be placed for the current viewport.
    fn on_annotation_out_of_bounds(&mut self, _id: AnnotationId, _error: &PositionError) {}

    /// An annotation was selected. `centred` is the viewport that centres
    /// it, if a viewport is set.
    fn on_annotation_selected(&mut self, _id: AnnotationId, _centred: Option<&Viewport>) {}
}

impl MapObserver for () {}
