//! Per-tile state and engine statistics.

use serde::Serialize;

use crate::tile::{CacheStats, FetchStats};

/// Lifecycle of one tile index as seen by the engine.
///
/// ```text
/// Unknown ──► NotVisible ◄──► Requested ──► Cached
///                 ▲                    └──► Failed
///                 └──────────────────────────┘ (scrolled away)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TileState {
    /// Never seen by the engine
    #[default]
    Unknown,
    /// Left the visible set; any fetch for it was cancelled
    NotVisible,
    /// Visible, fetch in flight
    Requested,
    /// Visible and delivered to the observer
    Cached,
    /// Visible, last fetch failed; retried when it becomes visible again
    Failed,
}

impl TileState {
    pub fn is_visible(&self) -> bool {
        matches!(self, Self::Requested | Self::Cached | Self::Failed)
    }
}

/// Snapshot of engine activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EngineStats {
    /// Level of the current viewport, if any
    pub level: Option<u32>,
    /// Tiles in the current visible set
    pub visible: usize,
    /// Visible tiles waiting on a fetch
    pub requested: usize,
    /// Viewport updates that changed the view
    pub viewport_updates: u64,
    /// Tiles delivered through `on_tile_ready`
    pub tiles_ready: u64,
    /// Tiles reported through `on_tile_failed`
    pub tiles_failed: u64,
    /// Completions ignored because the engine no longer waited for them
    pub stale_events: u64,
    /// Annotations in the table
    pub annotations: usize,
    pub fetch: FetchStats,
    pub cache: CacheStats,
}
