//! Tile acquisition layer.
//!
//! This module provides tile bitmaps, their cache, and the coordinator that
//! fetches them asynchronously.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            TiledImageEngine             │
//! └───────────┬─────────────────▲───────────┘
//!   request / │                 │ FetchEvent
//!   cancel    ▼                 │ (completion queue)
//! ┌─────────────────────────────────────────┐
//! │          TileFetchCoordinator           │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  in-flight   │  │   TileCache     │  │
//! │  │  operations  │  │  (LRU, bytes +  │  │
//! │  │  (1 per tile)│  │   entry bound)  │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │             TileDataSource              │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileBitmap`]: immutable, cheaply shared tile payload
//! - [`TileCache`]: thread-safe LRU cache with size- and count-based eviction
//! - [`TileFetchCoordinator`]: de-duplicated, cancellable fetches
//! - [`FetchHandle`]: view of one in-flight fetch
//! - [`FetchEvent`]: completion notice for the control thread

mod bitmap;
mod cache;
mod fetch;

pub use bitmap::TileBitmap;
pub use cache::{
    CacheEntry, CacheStats, TileCache, DEFAULT_TILE_CACHE_CAPACITY, DEFAULT_TILE_CACHE_ENTRIES,
};
pub use fetch::{
    FetchEvent, FetchHandle, FetchOutcome, FetchStats, OperationId, TileFetchCoordinator,
};
