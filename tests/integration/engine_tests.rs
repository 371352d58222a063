//! Engine state machine integration tests.
//!
//! Tests verify:
//! - The visible set and level for known viewports
//! - Identical viewport events are idempotent
//! - Rapid viewport changes cancel tiles that left the view
//! - Failed tiles are retried only when they become visible again
//! - Backing image and data source replacement

use std::sync::Arc;

use tiled_map::{
    EngineConfig, FetchError, ImageSpec, Point, Size, TileIndex, TileState, TiledImageEngine,
    Viewport,
};

use super::test_utils::{
    settle, shared, square_spec, tiles, viewport, MockTileSource, RecordingObserver,
};

fn engine(source: &Arc<MockTileSource>) -> TiledImageEngine<RecordingObserver> {
    engine_with(source, EngineConfig::default())
}

fn engine_with(
    source: &Arc<MockTileSource>,
    config: EngineConfig,
) -> TiledImageEngine<RecordingObserver> {
    TiledImageEngine::new(source.clone(), RecordingObserver::default(), config).unwrap()
}

// =============================================================================
// Visible Set
// =============================================================================

#[tokio::test]
async fn test_full_resolution_centre_viewport() {
    let source = shared(MockTileSource::new(square_spec()));
    let mut engine = engine(&source);

    engine.set_viewport(viewport(512.0, 512.0, 1024.0, 1024.0, 1.0));
    assert_eq!(engine.current_level(), Some(3));

    let expected = tiles(3, 2..=5, 2..=5);
    assert_eq!(
        engine.visible_tiles().iter().copied().collect::<std::collections::HashSet<_>>(),
        expected
    );

    engine.run_until_idle().await;
    assert_eq!(engine.observer().ready_set(), expected);
    assert_eq!(engine.observer().ready.len(), 16);
    assert_eq!(source.fetch_count(), 16);
}

#[tokio::test]
async fn test_zoomed_out_viewport_uses_coarse_level() {
    let source = shared(MockTileSource::new(square_spec()));
    let mut engine = engine(&source);

    // 512x512 screen showing the whole image
    engine.set_viewport(Viewport::from_screen(Point::new(0.0, 0.0), 512.0, 512.0, 0.25));
    assert_eq!(engine.current_level(), Some(1));

    engine.run_until_idle().await;
    assert_eq!(engine.observer().ready_set(), tiles(1, 0..=1, 0..=1));
}

#[tokio::test]
async fn test_prefetch_margin_grows_visible_set() {
    let source = shared(MockTileSource::new(square_spec()));
    let mut engine = engine_with(&source, EngineConfig::default().with_prefetch_margin(1));

    engine.set_viewport(viewport(512.0, 512.0, 1024.0, 1024.0, 1.0));
    assert_eq!(engine.visible_tiles().len(), 36);

    // Margin is clamped at the image edge
    engine.set_viewport(viewport(0.0, 0.0, 256.0, 256.0, 1.0));
    assert_eq!(engine.visible_tiles().len(), 4);
}

#[tokio::test]
async fn test_viewport_outside_image_requests_nothing() {
    let source = shared(MockTileSource::new(square_spec()));
    let mut engine = engine(&source);

    engine.set_viewport(viewport(5000.0, 5000.0, 100.0, 100.0, 1.0));
    assert!(engine.visible_tiles().is_empty());
    assert_eq!(engine.run_until_idle().await, 0);
    assert_eq!(source.fetch_count(), 0);
}

// =============================================================================
// Idempotence and Cancellation
// =============================================================================

#[tokio::test]
async fn test_identical_viewports_are_idempotent() {
    let source = shared(MockTileSource::new(square_spec()).gated());
    let mut engine = engine(&source);
    let view = viewport(512.0, 512.0, 1024.0, 1024.0, 1.0);

    engine.set_viewport(view);
    settle().await;
    engine.set_viewport(view);
    engine.set_viewport(view);
    settle().await;

    assert_eq!(engine.in_flight_count(), 16);
    assert_eq!(engine.stats().fetch.cancelled, 0);

    source.open();
    engine.run_until_idle().await;
    engine.set_viewport(view);

    assert_eq!(source.fetch_count(), 16);
    assert_eq!(engine.observer().ready.len(), 16);
}

#[tokio::test]
async fn test_rapid_viewport_change_cancels_departed_tiles() {
    let source = shared(MockTileSource::new(square_spec()).gated());
    let mut engine = engine(&source);

    let v1 = viewport(0.0, 0.0, 512.0, 512.0, 1.0);
    let v2 = viewport(1536.0, 1536.0, 512.0, 512.0, 1.0);
    let v1_tiles = tiles(3, 0..=1, 0..=1);
    let v2_tiles = tiles(3, 6..=7, 6..=7);

    engine.set_viewport(v1);
    settle().await;
    engine.set_viewport(v2);

    let stats = engine.stats();
    assert_eq!(stats.fetch.cancelled, 4);
    assert_eq!(engine.in_flight_count(), 4);
    for index in &v1_tiles {
        assert_eq!(engine.tile_state(*index), TileState::NotVisible);
    }

    source.open();
    engine.run_until_idle().await;

    assert_eq!(engine.observer().ready_set(), v2_tiles);
    for index in &v1_tiles {
        assert!(!engine.cache().contains(*index));
    }
}

#[tokio::test]
async fn test_overlapping_viewports_keep_shared_fetches() {
    let source = shared(MockTileSource::new(square_spec()).gated());
    let mut engine = engine(&source);

    engine.set_viewport(viewport(0.0, 0.0, 512.0, 512.0, 1.0));
    settle().await;
    engine.set_viewport(viewport(256.0, 0.0, 512.0, 512.0, 1.0));

    // Column 0 left, column 2 arrived, column 1 kept its fetch
    assert_eq!(engine.stats().fetch.cancelled, 2);
    assert_eq!(engine.stats().fetch.started, 6);

    source.open();
    engine.run_until_idle().await;
    assert_eq!(engine.observer().ready_set(), tiles(3, 1..=2, 0..=1));
    assert_eq!(source.fetches_of(TileIndex::new(3, 1, 0)), 1);
}

#[tokio::test]
async fn test_zoom_change_replaces_level() {
    let source = shared(MockTileSource::new(square_spec()).gated());
    let mut engine = engine(&source);

    engine.set_viewport(viewport(0.0, 0.0, 1024.0, 1024.0, 1.0));
    settle().await;
    engine.set_viewport(viewport(0.0, 0.0, 2048.0, 2048.0, 0.5));
    assert_eq!(engine.current_level(), Some(2));
    assert_eq!(engine.stats().fetch.cancelled, 16);

    source.open();
    engine.run_until_idle().await;
    assert!(engine.observer().ready.iter().all(|index| index.level == 2));
    assert_eq!(engine.observer().ready.len(), 16);
}

#[tokio::test]
async fn test_shutdown_cancels_everything() {
    let source = shared(MockTileSource::new(square_spec()).gated());
    let mut engine = engine(&source);

    engine.set_viewport(viewport(512.0, 512.0, 1024.0, 1024.0, 1.0));
    settle().await;
    engine.shutdown();
    assert_eq!(engine.in_flight_count(), 0);
    assert_eq!(engine.stats().requested, 0);

    source.open();
    settle().await;
    assert_eq!(engine.process_completions(), 0);
    assert!(engine.observer().ready.is_empty());
    assert!(engine.cache().is_empty());
}

#[tokio::test]
async fn test_viewport_after_shutdown_reloads_tiles() {
    let source = shared(MockTileSource::new(square_spec()).gated());
    let mut engine = engine(&source);
    let view = viewport(0.0, 0.0, 512.0, 512.0, 1.0);

    engine.set_viewport(view);
    settle().await;
    engine.shutdown();
    assert_eq!(engine.viewport(), None);
    assert_eq!(engine.current_level(), None);

    // The same viewport again is a fresh request, not a no-op
    engine.set_viewport(view);
    assert_eq!(engine.in_flight_count(), 4);
    source.open();
    engine.run_until_idle().await;

    let expected = tiles(3, 0..=1, 0..=1);
    assert_eq!(engine.observer().ready_set(), expected);
    for index in expected {
        assert_eq!(engine.tile_state(index), TileState::Cached);
    }
}

#[tokio::test]
async fn test_overlapping_viewport_after_shutdown_reloads_shared_tiles() {
    let source = shared(MockTileSource::new(square_spec()).gated());
    let mut engine = engine(&source);

    engine.set_viewport(viewport(0.0, 0.0, 512.0, 512.0, 1.0));
    settle().await;
    engine.shutdown();

    engine.set_viewport(viewport(256.0, 0.0, 512.0, 512.0, 1.0));
    assert_eq!(engine.tile_state(TileIndex::new(3, 1, 0)), TileState::Requested);
    assert_eq!(engine.tile_state(TileIndex::new(3, 0, 0)), TileState::NotVisible);
    source.open();
    engine.run_until_idle().await;

    assert_eq!(engine.observer().ready_set(), tiles(3, 1..=2, 0..=1));
    assert_eq!(engine.tile_state(TileIndex::new(3, 1, 0)), TileState::Cached);
    assert_eq!(engine.stats().requested, 0);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failed_tile_is_not_retried_automatically() {
    let failing = TileIndex::new(3, 1, 1);
    let source = shared(MockTileSource::new(square_spec()).with_failure(failing));
    let mut engine = engine(&source);
    let view = viewport(0.0, 0.0, 512.0, 512.0, 1.0);

    engine.set_viewport(view);
    engine.run_until_idle().await;

    assert_eq!(engine.tile_state(failing), TileState::Failed);
    assert_eq!(
        engine.observer().failed,
        vec![(failing, FetchError::NotFound(failing))]
    );
    assert_eq!(engine.observer().ready.len(), 3);

    // Panning within the same tiles does not retry
    engine.set_viewport(viewport(10.0, 10.0, 480.0, 480.0, 1.0));
    engine.run_until_idle().await;
    assert_eq!(source.fetches_of(failing), 1);

    // Leaving and returning does
    engine.set_viewport(viewport(1024.0, 1024.0, 256.0, 256.0, 1.0));
    engine.run_until_idle().await;
    engine.set_viewport(view);
    engine.run_until_idle().await;
    assert_eq!(source.fetches_of(failing), 2);
    assert_eq!(engine.stats().tiles_failed, 2);
}

// =============================================================================
// Cache Budget
// =============================================================================

#[tokio::test]
async fn test_cache_entry_limit_forces_refetch() {
    let source = shared(MockTileSource::new(square_spec()));
    let config = EngineConfig::default().with_cache_capacity(1024 * 1024, 4);
    let mut engine = engine_with(&source, config);
    let view = viewport(512.0, 512.0, 1024.0, 1024.0, 1.0);

    engine.set_viewport(view);
    engine.run_until_idle().await;
    assert_eq!(engine.cache().len(), 4);
    assert_eq!(engine.stats().cache.evictions, 12);

    engine.set_viewport(viewport(0.0, 0.0, 256.0, 256.0, 1.0));
    engine.run_until_idle().await;
    engine.set_viewport(view);
    engine.run_until_idle().await;

    // Every tile was delivered twice; evicted ones were fetched again
    assert_eq!(engine.observer().ready.len(), 16 + 1 + 16);
    assert!(source.fetch_count() > 17);
    assert!(engine.cache().len() <= 4);
}

// =============================================================================
// Image Replacement
// =============================================================================

#[tokio::test]
async fn test_set_backing_image_discards_old_state() {
    let source = shared(MockTileSource::new(square_spec()).gated());
    let mut engine = engine(&source);

    engine.set_viewport(viewport(512.0, 512.0, 1024.0, 1024.0, 1.0));
    settle().await;

    let small = ImageSpec::new(Size::new(512, 512), Size::new(256, 256), 0, 1).unwrap();
    engine.set_backing_image(small);
    source.open();
    settle().await;

    assert_eq!(engine.process_completions(), 0);
    assert_eq!(engine.viewport(), None);
    assert_eq!(engine.tile_state(TileIndex::new(3, 2, 2)), TileState::Unknown);

    engine.set_viewport(viewport(0.0, 0.0, 512.0, 512.0, 1.0));
    assert_eq!(engine.current_level(), Some(1));
    engine.run_until_idle().await;
    assert_eq!(engine.observer().ready_set(), tiles(1, 0..=1, 0..=1));
}

#[tokio::test]
async fn test_set_data_source_switches_fetches() {
    let first = shared(MockTileSource::new(square_spec()));
    let mut engine = engine(&first);
    engine.set_viewport(viewport(0.0, 0.0, 256.0, 256.0, 1.0));
    engine.run_until_idle().await;

    let spec = ImageSpec::new(Size::new(1024, 768), Size::new(256, 256), 0, 2).unwrap();
    let second = shared(MockTileSource::new(spec));
    engine.set_data_source(second.clone()).unwrap();
    assert_eq!(engine.spec(), &spec);

    engine.set_viewport(viewport(0.0, 0.0, 1024.0, 768.0, 1.0));
    engine.run_until_idle().await;

    assert_eq!(first.fetch_count(), 1);
    assert_eq!(second.fetch_count(), 12);
    assert!(engine.cache().contains(TileIndex::new(2, 3, 2)));
}
