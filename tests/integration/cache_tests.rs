//! Fetch coalescing and cache integration tests.
//!
//! Tests verify:
//! - Concurrent requests for one tile share a single fetch and outcome
//! - The cache respects its byte budget under concurrent writers
//! - Least-recently-used tiles are evicted first

use std::sync::Arc;

use tokio::sync::mpsc;

use tiled_map::{FetchOutcome, TileCache, TileFetchCoordinator, TileIndex};

use super::test_utils::{settle, shared, square_spec, tile_bitmap, MockTileSource};

// =============================================================================
// Coalescing
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_fetch() {
    let source = shared(MockTileSource::new(square_spec()).gated());
    let cache = Arc::new(TileCache::new());
    let (tx, mut events) = mpsc::unbounded_channel();
    let coordinator = Arc::new(TileFetchCoordinator::new(
        source.clone(),
        Arc::clone(&cache),
        tx,
    ));
    let index = TileIndex::new(3, 4, 2);

    let mut requests = Vec::new();
    for _ in 0..32 {
        let coordinator = Arc::clone(&coordinator);
        requests.push(tokio::spawn(async move { coordinator.request(index) }));
    }
    let mut handles = Vec::new();
    for request in requests {
        handles.push(request.await.unwrap());
    }

    let operation = handles[0].operation();
    assert!(handles.iter().all(|h| h.operation() == operation));

    source.open();
    for handle in &mut handles {
        assert_eq!(handle.outcome().await, FetchOutcome::Loaded(tile_bitmap(index)));
    }

    assert_eq!(source.fetch_count(), 1);
    let stats = coordinator.stats();
    assert_eq!(stats.requests, 32);
    assert_eq!(stats.coalesced, 31);
    assert!((stats.coalescing_ratio() - 31.0 / 32.0).abs() < 1e-9);

    let event = events.recv().await.unwrap();
    assert_eq!(event.operation, operation);
    assert!(events.try_recv().is_err());
    assert!(cache.contains(index));
}

#[tokio::test]
async fn test_distinct_tiles_fetch_independently() {
    let source = shared(MockTileSource::new(square_spec()));
    let cache = Arc::new(TileCache::new());
    let (tx, mut events) = mpsc::unbounded_channel();
    let coordinator = TileFetchCoordinator::new(source.clone(), Arc::clone(&cache), tx);

    for column in 0..8 {
        coordinator.request(TileIndex::new(3, column, 0));
    }
    assert_eq!(coordinator.in_flight_count(), 8);

    let mut received = 0;
    while received < 8 {
        let event = events.recv().await.unwrap();
        assert!(matches!(event.outcome, FetchOutcome::Loaded(_)));
        received += 1;
    }
    settle().await;

    assert_eq!(source.fetch_count(), 8);
    assert_eq!(cache.len(), 8);
    assert_eq!(coordinator.in_flight_count(), 0);
}

// =============================================================================
// Cache Bounds
// =============================================================================

#[test]
fn test_cache_budget_holds_under_concurrent_writers() {
    // Each tile is 1024 bytes; room for 10
    let cache = Arc::new(TileCache::with_capacity(10 * 1024));

    let threads: Vec<_> = (0..4u32)
        .map(|thread| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for column in 0..50 {
                    let index = TileIndex::new(3, column, thread);
                    cache.put(index, tile_bitmap(index));
                    assert!(cache.size() <= cache.capacity());
                    let _ = cache.get(TileIndex::new(3, column / 2, thread));
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert!(cache.size() <= 10 * 1024);
    assert_eq!(cache.len(), 10);
    let stats = cache.stats();
    assert_eq!(stats.insertions, 200);
    assert_eq!(stats.evictions, 190);
}

#[test]
fn test_least_recently_used_evicted_first() {
    let cache = TileCache::with_capacity_and_entries(usize::MAX, 3);
    let a = TileIndex::new(0, 0, 0);
    let b = TileIndex::new(1, 0, 0);
    let c = TileIndex::new(1, 1, 0);
    let d = TileIndex::new(1, 0, 1);

    cache.put(a, tile_bitmap(a));
    cache.put(b, tile_bitmap(b));
    cache.put(c, tile_bitmap(c));

    // Touch `a` so `b` becomes the oldest
    assert!(cache.get(a).is_some());
    cache.put(d, tile_bitmap(d));

    assert!(cache.contains(a));
    assert!(!cache.contains(b));
    assert!(cache.contains(c));
    assert!(cache.contains(d));
    assert!(cache.last_access(a) > cache.last_access(c));
}
