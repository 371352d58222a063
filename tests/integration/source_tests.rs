//! Directory tile source integration tests.
//!
//! Tests verify:
//! - The engine loads a Deep Zoom style directory pyramid end to end
//! - Missing tile files surface as failed tiles, not errors

use std::path::Path;
use std::sync::Arc;

use tiled_map::{
    DirectoryTileSource, EngineConfig, FetchError, ImageSpec, Size, TileIndex, TileState,
    TiledImageEngine,
};

use super::test_utils::{tiles, viewport, RecordingObserver};

/// 1024x512 image, 256px tiles, levels 0..=10 (full resolution at 10).
fn spec() -> ImageSpec {
    ImageSpec::new(Size::new(1024, 512), Size::new(256, 256), 0, 10).unwrap()
}

fn write_tile(root: &Path, index: TileIndex) {
    let dir = root.join(index.level.to_string());
    std::fs::create_dir_all(&dir).unwrap();
    let name = format!("{}_{}.png", index.column, index.row);
    std::fs::write(dir.join(name), format!("{index}")).unwrap();
}

#[tokio::test]
async fn test_engine_loads_directory_pyramid() {
    let dir = tempfile::tempdir().unwrap();
    let full = tiles(10, 0..=3, 0..=1);
    for index in &full {
        write_tile(dir.path(), *index);
    }
    write_tile(dir.path(), TileIndex::new(9, 0, 0));
    write_tile(dir.path(), TileIndex::new(9, 1, 0));

    let source = Arc::new(DirectoryTileSource::new(dir.path(), "png", spec()));
    let mut engine =
        TiledImageEngine::new(source, RecordingObserver::default(), EngineConfig::default())
            .unwrap();

    engine.set_viewport(viewport(0.0, 0.0, 1024.0, 512.0, 1.0));
    engine.run_until_idle().await;
    assert_eq!(engine.observer().ready_set(), full);

    let bitmap = engine.cache().get(TileIndex::new(10, 3, 1)).unwrap();
    assert_eq!(bitmap.data().as_ref(), b"10/3/1");

    // Half resolution: the whole image fits in level 9's two tiles
    engine.set_viewport(viewport(0.0, 0.0, 1024.0, 512.0, 0.5));
    engine.run_until_idle().await;
    assert_eq!(engine.current_level(), Some(9));
    assert!(engine.observer().failed.is_empty());
    assert_eq!(engine.observer().ready.len(), 10);
}

#[tokio::test]
async fn test_missing_tile_file_fails_tile() {
    let dir = tempfile::tempdir().unwrap();
    write_tile(dir.path(), TileIndex::new(10, 0, 0));

    let source = Arc::new(DirectoryTileSource::new(dir.path(), "png", spec()));
    let mut engine =
        TiledImageEngine::new(source, RecordingObserver::default(), EngineConfig::default())
            .unwrap();

    engine.set_viewport(viewport(0.0, 0.0, 512.0, 256.0, 1.0));
    engine.run_until_idle().await;

    let missing = TileIndex::new(10, 1, 0);
    assert_eq!(engine.observer().ready, vec![TileIndex::new(10, 0, 0)]);
    assert_eq!(
        engine.observer().failed,
        vec![(missing, FetchError::NotFound(missing))]
    );
    assert_eq!(engine.tile_state(missing), TileState::Failed);
}
