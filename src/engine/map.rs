//! Engine state machine.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::annotation::{Annotation, AnnotationId, AnnotationPositioner};
use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::geometry::{
    centre_on_point, ImageSpec, LevelOfDetailSelector, Point, TileIndex, Viewport,
};
use crate::source::TileDataSource;
use crate::tile::{FetchEvent, FetchOutcome, OperationId, TileCache, TileFetchCoordinator};

use super::state::{EngineStats, TileState};
use super::MapObserver;

#[derive(Debug, Default)]
struct Counters {
    viewport_updates: u64,
    tiles_ready: u64,
    tiles_failed: u64,
    stale_events: u64,
}

/// Drives tile loading and annotation placement for one tiled image.
///
/// # Example
///
/// ```ignore
/// let source = Arc::new(DirectoryTileSource::new("slide_files", "jpg", spec));
/// let mut engine = TiledImageEngine::new(source, renderer, EngineConfig::default())?;
///
/// engine.set_viewport(Viewport::from_screen(Point::new(0.0, 0.0), 1024.0, 768.0, 0.25));
/// while engine.next_completion().await {}
/// ```
pub struct TiledImageEngine<O: MapObserver = ()> {
    spec: ImageSpec,
    config: EngineConfig,
    selector: LevelOfDetailSelector,
    positioner: AnnotationPositioner,
    cache: Arc<TileCache>,
    fetcher: TileFetchCoordinator,
    events: mpsc::UnboundedReceiver<FetchEvent>,
    observer: O,

    viewport: Option<Viewport>,
    level: Option<u32>,
    visible: BTreeSet<TileIndex>,
    states: HashMap<TileIndex, TileState>,
    /// Operation each `Requested` tile waits on
    pending: HashMap<TileIndex, OperationId>,

    annotations: BTreeMap<AnnotationId, Annotation>,
    next_annotation_id: u64,
    selected: Option<AnnotationId>,

    counters: Counters,
}

impl<O: MapObserver> TiledImageEngine<O> {
    /// Create an engine for the image served by `source`.
    ///
    /// Fetches are spawned on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or the source describes an
    /// invalid image.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(
        source: Arc<dyn TileDataSource>,
        observer: O,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        Self::with_runtime(source, observer, config, Handle::current())
    }

    /// Create an engine that spawns fetches on `runtime`.
    pub fn with_runtime(
        source: Arc<dyn TileDataSource>,
        observer: O,
        config: EngineConfig,
        runtime: Handle,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let spec = ImageSpec::from_source(source.as_ref())?;

        let cache = Arc::new(TileCache::with_capacity_and_entries(
            config.cache_capacity,
            config.cache_entries,
        ));
        let (events_tx, events) = mpsc::unbounded_channel();
        let fetcher =
            TileFetchCoordinator::with_runtime(source, Arc::clone(&cache), events_tx, runtime);

        info!(
            width = spec.image_size().width,
            height = spec.image_size().height,
            min_level = spec.min_level(),
            max_level = spec.max_level(),
            "Tiled image engine created"
        );

        Ok(Self {
            spec,
            config,
            selector: LevelOfDetailSelector::new(config.lod, config.prefetch_margin),
            positioner: AnnotationPositioner::new(config.annotation_bounds),
            cache,
            fetcher,
            events,
            observer,
            viewport: None,
            level: None,
            visible: BTreeSet::new(),
            states: HashMap::new(),
            pending: HashMap::new(),
            annotations: BTreeMap::new(),
            next_annotation_id: 1,
            selected: None,
            counters: Counters::default(),
        })
    }

    // =========================================================================
    // Viewport
    // =========================================================================

    /// Show `viewport`: cancel fetches for tiles that left the view and
    /// request or deliver tiles that entered it.
    ///
    /// Repeating the current viewport does nothing.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        if !viewport.is_finite() {
            warn!(?viewport, "Ignoring non-finite viewport");
            return;
        }
        if self.viewport == Some(viewport) {
            trace!("Viewport unchanged");
            return;
        }

        let (level, target) = self.selector.visible_tiles(&self.spec, &viewport);
        let removed: Vec<TileIndex> = self.visible.difference(&target).copied().collect();
        let added: Vec<TileIndex> = target.difference(&self.visible).copied().collect();

        debug!(
            level,
            scale = viewport.scale,
            visible = target.len(),
            added = added.len(),
            removed = removed.len(),
            "Viewport changed"
        );

        for index in removed {
            self.hide(index);
        }

        self.viewport = Some(viewport);
        self.level = Some(level);
        self.visible = target;
        self.counters.viewport_updates += 1;

        for index in added {
            self.show(index);
        }

        self.reposition_all();
    }

    /// Centre the current viewport on `point`, keeping its size and scale.
    ///
    /// Returns the applied viewport, or `None` if no viewport is set.
    pub fn centre_on_point(&mut self, point: Point) -> Option<Viewport> {
        let centred = centre_on_point(&self.viewport?, point);
        self.set_viewport(centred);
        Some(centred)
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    /// Level of the current viewport.
    pub fn current_level(&self) -> Option<u32> {
        self.level
    }

    pub fn visible_tiles(&self) -> &BTreeSet<TileIndex> {
        &self.visible
    }

    pub fn tile_state(&self, index: TileIndex) -> TileState {
        self.states.get(&index).copied().unwrap_or_default()
    }

    fn hide(&mut self, index: TileIndex) {
        if self.pending.remove(&index).is_some() {
            self.fetcher.cancel(index);
        }
        self.states.insert(index, TileState::NotVisible);
    }

    fn show(&mut self, index: TileIndex) {
        debug_assert!(self.spec.contains_tile(index), "visible set outside grid");

        if let Some(bitmap) = self.cache.get(index) {
            self.states.insert(index, TileState::Cached);
            self.counters.tiles_ready += 1;
            self.observer.on_tile_ready(index, bitmap);
            return;
        }

        let handle = self.fetcher.request(index);
        self.pending.insert(index, handle.operation());
        self.states.insert(index, TileState::Requested);
    }

    // =========================================================================
    // Completions
    // =========================================================================

    /// Apply every queued fetch completion without waiting.
    ///
    /// Returns the number of events taken from the queue.
    pub fn process_completions(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
            processed += 1;
        }
        processed
    }

    /// Wait for one fetch completion and apply it.
    ///
    /// Returns `false` without waiting when no fetch is in flight and the
    /// queue is empty.
    pub async fn next_completion(&mut self) -> bool {
        if self.fetcher.in_flight_count() == 0 {
            return match self.events.try_recv() {
                Ok(event) => {
                    self.apply(event);
                    true
                }
                Err(_) => false,
            };
        }

        match self.events.recv().await {
            Some(event) => {
                self.apply(event);
                true
            }
            None => false,
        }
    }

    /// Apply completions until no fetch is left in flight.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut processed = 0;
        while self.next_completion().await {
            processed += 1;
        }
        processed
    }

    fn apply(&mut self, event: FetchEvent) {
        let FetchEvent {
            index,
            operation,
            outcome,
        } = event;

        if self.pending.get(&index) != Some(&operation) {
            self.counters.stale_events += 1;
            trace!(%index, %operation, "Ignoring stale completion");
            return;
        }
        self.pending.remove(&index);

        match outcome {
            FetchOutcome::Loaded(bitmap) => {
                self.states.insert(index, TileState::Cached);
                self.counters.tiles_ready += 1;
                self.observer.on_tile_ready(index, bitmap);
            }
            FetchOutcome::Failed(error) => {
                self.states.insert(index, TileState::Failed);
                self.counters.tiles_failed += 1;
                self.observer.on_tile_failed(index, &error);
            }
            // Not emitted by the coordinator
            FetchOutcome::Cancelled => {
                self.states.insert(index, TileState::NotVisible);
            }
        }
    }

    // =========================================================================
    // Annotations
    // =========================================================================

    /// Add an annotation and place it for the current viewport.
    pub fn add_annotation(&mut self, annotation: Annotation) -> AnnotationId {
        let id = AnnotationId(self.next_annotation_id);
        self.next_annotation_id += 1;
        self.annotations.insert(id, annotation);
        self.reposition([id]);
        id
    }

    pub fn add_annotations<I>(&mut self, annotations: I) -> Vec<AnnotationId>
    where
        I: IntoIterator<Item = Annotation>,
    {
        annotations
            .into_iter()
            .map(|annotation| self.add_annotation(annotation))
            .collect()
    }

    /// Remove an annotation. Clears the selection if it was selected.
    pub fn remove_annotation(&mut self, id: AnnotationId) -> Option<Annotation> {
        let removed = self.annotations.remove(&id)?;
        if self.selected == Some(id) {
            self.selected = None;
        }
        Some(removed)
    }

    pub fn annotation(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.get(&id)
    }

    pub fn annotations(&self) -> impl Iterator<Item = (AnnotationId, &Annotation)> + '_ {
        self.annotations.iter().map(|(&id, annotation)| (id, annotation))
    }

    /// Select an annotation.
    ///
    /// Returns the viewport that centres the annotation at the current
    /// scale. The viewport is not applied; pass it to
    /// [`set_viewport`](Self::set_viewport) once any animation finishes.
    /// Returns `None` for unknown ids and when no viewport is set.
    pub fn select_annotation(&mut self, id: AnnotationId) -> Option<Viewport> {
        let point = self.annotations.get(&id)?.point();
        self.selected = Some(id);

        let centred = self
            .viewport
            .map(|viewport| centre_on_point(&viewport, point));
        self.observer.on_annotation_selected(id, centred.as_ref());
        centred
    }

    pub fn selected_annotation(&self) -> Option<AnnotationId> {
        self.selected
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    fn reposition_all(&mut self) {
        let ids: Vec<AnnotationId> = self.annotations.keys().copied().collect();
        self.reposition(ids);
    }

    fn reposition<I: IntoIterator<Item = AnnotationId>>(&mut self, ids: I) {
        let (Some(viewport), Some(level)) = (self.viewport, self.level) else {
            return;
        };

        for id in ids {
            let Some(annotation) = self.annotations.get(&id) else {
                continue;
            };
            match self
                .positioner
                .screen_point(&self.spec, level, annotation.point(), &viewport)
            {
                Ok(position) => self.observer.on_annotation_moved(id, position),
                Err(error) => {
                    trace!(%id, %error, "Annotation not placed");
                    self.observer.on_annotation_out_of_bounds(id, &error);
                }
            }
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Switch to a different image served by the same data source.
    ///
    /// Cancels every fetch and forgets all tiles, annotations and the
    /// viewport. Apply a new viewport afterwards.
    pub fn set_backing_image(&mut self, spec: ImageSpec) {
        self.reset();
        info!(
            width = spec.image_size().width,
            height = spec.image_size().height,
            max_level = spec.max_level(),
            "Backing image replaced"
        );
        self.spec = spec;
    }

    /// Switch to a different data source and the image it serves.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the engine unchanged, if the source
    /// describes an invalid image.
    pub fn set_data_source(&mut self, source: Arc<dyn TileDataSource>) -> Result<(), ConfigError> {
        let spec = ImageSpec::from_source(source.as_ref())?;
        self.fetcher.set_source(source);
        self.set_backing_image(spec);
        Ok(())
    }

    /// Cancel every in-flight fetch and forget the viewport. Never blocks.
    ///
    /// The cache and annotations are kept, so the next `set_viewport` shows
    /// cached tiles at once and requests the rest again.
    pub fn shutdown(&mut self) {
        let cancelled = self.fetcher.cancel_all();
        self.pending.clear();
        for index in std::mem::take(&mut self.visible) {
            self.states.insert(index, TileState::NotVisible);
        }
        for state in self.states.values_mut() {
            if *state == TileState::Requested {
                *state = TileState::NotVisible;
            }
        }
        self.viewport = None;
        self.level = None;
        debug!(cancelled, "Engine shut down");
    }

    fn reset(&mut self) {
        self.fetcher.cancel_all();
        self.cache.clear();
        // Anything still queued belongs to the old image
        while self.events.try_recv().is_ok() {
            self.counters.stale_events += 1;
        }
        self.pending.clear();
        self.states.clear();
        self.visible.clear();
        self.viewport = None;
        self.level = None;
        self.annotations.clear();
        self.selected = None;
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn spec(&self) -> &ImageSpec {
        &self.spec
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn in_flight_count(&self) -> usize {
        self.fetcher.in_flight_count()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            level: self.level,
            visible: self.visible.len(),
            requested: self.pending.len(),
            viewport_updates: self.counters.viewport_updates,
            tiles_ready: self.counters.tiles_ready,
            tiles_failed: self.counters.tiles_failed,
            stale_events: self.counters.stale_events,
            annotations: self.annotations.len(),
            fetch: self.fetcher.stats(),
            cache: self.cache.stats(),
        }
    }
}

impl<O: MapObserver> Drop for TiledImageEngine<O> {
    fn drop(&mut self) {
        self.fetcher.cancel_all();
    }
}

// =============================================================================
// Tests
// =============================================================================
