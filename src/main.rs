//! tiled-map - Plan and fetch the tiles of an image pyramid for a viewport.
//!
//! This binary exercises the engine from the command line.

use clap::Parser;
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiled_map::{
    config::{Cli, Command, FetchConfig, PlanConfig},
    geometry::{grid_dimensions, level_dimensions, level_scale},
    source::{DirectoryTileSource, HttpTileSource, TileDataSource, UrlTemplate},
    Annotation, AnnotationId, EngineStats, FetchError, ImageSpec, LevelOfDetailSelector,
    MapObserver, PositionError, ScreenPoint, TileBitmap, TileIndex, TiledImageEngine,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Plan(config) => run_plan(config),
        Command::Fetch(config) => run_fetch(config).await,
    }
}

/// Initialize the tracing subscriber.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tiled_map=debug"
    } else {
        "tiled_map=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// =============================================================================
// Plan Command
// =============================================================================

#[derive(Debug, Serialize)]
struct PlanReport {
    level: u32,
    level_scale: f64,
    level_width: u32,
    level_height: u32,
    columns: u32,
    rows: u32,
    tiles: Vec<TileIndex>,
}

fn run_plan(config: PlanConfig) -> ExitCode {
    let spec = match config.validate() {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let engine_config = config.engine_config();
    let selector = LevelOfDetailSelector::new(engine_config.lod, engine_config.prefetch_margin);
    let viewport = config.viewport.viewport();
    let (level, tiles) = selector.visible_tiles(&spec, &viewport);
    let (level_width, level_height) = level_dimensions(&spec, level);
    let (columns, rows) = grid_dimensions(&spec, level);

    let report = PlanReport {
        level,
        level_scale: level_scale(&spec, level),
        level_width,
        level_height,
        columns,
        rows,
        tiles: tiles.into_iter().collect(),
    };

    if config.json {
        return if print_json(&report) {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    println!("Level:      {} (scale {})", report.level, report.level_scale);
    println!("Level size: {}x{}", report.level_width, report.level_height);
    println!("Grid:       {}x{} tiles", report.columns, report.rows);
    println!("Visible:    {} tile(s)", report.tiles.len());
    for index in &report.tiles {
        println!("  {}", index);
    }
    ExitCode::SUCCESS
}

// =============================================================================
// Fetch Command
// =============================================================================

/// Observer that records what the engine reports.
#[derive(Debug, Default, Serialize)]
struct FetchReport {
    ready: Vec<TileIndex>,
    bytes: usize,
    failed: Vec<(TileIndex, String)>,
    annotations: Vec<(AnnotationId, Option<ScreenPoint>)>,
}

impl MapObserver for FetchReport {
    fn on_tile_ready(&mut self, index: TileIndex, bitmap: TileBitmap) {
        debug!(%index, bytes = bitmap.len(), "Tile ready");
        self.bytes += bitmap.len();
        self.ready.push(index);
    }

    fn on_tile_failed(&mut self, index: TileIndex, error: &FetchError) {
        self.failed.push((index, error.to_string()));
    }

    fn on_annotation_moved(&mut self, id: AnnotationId, position: ScreenPoint) {
        self.annotations.push((id, Some(position)));
    }

    fn on_annotation_out_of_bounds(&mut self, id: AnnotationId, error: &PositionError) {
        warn!(%id, %error, "Annotation outside the image");
        self.annotations.push((id, None));
    }
}

#[derive(Debug, Serialize)]
struct FetchSummary<'a> {
    report: &'a FetchReport,
    stats: EngineStats,
    timed_out: bool,
}

fn build_source(config: &FetchConfig, spec: ImageSpec) -> Result<Arc<dyn TileDataSource>, String> {
    if let Some(ref dir) = config.tiles_dir {
        info!("Reading tiles from {}", dir.display());
        return Ok(Arc::new(DirectoryTileSource::new(
            dir.clone(),
            config.extension.clone(),
            spec,
        )));
    }

    let template = config
        .url_template
        .as_deref()
        .ok_or_else(|| "no tile source configured".to_string())?;
    let template = UrlTemplate::parse(template).map_err(|e| e.to_string())?;
    info!("Fetching tiles from {}", template.as_str());
    let source = HttpTileSource::new(template, spec).map_err(|e| e.to_string())?;
    Ok(Arc::new(source))
}

async fn run_fetch(config: FetchConfig) -> ExitCode {
    let spec = match config.validate() {
        Ok(spec) => spec,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let source = match build_source(&config, spec) {
        Ok(source) => source,
        Err(e) => {
            error!("Tile source error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut engine =
        match TiledImageEngine::new(source, FetchReport::default(), config.engine_config()) {
            Ok(engine) => engine,
            Err(e) => {
                error!("Engine error: {}", e);
                return ExitCode::FAILURE;
            }
        };

    engine.set_viewport(config.viewport.viewport());
    engine.add_annotations(config.annotations.iter().copied().map(Annotation::new));

    let timeout = Duration::from_secs(config.timeout_secs);
    let timed_out = tokio::time::timeout(timeout, engine.run_until_idle())
        .await
        .is_err();
    if timed_out {
        warn!(
            pending = engine.in_flight_count(),
            "Timed out waiting for tiles"
        );
        engine.shutdown();
    }

    let stats = engine.stats();
    let report = engine.observer();
    let exit = if report.failed.is_empty() && !timed_out {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    };

    if config.json {
        let summary = FetchSummary {
            report,
            stats,
            timed_out,
        };
        if !print_json(&summary) {
            return ExitCode::FAILURE;
        }
        return exit;
    }

    println!("Level:   {}", stats.level.unwrap_or_default());
    println!(
        "Ready:   {} tile(s), {} bytes",
        report.ready.len(),
        report.bytes
    );
    println!("Failed:  {} tile(s)", report.failed.len());
    for (index, error) in &report.failed {
        println!("  {}: {}", index, error);
    }
    for (id, position) in &report.annotations {
        match position {
            Some(p) => println!("{}: ({:.1}, {:.1})", id, p.x, p.y),
            None => println!("{}: out of bounds", id),
        }
    }
    println!(
        "Fetches: {} started, {} coalesced, {} cancelled",
        stats.fetch.started, stats.fetch.coalesced, stats.fetch.cancelled
    );
    if timed_out {
        println!("Timed out after {}s", config.timeout_secs);
    }
    exit
}

/// Print `value` as pretty JSON. Returns `false` if it cannot be serialized.
fn print_json<T: Serialize>(value: &T) -> bool {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            true
        }
        Err(e) => {
            eprintln!("Error: failed to serialize output: {}", e);
            false
        }
    }
}
