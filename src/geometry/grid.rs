//! Tile grid math.
//!
//! Pure functions mapping between three coordinate spaces:
//!
//! - **image space**: pixels of the full-resolution image
//! - **level space**: pixels of one pyramid level (image space scaled by
//!   [`level_scale`])
//! - **tile space**: `(column, row)` of the tile grid at a level
//!
//! Level `max_level` is full resolution and each lower level halves it, the
//! same convention Deep Zoom uses.

use serde::{Deserialize, Serialize};

use super::spec::{ImageSpec, Point, Rect, TileIndex, TileRange, Viewport};

/// What to do with level pixels that fall outside the tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GridPolicy {
    /// Snap to the nearest edge tile.
    Clamp,
    /// Report no tile.
    #[default]
    Reject,
}

/// Number of halvings between `level` and full resolution.
fn level_shift(spec: &ImageSpec, level: u32) -> u32 {
    debug_assert!(spec.contains_level(level), "level {level} outside spec");
    spec.max_level().saturating_sub(level)
}

/// Resolution of `level` relative to full resolution (1.0 at `max_level`).
pub fn level_scale(spec: &ImageSpec, level: u32) -> f64 {
    0.5f64.powi(level_shift(spec, level) as i32)
}

/// Pixel dimensions of the image at `level`.
///
/// Computed as `ceil(full / 2^(max - level))`, never smaller than 1x1.
pub fn level_dimensions(spec: &ImageSpec, level: u32) -> (u32, u32) {
    let divisor = 1u64 << level_shift(spec, level);
    let size = spec.image_size();
    let width = (size.width as u64).div_ceil(divisor).max(1);
    let height = (size.height as u64).div_ceil(divisor).max(1);
    (width as u32, height as u32)
}

/// Number of tile columns and rows covering the image at `level`.
///
/// The last column and row may be partial.
pub fn grid_dimensions(spec: &ImageSpec, level: u32) -> (u32, u32) {
    let (width, height) = level_dimensions(spec, level);
    let tile = spec.tile_size();
    (width.div_ceil(tile.width), height.div_ceil(tile.height))
}

/// Scale an image-space point into the pixel space of `level`.
pub fn image_point_to_level_pixel(spec: &ImageSpec, level: u32, point: Point) -> Point {
    let scale = level_scale(spec, level);
    Point::new(point.x * scale, point.y * scale)
}

/// Inverse of [`image_point_to_level_pixel`].
pub fn level_pixel_to_image_point(spec: &ImageSpec, level: u32, pixel: Point) -> Point {
    let scale = level_scale(spec, level);
    Point::new(pixel.x / scale, pixel.y / scale)
}

/// Tile `(column, row)` containing a level pixel.
///
/// With [`GridPolicy::Reject`] pixels outside the grid yield `None`; with
/// [`GridPolicy::Clamp`] they snap to the nearest edge tile. Non-finite
/// input yields `None` under either policy.
pub fn level_pixel_to_tile_index(
    spec: &ImageSpec,
    level: u32,
    px: f64,
    py: f64,
    policy: GridPolicy,
) -> Option<(u32, u32)> {
    if !px.is_finite() || !py.is_finite() {
        return None;
    }
    let (columns, rows) = grid_dimensions(spec, level);
    let tile = spec.tile_size();
    let column = (px / tile.width as f64).floor();
    let row = (py / tile.height as f64).floor();

    match policy {
        GridPolicy::Reject => {
            let in_grid = column >= 0.0
                && row >= 0.0
                && column < columns as f64
                && row < rows as f64;
            in_grid.then_some((column as u32, row as u32))
        }
        GridPolicy::Clamp => Some((
            column.clamp(0.0, (columns - 1) as f64) as u32,
            row.clamp(0.0, (rows - 1) as f64) as u32,
        )),
    }
}

/// Tiles covering an image-space rectangle at `level`, grown by `margin`
/// tiles on every side.
///
/// The rectangle is clipped to the image first, and its right and bottom
/// edges are exclusive: a rect ending exactly on a tile boundary does not
/// pull in the next tile. The result never leaves the grid. Returns `None`
/// when nothing of the image is inside the rectangle.
pub fn visible_tile_rect(
    spec: &ImageSpec,
    level: u32,
    rect: &Rect,
    margin: u32,
) -> Option<TileRange> {
    let clipped = rect.intersection(&spec.bounds())?;
    let scale = level_scale(spec, level);
    let tile = spec.tile_size();
    let (columns, rows) = grid_dimensions(spec, level);

    let tw = tile.width as f64;
    let th = tile.height as f64;
    let col_min = (clipped.min_x() * scale / tw).floor() as i64;
    let row_min = (clipped.min_y() * scale / th).floor() as i64;
    let col_max = ((clipped.max_x() * scale / tw).ceil() as i64 - 1).max(col_min);
    let row_max = ((clipped.max_y() * scale / th).ceil() as i64 - 1).max(row_min);

    let margin = margin as i64;
    let clamp_col = |c: i64| c.clamp(0, columns as i64 - 1) as u32;
    let clamp_row = |r: i64| r.clamp(0, rows as i64 - 1) as u32;

    Some(TileRange {
        level,
        col_min: clamp_col(col_min - margin),
        col_max: clamp_col(col_max + margin),
        row_min: clamp_row(row_min - margin),
        row_max: clamp_row(row_max + margin),
    })
}

/// Image-space rectangle covered by a tile, clipped to the image.
///
/// Renderers use this to place a tile bitmap on screen.
pub fn tile_image_rect(spec: &ImageSpec, index: TileIndex) -> Rect {
    let tile = spec.tile_size();
    let (width, height) = level_dimensions(spec, index.level);
    let x0 = (index.column as u64 * tile.width as u64).min(width as u64) as f64;
    let y0 = (index.row as u64 * tile.height as u64).min(height as u64) as f64;
    let x1 = ((index.column as u64 + 1) * tile.width as u64).min(width as u64) as f64;
    let y1 = ((index.row as u64 + 1) * tile.height as u64).min(height as u64) as f64;

    let min = level_pixel_to_image_point(spec, index.level, Point::new(x0, y0));
    let max = level_pixel_to_image_point(spec, index.level, Point::new(x1, y1));
    Rect::from_corners(min, max).intersection(&spec.bounds()).unwrap_or_default()
}

/// Position of an image point on the zoomed content surface.
pub fn zoom_relative_point(point: Point, scale: f64) -> Point {
    Point::new(point.x * scale, point.y * scale)
}

/// A viewport of the same size and scale, centred on `point`.
pub fn centre_on_point(viewport: &Viewport, point: Point) -> Viewport {
    let rect = Rect::new(
        point.x - viewport.rect.width / 2.0,
        point.y - viewport.rect.height / 2.0,
        viewport.rect.width,
        viewport.rect.height,
    );
    Viewport::new(rect, viewport.scale)
}
