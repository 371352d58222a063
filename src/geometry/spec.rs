//! Image, tile and viewport value types.
//!
//! Everything in this module is plain data: cheap to copy, immutable once
//! built, and safe to share with worker tasks.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::GeometryError;
use crate::source::TileDataSource;

use super::grid::grid_dimensions;

/// Largest supported distance between the minimum and maximum level.
///
/// Level scales are powers of two, so the span is bounded by what an
/// `f64` and a `u64` divisor can represent exactly.
pub const MAX_LEVEL_SPAN: u32 = 62;

// =============================================================================
// Points, Sizes, Rectangles
// =============================================================================

/// A point in image space (or in level/screen space, depending on context).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A size in whole pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// An axis-aligned rectangle with its origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a rectangle from its top-left and bottom-right corners.
    pub fn from_corners(min: Point, max: Point) -> Self {
        Self::new(min.x, min.y, max.x - min.x, max.y - min.y)
    }

    pub fn min_x(&self) -> f64 {
        self.x
    }

    pub fn min_y(&self) -> f64 {
        self.y
    }

    pub fn max_x(&self) -> f64 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// True for zero-area, negative or non-finite rectangles.
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
            || !self.x.is_finite()
            || !self.y.is_finite()
            || !self.width.is_finite()
            || !self.height.is_finite()
    }

    /// Overlap of two rectangles, `None` when they do not overlap.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if self.is_empty() || other.is_empty() {
            return None;
        }
        let min_x = self.min_x().max(other.min_x());
        let min_y = self.min_y().max(other.min_y());
        let max_x = self.max_x().min(other.max_x());
        let max_y = self.max_y().min(other.max_y());

        let rect = Rect::from_corners(Point::new(min_x, min_y), Point::new(max_x, max_y));
        (!rect.is_empty()).then_some(rect)
    }

    /// True if the point lies inside the rectangle (edges included).
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.min_x()
            && point.x <= self.max_x()
            && point.y >= self.min_y()
            && point.y <= self.max_y()
    }
}

// =============================================================================
// Image Spec
// =============================================================================

/// Static description of a tiled image pyramid.
///
/// Level `max_level` is full resolution; every level below it halves the
/// resolution of the one above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSpec {
    image_size: Size,
    tile_size: Size,
    min_level: u32,
    max_level: u32,
}

impl ImageSpec {
    /// Create a validated image spec.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InvalidImageSpec`] if the image or tile size
    /// has a zero dimension, if `min_level > max_level`, or if the level
    /// span exceeds [`MAX_LEVEL_SPAN`].
    pub fn new(
        image_size: Size,
        tile_size: Size,
        min_level: u32,
        max_level: u32,
    ) -> Result<Self, GeometryError> {
        if image_size.width == 0 || image_size.height == 0 {
            return Err(GeometryError::InvalidImageSpec {
                reason: format!(
                    "image size must be positive, got {}x{}",
                    image_size.width, image_size.height
                ),
            });
        }
        if tile_size.width == 0 || tile_size.height == 0 {
            return Err(GeometryError::InvalidImageSpec {
                reason: format!(
                    "tile size must be positive, got {}x{}",
                    tile_size.width, tile_size.height
                ),
            });
        }
        if min_level > max_level {
            return Err(GeometryError::InvalidImageSpec {
                reason: format!("min level {min_level} is above max level {max_level}"),
            });
        }
        if max_level - min_level > MAX_LEVEL_SPAN {
            return Err(GeometryError::InvalidImageSpec {
                reason: format!(
                    "level span {} exceeds the supported maximum of {MAX_LEVEL_SPAN}",
                    max_level - min_level
                ),
            });
        }

        Ok(Self {
            image_size,
            tile_size,
            min_level,
            max_level,
        })
    }

    /// Read the static configuration of a data source.
    pub fn from_source<S: TileDataSource + ?Sized>(source: &S) -> Result<Self, GeometryError> {
        Self::new(
            source.image_size(),
            source.tile_size(),
            source.min_level(),
            source.max_level(),
        )
    }

    pub fn image_size(&self) -> Size {
        self.image_size
    }

    pub fn tile_size(&self) -> Size {
        self.tile_size
    }

    pub fn min_level(&self) -> u32 {
        self.min_level
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    pub fn levels(&self) -> RangeInclusive<u32> {
        self.min_level..=self.max_level
    }

    /// Full image bounds in image space.
    pub fn bounds(&self) -> Rect {
        Rect::new(
            0.0,
            0.0,
            self.image_size.width as f64,
            self.image_size.height as f64,
        )
    }

    pub fn contains_level(&self, level: u32) -> bool {
        self.levels().contains(&level)
    }

    pub fn check_level(&self, level: u32) -> Result<(), GeometryError> {
        if self.contains_level(level) {
            Ok(())
        } else {
            Err(GeometryError::InvalidLevel {
                level,
                min: self.min_level,
                max: self.max_level,
            })
        }
    }

    /// True if `index` names a tile inside the grid of its level.
    pub fn contains_tile(&self, index: TileIndex) -> bool {
        self.check_tile(index).is_ok()
    }

    pub fn check_tile(&self, index: TileIndex) -> Result<(), GeometryError> {
        self.check_level(index.level)?;
        let (columns, rows) = grid_dimensions(self, index.level);
        if index.column < columns && index.row < rows {
            Ok(())
        } else {
            Err(GeometryError::InvalidTileIndex {
                index,
                columns,
                rows,
            })
        }
    }
}

// =============================================================================
// Tile Index
// =============================================================================

/// Identifies one tile of the pyramid.
///
/// Ordering is level, then column, then row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileIndex {
    pub level: u32,
    pub column: u32,
    pub row: u32,
}

impl TileIndex {
    pub const fn new(level: u32, column: u32, row: u32) -> Self {
        Self { level, column, row }
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.column, self.row)
    }
}

/// Inclusive block of tiles at one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRange {
    pub level: u32,
    pub col_min: u32,
    pub col_max: u32,
    pub row_min: u32,
    pub row_max: u32,
}

impl TileRange {
    pub fn columns(&self) -> u32 {
        self.col_max - self.col_min + 1
    }

    pub fn rows(&self) -> u32 {
        self.row_max - self.row_min + 1
    }

    /// Number of tiles in the range; never zero.
    pub fn tile_count(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }

    pub fn contains(&self, index: TileIndex) -> bool {
        index.level == self.level
            && (self.col_min..=self.col_max).contains(&index.column)
            && (self.row_min..=self.row_max).contains(&index.row)
    }

    /// Iterate the tiles in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = TileIndex> + '_ {
        (self.row_min..=self.row_max).flat_map(move |row| {
            (self.col_min..=self.col_max).map(move |column| TileIndex::new(self.level, column, row))
        })
    }
}

// =============================================================================
// Viewport
// =============================================================================

/// The visible part of the image.
///
/// `rect` is in image space; `scale` is screen pixels per image pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub rect: Rect,
    pub scale: f64,
}

impl Viewport {
    pub const fn new(rect: Rect, scale: f64) -> Self {
        Self { rect, scale }
    }

    /// Viewport of a screen area of `screen_width` x `screen_height` pixels
    /// whose top-left corner shows image point `origin`.
    pub fn from_screen(origin: Point, screen_width: f64, screen_height: f64, scale: f64) -> Self {
        Self {
            rect: Rect::new(origin.x, origin.y, screen_width / scale, screen_height / scale),
            scale,
        }
    }

    pub fn origin(&self) -> Point {
        Point::new(self.rect.x, self.rect.y)
    }

    /// True if every coordinate and the scale are finite, and the scale is
    /// positive.
    pub fn is_finite(&self) -> bool {
        self.scale.is_finite()
            && self.scale > 0.0
            && self.rect.x.is_finite()
            && self.rect.y.is_finite()
            && self.rect.width.is_finite()
            && self.rect.height.is_finite()
    }
}
