//! Pyramid geometry.
//!
//! This module describes the tiled image pyramid and the transforms between
//! image space, level space and tile space.
//!
//! # Pyramid Layout
//!
//! ```text
//!   level max     ┌──┬──┬──┬──┐   full resolution
//!                 ├──┼──┼──┼──┤
//!                 ├──┼──┼──┼──┤
//!                 └──┴──┴──┴──┘
//!   level max-1   ┌──┬──┐         half resolution
//!                 └──┴──┘
//!   level min     ┌──┐            lowest resolution
//!                 └──┘
//! ```
//!
//! # Components
//!
//! - [`ImageSpec`]: image size, tile size and level range
//! - [`TileIndex`] / [`TileRange`]: tile identifiers
//! - [`Viewport`]: visible image rectangle plus scale
//! - [`grid`]: pure coordinate transforms
//! - [`LevelOfDetailSelector`]: level choice and visible tile sets

pub mod grid;
mod lod;
mod spec;

pub use grid::{
    centre_on_point, grid_dimensions, image_point_to_level_pixel, level_dimensions,
    level_pixel_to_image_point, level_pixel_to_tile_index, level_scale, tile_image_rect,
    visible_tile_rect, zoom_relative_point, GridPolicy,
};
pub use lod::{LevelOfDetailSelector, LodPolicy, DEFAULT_LOD_EPSILON, DEFAULT_LOD_SLACK};
pub use spec::{ImageSpec, Point, Rect, Size, TileIndex, TileRange, Viewport, MAX_LEVEL_SPAN};
