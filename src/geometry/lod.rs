//! Level-of-detail selection.
//!
//! Picks the pyramid level to display for a viewport scale and the set of
//! tiles at that level covering the viewport.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::grid::{level_scale, visible_tile_rect};
use super::spec::{ImageSpec, TileIndex, TileRange, Viewport};

/// Default slack: never show a level magnified beyond its native scale.
pub const DEFAULT_LOD_SLACK: f64 = 1.0;

/// Default relative tolerance when comparing level scales.
pub const DEFAULT_LOD_EPSILON: f64 = 1e-6;

/// Tuning knobs for level selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LodPolicy {
    /// How far a level may be magnified before the next one is used.
    ///
    /// `1.0` picks the first level whose native scale reaches the viewport
    /// scale; `2.0` lets a level be shown at up to twice its native scale.
    pub slack: f64,

    /// Relative tolerance; a level whose scale falls short of the target by
    /// less than this is still accepted, so near-ties resolve to the lower
    /// (cheaper) level.
    pub epsilon: f64,
}

impl Default for LodPolicy {
    fn default() -> Self {
        Self {
            slack: DEFAULT_LOD_SLACK,
            epsilon: DEFAULT_LOD_EPSILON,
        }
    }
}

/// Chooses zoom levels and visible tiles for viewports.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LevelOfDetailSelector {
    policy: LodPolicy,
    margin: u32,
}

impl LevelOfDetailSelector {
    /// Create a selector.
    ///
    /// # Arguments
    ///
    /// * `policy` - Slack and tie tolerance for level selection
    /// * `margin` - Extra tiles to include around the viewport for prefetch
    pub fn new(policy: LodPolicy, margin: u32) -> Self {
        Self { policy, margin }
    }

    pub fn policy(&self) -> LodPolicy {
        self.policy
    }

    pub fn margin(&self) -> u32 {
        self.margin
    }

    /// Select the level to display at `scale` screen pixels per image pixel.
    ///
    /// Returns the lowest level whose native scale, allowing for slack,
    /// reaches `scale`, clamped to the image's level range. The result never
    /// decreases as `scale` grows. Non-finite or non-positive scales select
    /// the minimum level.
    pub fn select_level(&self, spec: &ImageSpec, scale: f64) -> u32 {
        if !(scale.is_finite() && scale > 0.0) {
            return spec.min_level();
        }
        let target = scale / self.policy.slack;
        let threshold = target * (1.0 - self.policy.epsilon);

        spec.levels()
            .find(|&level| level_scale(spec, level) >= threshold)
            .unwrap_or(spec.max_level())
    }

    /// Selected level and the tile block covering the viewport.
    ///
    /// The range is `None` if the viewport does not overlap the image.
    pub fn visible_range(&self, spec: &ImageSpec, viewport: &Viewport) -> (u32, Option<TileRange>) {
        let level = self.select_level(spec, viewport.scale);
        let range = visible_tile_rect(spec, level, &viewport.rect, self.margin);
        (level, range)
    }

    /// Selected level and the set of visible tile indices.
    pub fn visible_tiles(&self, spec: &ImageSpec, viewport: &Viewport) -> (u32, BTreeSet<TileIndex>) {
        let (level, range) = self.visible_range(spec, viewport);
        let tiles = range
            .map(|range| range.iter().collect())
            .unwrap_or_default();
        (level, tiles)
    }
}
