//! Annotations and their placement on screen.
//!
//! An annotation is a point of interest pinned to an image-space coordinate.
//! The engine stores annotations in a table keyed by [`AnnotationId`]; the
//! marker drawn for an annotation refers to it only through that id.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::PositionError;
use crate::geometry::{image_point_to_level_pixel, level_scale, ImageSpec, Point, Viewport};

/// Default distance, in image pixels, an annotation may sit outside the image.
pub const DEFAULT_ANNOTATION_TOLERANCE: f64 = 1.0;

/// Position of an annotation relative to the viewport's top-left corner, in
/// screen pixels.
pub type ScreenPoint = Point;

/// Key of an annotation in the engine's annotation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnnotationId(pub(crate) u64);

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "annotation#{}", self.0)
    }
}

/// A point of interest with an optional caller-owned payload.
///
/// The engine only reads `point`; the payload is carried along untouched.
#[derive(Clone)]
pub struct Annotation {
    point: Point,
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl Annotation {
    pub fn new(point: Point) -> Self {
        Self {
            point,
            payload: None,
        }
    }

    /// Attach a payload shared with the caller.
    pub fn with_payload(point: Point, payload: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            point,
            payload: Some(payload),
        }
    }

    pub fn point(&self) -> Point {
        self.point
    }

    pub fn payload(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.payload.as_ref()
    }

    /// Payload downcast to a concrete type.
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Annotation")
            .field("point", &self.point)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

// =============================================================================
// Positioning
// =============================================================================

/// How points just outside the image are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BoundsPolicy {
    /// Snap points within tolerance onto the nearest image edge.
    #[default]
    Clamp,
    /// Place points within tolerance where they are, outside the image.
    Unclamped,
}

/// Out-of-image handling for annotations.
///
/// A point farther than `tolerance` image pixels outside the image is never
/// placed, whatever the policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnnotationBounds {
    pub policy: BoundsPolicy,
    pub tolerance: f64,
}

impl Default for AnnotationBounds {
    fn default() -> Self {
        Self {
            policy: BoundsPolicy::Clamp,
            tolerance: DEFAULT_ANNOTATION_TOLERANCE,
        }
    }
}

/// Maps annotation points into viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AnnotationPositioner {
    bounds: AnnotationBounds,
}

impl AnnotationPositioner {
    pub fn new(bounds: AnnotationBounds) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> AnnotationBounds {
        self.bounds
    }

    /// Screen position of `point` for a viewport displaying `level`.
    ///
    /// The point is taken into `level`'s pixel space, offset by the
    /// viewport origin in that space, then scaled from level pixels to
    /// screen pixels. The result is relative to the viewport's top-left
    /// corner and does not depend on `level` beyond rounding.
    ///
    /// # Errors
    ///
    /// Returns [`PositionError::OutOfImageBounds`] for non-finite points and
    /// points beyond the tolerance.
    pub fn screen_point(
        &self,
        spec: &ImageSpec,
        level: u32,
        point: Point,
        viewport: &Viewport,
    ) -> Result<ScreenPoint, PositionError> {
        let point = self.admit(spec, point)?;

        let pixel = image_point_to_level_pixel(spec, level, point);
        let origin = image_point_to_level_pixel(spec, level, viewport.origin());
        let factor = viewport.scale / level_scale(spec, level);

        Ok(Point::new(
            (pixel.x - origin.x) * factor,
            (pixel.y - origin.y) * factor,
        ))
    }

    fn admit(&self, spec: &ImageSpec, point: Point) -> Result<Point, PositionError> {
        let out_of_bounds = PositionError::OutOfImageBounds {
            x: point.x,
            y: point.y,
        };
        if !point.x.is_finite() || !point.y.is_finite() {
            return Err(out_of_bounds);
        }

        let bounds = spec.bounds();
        let dx = (bounds.min_x() - point.x).max(point.x - bounds.max_x()).max(0.0);
        let dy = (bounds.min_y() - point.y).max(point.y - bounds.max_y()).max(0.0);
        if dx > self.bounds.tolerance || dy > self.bounds.tolerance {
            return Err(out_of_bounds);
        }

        Ok(match self.bounds.policy {
            BoundsPolicy::Clamp => Point::new(
                point.x.clamp(bounds.min_x(), bounds.max_x()),
                point.y.clamp(bounds.min_y(), bounds.max_y()),
            ),
            BoundsPolicy::Unclamped => point,
        })
    }
}
