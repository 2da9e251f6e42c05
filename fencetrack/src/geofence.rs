//! Point-in-polygon membership against configured fences.
//!
//! Classification uses ray-casting parity with half-open edges, so a point
//! exactly on a horizontal edge is counted for one side only and the result
//! does not depend on where the vertex list starts.

use geo::{BoundingRect, Coord, LineString, Rect};
use log::info;

use crate::config::FenceConfig;
use crate::error::{Result, TrackError};
use crate::LngLat;

/// Name given to the operator-drawn fence.
pub const CUSTOM_FENCE_NAME: &str = "custom";

/// Ray-casting membership test. The polygon is implicitly closed.
///
/// Polygons with fewer than 3 vertices never contain anything.
///
/// # Example
/// ```
/// use fencetrack::{is_inside, LngLat};
/// use geo::Coord;
/// let square = [
///     Coord { x: 0.0, y: 0.0 },
///     Coord { x: 0.0, y: 10.0 },
///     Coord { x: 10.0, y: 10.0 },
///     Coord { x: 10.0, y: 0.0 },
/// ];
/// assert!(is_inside(LngLat::new(5.0, 5.0), &square));
/// assert!(!is_inside(LngLat::new(50.0, 50.0), &square));
/// ```
pub fn is_inside(point: LngLat, polygon: &[Coord<f64>]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let (x, y) = (point.lng, point.lat);
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (xi, yi) = (polygon[i].x, polygon[i].y);
        let (xj, yj) = (polygon[j].x, polygon[j].y);
        // (yi > y) != (yj > y) implies yi != yj, so the division is safe.
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// True if any polygon contains the point. Stops at the first match.
pub fn is_inside_any<'a, I>(point: LngLat, polygons: I) -> bool
where
    I: IntoIterator<Item = &'a [Coord<f64>]>,
{
    polygons.into_iter().any(|polygon| is_inside(point, polygon))
}

/// A named fence polygon with a cached bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct Fence {
    name: String,
    vertices: Vec<Coord<f64>>,
    bounds: Option<Rect<f64>>,
}

impl Fence {
    pub fn new(name: &str, points: &[[f64; 2]]) -> Self {
        let vertices: Vec<Coord<f64>> = points
            .iter()
            .map(|p| Coord { x: p[0], y: p[1] })
            .collect();
        let bounds = LineString::from(vertices.clone()).bounding_rect();
        Self {
            name: name.to_string(),
            vertices,
            bounds,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertices(&self) -> &[Coord<f64>] {
        &self.vertices
    }

    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.bounds
    }

    /// Membership test with a bounding-box fast reject.
    pub fn contains(&self, point: LngLat) -> bool {
        let Some(bounds) = self.bounds else {
            return false;
        };
        let (min, max) = (bounds.min(), bounds.max());
        if point.lng < min.x || point.lng > max.x || point.lat < min.y || point.lat > max.y {
            return false;
        }
        is_inside(point, &self.vertices)
    }
}

/// Fixed fences plus at most one operator-drawn fence.
#[derive(Debug, Clone, Default)]
pub struct FenceSet {
    fixed: Vec<Fence>,
    custom: Option<Fence>,
}

impl FenceSet {
    pub fn new(fixed: Vec<Fence>) -> Self {
        Self {
            fixed,
            custom: None,
        }
    }

    pub fn from_config(fences: &[FenceConfig]) -> Self {
        Self::new(
            fences
                .iter()
                .map(|f| Fence::new(&f.name, &f.points))
                .collect(),
        )
    }

    /// Install or replace the operator-drawn fence.
    pub fn set_custom(&mut self, points: &[[f64; 2]]) -> Result<()> {
        if points.len() < 3 {
            return Err(TrackError::InvalidFence {
                vertices: points.len(),
            });
        }
        info!("[FenceSet] Custom fence set with {} vertices", points.len());
        self.custom = Some(Fence::new(CUSTOM_FENCE_NAME, points));
        Ok(())
    }

    /// Remove the operator-drawn fence. Returns `false` if there was none.
    pub fn clear_custom(&mut self) -> bool {
        self.custom.take().is_some()
    }

    pub fn custom(&self) -> Option<&Fence> {
        self.custom.as_ref()
    }

    /// All fences, fixed ones first.
    pub fn iter(&self) -> impl Iterator<Item = &Fence> {
        self.fixed.iter().chain(self.custom.iter())
    }

    pub fn len(&self) -> usize {
        self.fixed.len() + usize::from(self.custom.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First fence containing the point.
    pub fn containing(&self, point: LngLat) -> Option<&Fence> {
        self.iter().find(|fence| fence.contains(point))
    }

    pub fn contains(&self, point: LngLat) -> bool {
        self.containing(point).is_some()
    }
}
