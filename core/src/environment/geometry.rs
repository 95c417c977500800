// Grid geometry: positions, coverage radii and the clamped walk step

use serde::{Deserialize, Serialize};

/// Position of a device on the grid plus the radius its radio covers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageArea {
    pub x: i32,
    pub y: i32,
    pub r: f64,
}

impl CoverageArea {
    pub fn new(x: i32, y: i32, r: f64) -> Self {
        Self { x, y, r }
    }

    /// Euclidean distance between the two centers
    pub fn distance_to(&self, other: &CoverageArea) -> f64 {
        let dx = f64::from(self.x) - f64::from(other.x);
        let dy = f64::from(self.y) - f64::from(other.y);
        dx.hypot(dy)
    }

    /// True if a point `distance` away is inside this radius (boundary inclusive)
    pub fn covers(&self, distance: f64) -> bool {
        distance <= self.r
    }

    /// Move by `(dx, dy)` and clamp both axes to `[0, max]`
    pub fn shift_clamped(&mut self, dx: i32, dy: i32, max: i32) {
        self.x = self.x.saturating_add(dx).clamp(0, max);
        self.y = self.y.saturating_add(dy).clamp(0, max);
    }
}
