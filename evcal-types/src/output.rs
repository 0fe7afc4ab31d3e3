use serde::{Deserialize, Serialize};

use crate::config::GridKind;
use crate::geom::Vec2;

/// A detected circle at one instant: the `TimeVaryingCircle` evaluated at
/// the pack's reference time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: [f64; 2],
    pub radius: f64,
}

impl Circle {
    pub fn new(center: Vec2, radius: f64) -> Self {
        Self {
            center: [center.x, center.y],
            radius,
        }
    }

    pub fn center_vec(&self) -> Vec2 {
        Vec2::new(self.center[0], self.center[1])
    }
}

/// A row/column indexed grid of circle centers recovered by the grid finder.
///
/// `centers` always has exactly `rows * cols` entries, in row-major order
/// (for [`GridKind::Asymmetric`], per the OpenCV convention: row 0 left to
/// right, row 1 left to right but offset by half a column spacing, etc).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridPattern {
    pub rows: usize,
    pub cols: usize,
    pub kind: GridKind,
    pub centers: Vec<[f64; 2]>,
}

impl GridPattern {
    pub fn new(rows: usize, cols: usize, kind: GridKind, centers: Vec<Vec2>) -> Self {
        debug_assert_eq!(centers.len(), rows * cols);
        Self {
            rows,
            cols,
            kind,
            centers: centers.into_iter().map(|c| [c.x, c.y]).collect(),
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Vec2 {
        let c = self.centers[row * self.cols + col];
        Vec2::new(c[0], c[1])
    }
}
