//! Affine geotransformation for rasters

use serde::{Deserialize, Serialize};

/// Affine transformation coefficients for georeferencing rasters.
///
/// Converts between pixel coordinates (col, row) and geographic coordinates (x, y):
/// ```text
/// x = origin_x + col * pixel_width + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
///
/// For north-up images, `row_rotation` and `col_rotation` are 0 and
/// `pixel_height` is negative. The hydrology algorithms only accept north-up
/// grids.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner
    pub origin_y: f64,
    /// Pixel width (cell size in X direction)
    pub pixel_width: f64,
    /// Pixel height (cell size in Y direction, usually negative)
    pub pixel_height: f64,
    /// Rotation about X axis (usually 0)
    pub row_rotation: f64,
    /// Rotation about Y axis (usually 0)
    pub col_rotation: f64,
}

/// Map-unit distances of one D8 step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepLengths {
    /// East/west step
    pub horizontal: f64,
    /// North/south step
    pub vertical: f64,
    /// Any diagonal step
    pub diagonal: f64,
}

impl StepLengths {
    /// Length of a step by (row, col) offset, each component in -1..=1
    pub fn for_offset(&self, dr: isize, dc: isize) -> f64 {
        match (dr != 0, dc != 0) {
            (true, true) => self.diagonal,
            (true, false) => self.vertical,
            (false, true) => self.horizontal,
            (false, false) => 0.0,
        }
    }
}

impl GeoTransform {
    /// Create a new GeoTransform with no rotation (north-up image)
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
            row_rotation: 0.0,
            col_rotation: 0.0,
        }
    }

    /// Convert pixel coordinates to geographic coordinates
    ///
    /// Returns the coordinates of the pixel center
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        self.corner_offset(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Convert pixel coordinates to geographic coordinates (top-left corner)
    pub fn pixel_to_geo_corner(&self, col: usize, row: usize) -> (f64, f64) {
        self.corner_offset(col as f64, row as f64)
    }

    fn corner_offset(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.origin_x + col * self.pixel_width + row * self.row_rotation;
        let y = self.origin_y + col * self.col_rotation + row * self.pixel_height;
        (x, y)
    }

    /// Convert geographic coordinates to pixel coordinates
    ///
    /// Returns fractional pixel coordinates; use `.floor()` to get integer indices
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let det = self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation;

        if det.abs() < 1e-10 {
            return (f64::NAN, f64::NAN);
        }

        let dx = x - self.origin_x;
        let dy = y - self.origin_y;

        let col = (self.pixel_height * dx - self.row_rotation * dy) / det;
        let row = (-self.col_rotation * dx + self.pixel_width * dy) / det;

        (col, row)
    }

    /// Signed (row, col) index of the cell containing a geographic point.
    ///
    /// The index may lie outside any particular raster; callers check it
    /// against their own dimensions. Returns `None` for a degenerate
    /// transform.
    pub fn geo_to_cell(&self, x: f64, y: f64) -> Option<(i64, i64)> {
        let (col, row) = self.geo_to_pixel(x, y);
        if !col.is_finite() || !row.is_finite() {
            return None;
        }
        Some((row.floor() as i64, col.floor() as i64))
    }

    /// Transform of the same grid with its origin moved by whole cells.
    /// Negative offsets move the origin up/left.
    pub fn shifted(&self, row_offset: i64, col_offset: i64) -> Self {
        let (x, y) = self.corner_offset(col_offset as f64, row_offset as f64);
        Self {
            origin_x: x,
            origin_y: y,
            ..*self
        }
    }

    /// Get the cell size (assumes square pixels and no rotation)
    pub fn cell_size(&self) -> f64 {
        self.pixel_width.abs()
    }

    /// Distances of orthogonal and diagonal D8 steps in map units
    pub fn step_lengths(&self) -> StepLengths {
        let horizontal = self.pixel_width.abs();
        let vertical = self.pixel_height.abs();
        StepLengths {
            horizontal,
            vertical,
            diagonal: horizontal.hypot(vertical),
        }
    }

    /// Check if this is a north-up image (no rotation)
    pub fn is_north_up(&self) -> bool {
        self.row_rotation.abs() < 1e-10
            && self.col_rotation.abs() < 1e-10
            && self.pixel_height < 0.0
            && self.pixel_width > 0.0
    }

    /// Calculate the bounding box for a raster of given dimensions
    pub fn bounds(&self, width: usize, height: usize) -> (f64, f64, f64, f64) {
        let corners = [
            self.pixel_to_geo_corner(0, 0),
            self.pixel_to_geo_corner(width, 0),
            self.pixel_to_geo_corner(0, height),
            self.pixel_to_geo_corner(width, height),
        ];

        corners.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(min_x, min_y, max_x, max_y), &(x, y)| {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            },
        )
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pixel_to_geo_roundtrip() {
        let gt = GeoTransform::new(100.0, 200.0, 10.0, -10.0);

        let (x, y) = gt.pixel_to_geo(5, 10);
        let (col, row) = gt.geo_to_pixel(x, y);

        assert_relative_eq!(col, 5.5, epsilon = 1e-10);
        assert_relative_eq!(row, 10.5, epsilon = 1e-10);
    }

    #[test]
    fn test_geo_to_cell_outside_grid() {
        let gt = GeoTransform::new(0.0, 10.0, 1.0, -1.0);
        assert_eq!(gt.geo_to_cell(2.5, 7.5), Some((2, 2)));
        assert_eq!(gt.geo_to_cell(-0.5, 10.5), Some((-1, -1)));
        assert_eq!(gt.geo_to_cell(12.0, 0.5), Some((9, 12)));
    }

    #[test]
    fn test_shifted_keeps_alignment() {
        let gt = GeoTransform::new(100.0, 200.0, 10.0, -10.0);
        let moved = gt.shifted(-2, 3);
        assert_relative_eq!(moved.origin_x, 130.0);
        assert_relative_eq!(moved.origin_y, 220.0);
        assert_eq!(moved.pixel_width, gt.pixel_width);
        assert_eq!(moved.pixel_height, gt.pixel_height);
    }

    #[test]
    fn test_step_lengths() {
        let steps = GeoTransform::new(0.0, 0.0, 30.0, -30.0).step_lengths();
        assert_relative_eq!(steps.horizontal, 30.0);
        assert_relative_eq!(steps.vertical, 30.0);
        assert_relative_eq!(steps.diagonal, 30.0 * std::f64::consts::SQRT_2, epsilon = 1e-12);
        assert_relative_eq!(steps.for_offset(1, -1), steps.diagonal);
        assert_relative_eq!(steps.for_offset(1, 0), 30.0);
    }

    #[test]
    fn test_bounds() {
        let gt = GeoTransform::new(0.0, 100.0, 1.0, -1.0);
        let (min_x, min_y, max_x, max_y) = gt.bounds(100, 100);

        assert_relative_eq!(min_x, 0.0, epsilon = 1e-10);
        assert_relative_eq!(min_y, 0.0, epsilon = 1e-10);
        assert_relative_eq!(max_x, 100.0, epsilon = 1e-10);
        assert_relative_eq!(max_y, 100.0, epsilon = 1e-10);
    }
}
