//! Main Raster type

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, RasterElement};
use ndarray::Array2;

/// A georeferenced 2D raster grid.
///
/// `Raster<T>` stores values of type `T` in a 2D grid with associated
/// geographic metadata (transform and CRS).
///
/// # Type Parameters
///
/// - `T`: The cell value type, must implement [`RasterElement`]
///
/// # Example
///
/// ```ignore
/// use flowpath_core::Raster;
///
/// let mut fdir: Raster<u8> = Raster::new(5, 5);
/// fdir.set(0, 0, 4)?;
/// let window = fdir.window(Window::new(0, 0, 2, 2))?;
/// ```
#[derive(Debug, Clone)]
pub struct Raster<T: RasterElement> {
    /// Raster data stored in row-major order (row, col)
    data: Array2<T>,
    /// Affine transformation
    transform: GeoTransform,
    /// Coordinate reference system
    crs: Option<CRS>,
    /// No-data value
    nodata: Option<T>,
}

/// Rectangular block of cells, in (row, col) indices of a parent raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub row: usize,
    pub col: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Window {
    pub fn new(row: usize, col: usize, rows: usize, cols: usize) -> Self {
        Self { row, col, rows, cols }
    }

    /// Grow the window just enough to contain cell (row, col)
    pub fn extend_to(&mut self, row: usize, col: usize) {
        let end_row = (self.row + self.rows).max(row + 1);
        let end_col = (self.col + self.cols).max(col + 1);
        self.row = self.row.min(row);
        self.col = self.col.min(col);
        self.rows = end_row - self.row;
        self.cols = end_col - self.col;
    }
}

impl<T: RasterElement> Raster<T> {
    /// Create a new raster filled with zeros
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::from_array(Array2::zeros((rows, cols)))
    }

    /// Create a new raster filled with a specific value
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::from_array(Array2::from_elem((rows, cols), value))
    }

    /// Create a raster from existing data
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }

        let array = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;

        Ok(Self::from_array(array))
    }

    /// Create a raster from an ndarray
    pub fn from_array(data: Array2<T>) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
            crs: None,
            nodata: None,
        }
    }

    /// Create a zero-filled raster with the same metadata but different data type
    pub fn with_same_meta<U: RasterElement>(&self, rows: usize, cols: usize) -> Raster<U> {
        Raster {
            data: Array2::zeros((rows, cols)),
            transform: self.transform,
            crs: self.crs.clone(),
            nodata: None,
        }
    }

    /// Derive a raster on the same grid by mapping every cell.
    ///
    /// The closure receives `None` for no-data cells. The result has no
    /// nodata value set; callers pick one for the new element type.
    pub fn map<U, F>(&self, mut f: F) -> Raster<U>
    where
        U: RasterElement,
        F: FnMut(Option<T>) -> U,
    {
        let data = self.data.map(|&v| f(if self.is_nodata(v) { None } else { Some(v) }));
        Raster {
            data,
            transform: self.transform,
            crs: self.crs.clone(),
            nodata: None,
        }
    }

    // Dimensions

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the raster is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    // Data access

    /// Get value at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            })
    }

    /// Set value at (row, col)
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        match self.data.get_mut((row, col)) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            }),
        }
    }

    /// Get a reference to the underlying array
    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    /// Get a mutable reference to the underlying array
    pub fn data_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    // Re-gridding

    /// Copy of the raster on an aligned grid of `rows` x `cols` cells whose
    /// top-left cell is source cell (`row_offset`, `col_offset`).
    ///
    /// Offsets may be negative and the new grid may extend past the source
    /// in any direction; cells without a source counterpart are no-data.
    /// If the raster has no nodata value, the type's default is assigned.
    pub fn reframe(&self, row_offset: i64, col_offset: i64, rows: usize, cols: usize) -> Self {
        let nodata = self.nodata.unwrap_or_else(T::default_nodata);
        let (src_rows, src_cols) = (self.rows() as i64, self.cols() as i64);

        let data = Array2::from_shape_fn((rows, cols), |(r, c)| {
            let sr = r as i64 + row_offset;
            let sc = c as i64 + col_offset;
            if sr < 0 || sc < 0 || sr >= src_rows || sc >= src_cols {
                nodata
            } else {
                self.data[(sr as usize, sc as usize)]
            }
        });

        Self {
            data,
            transform: self.transform.shifted(row_offset, col_offset),
            crs: self.crs.clone(),
            nodata: Some(nodata),
        }
    }

    /// Aligned sub-raster covering `window`
    pub fn window(&self, window: Window) -> Result<Self> {
        if window.row + window.rows > self.rows() || window.col + window.cols > self.cols() {
            return Err(Error::IndexOutOfBounds {
                row: window.row + window.rows,
                col: window.col + window.cols,
                rows: self.rows(),
                cols: self.cols(),
            });
        }

        let data = self
            .data
            .slice(ndarray::s![
                window.row..window.row + window.rows,
                window.col..window.col + window.cols
            ])
            .to_owned();

        Ok(Self {
            data,
            transform: self.transform.shifted(window.row as i64, window.col as i64),
            crs: self.crs.clone(),
            nodata: self.nodata,
        })
    }

    /// Check that `other` lies on exactly the same grid
    pub fn ensure_same_grid<U: RasterElement>(&self, other: &Raster<U>) -> Result<()> {
        let (er, ec) = self.shape();
        let (ar, ac) = other.shape();
        if er != ar || ec != ac {
            return Err(Error::SizeMismatch { er, ec, ar, ac });
        }
        if self.transform != *other.transform() {
            return Err(Error::Precondition(
                "rasters have the same size but different geotransforms".into(),
            ));
        }
        Ok(())
    }

    // Metadata

    /// Get the geotransform
    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Set the geotransform
    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    /// Get the CRS
    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    /// Set the CRS
    pub fn set_crs(&mut self, crs: Option<CRS>) {
        self.crs = crs;
    }

    /// Get the no-data value
    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    /// Set the no-data value
    pub fn set_nodata(&mut self, nodata: Option<T>) {
        self.nodata = nodata;
    }

    /// Cell size (assumes square cells)
    pub fn cell_size(&self) -> f64 {
        self.transform.cell_size()
    }

    /// Geographic bounds (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.cols(), self.rows())
    }

    /// Geographic coordinates of the center of cell (row, col)
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.transform.pixel_to_geo(col, row)
    }

    // Value checks

    /// Check if a value is no-data
    pub fn is_nodata(&self, value: T) -> bool {
        value.is_nodata(self.nodata)
    }

    // Statistics

    /// Calculate basic statistics (min, max, mean, count of valid cells)
    pub fn statistics(&self) -> RasterStatistics<T> {
        let mut min: Option<T> = None;
        let mut max: Option<T> = None;
        let mut sum: f64 = 0.0;
        let mut count: usize = 0;

        for &value in self.data.iter() {
            if self.is_nodata(value) {
                continue;
            }

            if min.is_none_or(|m| value < m) {
                min = Some(value);
            }
            if max.is_none_or(|m| value > m) {
                max = Some(value);
            }

            if let Some(v) = value.to_f64() {
                sum += v;
                count += 1;
            }
        }

        let mean = if count > 0 {
            Some(sum / count as f64)
        } else {
            None
        };

        RasterStatistics {
            min,
            max,
            mean,
            valid_count: count,
            nodata_count: self.len() - count,
        }
    }
}

/// Basic statistics for a raster
#[derive(Debug, Clone)]
pub struct RasterStatistics<T> {
    pub min: Option<T>,
    pub max: Option<T>,
    pub mean: Option<f64>,
    pub valid_count: usize,
    pub nodata_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_creation() {
        let raster: Raster<f32> = Raster::new(100, 200);
        assert_eq!(raster.rows(), 100);
        assert_eq!(raster.cols(), 200);
        assert_eq!(raster.shape(), (100, 200));
    }

    #[test]
    fn test_raster_access() {
        let mut raster: Raster<f32> = Raster::new(10, 10);
        raster.set(5, 5, 42.0).unwrap();
        assert_eq!(raster.get(5, 5).unwrap(), 42.0);
        assert!(raster.set(10, 0, 1.0).is_err());
    }

    #[test]
    fn test_raster_statistics_skip_nodata() {
        let mut raster: Raster<f64> = Raster::new(10, 10);
        for i in 0..10 {
            for j in 0..10 {
                raster.set(i, j, (i * 10 + j) as f64).unwrap();
            }
        }
        raster.set(9, 9, f64::NAN).unwrap();

        let stats = raster.statistics();
        assert_eq!(stats.min, Some(0.0));
        assert_eq!(stats.max, Some(98.0));
        assert_eq!(stats.valid_count, 99);
        assert_eq!(stats.nodata_count, 1);
    }

    #[test]
    fn test_reframe_pads_with_nodata() {
        let mut raster: Raster<u8> = Raster::filled(2, 2, 4);
        raster.set_transform(GeoTransform::new(10.0, 20.0, 1.0, -1.0));

        let padded = raster.reframe(-1, -1, 4, 4);
        assert_eq!(padded.shape(), (4, 4));
        assert_eq!(padded.nodata(), Some(255));
        assert_eq!(padded.get(0, 0).unwrap(), 255);
        assert_eq!(padded.get(1, 1).unwrap(), 4);
        assert_eq!(padded.get(2, 2).unwrap(), 4);
        assert_eq!(padded.get(3, 3).unwrap(), 255);
        assert_eq!(padded.transform().origin_x, 9.0);
        assert_eq!(padded.transform().origin_y, 21.0);
    }

    #[test]
    fn test_window_shifts_origin() {
        let mut raster: Raster<i64> = Raster::new(5, 5);
        raster.set(3, 4, 7).unwrap();
        let sub = raster.window(Window::new(2, 3, 2, 2)).unwrap();
        assert_eq!(sub.get(1, 1).unwrap(), 7);
        assert_eq!(sub.transform().origin_x, 3.0);
        assert_eq!(sub.transform().origin_y, -2.0);
        assert!(raster.window(Window::new(4, 4, 2, 2)).is_err());
    }

    #[test]
    fn test_window_extends_to_cover_cells() {
        let mut w = Window::new(3, 1, 1, 1);
        w.extend_to(1, 4);
        w.extend_to(2, 2);
        assert_eq!(w, Window::new(1, 1, 3, 4));
        w.extend_to(1, 2);
        assert_eq!(w, Window::new(1, 1, 3, 4));
    }
}
