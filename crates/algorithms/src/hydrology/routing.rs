//! D8 routing helpers shared by the hydrology algorithms
//!
//! A cell takes part in routing when it is not no-data. It is *terminal*
//! when its code does not decode to a direction, or when the cell it points
//! at is off the grid or no-data.

use flowpath_core::raster::d8::{self, OFFSETS};
use flowpath_core::raster::StepLengths;
use flowpath_core::{D8Encoding, Raster};

/// Whether the cell at (row, col) carries flow-direction data
#[inline]
pub(crate) fn is_valid(flow_dir: &Raster<u8>, row: usize, col: usize) -> bool {
    !flow_dir.is_nodata(flow_dir.data()[(row, col)])
}

/// Downstream neighbor of (row, col) and the direction index taken,
/// `None` for no-data and terminal cells.
pub(crate) fn downstream(
    flow_dir: &Raster<u8>,
    encoding: D8Encoding,
    row: usize,
    col: usize,
) -> Option<(usize, usize, usize)> {
    if !is_valid(flow_dir, row, col) {
        return None;
    }
    let dir = encoding.decode(flow_dir.data()[(row, col)])?;
    let (nr, nc) = d8::neighbor(row, col, dir, flow_dir.rows(), flow_dir.cols())?;
    if !is_valid(flow_dir, nr, nc) {
        return None;
    }
    Some((nr, nc, dir))
}

/// Valid neighbors whose flow enters (row, col), in direction-index order
/// as seen from (row, col). Each item carries the neighbor's own flow
/// direction.
pub(crate) fn contributors(
    flow_dir: &Raster<u8>,
    encoding: D8Encoding,
    row: usize,
    col: usize,
) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
    let (rows, cols) = flow_dir.shape();
    (0..OFFSETS.len()).filter_map(move |idx| {
        let (nr, nc) = d8::neighbor(row, col, idx, rows, cols)?;
        if !is_valid(flow_dir, nr, nc) {
            return None;
        }
        // The neighbor sits at OFFSETS[idx]; it drains here only if it
        // points back along the opposite direction.
        let dir = encoding.decode(flow_dir.data()[(nr, nc)])?;
        (dir == d8::opposite(idx)).then_some((nr, nc, dir))
    })
}

/// Map-unit length of one step in direction `dir`
#[inline]
pub(crate) fn step_length(steps: &StepLengths, dir: usize) -> f64 {
    let (dr, dc) = OFFSETS[dir];
    steps.for_offset(dr, dc)
}
