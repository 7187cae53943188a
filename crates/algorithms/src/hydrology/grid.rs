//! Common grid resolution for a flow-direction raster and its outlets
//!
//! Before any watershed is labeled the flow-direction raster and the outlet
//! points are brought onto one aligned grid. How far that grid reaches is
//! controlled by [`ExtentPolicy`].

use flowpath_core::{Error, Outlet, Raster, Result, Window};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A union grid may hold at most this many times the raster's cells
pub const MAX_UNION_GROWTH: usize = 64;

/// Extent of the grid the extraction runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtentPolicy {
    /// Smallest aligned grid covering the raster and every outlet.
    /// Cells added around the raster are no-data.
    #[default]
    Union,
    /// The raster cropped to the aligned bounding box of the outlets
    Intersection,
    /// The raster's own grid, unchanged
    FirstInputBounds,
}

/// An outlet and the cell it falls in on the resolved grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedOutlet {
    pub outlet: Outlet,
    /// (row, col), `None` when the outlet lies outside the grid
    pub cell: Option<(usize, usize)>,
}

/// Flow-direction raster and outlets on a common grid
#[derive(Debug, Clone)]
pub struct ResolvedGrid {
    pub flow_dir: Raster<u8>,
    /// Outlets in input order
    pub outlets: Vec<PlacedOutlet>,
}

impl ResolvedGrid {
    /// Number of outlets that landed on the grid
    pub fn placed_count(&self) -> usize {
        self.outlets.iter().filter(|o| o.cell.is_some()).count()
    }
}

/// Validate the inputs and bring them onto one grid.
///
/// # Errors
/// [`Error::Precondition`] when the outlet set is empty, an id is negative
/// or repeated, an outlet coordinate is not finite, the raster is empty or
/// not north-up, or the policy leaves no usable grid.
pub fn resolve_grid(
    flow_dir: &Raster<u8>,
    outlets: &[Outlet],
    policy: ExtentPolicy,
) -> Result<ResolvedGrid> {
    validate_outlets(outlets)?;

    if flow_dir.is_empty() {
        return Err(Error::Precondition("flow direction raster is empty".into()));
    }
    let transform = flow_dir.transform();
    if !transform.is_north_up() {
        return Err(Error::Precondition(
            "flow direction raster must be north-up without rotation".into(),
        ));
    }

    let cells: Vec<(i64, i64)> = outlets
        .iter()
        .map(|o| {
            transform.geo_to_cell(o.x, o.y).ok_or_else(|| {
                Error::Precondition(format!("outlet {} cannot be located on the grid", o.id))
            })
        })
        .collect::<Result<_>>()?;

    let rows = flow_dir.rows() as i64;
    let cols = flow_dir.cols() as i64;
    // Outlet bounding box, inclusive, in source cell indices
    let min_r = cells.iter().map(|c| c.0).min().unwrap_or(0);
    let max_r = cells.iter().map(|c| c.0).max().unwrap_or(0);
    let min_c = cells.iter().map(|c| c.1).min().unwrap_or(0);
    let max_c = cells.iter().map(|c| c.1).max().unwrap_or(0);

    let (origin, grid) = match policy {
        ExtentPolicy::Union => {
            let r0 = min_r.min(0);
            let c0 = min_c.min(0);
            let r1 = max_r.max(rows - 1);
            let c1 = max_c.max(cols - 1);
            let grid = if (r0, c0, r1, c1) == (0, 0, rows - 1, cols - 1) {
                flow_dir.clone()
            } else {
                let (union_rows, union_cols) = union_shape(flow_dir.len(), (r0, c0), (r1, c1))?;
                flow_dir.reframe(r0, c0, union_rows, union_cols)
            };
            ((r0, c0), grid)
        }
        ExtentPolicy::Intersection => {
            let r0 = min_r.max(0);
            let c0 = min_c.max(0);
            let r1 = max_r.min(rows - 1);
            let c1 = max_c.min(cols - 1);
            if r0 > r1 || c0 > c1 {
                return Err(Error::Precondition(
                    "outlets do not overlap the flow direction raster".into(),
                ));
            }
            let window = Window::new(
                r0 as usize,
                c0 as usize,
                (r1 - r0 + 1) as usize,
                (c1 - c0 + 1) as usize,
            );
            ((r0, c0), flow_dir.window(window)?)
        }
        ExtentPolicy::FirstInputBounds => ((0, 0), flow_dir.clone()),
    };

    let (grid_rows, grid_cols) = (grid.rows() as i64, grid.cols() as i64);
    let outlets = outlets
        .iter()
        .zip(&cells)
        .map(|(&outlet, &(r, c))| {
            let cell = match (r.checked_sub(origin.0), c.checked_sub(origin.1)) {
                (Some(lr), Some(lc)) if lr >= 0 && lc >= 0 && lr < grid_rows && lc < grid_cols => {
                    Some((lr as usize, lc as usize))
                }
                _ => None,
            };
            PlacedOutlet { outlet, cell }
        })
        .collect();

    Ok(ResolvedGrid {
        flow_dir: grid,
        outlets,
    })
}

/// Shape of the union grid spanning the inclusive cell range `start..=end`.
///
/// Outlets far from the raster (coordinates in another reference system,
/// typos) would otherwise ask for an unbounded allocation.
fn union_shape(source_cells: usize, start: (i64, i64), end: (i64, i64)) -> Result<(usize, usize)> {
    let span = |lo: i64, hi: i64| {
        hi.checked_sub(lo)
            .and_then(|d| d.checked_add(1))
            .and_then(|n| usize::try_from(n).ok())
    };
    let limit = source_cells.saturating_mul(MAX_UNION_GROWTH);
    match (span(start.0, end.0), span(start.1, end.1)) {
        (Some(rows), Some(cols)) if rows.checked_mul(cols).is_some_and(|n| n <= limit) => Ok((rows, cols)),
        _ => Err(Error::Precondition(format!(
            "outlets lie too far from the flow direction raster: covering them needs more than {} times its {} cells",
            MAX_UNION_GROWTH, source_cells
        ))),
    }
}

fn validate_outlets(outlets: &[Outlet]) -> Result<()> {
    if outlets.is_empty() {
        return Err(Error::Precondition("no outlets given".into()));
    }

    let mut seen = HashSet::with_capacity(outlets.len());
    for outlet in outlets {
        if outlet.id < 0 {
            return Err(Error::Precondition(format!(
                "outlet id {} is negative",
                outlet.id
            )));
        }
        if !seen.insert(outlet.id) {
            return Err(Error::Precondition(format!(
                "outlet id {} is used more than once",
                outlet.id
            )));
        }
        if !outlet.x.is_finite() || !outlet.y.is_finite() {
            return Err(Error::Precondition(format!(
                "outlet {} has a non-finite location",
                outlet.id
            )));
        }
    }
    Ok(())
}
