//! Longest flow path mask from a total flow length raster
//!
//! Every cell on the longest flow path of a watershed has the same total
//! (upstream + downstream) flow length, the watershed maximum. The mask
//! marks those cells with 1 and everything else with 0.

use crate::hydrology::routing;
use flowpath_core::{D8Encoding, Raster, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the path cells are selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStrategy {
    /// Trace one connected path through the first maximal cell
    #[default]
    Traced,
    /// Every cell whose total length reaches the maximum. Ties on separate
    /// branches give a disconnected mask.
    Threshold,
}

impl fmt::Display for PathStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStrategy::Traced => write!(f, "traced"),
            PathStrategy::Threshold => write!(f, "threshold"),
        }
    }
}

/// Cells selected as the longest flow path
#[derive(Debug, Clone)]
pub struct PathMask {
    /// 1 on the path, 0 elsewhere, no-data 0
    pub mask: Raster<u8>,
    /// Maximum total flow length over valid cells
    pub max_length: f64,
    /// Path cells: source to outlet for [`PathStrategy::Traced`],
    /// row-major for [`PathStrategy::Threshold`]
    pub cells: Vec<(usize, usize)>,
}

/// Select the longest flow path of one watershed.
///
/// `flow_dir`, `upstream` and `total` must share one grid, with
/// `flow_dir` already restricted to the watershed. Returns `None` when
/// `total` has no valid cell.
pub fn longest_path_mask(
    flow_dir: &Raster<u8>,
    encoding: D8Encoding,
    upstream: &Raster<f64>,
    total: &Raster<f64>,
    strategy: PathStrategy,
) -> Result<Option<PathMask>> {
    flow_dir.ensure_same_grid(total)?;
    upstream.ensure_same_grid(total)?;

    let Some(max_length) = total.statistics().max else {
        return Ok(None);
    };

    let cells = match strategy {
        PathStrategy::Traced => trace_path(flow_dir, encoding, upstream, total, max_length),
        PathStrategy::Threshold => threshold_cells(total, max_length),
    };

    let (rows, cols) = total.shape();
    let mut mask = total.with_same_meta::<u8>(rows, cols);
    mask.set_nodata(Some(0));
    for &(row, col) in &cells {
        mask.data_mut()[(row, col)] = 1;
    }

    Ok(Some(PathMask {
        mask,
        max_length,
        cells,
    }))
}

fn threshold_cells(total: &Raster<f64>, max_length: f64) -> Vec<(usize, usize)> {
    total
        .data()
        .indexed_iter()
        .filter(|&(_, &v)| !total.is_nodata(v) && v >= max_length)
        .map(|(idx, _)| idx)
        .collect()
}

fn trace_path(
    flow_dir: &Raster<u8>,
    encoding: D8Encoding,
    upstream: &Raster<f64>,
    total: &Raster<f64>,
    max_length: f64,
) -> Vec<(usize, usize)> {
    let Some(start) = total
        .data()
        .indexed_iter()
        .find(|&(_, &v)| !total.is_nodata(v) && v == max_length)
        .map(|(idx, _)| idx)
    else {
        return Vec::new();
    };

    let steps = flow_dir.transform().step_lengths();
    let mut on_path = ndarray::Array2::<bool>::from_elem(total.shape(), false);
    on_path[start] = true;

    // Upstream: follow the contributor carrying the longest upstream length.
    // Strict comparison keeps the lowest direction index on ties.
    let mut head = Vec::new();
    let mut current = start;
    loop {
        let mut best: Option<((usize, usize), f64)> = None;
        for (nr, nc, dir) in routing::contributors(flow_dir, encoding, current.0, current.1) {
            let up = upstream.data()[(nr, nc)];
            if upstream.is_nodata(up) || on_path[(nr, nc)] {
                continue;
            }
            let reach = up + routing::step_length(&steps, dir);
            if best.is_none_or(|(_, b)| reach > b) {
                best = Some(((nr, nc), reach));
            }
        }
        let Some((next, _)) = best else { break };
        on_path[next] = true;
        head.push(next);
        current = next;
    }

    let mut cells: Vec<(usize, usize)> = head.into_iter().rev().collect();
    cells.push(start);

    // Downstream: follow flow direction to the end of the watershed
    current = start;
    while let Some((nr, nc, _)) = routing::downstream(flow_dir, encoding, current.0, current.1) {
        if on_path[(nr, nc)] {
            break;
        }
        on_path[(nr, nc)] = true;
        cells.push((nr, nc));
        current = (nr, nc);
    }

    cells
}
