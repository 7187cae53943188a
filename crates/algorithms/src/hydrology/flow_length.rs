//! Flow length along D8 flow paths
//!
//! - Upstream: length of the longest flow path reaching each cell from a
//!   source cell (a cell nothing drains into). Sources are 0.
//! - Downstream: length of the flow path from each cell to the terminal
//!   cell its flow ends in. Terminal cells are 0.
//!
//! Orthogonal steps measure one cell width or height, diagonal steps the
//! cell diagonal. No-data cells are NaN in the output and never traversed.

use crate::hydrology::routing;
use flowpath_core::{Algorithm, D8Encoding, Error, Raster, Result};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Which way flow length is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowLengthDirection {
    /// Longest distance from any upstream source
    #[default]
    Upstream,
    /// Distance to the end of the flow path
    Downstream,
}

/// Parameters for flow length
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowLengthParams {
    pub direction: FlowLengthDirection,
    pub encoding: D8Encoding,
}

/// Flow length algorithm
#[derive(Debug, Clone, Default)]
pub struct FlowLength;

impl Algorithm for FlowLength {
    type Input = Raster<u8>;
    type Output = Raster<f64>;
    type Params = FlowLengthParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Flow Length"
    }

    fn description(&self) -> &'static str {
        "Upstream or downstream flow path length from D8 flow direction"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        flow_length(&input, params)
    }
}

/// Flow length in the requested direction
pub fn flow_length(flow_dir: &Raster<u8>, params: FlowLengthParams) -> Result<Raster<f64>> {
    match params.direction {
        FlowLengthDirection::Upstream => upstream_flow_length(flow_dir, params.encoding),
        FlowLengthDirection::Downstream => downstream_flow_length(flow_dir, params.encoding),
    }
}

/// Longest upstream flow length reaching each cell.
///
/// # Algorithm
/// 1. Count incoming flows for each valid cell (in-degree)
/// 2. Start from cells with in-degree 0 (sources)
/// 3. Propagate downstream, keeping the longest incoming distance
///
/// # Errors
/// [`Error::Algorithm`] if the flow directions contain a cycle.
pub fn upstream_flow_length(flow_dir: &Raster<u8>, encoding: D8Encoding) -> Result<Raster<f64>> {
    let (rows, cols) = flow_dir.shape();
    let steps = flow_dir.transform().step_lengths();

    let mut in_degree = Array2::<u32>::zeros((rows, cols));
    let mut length = Array2::<f64>::from_elem((rows, cols), f64::NAN);
    let mut valid = 0usize;

    for row in 0..rows {
        for col in 0..cols {
            if !routing::is_valid(flow_dir, row, col) {
                continue;
            }
            valid += 1;
            length[(row, col)] = 0.0;
            if let Some((nr, nc, _)) = routing::downstream(flow_dir, encoding, row, col) {
                in_degree[(nr, nc)] += 1;
            }
        }
    }

    let mut queue: Vec<(usize, usize)> = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            if in_degree[(row, col)] == 0 && routing::is_valid(flow_dir, row, col) {
                queue.push((row, col));
            }
        }
    }

    // Topological order: a cell is popped only after all its contributors
    let mut processed = 0usize;
    while let Some((row, col)) = queue.pop() {
        processed += 1;
        let Some((nr, nc, dir)) = routing::downstream(flow_dir, encoding, row, col) else {
            continue;
        };

        let candidate = length[(row, col)] + routing::step_length(&steps, dir);
        if candidate > length[(nr, nc)] {
            length[(nr, nc)] = candidate;
        }

        in_degree[(nr, nc)] -= 1;
        if in_degree[(nr, nc)] == 0 {
            queue.push((nr, nc));
        }
    }

    if processed != valid {
        return Err(cycle_error(valid - processed));
    }

    Ok(length_raster(flow_dir, length))
}

/// Flow length from each cell down to the end of its flow path.
///
/// Walks upstream breadth-first from every terminal cell.
///
/// # Errors
/// [`Error::Algorithm`] if the flow directions contain a cycle.
pub fn downstream_flow_length(flow_dir: &Raster<u8>, encoding: D8Encoding) -> Result<Raster<f64>> {
    let (rows, cols) = flow_dir.shape();
    let steps = flow_dir.transform().step_lengths();

    let mut length = Array2::<f64>::from_elem((rows, cols), f64::NAN);
    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
    let mut valid = 0usize;

    for row in 0..rows {
        for col in 0..cols {
            if !routing::is_valid(flow_dir, row, col) {
                continue;
            }
            valid += 1;
            if routing::downstream(flow_dir, encoding, row, col).is_none() {
                length[(row, col)] = 0.0;
                queue.push_back((row, col));
            }
        }
    }

    let mut reached = queue.len();
    while let Some((row, col)) = queue.pop_front() {
        let base = length[(row, col)];
        for (nr, nc, dir) in routing::contributors(flow_dir, encoding, row, col) {
            length[(nr, nc)] = base + routing::step_length(&steps, dir);
            reached += 1;
            queue.push_back((nr, nc));
        }
    }

    // Cells on a cycle never reach a terminal cell
    if reached != valid {
        return Err(cycle_error(valid - reached));
    }

    Ok(length_raster(flow_dir, length))
}

/// Cell-wise sum of two flow length rasters.
///
/// The result is no-data wherever either operand is no-data.
pub fn sum_flow_lengths(a: &Raster<f64>, b: &Raster<f64>) -> Result<Raster<f64>> {
    a.ensure_same_grid(b)?;

    let mut data = Array2::<f64>::from_elem(a.shape(), f64::NAN);
    Zip::from(&mut data)
        .and(a.data())
        .and(b.data())
        .for_each(|out, &x, &y| {
            if !a.is_nodata(x) && !b.is_nodata(y) {
                *out = x + y;
            }
        });

    let mut output = a.with_same_meta::<f64>(0, 0);
    *output.data_mut() = data;
    output.set_nodata(Some(f64::NAN));
    Ok(output)
}

fn length_raster(flow_dir: &Raster<u8>, length: Array2<f64>) -> Raster<f64> {
    let mut output = flow_dir.with_same_meta::<f64>(0, 0);
    *output.data_mut() = length;
    output.set_nodata(Some(f64::NAN));
    output
}

fn cycle_error(cells: usize) -> Error {
    Error::Algorithm(format!(
        "flow directions contain a cycle ({} cells never reach a terminal cell)",
        cells
    ))
}
