//! Watershed labeling from outlet cells
//!
//! Labels every cell with the identifier of the outlet its flow reaches.
//! Cells that reach no outlet stay no-data (`-1`).

use crate::hydrology::routing;
use flowpath_core::{Algorithm, D8Encoding, Error, Raster, Result};
use std::collections::VecDeque;

/// No-data value of watershed rasters
pub const WATERSHED_NODATA: i64 = -1;

/// An outlet identifier and the cell it sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seed {
    pub id: i64,
    pub row: usize,
    pub col: usize,
}

impl Seed {
    pub fn new(id: i64, row: usize, col: usize) -> Self {
        Self { id, row, col }
    }
}

/// Produces a watershed raster from a flow-direction raster and seeds
pub trait WatershedLabeler: Sync {
    /// Label every cell draining to a seed with that seed's id.
    ///
    /// The result lies on the same grid as `flow_dir`, with no-data
    /// [`WATERSHED_NODATA`] for unlabeled cells.
    fn label(&self, flow_dir: &Raster<u8>, encoding: D8Encoding, seeds: &[Seed]) -> Result<Raster<i64>>;
}

/// Parameters for watershed labeling
#[derive(Debug, Clone, Default)]
pub struct WatershedParams {
    /// Outlet cells; earlier seeds win shared cells
    pub seeds: Vec<Seed>,
    pub encoding: D8Encoding,
}

/// Breadth-first upstream labeling over D8 flow directions
#[derive(Debug, Clone, Copy, Default)]
pub struct D8WatershedLabeler;

impl Algorithm for D8WatershedLabeler {
    type Input = Raster<u8>;
    type Output = Raster<i64>;
    type Params = WatershedParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Watershed"
    }

    fn description(&self) -> &'static str {
        "Label watersheds upstream of outlet cells from D8 flow direction"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        watershed(&input, &params)
    }
}

impl WatershedLabeler for D8WatershedLabeler {
    fn label(&self, flow_dir: &Raster<u8>, encoding: D8Encoding, seeds: &[Seed]) -> Result<Raster<i64>> {
        watershed(
            flow_dir,
            &WatershedParams {
                seeds: seeds.to_vec(),
                encoding,
            },
        )
    }
}

/// Delineate the watershed of every seed.
///
/// All seeds are claimed before the traversal starts, so a downstream
/// outlet's watershed stops at any outlet nested inside it. A seed on a
/// no-data cell, or on a cell an earlier seed already claimed, labels
/// nothing.
///
/// # Returns
/// `Raster<i64>` of outlet ids, `-1` where no outlet is reached
pub fn watershed(flow_dir: &Raster<u8>, params: &WatershedParams) -> Result<Raster<i64>> {
    let (rows, cols) = flow_dir.shape();
    let mut labels = flow_dir.with_same_meta::<i64>(rows, cols);
    labels.data_mut().fill(WATERSHED_NODATA);
    labels.set_nodata(Some(WATERSHED_NODATA));

    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();

    for seed in &params.seeds {
        if seed.id < 0 {
            return Err(Error::InvalidParameter {
                name: "seeds",
                value: seed.id.to_string(),
                reason: "outlet ids must be non-negative".into(),
            });
        }
        if seed.row >= rows || seed.col >= cols {
            return Err(Error::IndexOutOfBounds {
                row: seed.row,
                col: seed.col,
                rows,
                cols,
            });
        }
        if !routing::is_valid(flow_dir, seed.row, seed.col)
            || labels.data()[(seed.row, seed.col)] != WATERSHED_NODATA
        {
            continue;
        }
        labels.data_mut()[(seed.row, seed.col)] = seed.id;
        queue.push_back((seed.row, seed.col));
    }

    // A cell joins the watershed of the cell its flow enters
    while let Some((row, col)) = queue.pop_front() {
        let id = labels.data()[(row, col)];
        for (nr, nc, _) in routing::contributors(flow_dir, params.encoding, row, col) {
            if labels.data()[(nr, nc)] != WATERSHED_NODATA {
                continue;
            }
            labels.data_mut()[(nr, nc)] = id;
            queue.push_back((nr, nc));
        }
    }

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpath_core::GeoTransform;

    /// 5x5 ESRI raster where every cell flows south
    fn south_flowing() -> Raster<u8> {
        let mut r = Raster::filled(5, 5, 4u8);
        r.set_transform(GeoTransform::new(0.0, 5.0, 1.0, -1.0));
        r
    }

    #[test]
    fn test_single_column_watershed() {
        let fdir = south_flowing();
        let labels = D8WatershedLabeler
            .label(&fdir, D8Encoding::Esri, &[Seed::new(7, 4, 0)])
            .unwrap();

        for row in 0..5 {
            assert_eq!(labels.get(row, 0).unwrap(), 7);
            for col in 1..5 {
                assert_eq!(labels.get(row, col).unwrap(), WATERSHED_NODATA);
            }
        }
        assert_eq!(labels.nodata(), Some(-1));
        assert_eq!(labels.transform(), fdir.transform());
    }

    #[test]
    fn test_nested_outlets_partition() {
        let fdir = south_flowing();
        let seeds = [Seed::new(1, 4, 2), Seed::new(2, 1, 2)];
        let labels = watershed(
            &fdir,
            &WatershedParams {
                seeds: seeds.to_vec(),
                encoding: D8Encoding::Esri,
            },
        )
        .unwrap();

        assert_eq!(labels.get(0, 2).unwrap(), 2);
        assert_eq!(labels.get(1, 2).unwrap(), 2);
        assert_eq!(labels.get(2, 2).unwrap(), 1);
        assert_eq!(labels.get(4, 2).unwrap(), 1);
    }

    #[test]
    fn test_shared_cell_goes_to_first_seed() {
        let fdir = south_flowing();
        let labels = D8WatershedLabeler
            .label(&fdir, D8Encoding::Esri, &[Seed::new(3, 4, 1), Seed::new(9, 4, 1)])
            .unwrap();
        assert!(labels.data().iter().all(|&v| v != 9));
        assert_eq!(labels.get(0, 1).unwrap(), 3);
    }

    #[test]
    fn test_sequential_encoding_and_algorithm_trait() {
        // 1x3 row flowing east (code 1 in both encodings) into a pit (0)
        let fdir = Raster::from_vec(vec![1u8, 1, 0], 1, 3).unwrap();
        let labels = D8WatershedLabeler
            .execute(
                fdir,
                WatershedParams {
                    seeds: vec![Seed::new(0, 0, 2)],
                    encoding: D8Encoding::Sequential,
                },
            )
            .unwrap();
        assert_eq!(labels.data().as_slice().unwrap(), &[0, 0, 0]);
    }

    #[test]
    fn test_seed_off_grid_is_an_error() {
        let fdir = south_flowing();
        let err = D8WatershedLabeler
            .label(&fdir, D8Encoding::Esri, &[Seed::new(1, 5, 0)])
            .unwrap_err();
        assert!(matches!(err, Error::IndexOutOfBounds { .. }));
    }
}
