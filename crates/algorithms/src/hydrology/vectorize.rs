//! Path mask to polyline conversion
//!
//! Lines connect the centers of mask cells in flow order. A chain starts
//! at every mask cell that no other mask cell drains into and follows flow
//! direction while it stays inside the mask. It stops after the first cell
//! another chain already emitted, so tributaries end on the trunk.

use crate::hydrology::routing;
use flowpath_core::{D8Encoding, Raster, Result};
use geo_types::{Coord, LineString, MultiLineString};
use ndarray::Array2;

/// Converts a binary path mask to line geometry
pub trait RasterVectorizer: Sync {
    /// Lines through the cells where `mask` is 1, routed by `flow_dir`
    fn vectorize(
        &self,
        mask: &Raster<u8>,
        flow_dir: &Raster<u8>,
        encoding: D8Encoding,
    ) -> Result<MultiLineString<f64>>;
}

/// Follows D8 flow direction through the mask
#[derive(Debug, Clone, Copy, Default)]
pub struct D8PathVectorizer;

impl RasterVectorizer for D8PathVectorizer {
    fn vectorize(
        &self,
        mask: &Raster<u8>,
        flow_dir: &Raster<u8>,
        encoding: D8Encoding,
    ) -> Result<MultiLineString<f64>> {
        mask.ensure_same_grid(flow_dir)?;
        let (rows, cols) = mask.shape();
        let in_mask = |r: usize, c: usize| mask.data()[(r, c)] == 1;

        let mut heads = Vec::new();
        for row in 0..rows {
            for col in 0..cols {
                if in_mask(row, col)
                    && !routing::contributors(flow_dir, encoding, row, col)
                        .any(|(nr, nc, _)| in_mask(nr, nc))
                {
                    heads.push((row, col));
                }
            }
        }

        let mut emitted = Array2::<bool>::from_elem((rows, cols), false);
        let mut lines = Vec::new();

        let chain_from = |start: (usize, usize), emitted: &mut Array2<bool>| {
            let mut coords = Vec::new();
            let mut current = start;
            loop {
                let (x, y) = mask.cell_center(current.0, current.1);
                coords.push(Coord { x, y });
                if emitted[current] {
                    break;
                }
                emitted[current] = true;
                match routing::downstream(flow_dir, encoding, current.0, current.1) {
                    Some((nr, nc, _)) if in_mask(nr, nc) => current = (nr, nc),
                    _ => break,
                }
            }
            LineString::new(coords)
        };

        for head in heads {
            lines.push(chain_from(head, &mut emitted));
        }

        // Mask cells unreachable from any head (only possible on a cycle)
        for row in 0..rows {
            for col in 0..cols {
                if in_mask(row, col) && !emitted[(row, col)] {
                    lines.push(chain_from((row, col), &mut emitted));
                }
            }
        }

        Ok(MultiLineString::new(lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpath_core::GeoTransform;

    fn grid<T: flowpath_core::RasterElement>(data: Vec<T>, rows: usize, cols: usize) -> Raster<T> {
        let mut r = Raster::from_vec(data, rows, cols).unwrap();
        r.set_transform(GeoTransform::new(100.0, 200.0, 10.0, -10.0));
        r
    }

    #[test]
    fn test_single_chain_in_flow_order() {
        // Column flowing north: the line runs bottom to top
        let fdir = grid(vec![64u8, 64, 64], 3, 1);
        let mask = grid(vec![1u8, 1, 1], 3, 1);
        let lines = D8PathVectorizer.vectorize(&mask, &fdir, D8Encoding::Esri).unwrap();

        assert_eq!(lines.0.len(), 1);
        let ys: Vec<f64> = lines.0[0].coords().map(|c| c.y).collect();
        assert_eq!(ys, vec![175.0, 185.0, 195.0]);
        assert!(lines.0[0].coords().all(|c| c.x == 105.0));
    }

    #[test]
    fn test_branches_join_trunk() {
        // SE . SW / . S . / . S .   both upper corners drain to (1,1)
        let fdir = grid(vec![2u8, 255, 8, 255, 4, 255, 255, 4, 255], 3, 3);
        let mask = grid(vec![1u8, 0, 1, 0, 1, 0, 0, 1, 0], 3, 3);
        let lines = D8PathVectorizer.vectorize(&mask, &fdir, D8Encoding::Esri).unwrap();

        assert_eq!(lines.0.len(), 2);
        assert_eq!(lines.0[0].0.len(), 3);
        // Second branch: its own cell, then the shared confluence
        assert_eq!(lines.0[1].0.len(), 2);
        assert_eq!(lines.0[1].0[1], lines.0[0].0[1]);
    }

    #[test]
    fn test_single_cell_gives_single_vertex() {
        let fdir = grid(vec![0u8], 1, 1);
        let mask = grid(vec![1u8], 1, 1);
        let lines = D8PathVectorizer.vectorize(&mask, &fdir, D8Encoding::Esri).unwrap();
        assert_eq!(lines.0.len(), 1);
        assert_eq!(lines.0[0].0, vec![Coord { x: 105.0, y: 195.0 }]);
    }

    #[test]
    fn test_empty_mask() {
        let fdir = grid(vec![4u8; 4], 2, 2);
        let mask = grid(vec![0u8; 4], 2, 2);
        let lines = D8PathVectorizer.vectorize(&mask, &fdir, D8Encoding::Esri).unwrap();
        assert!(lines.0.is_empty());
    }
}
