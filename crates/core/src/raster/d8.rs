//! D8 flow direction encodings
//!
//! Directions are handled internally as an index into [`OFFSETS`]:
//! ```text
//!   3  2  1
//!   4  .  0
//!   5  6  7
//! ```
//! Two on-disk encodings are supported, see [`D8Encoding`].

use serde::{Deserialize, Serialize};

/// Direction offsets: (row_offset, col_offset), indexed E, NE, N, NW, W, SW, S, SE
pub const OFFSETS: [(isize, isize); 8] = [
    (0, 1),   // 0: E
    (-1, 1),  // 1: NE
    (-1, 0),  // 2: N
    (-1, -1), // 3: NW
    (0, -1),  // 4: W
    (1, -1),  // 5: SW
    (1, 0),   // 6: S
    (1, 1),   // 7: SE
];

/// ESRI power-of-two codes in [`OFFSETS`] order
const ESRI_CODES: [u8; 8] = [1, 128, 64, 32, 16, 8, 4, 2];

/// No-data value used for masked flow-direction rasters
pub const FLOW_DIR_NODATA: u8 = 255;

/// How direction codes are stored in a flow-direction raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum D8Encoding {
    /// 1=E, 2=SE, 4=S, 8=SW, 16=W, 32=NW, 64=N, 128=NE
    #[default]
    Esri,
    /// 1=E, 2=NE, 3=N, 4=NW, 5=W, 6=SW, 7=S, 8=SE, 0=pit
    Sequential,
}

impl D8Encoding {
    /// Direction index for a stored code, `None` for pits, sinks and any
    /// code the encoding does not define.
    pub fn decode(self, code: u8) -> Option<usize> {
        match self {
            D8Encoding::Esri => ESRI_CODES.iter().position(|&c| c == code),
            D8Encoding::Sequential => match code {
                1..=8 => Some((code - 1) as usize),
                _ => None,
            },
        }
    }

    /// Stored code for a direction index
    pub fn encode(self, index: usize) -> u8 {
        match self {
            D8Encoding::Esri => ESRI_CODES[index],
            D8Encoding::Sequential => index as u8 + 1,
        }
    }
}

/// Get the opposite direction index
pub fn opposite(index: usize) -> usize {
    (index + 4) % 8
}

/// Neighbor of (row, col) in direction `index`, if it lies on a
/// `rows` x `cols` grid
pub fn neighbor(row: usize, col: usize, index: usize, rows: usize, cols: usize) -> Option<(usize, usize)> {
    let (dr, dc) = OFFSETS[index];
    let nr = row as isize + dr;
    let nc = col as isize + dc;

    if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
        None
    } else {
        Some((nr as usize, nc as usize))
    }
}
