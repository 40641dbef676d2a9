use std::sync::Arc;
use std::time::Instant;
use worldtick_common::CellCoord;

/// Resident cell data.
///
/// The storage format of real cell content is owned by the loader; the
/// scheduler only needs to know that a cell is resident and where it is.
#[derive(Debug, Clone)]
pub struct Cell {
    pub coord: CellCoord,
    /// Terrain surface height used for placement.
    pub surface_height: i32,
    pub loaded_at: Instant,
}

/// Shared handle to a resident cell.
pub type CellHandle = Arc<Cell>;

impl Cell {
    /// Generate a cell deterministically from its coordinate and a world seed.
    pub fn generate(coord: CellCoord, seed: u64) -> Self {
        let key = seed ^ ((coord.x as u32 as u64) << 32 | coord.z as u32 as u64);
        let surface_height = 48 + (splitmix64(key) % 32) as i32;
        Self {
            coord,
            surface_height,
            loaded_at: Instant::now(),
        }
    }

    /// A flat cell at the given height.
    pub fn flat(coord: CellCoord, surface_height: i32) -> Self {
        Self {
            coord,
            surface_height,
            loaded_at: Instant::now(),
        }
    }
}

/// Errors raised by a [`crate::CellSource`] while producing a cell.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CellLoadError {
    #[error("cell {coord} generation failed: {message}")]
    Generation { coord: CellCoord, message: String },
    #[error("cell {0} is unavailable")]
    Unavailable(CellCoord),
}

fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
