//! Shared identifiers and spatial types used across the worldtick crates.

mod types;

pub use types::{CELL_SIZE, CellCoord, EntityId, InstanceId, SessionId};
