//! Streaming: spatial cell residency, asynchronous cell loading, cell partitioning.
//!
//! # Invariants
//! - A cell is loaded at most once at a time; concurrent requests share the load.
//! - Ready callbacks run exactly once, outside any residency lock.
//! - Failed loads never invoke ready callbacks.

mod cell;
mod grid;
mod source;
mod store;

pub use cell::{Cell, CellHandle, CellLoadError};
pub use grid::GridPartition;
pub use source::{CellSource, DeferredCellSource, GeneratedCellSource, ImmediateCellSource, LoadCallback};
pub use store::{CellStats, CellStore, ReadyCallback};
