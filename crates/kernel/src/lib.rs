//! World Kernel: world instances, tickable entities, instance registry, event bus.
//!
//! # Invariants
//! - An entity is owned by at most one instance; ownership moves atomically.
//! - Entity-set snapshots are immutable; later mutations never show up in them.
//! - A batch group of an instance is held by at most one running batch.

pub mod bodies;
mod entity;
mod events;
mod instance;
mod registry;

pub use entity::{Entity, EntityHandle, EntityKind, OwnershipError, TickContext, TickError, Tickable};
pub use events::{Event, EventBus, EventError, ListenerError, ListenerResult, LoginEvent, SpawnEvent};
pub use instance::{BatchGroup, BatchPermit, EntitySet, EntitySnapshot, InstanceHandle, WorldInstance};
pub use registry::{InstanceManager, WorldRegistry};
