use parking_lot::RwLock;
use std::sync::Arc;
use worldtick_common::InstanceId;
use worldtick_stream::CellSource;

use crate::instance::{InstanceHandle, WorldInstance};

/// The set of active world instances, as seen by the scheduler.
pub trait WorldRegistry: Send + Sync {
    /// Instances to tick. The returned list is a snapshot.
    fn active_instances(&self) -> Vec<InstanceHandle>;

    /// Create and register a fresh instance for a participant with no
    /// destination.
    fn create_default_instance(&self) -> InstanceHandle;
}

/// In-process registry owning every instance.
///
/// New instances share one cell source.
pub struct InstanceManager {
    instances: RwLock<Vec<InstanceHandle>>,
    cell_source: Arc<dyn CellSource>,
}

impl InstanceManager {
    pub fn new(cell_source: Arc<dyn CellSource>) -> Self {
        Self {
            instances: RwLock::new(Vec::new()),
            cell_source,
        }
    }

    /// Create and register a new instance.
    pub fn create_instance(&self) -> InstanceHandle {
        let instance = WorldInstance::new(Arc::clone(&self.cell_source));
        self.instances.write().push(Arc::clone(&instance));
        tracing::info!(instance = %instance.id(), "instance created");
        instance
    }

    /// Register an instance created elsewhere. Ignored if already registered.
    pub fn register(&self, instance: InstanceHandle) {
        let mut instances = self.instances.write();
        if !instances.iter().any(|i| i.id() == instance.id()) {
            instances.push(instance);
        }
    }

    /// Unregister an instance. Batches already submitted keep their handle.
    pub fn remove(&self, id: InstanceId) -> Option<InstanceHandle> {
        let mut instances = self.instances.write();
        let index = instances.iter().position(|i| i.id() == id)?;
        let removed = instances.remove(index);
        tracing::info!(instance = %id, entities = removed.entity_count(), "instance removed");
        Some(removed)
    }

    pub fn get(&self, id: InstanceId) -> Option<InstanceHandle> {
        self.instances.read().iter().find(|i| i.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }
}

impl WorldRegistry for InstanceManager {
    fn active_instances(&self) -> Vec<InstanceHandle> {
        self.instances.read().clone()
    }

    fn create_default_instance(&self) -> InstanceHandle {
        self.create_instance()
    }
}
