use glam::Vec3;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use worldtick_common::{EntityId, InstanceId, SessionId};

use crate::instance::InstanceHandle;

/// Error type listeners may return.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by every listener.
pub type ListenerResult = Result<(), ListenerError>;

/// Marker for types dispatched through the [`EventBus`].
pub trait Event: Any + Send {
    /// Name used in diagnostics.
    const NAME: &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("listener for {event} failed: {message}")]
    ListenerFailed { event: &'static str, message: String },
}

type ErasedListener = Arc<dyn Fn(&mut dyn Any) -> ListenerResult + Send + Sync>;

/// Synchronous typed event dispatch.
///
/// Listeners run on the thread that fires the event, in registration order.
/// The first failing listener stops dispatch and its error is returned.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<TypeId, Vec<ErasedListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for events of type `E`.
    pub fn listen<E: Event>(&self, listener: impl Fn(&mut E) -> ListenerResult + Send + Sync + 'static) {
        let erased: ErasedListener = Arc::new(move |event: &mut dyn Any| match event.downcast_mut::<E>() {
            Some(event) => listener(event),
            None => Ok(()),
        });
        self.listeners
            .write()
            .entry(TypeId::of::<E>())
            .or_default()
            .push(erased);
    }

    /// Dispatch `event` to every listener of its type.
    pub fn fire<E: Event>(&self, event: &mut E) -> Result<(), EventError> {
        // Clone the list so listeners may register further listeners.
        let listeners = match self.listeners.read().get(&TypeId::of::<E>()) {
            Some(list) => list.clone(),
            None => return Ok(()),
        };
        for listener in listeners {
            listener(&mut *event).map_err(|e| EventError::ListenerFailed {
                event: E::NAME,
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn listener_count<E: Event>(&self) -> usize {
        self.listeners
            .read()
            .get(&TypeId::of::<E>())
            .map_or(0, Vec::len)
    }
}

/// Fired when a waiting participant is picked up for onboarding.
///
/// Listeners may choose the instance the participant spawns in.
pub struct LoginEvent {
    pub session: SessionId,
    pub entity: EntityId,
    pub position: Vec3,
    spawning_instance: Option<InstanceHandle>,
}

impl LoginEvent {
    pub fn new(session: SessionId, entity: EntityId, position: Vec3) -> Self {
        Self {
            session,
            entity,
            position,
            spawning_instance: None,
        }
    }

    pub fn spawning_instance(&self) -> Option<&InstanceHandle> {
        self.spawning_instance.as_ref()
    }

    pub fn set_spawning_instance(&mut self, instance: InstanceHandle) {
        self.spawning_instance = Some(instance);
    }

    pub fn take_spawning_instance(&mut self) -> Option<InstanceHandle> {
        self.spawning_instance.take()
    }
}

impl Event for LoginEvent {
    const NAME: &'static str = "login";
}

/// Fired once a participant has been placed into an instance.
#[derive(Debug, Clone)]
pub struct SpawnEvent {
    pub session: SessionId,
    pub entity: EntityId,
    pub instance: InstanceId,
    pub position: Vec3,
}

impl Event for SpawnEvent {
    const NAME: &'static str = "spawn";
}
