use glam::Vec3;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use worldtick_common::{EntityId, InstanceId};

/// Per-step information handed to every [`Tickable`].
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    pub tick: u64,
    pub instance: InstanceId,
}

/// Failure of a single entity step.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TickError(pub String);

impl TickError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Anything that advances by one simulation step per invocation.
pub trait Tickable: Send {
    fn tick(&mut self, ctx: &TickContext) -> Result<(), TickError>;

    /// Current world position, read after each successful step.
    fn position(&self) -> Vec3;
}

/// Entity category. Decides which set of an instance holds the entity and
/// which worker pool ticks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Creature,
    Object,
    Participant,
}

/// A live entity.
///
/// The body sits behind a mutex so at most one worker steps it at a time.
/// The last known position is cached separately so spatial queries never
/// wait on a running step.
pub struct Entity {
    id: EntityId,
    kind: EntityKind,
    body: Mutex<Box<dyn Tickable>>,
    position: RwLock<Vec3>,
    owner: Mutex<Option<InstanceId>>,
    ticks: AtomicU64,
}

pub type EntityHandle = Arc<Entity>;

/// Returned when an entity is handed to an instance while another owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("entity {entity} is already owned by instance {owner}")]
pub struct OwnershipError {
    pub entity: EntityId,
    pub owner: InstanceId,
}

impl Entity {
    pub fn new(kind: EntityKind, body: impl Tickable + 'static) -> EntityHandle {
        Self::with_id(EntityId::new(), kind, body)
    }

    pub fn with_id(id: EntityId, kind: EntityKind, body: impl Tickable + 'static) -> EntityHandle {
        let position = body.position();
        Arc::new(Self {
            id,
            kind,
            body: Mutex::new(Box::new(body)),
            position: RwLock::new(position),
            owner: Mutex::new(None),
            ticks: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Last position observed after a successful step.
    pub fn position(&self) -> Vec3 {
        *self.position.read()
    }

    /// Instance currently owning this entity.
    pub fn owner(&self) -> Option<InstanceId> {
        *self.owner.lock()
    }

    /// Whether the entity has been placed into an instance.
    pub fn is_spawned(&self) -> bool {
        self.owner().is_some()
    }

    /// Number of successful steps so far.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Advance the entity by one step.
    pub fn tick(&self, ctx: &TickContext) -> Result<(), TickError> {
        let mut body = self.body.lock();
        body.tick(ctx)?;
        *self.position.write() = body.position();
        self.ticks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Claim ownership for `instance` and run `attach` while the claim is held.
    ///
    /// Re-claiming by the current owner is a no-op and skips `attach`.
    pub(crate) fn claim(
        &self,
        instance: InstanceId,
        attach: impl FnOnce(),
    ) -> Result<bool, OwnershipError> {
        let mut owner = self.owner.lock();
        match *owner {
            Some(current) if current == instance => Ok(false),
            Some(current) => Err(OwnershipError {
                entity: self.id,
                owner: current,
            }),
            None => {
                attach();
                *owner = Some(instance);
                Ok(true)
            }
        }
    }

    /// Release ownership held by `instance`, running `detach` under the claim.
    pub(crate) fn release(&self, instance: InstanceId, detach: impl FnOnce()) -> bool {
        let mut owner = self.owner.lock();
        if *owner != Some(instance) {
            return false;
        }
        detach();
        *owner = None;
        true
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("position", &self.position())
            .field("owner", &self.owner())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bodies::Drifter;

    fn ctx() -> TickContext {
        TickContext {
            tick: 1,
            instance: InstanceId::new(),
        }
    }

    struct Failing;

    impl Tickable for Failing {
        fn tick(&mut self, _ctx: &TickContext) -> Result<(), TickError> {
            Err(TickError::new("broken"))
        }

        fn position(&self) -> Vec3 {
            Vec3::ZERO
        }
    }

    #[test]
    fn tick_refreshes_cached_position() {
        let e = Entity::new(
            EntityKind::Creature,
            Drifter::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)),
        );
        e.tick(&ctx()).unwrap();
        e.tick(&ctx()).unwrap();
        assert_eq!(e.position(), Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(e.tick_count(), 2);
    }

    #[test]
    fn failed_tick_is_not_counted() {
        let e = Entity::new(EntityKind::Object, Failing);
        assert!(e.tick(&ctx()).is_err());
        assert_eq!(e.tick_count(), 0);
    }

    #[test]
    fn claim_is_exclusive() {
        let e = Entity::new(EntityKind::Participant, Failing);
        let a = InstanceId::new();
        let b = InstanceId::new();

        assert_eq!(e.claim(a, || {}), Ok(true));
        assert_eq!(e.claim(a, || panic!("attach must not run twice")), Ok(false));
        assert_eq!(
            e.claim(b, || {}),
            Err(OwnershipError {
                entity: e.id(),
                owner: a
            })
        );

        assert!(!e.release(b, || {}));
        assert!(e.release(a, || {}));
        assert!(!e.is_spawned());
        assert_eq!(e.claim(b, || {}), Ok(true));
    }
}
