use glam::Vec3;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use worldtick_common::{CellCoord, EntityId, InstanceId};
use worldtick_stream::{CellHandle, CellSource, CellStore, GridPartition};

use crate::entity::{EntityHandle, EntityKind, OwnershipError};

/// Immutable view of an entity set taken at a point in time.
pub type EntitySnapshot = Arc<Vec<EntityHandle>>;

/// Copy-on-write entity set.
///
/// Readers take an `Arc` of the current vector; writers clone it only while a
/// snapshot is outstanding. A snapshot therefore never observes later inserts.
#[derive(Default)]
pub struct EntitySet {
    entities: RwLock<EntitySnapshot>,
}

impl EntitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> EntitySnapshot {
        Arc::clone(&*self.entities.read())
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.read().iter().any(|e| e.id() == id)
    }

    fn insert(&self, entity: EntityHandle) {
        let mut guard = self.entities.write();
        Arc::make_mut(&mut guard).push(entity);
    }

    fn remove(&self, id: EntityId) -> Option<EntityHandle> {
        let mut guard = self.entities.write();
        let index = guard.iter().position(|e| e.id() == id)?;
        Some(Arc::make_mut(&mut guard).swap_remove(index))
    }
}

/// The two batch groups dispatched per instance each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchGroup {
    /// Creatures and inert objects.
    General,
    /// Participants.
    Participant,
}

impl BatchGroup {
    fn index(self) -> usize {
        match self {
            Self::General => 0,
            Self::Participant => 1,
        }
    }
}

/// Marks a batch group of an instance as running. Cleared on drop.
pub struct BatchPermit {
    instance: InstanceHandle,
    group: BatchGroup,
}

impl BatchPermit {
    pub fn instance(&self) -> &InstanceHandle {
        &self.instance
    }

    pub fn group(&self) -> BatchGroup {
        self.group
    }
}

impl Drop for BatchPermit {
    fn drop(&mut self) {
        self.instance.in_flight[self.group.index()].store(false, Ordering::Release);
    }
}

/// An independent simulated world.
///
/// Holds three disjoint entity categories and the residency of its spatial
/// cells. Each entity set is synchronized on its own; no lock spans instances.
pub struct WorldInstance {
    id: InstanceId,
    creatures: EntitySet,
    objects: EntitySet,
    participants: EntitySet,
    cells: CellStore,
    in_flight: [AtomicBool; 2],
    created_at: Instant,
}

pub type InstanceHandle = Arc<WorldInstance>;

impl WorldInstance {
    pub fn new(cell_source: Arc<dyn CellSource>) -> InstanceHandle {
        Self::with_id(InstanceId::new(), cell_source)
    }

    pub fn with_id(id: InstanceId, cell_source: Arc<dyn CellSource>) -> InstanceHandle {
        Arc::new(Self {
            id,
            creatures: EntitySet::new(),
            objects: EntitySet::new(),
            participants: EntitySet::new(),
            cells: CellStore::new(cell_source),
            in_flight: [AtomicBool::new(false), AtomicBool::new(false)],
            created_at: Instant::now(),
        })
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn creatures(&self) -> EntitySnapshot {
        self.creatures.snapshot()
    }

    pub fn objects(&self) -> EntitySnapshot {
        self.objects.snapshot()
    }

    pub fn participants(&self) -> EntitySnapshot {
        self.participants.snapshot()
    }

    /// Total live entities across all categories.
    pub fn entity_count(&self) -> usize {
        self.creatures.len() + self.objects.len() + self.participants.len()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.creatures.contains(id) || self.objects.contains(id) || self.participants.contains(id)
    }

    fn set_for(&self, kind: EntityKind) -> &EntitySet {
        match kind {
            EntityKind::Creature => &self.creatures,
            EntityKind::Object => &self.objects,
            EntityKind::Participant => &self.participants,
        }
    }

    /// Transfer ownership of `entity` into this instance.
    ///
    /// Fails if another instance owns it. Adding an entity this instance
    /// already owns is a no-op.
    pub fn spawn(&self, entity: EntityHandle) -> Result<(), OwnershipError> {
        let set = self.set_for(entity.kind());
        let added = entity.claim(self.id, || set.insert(Arc::clone(&entity)))?;
        if added {
            tracing::trace!(instance = %self.id, entity = %entity.id(), kind = ?entity.kind(), "entity spawned");
        }
        Ok(())
    }

    /// Remove an entity from this instance, releasing ownership.
    pub fn remove(&self, entity: &EntityHandle) -> bool {
        let set = self.set_for(entity.kind());
        entity.release(self.id, || {
            set.remove(entity.id());
        })
    }

    /// Request the cell containing `position`; `on_ready` runs once it is resident.
    pub fn request_cell(&self, position: Vec3, on_ready: impl FnOnce(CellHandle) + Send + 'static) {
        self.cells.request(CellCoord::from_position(position), on_ready);
    }

    pub fn cells(&self) -> &CellStore {
        &self.cells
    }

    /// Current cell membership of every entity, by cached position.
    pub fn chunk_index(&self) -> GridPartition<EntityHandle> {
        let all = [self.creatures(), self.objects(), self.participants()];
        GridPartition::build(
            all.iter()
                .flat_map(|set| set.iter())
                .map(|e| (e.position(), Arc::clone(e))),
        )
    }

    /// Entities whose cached position lies in `coord`.
    pub fn entities_in_cell(&self, coord: CellCoord) -> Vec<EntityHandle> {
        self.chunk_index().items_in_cell(coord).to_vec()
    }

    /// Mark `group` as running. `None` while a previous batch still holds it.
    pub fn try_begin_batch(self: &Arc<Self>, group: BatchGroup) -> Option<BatchPermit> {
        self.in_flight[group.index()]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(BatchPermit {
            instance: Arc::clone(self),
            group,
        })
    }

    pub fn is_batch_running(&self, group: BatchGroup) -> bool {
        self.in_flight[group.index()].load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bodies::{Drifter, Resting};
    use crate::entity::Entity;
    use std::sync::atomic::AtomicUsize;
    use worldtick_stream::{DeferredCellSource, ImmediateCellSource};

    fn instance() -> InstanceHandle {
        WorldInstance::new(Arc::new(ImmediateCellSource::default()))
    }

    #[test]
    fn spawn_routes_by_kind() {
        let w = instance();
        w.spawn(Entity::new(EntityKind::Creature, Resting::default())).unwrap();
        w.spawn(Entity::new(EntityKind::Object, Resting::default())).unwrap();
        w.spawn(Entity::new(EntityKind::Object, Resting::default())).unwrap();
        w.spawn(Entity::new(EntityKind::Participant, Resting::default())).unwrap();

        assert_eq!(w.creatures().len(), 1);
        assert_eq!(w.objects().len(), 2);
        assert_eq!(w.participants().len(), 1);
        assert_eq!(w.entity_count(), 4);
    }

    #[test]
    fn snapshot_does_not_see_later_inserts() {
        let w = instance();
        w.spawn(Entity::new(EntityKind::Creature, Resting::default())).unwrap();
        let before = w.creatures();
        w.spawn(Entity::new(EntityKind::Creature, Resting::default())).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(w.creatures().len(), 2);
    }

    #[test]
    fn entity_is_never_in_two_instances() {
        let a = instance();
        let b = instance();
        let e = Entity::new(EntityKind::Participant, Resting::default());

        a.spawn(Arc::clone(&e)).unwrap();
        let err = b.spawn(Arc::clone(&e)).unwrap_err();
        assert_eq!(err.owner, a.id());
        assert!(a.contains(e.id()));
        assert!(!b.contains(e.id()));

        // idempotent for the owner
        a.spawn(Arc::clone(&e)).unwrap();
        assert_eq!(a.participants().len(), 1);
    }

    #[test]
    fn remove_releases_ownership() {
        let a = instance();
        let b = instance();
        let e = Entity::new(EntityKind::Creature, Resting::default());
        a.spawn(Arc::clone(&e)).unwrap();

        assert!(!b.remove(&e));
        assert!(a.remove(&e));
        assert!(!a.contains(e.id()));
        assert_eq!(e.owner(), None);

        b.spawn(Arc::clone(&e)).unwrap();
        assert_eq!(e.owner(), Some(b.id()));
    }

    #[test]
    fn concurrent_spawns_into_same_instance() {
        let w = instance();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        w.spawn(Entity::new(EntityKind::Participant, Resting::default()))
                            .unwrap();
                    }
                });
            }
        });
        assert_eq!(w.participants().len(), 400);
    }

    #[test]
    fn chunk_index_groups_by_position() {
        let w = instance();
        let near = Entity::new(EntityKind::Creature, Resting::at(Vec3::new(1.0, 0.0, 1.0)));
        let far = Entity::new(
            EntityKind::Object,
            Drifter::new(Vec3::new(40.0, 0.0, 0.0), Vec3::ZERO),
        );
        w.spawn(Arc::clone(&near)).unwrap();
        w.spawn(Arc::clone(&far)).unwrap();

        let index = w.chunk_index();
        assert_eq!(index.cell_count(), 2);
        let in_origin = w.entities_in_cell(CellCoord::new(0, 0));
        assert_eq!(in_origin.len(), 1);
        assert_eq!(in_origin[0].id(), near.id());
    }

    #[test]
    fn request_cell_uses_position_cell() {
        let source = Arc::new(DeferredCellSource::new());
        let w = WorldInstance::new(source.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        w.request_cell(Vec3::new(33.0, 70.0, -1.0), move |cell| {
            assert_eq!(cell.coord, CellCoord::new(2, -1));
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(source.pending_coords(), vec![CellCoord::new(2, -1)]);
        source.complete_all();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn batch_permit_is_exclusive_per_group() {
        let w = instance();
        let general = w.try_begin_batch(BatchGroup::General).unwrap();
        assert!(w.try_begin_batch(BatchGroup::General).is_none());
        assert!(w.is_batch_running(BatchGroup::General));

        let participant = w.try_begin_batch(BatchGroup::Participant);
        assert!(participant.is_some());

        drop(general);
        assert!(!w.is_batch_running(BatchGroup::General));
        assert!(w.try_begin_batch(BatchGroup::General).is_some());
    }
}
