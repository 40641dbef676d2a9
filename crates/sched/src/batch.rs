use std::panic::{AssertUnwindSafe, catch_unwind};
use worldtick_kernel::{EntityHandle, TickContext};

use crate::pool::panic_message;
use crate::stats::SchedulerStats;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BatchOutcome {
    pub ticked: u64,
    pub failed: u64,
}

/// Step every entity once, in order. A failing or panicking entity is
/// logged and counted, then the batch moves on.
pub(crate) fn run_batch<'a>(
    entities: impl IntoIterator<Item = &'a EntityHandle>,
    ctx: &TickContext,
    stats: &SchedulerStats,
) -> BatchOutcome {
    let _span = tracing::debug_span!("batch", tick = ctx.tick, instance = %ctx.instance).entered();
    let mut outcome = BatchOutcome::default();
    for entity in entities {
        let message = match catch_unwind(AssertUnwindSafe(|| entity.tick(ctx))) {
            Ok(Ok(())) => {
                outcome.ticked += 1;
                continue;
            }
            Ok(Err(err)) => err.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };
        outcome.failed += 1;
        tracing::warn!(
            tick = ctx.tick,
            instance = %ctx.instance,
            entity = %entity.id(),
            kind = ?entity.kind(),
            error = %message,
            "entity tick failed"
        );
    }
    stats.entities_ticked(outcome.ticked);
    stats.entity_failures(outcome.failed);
    tracing::trace!(ticked = outcome.ticked, failed = outcome.failed, "batch done");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use worldtick_common::InstanceId;
    use worldtick_kernel::bodies::Resting;
    use worldtick_kernel::{Entity, EntityKind, TickError, Tickable};

    struct Faulty;

    impl Tickable for Faulty {
        fn tick(&mut self, _ctx: &TickContext) -> Result<(), TickError> {
            Err(TickError::new("pathfinding exploded"))
        }

        fn position(&self) -> Vec3 {
            Vec3::ZERO
        }
    }

    struct Panicky;

    impl Tickable for Panicky {
        fn tick(&mut self, _ctx: &TickContext) -> Result<(), TickError> {
            panic!("unreachable state")
        }

        fn position(&self) -> Vec3 {
            Vec3::ZERO
        }
    }

    fn ctx() -> TickContext {
        TickContext {
            tick: 1,
            instance: InstanceId::new(),
        }
    }

    #[test]
    fn healthy_batch_ticks_everyone() {
        let stats = SchedulerStats::default();
        let entities: Vec<_> = (0..4)
            .map(|_| Entity::new(EntityKind::Creature, Resting::default()))
            .collect();
        let outcome = run_batch(&entities, &ctx(), &stats);
        assert_eq!(outcome, BatchOutcome { ticked: 4, failed: 0 });
        assert!(entities.iter().all(|e| e.tick_count() == 1));
    }

    #[test]
    fn failures_are_isolated_and_counted_once() {
        let stats = SchedulerStats::default();
        let entities = vec![
            Entity::new(EntityKind::Creature, Resting::default()),
            Entity::new(EntityKind::Creature, Faulty),
            Entity::new(EntityKind::Creature, Resting::default()),
            Entity::new(EntityKind::Object, Panicky),
            Entity::new(EntityKind::Object, Resting::default()),
        ];
        let outcome = run_batch(&entities, &ctx(), &stats);
        assert_eq!(outcome, BatchOutcome { ticked: 3, failed: 2 });
        assert_eq!(entities[2].tick_count(), 1);
        assert_eq!(entities[4].tick_count(), 1);
        assert_eq!(entities[1].tick_count(), 0);
        let snap = stats.snapshot();
        assert_eq!(snap.entities_ticked, 3);
        assert_eq!(snap.entity_failures, 2);
    }
}
