use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use worldtick_kernel::{BatchGroup, EventBus, InstanceHandle, TickContext, WorldRegistry};
use worldtick_stream::GridPartition;

use crate::batch::run_batch;
use crate::config::{PartitionStrategy, SchedulerConfig};
use crate::error::SchedError;
use crate::onboarding::{Onboarding, OnboardingTicket};
use crate::pool::WorkerPool;
use crate::queue::{OnboardingQueue, OnboardingSender, WaitingParticipant};
use crate::stats::{SchedulerStats, StatsSnapshot};

/// What a single `run_tick` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub tick: u64,
    pub instances: usize,
    pub onboardings_started: usize,
    pub onboardings_expired: usize,
    pub general_batches: usize,
    pub participant_batches: usize,
    /// Groups skipped because their previous batch was still running.
    pub batches_skipped: usize,
    /// Time spent submitting work. Batches run after this returns.
    pub elapsed: Duration,
}

struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Per-tick orchestrator.
///
/// Each tick drains the onboarding queue into the participant pool, then
/// submits one general batch and one participant batch per active
/// instance. `run_tick` only submits; it never waits for batches.
pub struct TickScheduler {
    config: SchedulerConfig,
    registry: Arc<dyn WorldRegistry>,
    events: Arc<EventBus>,
    queue: OnboardingQueue,
    general: WorkerPool,
    participants: WorkerPool,
    stats: Arc<SchedulerStats>,
    onboarding: Arc<Onboarding>,
    in_flight: Mutex<Vec<OnboardingTicket>>,
    tick: AtomicU64,
    ticking: AtomicBool,
}

impl TickScheduler {
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<dyn WorldRegistry>,
        events: Arc<EventBus>,
    ) -> Result<Self, SchedError> {
        config.validate()?;
        let general = WorkerPool::new("general", config.general_pool_size)?;
        let participants = WorkerPool::new("participant", config.participant_pool_size)?;
        let stats = Arc::new(SchedulerStats::default());
        let onboarding = Arc::new(Onboarding {
            registry: Arc::clone(&registry),
            events: Arc::clone(&events),
            stats: Arc::clone(&stats),
            cell_timeout: config.cell_load_timeout(),
        });
        tracing::info!(
            general = general.threads(),
            participant = participants.threads(),
            partition = ?config.partition,
            "tick scheduler ready"
        );
        Ok(Self {
            config,
            registry,
            events,
            queue: OnboardingQueue::new(),
            general,
            participants,
            stats,
            onboarding,
            in_flight: Mutex::new(Vec::new()),
            tick: AtomicU64::new(0),
            ticking: AtomicBool::new(false),
        })
    }

    /// Add a participant to the onboarding queue. Never blocks.
    pub fn enqueue(&self, participant: WaitingParticipant) -> OnboardingTicket {
        self.queue.push(participant)
    }

    /// Enqueue handle that can be moved to other threads.
    pub fn sender(&self) -> OnboardingSender {
        self.queue.sender()
    }

    /// Run one scheduling step.
    ///
    /// Fails with [`SchedError::TickInFlight`] if another call is still
    /// submitting.
    pub fn run_tick(&self) -> Result<TickSummary, SchedError> {
        if self.ticking.swap(true, Ordering::AcqRel) {
            return Err(SchedError::TickInFlight);
        }
        let _guard = TickGuard(&self.ticking);
        let start = Instant::now();
        let tick = self.tick.fetch_add(1, Ordering::AcqRel) + 1;
        let _span = tracing::debug_span!("tick", tick).entered();

        let mut summary = TickSummary {
            tick,
            ..TickSummary::default()
        };
        summary.onboardings_expired = self.expire_onboardings(start);
        summary.onboardings_started = self.drain_onboarding();

        let instances = self.registry.active_instances();
        summary.instances = instances.len();
        for instance in &instances {
            self.dispatch(instance, tick, &mut summary);
        }

        self.stats.tick();
        self.stats.general_batches(summary.general_batches as u64);
        self.stats.participant_batches(summary.participant_batches as u64);
        summary.elapsed = start.elapsed();
        tracing::trace!(
            instances = summary.instances,
            onboarding = summary.onboardings_started,
            general = summary.general_batches,
            participant = summary.participant_batches,
            skipped = summary.batches_skipped,
            elapsed_us = summary.elapsed.as_micros() as u64,
            "tick submitted"
        );
        Ok(summary)
    }

    fn expire_onboardings(&self, now: Instant) -> usize {
        let mut in_flight = self.in_flight.lock();
        let mut expired = 0;
        in_flight.retain(|ticket| {
            if ticket.expire_if_overdue(now) {
                expired += 1;
                tracing::warn!(
                    session = %ticket.session(),
                    waited_ms = now.duration_since(ticket.enqueued_at()).as_millis() as u64,
                    "spawn cell did not load in time; onboarding abandoned"
                );
                return false;
            }
            !ticket.is_terminal()
        });
        self.stats.onboardings_expired(expired as u64);
        expired
    }

    /// Start onboarding for everyone queued when the drain begins.
    fn drain_onboarding(&self) -> usize {
        let drained = self.queue.drain();
        let count = drained.len();
        if count == 0 {
            return 0;
        }
        {
            let mut in_flight = self.in_flight.lock();
            in_flight.extend(drained.iter().map(|admission| admission.ticket.clone()));
        }
        for admission in drained {
            let onboarding = Arc::clone(&self.onboarding);
            self.participants.submit(move || onboarding.run(admission));
        }
        self.stats.onboardings_started(count as u64);
        tracing::debug!(count, "onboarding started");
        count
    }

    fn dispatch(&self, instance: &InstanceHandle, tick: u64, summary: &mut TickSummary) {
        let ctx = TickContext {
            tick,
            instance: instance.id(),
        };

        let creatures = instance.creatures();
        let objects = instance.objects();
        if !(creatures.is_empty() && objects.is_empty()) {
            match instance.try_begin_batch(BatchGroup::General) {
                Some(permit) => match self.config.partition {
                    PartitionStrategy::ByCategory => {
                        let stats = Arc::clone(&self.stats);
                        self.general.submit(move || {
                            let _permit = permit;
                            run_batch(creatures.iter().chain(objects.iter()), &ctx, &stats);
                        });
                        summary.general_batches += 1;
                    }
                    PartitionStrategy::ByCell => {
                        let grid = GridPartition::build(
                            creatures
                                .iter()
                                .chain(objects.iter())
                                .map(|e| (e.position(), Arc::clone(e))),
                        );
                        // The group stays marked until the last cell batch drops its share.
                        let permit = Arc::new(permit);
                        for (_, entities) in grid.into_cells() {
                            let permit = Arc::clone(&permit);
                            let stats = Arc::clone(&self.stats);
                            self.general.submit(move || {
                                let _permit = permit;
                                run_batch(&entities, &ctx, &stats);
                            });
                            summary.general_batches += 1;
                        }
                    }
                },
                None => self.skip(instance, BatchGroup::General, summary),
            }
        }

        let participants = instance.participants();
        if !participants.is_empty() {
            match instance.try_begin_batch(BatchGroup::Participant) {
                Some(permit) => {
                    let stats = Arc::clone(&self.stats);
                    self.participants.submit(move || {
                        let _permit = permit;
                        run_batch(participants.iter(), &ctx, &stats);
                    });
                    summary.participant_batches += 1;
                }
                None => self.skip(instance, BatchGroup::Participant, summary),
            }
        }
    }

    fn skip(&self, instance: &InstanceHandle, group: BatchGroup, summary: &mut TickSummary) {
        summary.batches_skipped += 1;
        self.stats.batch_skipped();
        tracing::debug!(instance = %instance.id(), ?group, "previous batch still running; skipped");
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn WorldRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn general_pool(&self) -> &WorkerPool {
        &self.general
    }

    pub fn participant_pool(&self) -> &WorkerPool {
        &self.participants
    }

    /// Ticks started so far.
    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Onboardings drained but not yet placed or failed, as of the last tick.
    pub fn onboardings_in_flight(&self) -> usize {
        self.in_flight.lock().iter().filter(|t| !t.is_terminal()).count()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Wait for both pools to drain. Returns whether they did within `timeout`.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let general = self.general.wait_idle(timeout);
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.participants.wait_idle(remaining) && general
    }
}
