use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters, shared with worker tasks.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    ticks: AtomicU64,
    onboardings_started: AtomicU64,
    participants_placed: AtomicU64,
    onboarding_failures: AtomicU64,
    onboardings_expired: AtomicU64,
    general_batches: AtomicU64,
    participant_batches: AtomicU64,
    batches_skipped: AtomicU64,
    entities_ticked: AtomicU64,
    entity_failures: AtomicU64,
}

/// Point-in-time copy of [`SchedulerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub onboardings_started: u64,
    pub participants_placed: u64,
    pub onboarding_failures: u64,
    pub onboardings_expired: u64,
    pub general_batches: u64,
    pub participant_batches: u64,
    pub batches_skipped: u64,
    pub entities_ticked: u64,
    pub entity_failures: u64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl SchedulerStats {
    pub(crate) fn tick(&self) {
        bump(&self.ticks, 1);
    }

    pub(crate) fn onboardings_started(&self, n: u64) {
        bump(&self.onboardings_started, n);
    }

    pub(crate) fn participant_placed(&self) {
        bump(&self.participants_placed, 1);
    }

    pub(crate) fn onboarding_failed(&self) {
        bump(&self.onboarding_failures, 1);
    }

    pub(crate) fn onboardings_expired(&self, n: u64) {
        bump(&self.onboardings_expired, n);
    }

    pub(crate) fn general_batches(&self, n: u64) {
        bump(&self.general_batches, n);
    }

    pub(crate) fn participant_batches(&self, n: u64) {
        bump(&self.participant_batches, n);
    }

    pub(crate) fn batch_skipped(&self) {
        bump(&self.batches_skipped, 1);
    }

    pub(crate) fn entities_ticked(&self, n: u64) {
        bump(&self.entities_ticked, n);
    }

    pub(crate) fn entity_failures(&self, n: u64) {
        bump(&self.entity_failures, n);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            ticks: load(&self.ticks),
            onboardings_started: load(&self.onboardings_started),
            participants_placed: load(&self.participants_placed),
            onboarding_failures: load(&self.onboarding_failures),
            onboardings_expired: load(&self.onboardings_expired),
            general_batches: load(&self.general_batches),
            participant_batches: load(&self.participant_batches),
            batches_skipped: load(&self.batches_skipped),
            entities_ticked: load(&self.entities_ticked),
            entity_failures: load(&self.entity_failures),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ticks={} placed={}/{} failed={} expired={} batches={}+{} skipped={} entity_steps={} entity_failures={}",
            self.ticks,
            self.participants_placed,
            self.onboardings_started,
            self.onboarding_failures,
            self.onboardings_expired,
            self.general_batches,
            self.participant_batches,
            self.batches_skipped,
            self.entities_ticked,
            self.entity_failures,
        )
    }
}
