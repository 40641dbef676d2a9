//! Tick scheduling across world instances.
//!
//! Two fixed worker pools: `general` ticks creatures and objects,
//! `participant` ticks participants and runs onboarding. A [`TickScheduler`]
//! submits work each tick without waiting for it; [`TickDriver`] calls it
//! at a fixed rate.
//!
//! # Invariants
//! - Every participant queued when a drain starts is handed to onboarding
//!   in that tick. Later arrivals wait for the next drain.
//! - A participant is placed at most once, and only after its spawn cell is
//!   resident.
//! - A failing entity never stops the rest of its batch.
//! - A batch group of an instance never runs twice concurrently; the second
//!   submission is skipped and counted.

mod batch;
mod config;
mod error;
mod onboarding;
mod pool;
mod queue;
mod scheduler;
mod stats;
mod timer;

pub use config::{ConfigError, PartitionStrategy, SchedulerConfig};
pub use error::SchedError;
pub use onboarding::{FailureReason, OnboardingState, OnboardingTicket};
pub use pool::WorkerPool;
pub use queue::{OnboardingQueue, OnboardingSender, WaitingParticipant};
pub use scheduler::{TickScheduler, TickSummary};
pub use stats::{SchedulerStats, StatsSnapshot};
pub use timer::{DriverReport, StopHandle, TickDriver, TickTimer};
