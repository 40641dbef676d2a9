use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::SchedError;
use crate::scheduler::TickScheduler;

/// Rolling window of recent tick durations.
pub struct TickTimer {
    history: Vec<Duration>,
    capacity: usize,
    index: usize,
    filled: bool,
}

impl TickTimer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: vec![Duration::ZERO; capacity],
            capacity,
            index: 0,
            filled: false,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        self.history[self.index] = dt;
        self.index = (self.index + 1) % self.capacity;
        if self.index == 0 {
            self.filled = true;
        }
    }

    fn window(&self) -> &[Duration] {
        &self.history[..self.count()]
    }

    pub fn average(&self) -> Duration {
        let window = self.window();
        if window.is_empty() {
            return Duration::ZERO;
        }
        window.iter().sum::<Duration>() / window.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.window().iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.window().iter().copied().min().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        if self.filled { self.capacity } else { self.index }
    }
}

/// Stops a running [`TickDriver`] from any thread.
#[derive(Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverReport {
    pub ticks: u64,
    /// Ticks whose submission ran past the interval.
    pub overruns: u64,
    pub average: Duration,
    pub max: Duration,
}

/// Calls [`TickScheduler::run_tick`] at a fixed rate.
///
/// A tick that overruns is not made up for; the schedule restarts from now.
pub struct TickDriver {
    scheduler: Arc<TickScheduler>,
    interval: Duration,
    stop: StopHandle,
    timer: TickTimer,
}

impl TickDriver {
    pub fn new(scheduler: Arc<TickScheduler>) -> Self {
        let interval = scheduler.config().tick_interval();
        Self {
            scheduler,
            interval,
            stop: StopHandle::default(),
            timer: TickTimer::new(120),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn timer(&self) -> &TickTimer {
        &self.timer
    }

    /// Tick until stopped, or until `max_ticks` ticks have run.
    pub fn run(&mut self, max_ticks: Option<u64>) -> Result<DriverReport, SchedError> {
        let mut ticks = 0;
        let mut overruns = 0;
        let mut next = Instant::now();
        while !self.stop.is_stopped() && max_ticks.is_none_or(|max| ticks < max) {
            let summary = self.scheduler.run_tick()?;
            self.timer.record(summary.elapsed);
            ticks += 1;

            next += self.interval;
            let now = Instant::now();
            if now < next {
                std::thread::sleep(next - now);
            } else {
                overruns += 1;
                tracing::warn!(
                    tick = summary.tick,
                    behind_ms = now.duration_since(next).as_millis() as u64,
                    "tick overran its interval"
                );
                next = now;
            }
        }
        let report = DriverReport {
            ticks,
            overruns,
            average: self.timer.average(),
            max: self.timer.max(),
        };
        tracing::info!(ticks, overruns, avg_us = report.average.as_micros() as u64, "tick driver stopped");
        Ok(report)
    }

    /// Run on a dedicated `tick-driver` thread.
    pub fn spawn(
        mut self,
        max_ticks: Option<u64>,
    ) -> std::io::Result<JoinHandle<Result<DriverReport, SchedError>>> {
        std::thread::Builder::new()
            .name("tick-driver".into())
            .spawn(move || self.run(max_ticks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use worldtick_kernel::{EventBus, InstanceManager};
    use worldtick_stream::ImmediateCellSource;

    #[test]
    fn timer_stats() {
        let mut timer = TickTimer::new(3);
        assert_eq!(timer.average(), Duration::ZERO);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30));
        assert_eq!(timer.count(), 3);
        assert_eq!(timer.average(), Duration::from_millis(20));
        assert_eq!(timer.min(), Duration::from_millis(10));
        assert_eq!(timer.max(), Duration::from_millis(30));
    }

    #[test]
    fn timer_wraps() {
        let mut timer = TickTimer::new(2);
        timer.record(Duration::from_millis(100));
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        assert_eq!(timer.count(), 2);
        assert_eq!(timer.max(), Duration::from_millis(20));
    }

    fn scheduler() -> Arc<TickScheduler> {
        let registry = Arc::new(InstanceManager::new(Arc::new(ImmediateCellSource::default())));
        let config = SchedulerConfig {
            general_pool_size: 1,
            participant_pool_size: 1,
            tick_interval_ms: 1,
            ..SchedulerConfig::default()
        };
        Arc::new(TickScheduler::new(config, registry, Arc::new(EventBus::new())).unwrap())
    }

    #[test]
    fn runs_requested_number_of_ticks() {
        let sched = scheduler();
        let mut driver = TickDriver::new(Arc::clone(&sched));
        let report = driver.run(Some(5)).unwrap();
        assert_eq!(report.ticks, 5);
        assert_eq!(sched.current_tick(), 5);
        assert_eq!(driver.timer().count(), 5);
    }

    #[test]
    fn stop_handle_ends_spawned_driver() {
        let sched = scheduler();
        let driver = TickDriver::new(Arc::clone(&sched)).with_interval(Duration::from_millis(2));
        let stop = driver.stop_handle();
        let handle = driver.spawn(None).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        stop.stop();
        let report = handle.join().unwrap().unwrap();
        assert!(report.ticks >= 1);
        assert_eq!(sched.current_tick(), report.ticks);
    }
}
