use parking_lot::Mutex;
use std::time::Duration;
use worldtick_common::CellCoord;

use crate::cell::{Cell, CellLoadError};

/// Completion callback handed to a [`CellSource`].
pub type LoadCallback = Box<dyn FnOnce(Result<Cell, CellLoadError>) + Send + 'static>;

/// Produces cell data, possibly asynchronously.
///
/// Implementations must invoke `done` exactly once, from any thread. They must
/// not block the caller waiting for generation or I/O.
pub trait CellSource: Send + Sync {
    fn load(&self, coord: CellCoord, done: LoadCallback);
}

/// Completes every request synchronously with a flat cell.
#[derive(Debug, Clone)]
pub struct ImmediateCellSource {
    surface_height: i32,
}

impl ImmediateCellSource {
    pub fn new(surface_height: i32) -> Self {
        Self { surface_height }
    }
}

impl Default for ImmediateCellSource {
    fn default() -> Self {
        Self::new(64)
    }
}

impl CellSource for ImmediateCellSource {
    fn load(&self, coord: CellCoord, done: LoadCallback) {
        done(Ok(Cell::flat(coord, self.surface_height)));
    }
}

/// Generates cells on a dedicated background pool.
///
/// `latency` simulates disk or generation cost per cell.
pub struct GeneratedCellSource {
    pool: rayon::ThreadPool,
    seed: u64,
    latency: Duration,
}

impl GeneratedCellSource {
    pub fn new(threads: usize, seed: u64, latency: Duration) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("cellgen-{i}"))
            .build()?;
        Ok(Self {
            pool,
            seed,
            latency,
        })
    }
}

impl CellSource for GeneratedCellSource {
    fn load(&self, coord: CellCoord, done: LoadCallback) {
        let seed = self.seed;
        let latency = self.latency;
        self.pool.spawn(move || {
            if !latency.is_zero() {
                std::thread::sleep(latency);
            }
            tracing::trace!(%coord, "cell generated");
            done(Ok(Cell::generate(coord, seed)));
        });
    }
}

/// Holds every request until the owner completes it explicitly.
///
/// Lets callers decide exactly when (and whether) a cell becomes ready.
#[derive(Default)]
pub struct DeferredCellSource {
    pending: Mutex<Vec<(CellCoord, LoadCallback)>>,
}

impl DeferredCellSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests waiting for completion.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Coordinates of the waiting requests, oldest first.
    pub fn pending_coords(&self) -> Vec<CellCoord> {
        self.pending.lock().iter().map(|(c, _)| *c).collect()
    }

    /// Complete the oldest waiting request with a flat cell. Returns its coordinate.
    pub fn complete_next(&self) -> Option<CellCoord> {
        let next = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                None
            } else {
                Some(pending.remove(0))
            }
        };
        next.map(|(coord, done)| {
            done(Ok(Cell::flat(coord, 64)));
            coord
        })
    }

    /// Complete every waiting request. Returns how many were completed.
    pub fn complete_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.pending.lock());
        let count = drained.len();
        for (coord, done) in drained {
            done(Ok(Cell::flat(coord, 64)));
        }
        count
    }

    /// Fail every waiting request.
    pub fn fail_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.pending.lock());
        let count = drained.len();
        for (coord, done) in drained {
            done(Err(CellLoadError::Unavailable(coord)));
        }
        count
    }
}

impl CellSource for DeferredCellSource {
    fn load(&self, coord: CellCoord, done: LoadCallback) {
        self.pending.lock().push((coord, done));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;

    #[test]
    fn immediate_source_completes_inline() {
        let source = ImmediateCellSource::new(70);
        let result = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&result);
        source.load(
            CellCoord::new(1, 2),
            Box::new(move |r| *slot.lock() = Some(r)),
        );
        let cell = result.lock().take().unwrap().unwrap();
        assert_eq!(cell.coord, CellCoord::new(1, 2));
        assert_eq!(cell.surface_height, 70);
    }

    #[test]
    fn generated_source_completes_off_thread() {
        let source = GeneratedCellSource::new(1, 7, Duration::from_millis(1)).unwrap();
        let (tx, rx) = mpsc::channel();
        let caller = std::thread::current().id();
        source.load(
            CellCoord::new(0, 0),
            Box::new(move |r| {
                tx.send((r.is_ok(), std::thread::current().id())).unwrap();
            }),
        );
        let (ok, thread) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(ok);
        assert_ne!(thread, caller);
    }

    #[test]
    fn deferred_source_holds_until_completed() {
        let source = DeferredCellSource::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        for x in 0..3 {
            let hits = Arc::clone(&hits);
            source.load(
                CellCoord::new(x, 0),
                Box::new(move |r| hits.lock().push(r.map(|c| c.coord.x))),
            );
        }
        assert_eq!(source.pending(), 3);
        assert!(hits.lock().is_empty());

        assert_eq!(source.complete_next(), Some(CellCoord::new(0, 0)));
        assert_eq!(source.pending_coords(), vec![CellCoord::new(1, 0), CellCoord::new(2, 0)]);
        assert_eq!(source.fail_all(), 2);
        assert_eq!(source.complete_all(), 0);

        let hits = hits.lock();
        assert_eq!(hits.len(), 3);
        assert!(hits[0].is_ok());
        assert!(hits[1].is_err() && hits[2].is_err());
    }
}
