use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use worldtick_common::CellCoord;

use crate::cell::{Cell, CellHandle, CellLoadError};
use crate::source::CellSource;

/// Callback run once a requested cell is resident.
pub type ReadyCallback = Box<dyn FnOnce(CellHandle) + Send + 'static>;

/// Per-instance cell residency.
///
/// Tracks resident cells and the waiters of cells currently being loaded.
/// Concurrent requests for the same cell share a single load.
#[derive(Clone)]
pub struct CellStore {
    inner: Arc<CellStoreInner>,
}

struct CellStoreInner {
    source: Arc<dyn CellSource>,
    state: Mutex<CellState>,
}

#[derive(Default)]
struct CellState {
    resident: HashMap<CellCoord, CellHandle>,
    loading: HashMap<CellCoord, Vec<ReadyCallback>>,
}

/// Point-in-time residency counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellStats {
    pub resident: usize,
    pub loading: usize,
    pub waiters: usize,
}

impl CellStore {
    pub fn new(source: Arc<dyn CellSource>) -> Self {
        Self {
            inner: Arc::new(CellStoreInner {
                source,
                state: Mutex::new(CellState::default()),
            }),
        }
    }

    /// Request a cell and run `on_ready` once it is resident.
    ///
    /// Runs `on_ready` inline when the cell is already resident; otherwise the
    /// callback is parked and invoked from whichever thread completes the load.
    /// If the load fails the waiters are dropped without being called and the
    /// next request retries.
    pub fn request(&self, coord: CellCoord, on_ready: impl FnOnce(CellHandle) + Send + 'static) {
        let mut state = self.inner.state.lock();
        if let Some(cell) = state.resident.get(&coord).cloned() {
            drop(state);
            on_ready(cell);
            return;
        }
        if let Some(waiters) = state.loading.get_mut(&coord) {
            waiters.push(Box::new(on_ready));
            return;
        }
        state.loading.insert(coord, vec![Box::new(on_ready)]);
        drop(state);

        tracing::debug!(%coord, "loading cell");
        let inner = Arc::clone(&self.inner);
        self.inner
            .source
            .load(coord, Box::new(move |result| inner.complete(coord, result)));
    }

    /// Resident cell at `coord`, if any.
    pub fn get(&self, coord: CellCoord) -> Option<CellHandle> {
        self.inner.state.lock().resident.get(&coord).cloned()
    }

    pub fn is_resident(&self, coord: CellCoord) -> bool {
        self.inner.state.lock().resident.contains_key(&coord)
    }

    pub fn is_loading(&self, coord: CellCoord) -> bool {
        self.inner.state.lock().loading.contains_key(&coord)
    }

    /// Drop a resident cell. Returns it if it was resident.
    pub fn unload(&self, coord: CellCoord) -> Option<CellHandle> {
        let removed = self.inner.state.lock().resident.remove(&coord);
        if removed.is_some() {
            tracing::debug!(%coord, "unloaded cell");
        }
        removed
    }

    /// Coordinates of every resident cell.
    pub fn resident_cells(&self) -> Vec<CellCoord> {
        self.inner.state.lock().resident.keys().copied().collect()
    }

    pub fn stats(&self) -> CellStats {
        let state = self.inner.state.lock();
        CellStats {
            resident: state.resident.len(),
            loading: state.loading.len(),
            waiters: state.loading.values().map(Vec::len).sum(),
        }
    }
}

impl CellStoreInner {
    fn complete(&self, coord: CellCoord, result: Result<Cell, CellLoadError>) {
        let (cell, waiters) = {
            let mut state = self.state.lock();
            let waiters = state.loading.remove(&coord).unwrap_or_default();
            match result {
                Ok(cell) => {
                    let cell = Arc::new(cell);
                    state.resident.insert(coord, Arc::clone(&cell));
                    (cell, waiters)
                }
                Err(e) => {
                    tracing::warn!(%coord, waiters = waiters.len(), "cell load failed: {e}");
                    return;
                }
            }
        };

        tracing::debug!(%coord, waiters = waiters.len(), "cell ready");
        // Waiters run outside the lock so they may request other cells.
        for waiter in waiters {
            waiter(Arc::clone(&cell));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{DeferredCellSource, ImmediateCellSource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce(CellHandle) + Send>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        (hits, move || {
            let h = Arc::clone(&h);
            Box::new(move |_cell: CellHandle| {
                h.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[test]
    fn resident_cell_runs_callback_inline() {
        let store = CellStore::new(Arc::new(ImmediateCellSource::default()));
        let (hits, make) = counter();
        store.request(CellCoord::new(0, 0), make());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(store.is_resident(CellCoord::new(0, 0)));

        store.request(CellCoord::new(0, 0), make());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(store.stats().resident, 1);
    }

    #[test]
    fn concurrent_requests_share_one_load() {
        let source = Arc::new(DeferredCellSource::new());
        let store = CellStore::new(source.clone());
        let (hits, make) = counter();
        let coord = CellCoord::new(4, -2);

        store.request(coord, make());
        store.request(coord, make());
        store.request(coord, make());
        assert_eq!(source.pending(), 1);
        assert!(store.is_loading(coord));
        assert_eq!(
            store.stats(),
            CellStats {
                resident: 0,
                loading: 1,
                waiters: 3
            }
        );

        source.complete_all();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(store.is_resident(coord));
        assert!(!store.is_loading(coord));
    }

    #[test]
    fn failed_load_drops_waiters_and_allows_retry() {
        let source = Arc::new(DeferredCellSource::new());
        let store = CellStore::new(source.clone());
        let (hits, make) = counter();
        let coord = CellCoord::new(1, 1);

        store.request(coord, make());
        source.fail_all();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!store.is_loading(coord));
        assert!(!store.is_resident(coord));

        store.request(coord, make());
        assert_eq!(source.pending(), 1);
        source.complete_all();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn waiter_may_request_another_cell() {
        let store = CellStore::new(Arc::new(ImmediateCellSource::default()));
        let (hits, make) = counter();
        let inner_store = store.clone();
        let next = make();
        store.request(CellCoord::new(0, 0), move |_| {
            inner_store.request(CellCoord::new(0, 1), next);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(store.resident_cells().len(), 2);
    }

    #[test]
    fn unload_removes_resident_cell() {
        let store = CellStore::new(Arc::new(ImmediateCellSource::default()));
        store.request(CellCoord::new(2, 2), |_| {});
        assert!(store.get(CellCoord::new(2, 2)).is_some());
        assert!(store.unload(CellCoord::new(2, 2)).is_some());
        assert!(store.unload(CellCoord::new(2, 2)).is_none());
    }
}
