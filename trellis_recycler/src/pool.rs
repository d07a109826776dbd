// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bounded-capacity recycling pool.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::PoolError;
use crate::view::{CellView, Pooled, ViewFactory, ViewId};

/// How long [`ViewPool::get`] waits for a returned instance before giving up.
pub const DEFAULT_EXHAUSTED_TIMEOUT: Duration = Duration::from_millis(500);

/// What to do with an instance handed back through [`ViewPool::recycle`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReturnMode {
    /// Clear the bound index and data before the instance goes idle.
    Reset,
    /// Keep the binding; the next borrower rebinds anyway.
    Keep,
}

struct PoolState<V> {
    idle: Vec<Pooled<V>>,
    /// Instances currently alive: idle plus on loan.
    live: usize,
    max_size: usize,
    created_total: u64,
    next_slot: u32,
    disposed: bool,
}

enum Claim<V> {
    Idle(Pooled<V>),
    Fresh(ViewId),
}

impl<V> PoolState<V> {
    fn claim(&mut self, generation: u32) -> Option<Claim<V>> {
        if let Some(entry) = self.idle.pop() {
            return Some(Claim::Idle(entry));
        }
        if self.live < self.max_size {
            return Some(Claim::Fresh(self.reserve_slot(generation)));
        }
        None
    }

    fn reserve_slot(&mut self, generation: u32) -> ViewId {
        let id = ViewId::new(self.next_slot, generation);
        self.next_slot = self.next_slot.wrapping_add(1);
        self.live += 1;
        self.created_total += 1;
        id
    }
}

/// Hands a reserved slot back if the factory unwinds before it is filled.
struct Creation<'a, V: CellView> {
    pool: &'a ViewPool<V>,
}

impl<V: CellView> Drop for Creation<'_, V> {
    fn drop(&mut self) {
        let mut state = self.pool.state.lock();
        state.live = state.live.saturating_sub(1);
        drop(state);
        self.pool.returned.notify_one();
    }
}

/// A bounded store of reusable view instances created on demand from a factory.
///
/// Ownership of an instance moves out of the pool on [`get`](Self::get) and
/// back in on [`recycle`](Self::recycle), so a single instance can never be
/// held by two borrowers at once. At all times
/// `idle_count() + on_loan <= max_size()`, except transiently after the
/// capacity was lowered while instances were on loan.
///
/// The pool is `Sync`; share it behind an `Arc` between the thread that binds
/// cells and any worker that prewarms it.
pub struct ViewPool<V: CellView> {
    factory: ViewFactory<V>,
    generation: u32,
    exhausted_timeout: Duration,
    state: Mutex<PoolState<V>>,
    returned: Condvar,
}

impl<V: CellView> core::fmt::Debug for ViewPool<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ViewPool")
            .field("generation", &self.generation)
            .field("idle", &state.idle.len())
            .field("live", &state.live)
            .field("max_size", &state.max_size)
            .field("created_total", &state.created_total)
            .field("disposed", &state.disposed)
            .finish_non_exhaustive()
    }
}

impl<V: CellView> ViewPool<V> {
    /// Creates an empty pool that will hold at most `max_size` instances.
    #[must_use]
    pub fn new(factory: ViewFactory<V>, max_size: usize) -> Self {
        Self::with_generation(factory, max_size, 0)
    }

    pub(crate) fn with_generation(factory: ViewFactory<V>, max_size: usize, generation: u32) -> Self {
        Self {
            factory,
            generation,
            exhausted_timeout: DEFAULT_EXHAUSTED_TIMEOUT,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                live: 0,
                max_size,
                created_total: 0,
                next_slot: 0,
                disposed: false,
            }),
            returned: Condvar::new(),
        }
    }

    /// Runs the factory for a slot already counted as live.
    fn create(&self, id: ViewId) -> Pooled<V> {
        let creation = Creation { pool: self };
        let view = (self.factory)();
        core::mem::forget(creation);
        Pooled::new(id, view)
    }

    /// Sets how long [`get`](Self::get) waits before reporting exhaustion.
    #[must_use]
    pub fn with_exhausted_timeout(mut self, timeout: Duration) -> Self {
        self.exhausted_timeout = timeout;
        self
    }

    /// Generation stamped into every [`ViewId`] this pool creates.
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Eagerly creates one idle instance if the pool is below capacity.
    ///
    /// Returns `Ok(false)` when the pool is already full.
    pub fn reserve(&self) -> Result<bool, PoolError> {
        let id = {
            let mut state = self.state.lock();
            if state.disposed {
                return Err(PoolError::Disposed);
            }
            if state.live >= state.max_size {
                return Ok(false);
            }
            state.reserve_slot(self.generation)
        };

        let entry = self.create(id);

        let mut state = self.state.lock();
        if state.disposed {
            state.live -= 1;
            return Err(PoolError::Disposed);
        }
        state.idle.push(entry);
        drop(state);
        self.returned.notify_one();
        Ok(true)
    }

    /// Reserves until `target` instances are alive, or the pool is full.
    ///
    /// Returns how many instances were created.
    pub fn reserve_up_to(&self, target: usize) -> Result<usize, PoolError> {
        let mut created = 0;
        while self.live_count() < target {
            if !self.reserve()? {
                break;
            }
            created += 1;
        }
        Ok(created)
    }

    /// Borrows an instance.
    ///
    /// Pops an idle instance if one exists, otherwise creates one when under
    /// capacity. When neither is possible the caller waits for a returned
    /// instance; that path is logged since it means the pool is undersized,
    /// and fails with [`PoolError::Exhausted`] after the configured timeout.
    pub fn get(&self) -> Result<Pooled<V>, PoolError> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(PoolError::Disposed);
        }
        let claim = match state.claim(self.generation) {
            Some(claim) => claim,
            None => {
                log::warn!(
                    "view pool (generation {}) is exhausted with {} instances on loan; waiting for a return",
                    self.generation,
                    state.live
                );
                let started = Instant::now();
                let deadline = started + self.exhausted_timeout;
                loop {
                    let timed_out = self.returned.wait_until(&mut state, deadline).timed_out();
                    if state.disposed {
                        return Err(PoolError::Disposed);
                    }
                    if let Some(claim) = state.claim(self.generation) {
                        break claim;
                    }
                    if timed_out {
                        let waited = started.elapsed();
                        log::error!(
                            "view pool (generation {}) exhausted: no instance returned within {:?}",
                            self.generation,
                            waited
                        );
                        return Err(PoolError::Exhausted {
                            max_size: state.max_size,
                            waited,
                        });
                    }
                }
            }
        };
        drop(state);

        Ok(match claim {
            Claim::Idle(entry) => entry,
            Claim::Fresh(id) => self.create(id),
        })
    }

    /// Hands an instance back.
    ///
    /// Instances from another pool generation, instances returned after
    /// disposal, and instances above a lowered capacity are dropped instead
    /// of going idle.
    pub fn recycle(&self, mut entry: Pooled<V>, mode: ReturnMode) {
        if mode == ReturnMode::Reset {
            entry.view_mut().unbind();
        }

        let mut state = self.state.lock();
        if entry.id().generation() != self.generation {
            return;
        }
        debug_assert!(
            state.idle.iter().all(|idle| idle.id() != entry.id()),
            "view {:?} returned to the pool twice",
            entry.id()
        );
        if state.disposed || state.live > state.max_size {
            state.live = state.live.saturating_sub(1);
            return;
        }
        state.idle.push(entry);
        drop(state);
        self.returned.notify_one();
    }

    /// Changes the capacity.
    ///
    /// Growing is immediate. Shrinking drops surplus idle instances now and
    /// lets surplus on-loan instances expire as they are returned.
    pub fn set_max_size(&self, max_size: usize) {
        let mut state = self.state.lock();
        let grew = max_size > state.max_size;
        state.max_size = max_size;
        let mut surplus = Vec::new();
        while state.live > state.max_size {
            let Some(entry) = state.idle.pop() else {
                break;
            };
            state.live -= 1;
            surplus.push(entry);
        }
        drop(state);
        drop(surplus);
        if grew {
            self.returned.notify_all();
        }
    }

    /// Tears the pool down.
    ///
    /// Idle instances are unbound and released. Instances still on loan are
    /// dropped when they come back.
    pub fn dispose(&self) {
        let idle = {
            let mut state = self.state.lock();
            state.disposed = true;
            let idle = core::mem::take(&mut state.idle);
            state.live -= idle.len();
            idle
        };
        self.returned.notify_all();
        for mut entry in idle {
            entry.view_mut().unbind();
        }
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Whether [`get`](Self::get) would succeed without waiting.
    #[must_use]
    pub fn can_supply(&self) -> bool {
        let state = self.state.lock();
        !state.disposed && (!state.idle.is_empty() || state.live < state.max_size)
    }

    /// Number of idle instances.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Number of live instances, idle plus on loan.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.state.lock().live
    }

    /// Number of instances currently on loan.
    #[must_use]
    pub fn on_loan_count(&self) -> usize {
        let state = self.state.lock();
        state.live - state.idle.len()
    }

    /// Current capacity.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.state.lock().max_size
    }

    /// Number of instances created over the pool's lifetime.
    #[must_use]
    pub fn created_total(&self) -> u64 {
        self.state.lock().created_total
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::{ReturnMode, ViewPool};
    use crate::error::PoolError;
    use crate::view::{CellView, ViewFactory};

    #[derive(Debug, Default)]
    struct Blank {
        bound: Option<usize>,
    }

    impl CellView for Blank {
        type Data = ();

        fn bind(&mut self, index: usize, _data: &()) {
            self.bound = Some(index);
        }

        fn unbind(&mut self) {
            self.bound = None;
        }
    }

    fn counting_factory(counter: &Arc<AtomicUsize>) -> ViewFactory<Blank> {
        let counter = Arc::clone(counter);
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Blank::default()
        })
    }

    #[test]
    fn reserve_stops_at_capacity() {
        let created = Arc::new(AtomicUsize::new(0));
        let pool = ViewPool::new(counting_factory(&created), 2);
        assert_eq!(pool.reserve(), Ok(true));
        assert_eq!(pool.reserve(), Ok(true));
        assert_eq!(pool.reserve(), Ok(false));
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn get_prefers_idle_instances() {
        let created = Arc::new(AtomicUsize::new(0));
        let pool = ViewPool::new(counting_factory(&created), 4);
        pool.reserve().unwrap();
        let first = pool.get().unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        let id = first.id();
        pool.recycle(first, ReturnMode::Reset);
        let again = pool.get().unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(pool.created_total(), 1);
    }

    #[test]
    fn panicking_factory_gives_its_slot_back() {
        let failing = Arc::new(AtomicBool::new(true));
        let trigger = Arc::clone(&failing);
        let pool = ViewPool::new(
            Arc::new(move || {
                if trigger.swap(false, Ordering::SeqCst) {
                    panic!("factory failed");
                }
                Blank::default()
            }),
            1,
        )
        .with_exhausted_timeout(Duration::from_millis(10));

        assert!(panic::catch_unwind(AssertUnwindSafe(|| pool.get())).is_err());
        assert_eq!(pool.live_count(), 0);
        assert!(pool.can_supply());
        let entry = pool.get().unwrap();
        assert_eq!(pool.on_loan_count(), 1);
        pool.recycle(entry, ReturnMode::Reset);

        failing.store(true, Ordering::SeqCst);
        pool.set_max_size(2);
        assert!(panic::catch_unwind(AssertUnwindSafe(|| pool.reserve())).is_err());
        assert_eq!(pool.live_count(), 1);
        assert_eq!(pool.reserve(), Ok(true));
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn reset_return_clears_binding() {
        let pool = ViewPool::new(Arc::new(Blank::default), 1);
        let mut entry = pool.get().unwrap();
        entry.view_mut().bind(7, &());
        pool.recycle(entry, ReturnMode::Reset);
        let entry = pool.get().unwrap();
        assert_eq!(entry.view().bound, None);

        let mut kept = entry;
        kept.view_mut().bind(3, &());
        pool.recycle(kept, ReturnMode::Keep);
        assert_eq!(pool.get().unwrap().view().bound, Some(3));
    }

    #[test]
    fn exhausted_get_times_out() {
        let pool = ViewPool::new(Arc::new(Blank::default), 1)
            .with_exhausted_timeout(Duration::from_millis(10));
        let _held = pool.get().unwrap();
        match pool.get() {
            Err(PoolError::Exhausted { max_size, .. }) => assert_eq!(max_size, 1),
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(pool.live_count(), 1);
    }

    #[test]
    fn blocked_get_wakes_on_return() {
        let pool = Arc::new(
            ViewPool::new(Arc::new(Blank::default), 1)
                .with_exhausted_timeout(Duration::from_secs(5)),
        );
        let held = pool.get().unwrap();
        let id = held.id();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.get().map(|entry| entry.id()))
        };
        thread::sleep(Duration::from_millis(20));
        pool.recycle(held, ReturnMode::Reset);
        assert_eq!(waiter.join().unwrap(), Ok(id));
    }

    #[test]
    fn capacity_invariant_holds_under_contention() {
        let pool = Arc::new(
            ViewPool::new(Arc::new(Blank::default), 3)
                .with_exhausted_timeout(Duration::from_secs(5)),
        );
        let workers: Vec<_> = (0..6)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let entry = pool.get().unwrap();
                        assert!(pool.live_count() <= 3);
                        pool.recycle(entry, ReturnMode::Reset);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(pool.created_total() <= 3);
        assert_eq!(pool.idle_count(), pool.live_count());
    }

    #[test]
    fn shrinking_drops_idle_and_expires_loans() {
        let pool = ViewPool::new(Arc::new(Blank::default), 3);
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        pool.reserve().unwrap();
        assert_eq!(pool.live_count(), 3);

        pool.set_max_size(1);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.live_count(), 2);

        pool.recycle(a, ReturnMode::Reset);
        assert_eq!(pool.live_count(), 1);
        assert_eq!(pool.idle_count(), 0);
        pool.recycle(b, ReturnMode::Reset);
        assert_eq!(pool.live_count(), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn dispose_releases_idle_and_rejects_borrowers() {
        let pool = ViewPool::new(Arc::new(Blank::default), 2);
        let loaned = pool.get().unwrap();
        pool.reserve().unwrap();
        pool.dispose();
        assert!(pool.is_disposed());
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.get().err(), Some(PoolError::Disposed));

        pool.recycle(loaned, ReturnMode::Reset);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn foreign_instances_are_not_adopted() {
        let old = ViewPool::with_generation(Arc::new(Blank::default), 1, 1);
        let new = ViewPool::with_generation(Arc::new(Blank::default), 1, 2);
        let stray = old.get().unwrap();
        new.recycle(stray, ReturnMode::Reset);
        assert_eq!(new.idle_count(), 0);
        assert_eq!(new.live_count(), 0);
    }
}
