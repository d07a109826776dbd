// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Binds logical indices to pooled or pre-existing instances.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use parking_lot::Mutex;

use crate::error::{PoolError, ProviderError};
use crate::iter::SequentialCells;
use crate::pool::{DEFAULT_EXHAUSTED_TIMEOUT, ReturnMode, ViewPool};
use crate::view::{CellView, Pooled, ViewFactory, ViewId};

/// Pool sizing and rebuild scheduling used by [`CellProvider::initialize`].
#[derive(Clone, Debug, PartialEq)]
pub struct PoolConfig {
    /// Maximum number of live instances.
    pub max_size: usize,
    /// Instances to create eagerly after (re)initialization.
    pub prewarm: usize,
    /// When set, a full rebuild runs on a worker thread after this delay.
    pub rebuild_delay: Option<Duration>,
    /// How long a borrower waits on an exhausted pool.
    pub exhausted_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 16,
            prewarm: 0,
            rebuild_delay: None,
            exhausted_timeout: DEFAULT_EXHAUSTED_TIMEOUT,
        }
    }
}

impl PoolConfig {
    /// Config with the given capacity and no prewarm.
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }

    /// Sets the number of instances created eagerly.
    #[must_use]
    pub fn prewarm(mut self, count: usize) -> Self {
        self.prewarm = count;
        self
    }

    /// Defers full rebuilds to a worker thread.
    #[must_use]
    pub fn rebuild_delay(mut self, delay: Duration) -> Self {
        self.rebuild_delay = Some(delay);
        self
    }

    /// Sets the exhaustion timeout.
    #[must_use]
    pub fn exhausted_timeout(mut self, timeout: Duration) -> Self {
        self.exhausted_timeout = timeout;
        self
    }
}

/// A template definition: the factory plus the layout parameters its
/// instances were built for.
///
/// Two templates are the same when they share the factory allocation, the
/// scale, and the layout key. Replacing a template with the same one only
/// swaps the data source.
pub struct Template<V: CellView> {
    factory: ViewFactory<V>,
    scale: f64,
    layout_key: u64,
}

impl<V: CellView> Clone for Template<V> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            scale: self.scale,
            layout_key: self.layout_key,
        }
    }
}

impl<V: CellView> core::fmt::Debug for Template<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Template")
            .field("scale", &self.scale)
            .field("layout_key", &self.layout_key)
            .finish_non_exhaustive()
    }
}

impl<V: CellView> Template<V> {
    /// A template at scale `1.0` with layout key `0`.
    #[must_use]
    pub fn new(factory: ViewFactory<V>) -> Self {
        Self {
            factory,
            scale: 1.0,
            layout_key: 0,
        }
    }

    /// Sets the device scale the instances are built for.
    #[must_use]
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Sets an opaque key for layout parameters baked into instances.
    #[must_use]
    pub fn with_layout_key(mut self, layout_key: u64) -> Self {
        self.layout_key = layout_key;
        self
    }

    /// Scale the instances are built for.
    #[must_use]
    pub const fn scale(&self) -> f64 {
        self.scale
    }

    fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.factory, &other.factory)
            && self.scale == other.scale
            && self.layout_key == other.layout_key
    }
}

/// Result of [`CellProvider::initialize`].
#[derive(Debug)]
pub enum Initialization {
    /// Same template: pool and instances were kept, only the data changed.
    Soft,
    /// The pool was rebuilt on the calling thread.
    Rebuilt,
    /// The rebuild runs on a worker thread.
    Deferred(RebuildHandle),
    /// A newer call won while this one was rebuilding; its pool was discarded.
    Superseded,
}

/// Outcome of a deferred rebuild.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// The new pool was published.
    Published,
    /// A later [`CellProvider::initialize`] won; the result was discarded.
    Superseded,
    /// The worker panicked.
    Failed,
}

/// Join handle for a deferred rebuild.
#[derive(Debug)]
pub struct RebuildHandle {
    handle: JoinHandle<RebuildOutcome>,
}

impl RebuildHandle {
    /// Blocks until the rebuild finished.
    pub fn join(self) -> RebuildOutcome {
        self.handle.join().unwrap_or(RebuildOutcome::Failed)
    }

    /// Whether the worker has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Status {
    Uninitialized,
    Rebuilding,
    Ready,
}

struct TemplateState<V: CellView> {
    status: Status,
    /// Bumped by every initialize and dispose; stale rebuilds compare against it.
    epoch: u64,
    next_generation: u32,
    template: Option<Template<V>>,
    pool: Option<Arc<ViewPool<V>>>,
    data: Arc<[V::Data]>,
}

/// Holds an in-use instance. Emptied when the index is hidden while another
/// caller still has a handle to it.
type Slot<V> = Arc<Mutex<Option<Pooled<V>>>>;

struct Binding<V> {
    id: ViewId,
    slot: Slot<V>,
}

impl<V> Binding<V> {
    fn new(entry: Pooled<V>) -> Self {
        Self {
            id: entry.id(),
            slot: Arc::new(Mutex::new(Some(entry))),
        }
    }

    /// Waits for any closure running on the instance, then takes it.
    fn take(self) -> Option<Pooled<V>> {
        self.slot.lock().take()
    }
}

struct Templated<V: CellView> {
    state: Mutex<TemplateState<V>>,
    in_use: Mutex<HashMap<usize, Binding<V>>>,
}

impl<V: CellView> Templated<V> {
    fn current(&self) -> Result<(Arc<ViewPool<V>>, Arc<[V::Data]>), ProviderError> {
        let state = self.state.lock();
        match (&state.status, &state.pool) {
            (Status::Ready, Some(pool)) => Ok((Arc::clone(pool), Arc::clone(&state.data))),
            _ => Err(ProviderError::TemplatesNotReady),
        }
    }

    fn current_pool(&self) -> Option<Arc<ViewPool<V>>> {
        self.state.lock().pool.clone()
    }

    /// Publishes `pool` if no newer initialize happened since `epoch`.
    fn publish(&self, epoch: u64, pool: Arc<ViewPool<V>>) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            drop(state);
            pool.dispose();
            return false;
        }
        state.pool = Some(pool);
        state.status = Status::Ready;
        true
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.state.lock().epoch == epoch
    }

    fn drain_in_use(&self) -> Vec<Pooled<V>> {
        let bindings: Vec<Binding<V>> = self.in_use.lock().drain().map(|(_, binding)| binding).collect();
        bindings.into_iter().filter_map(Binding::take).collect()
    }

    fn bound_slots(&self) -> Vec<Slot<V>> {
        self.in_use
            .lock()
            .values()
            .map(|binding| Arc::clone(&binding.slot))
            .collect()
    }
}

fn build_pool<V: CellView>(
    template: &Template<V>,
    generation: u32,
    config: &PoolConfig,
) -> Arc<ViewPool<V>> {
    let pool = ViewPool::with_generation(Arc::clone(&template.factory), config.max_size, generation)
        .with_exhausted_timeout(config.exhausted_timeout);
    if let Err(err) = pool.reserve_up_to(config.prewarm) {
        log::debug!("prewarm of pool generation {generation} stopped: {err}");
    }
    Arc::new(pool)
}

struct StaticChildren<V> {
    views: Vec<Arc<Mutex<V>>>,
    /// Raw positions of drawable children, in order.
    drawable: Vec<usize>,
}

impl<V: CellView> StaticChildren<V> {
    fn refresh(&mut self) -> usize {
        self.drawable.clear();
        self.drawable.extend(
            self.views
                .iter()
                .enumerate()
                .filter(|(_, view)| view.lock().can_draw())
                .map(|(raw, _)| raw),
        );
        self.drawable.len()
    }
}

enum Source<V: CellView> {
    Templated(Arc<Templated<V>>),
    Static(Mutex<StaticChildren<V>>),
}

/// Maps logical indices to live instances.
///
/// In templated mode instances come from a [`ViewPool`] and are tracked in an
/// in-use map so each index keeps the same instance while it stays visible.
/// In static mode the provider hands out pre-existing children directly;
/// only drawable children are addressable, so index `i` is the `i`-th
/// drawable child, not necessarily the `i`-th raw child.
///
/// The provider is `Sync`. Lock order is in-use map first, then pool, and
/// the template state lock is never held while another lock is taken. Each
/// instance sits behind its own lock, which is never taken while the map or
/// children lock is held, so work on one cell does not block the others.
pub struct CellProvider<V: CellView> {
    source: Source<V>,
}

impl<V: CellView> core::fmt::Debug for CellProvider<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut s = f.debug_struct("CellProvider");
        match &self.source {
            Source::Templated(t) => {
                let (status, items) = {
                    let state = t.state.lock();
                    (state.status, state.data.len())
                };
                s.field("mode", &"templated")
                    .field("status", &status)
                    .field("items", &items)
                    .field("in_use", &t.in_use.lock().len());
            }
            Source::Static(children) => {
                let children = children.lock();
                s.field("mode", &"static")
                    .field("children", &children.views.len())
                    .field("drawable", &children.drawable.len());
            }
        }
        s.finish_non_exhaustive()
    }
}

impl<V: CellView> CellProvider<V> {
    /// A templated provider with no template yet. Call
    /// [`initialize`](Self::initialize) before requesting cells.
    #[must_use]
    pub fn templated() -> Self {
        Self {
            source: Source::Templated(Arc::new(Templated {
                state: Mutex::new(TemplateState {
                    status: Status::Uninitialized,
                    epoch: 0,
                    next_generation: 0,
                    template: None,
                    pool: None,
                    data: Arc::from(Vec::new()),
                }),
                in_use: Mutex::new(HashMap::new()),
            })),
        }
    }

    /// A static provider over pre-existing children.
    #[must_use]
    pub fn with_children(views: Vec<V>) -> Self {
        let mut children = StaticChildren {
            views: views.into_iter().map(|view| Arc::new(Mutex::new(view))).collect(),
            drawable: Vec::new(),
        };
        children.refresh();
        Self {
            source: Source::Static(Mutex::new(children)),
        }
    }

    /// Whether instances come from a template pool.
    #[must_use]
    pub const fn is_templated(&self) -> bool {
        matches!(self.source, Source::Templated(_))
    }

    /// Whether random access is currently possible.
    ///
    /// Always `true` for static providers.
    #[must_use]
    pub fn templates_ready(&self) -> bool {
        match &self.source {
            Source::Templated(t) => t.state.lock().status == Status::Ready,
            Source::Static(_) => true,
        }
    }

    /// Number of addressable items: data length when templated, drawable
    /// children otherwise.
    #[must_use]
    pub fn child_count(&self) -> usize {
        match &self.source {
            Source::Templated(t) => t.state.lock().data.len(),
            Source::Static(children) => children.lock().drawable.len(),
        }
    }

    /// Number of raw items, including static children that do not draw.
    #[must_use]
    pub fn raw_child_count(&self) -> usize {
        match &self.source {
            Source::Templated(t) => t.state.lock().data.len(),
            Source::Static(children) => children.lock().views.len(),
        }
    }

    /// Whether the raw item at `raw` takes a slot in the structure.
    #[must_use]
    pub fn is_drawable_child(&self, raw: usize) -> bool {
        match &self.source {
            Source::Templated(t) => raw < t.state.lock().data.len(),
            Source::Static(children) => children.lock().drawable.binary_search(&raw).is_ok(),
        }
    }

    /// Recomputes which static children are drawable. Returns the new
    /// [`child_count`](Self::child_count).
    pub fn refresh_drawable(&self) -> usize {
        match &self.source {
            Source::Templated(t) => t.state.lock().data.len(),
            Source::Static(children) => children.lock().refresh(),
        }
    }

    /// Replaces the static children. Returns the drawable count.
    ///
    /// Has no effect on a templated provider and returns `0`.
    pub fn set_children(&self, views: Vec<V>) -> usize {
        match &self.source {
            Source::Templated(_) => 0,
            Source::Static(children) => {
                let mut children = children.lock();
                children.views = views.into_iter().map(|view| Arc::new(Mutex::new(view))).collect();
                children.refresh()
            }
        }
    }

    /// Runs `f` with the instance bound to `index`.
    ///
    /// Templated: an index already in use is rebound to its current data (the
    /// item may have changed in place); otherwise an instance is borrowed from
    /// the pool, bound, and recorded as in use. Static: `f` receives the
    /// `index`-th drawable child.
    ///
    /// `f` holds only the lock of that one instance, so it may touch other
    /// indices, but it must not call back into this provider for `index`
    /// itself.
    ///
    /// Fails fast with [`ProviderError::TemplatesNotReady`] while a rebuild is
    /// in flight, and with [`ProviderError::StaleIndex`] when the data source
    /// no longer has `index`.
    pub fn with_cell<R>(&self, index: usize, f: impl FnOnce(&mut V) -> R) -> Result<R, ProviderError> {
        match &self.source {
            Source::Templated(t) => {
                let (pool, data) = t.current()?;
                let item = data.get(index).ok_or(ProviderError::StaleIndex {
                    index,
                    len: data.len(),
                })?;

                loop {
                    let existing = t.in_use.lock().get(&index).map(|binding| Arc::clone(&binding.slot));
                    let slot = match existing {
                        Some(slot) => slot,
                        None => {
                            // Borrow outside the map lock so a waiting borrower
                            // never blocks `mark_hidden` from returning instances.
                            let fresh = pool.get()?;
                            let id = fresh.id();
                            let mut in_use = t.in_use.lock();
                            debug_assert!(
                                in_use.values().all(|bound| bound.id != id),
                                "view {id:?} is already bound to another index"
                            );
                            let (slot, surplus) = match in_use.entry(index) {
                                Entry::Occupied(occupied) => (Arc::clone(&occupied.get().slot), Some(fresh)),
                                Entry::Vacant(vacant) => {
                                    let binding = Binding::new(fresh);
                                    let slot = Arc::clone(&binding.slot);
                                    vacant.insert(binding);
                                    (slot, None)
                                }
                            };
                            drop(in_use);
                            if let Some(fresh) = surplus {
                                pool.recycle(fresh, ReturnMode::Reset);
                            }
                            slot
                        }
                    };

                    let mut guard = slot.lock();
                    // Hidden between the lookup and the lock; look again.
                    let Some(entry) = guard.as_mut() else {
                        continue;
                    };
                    entry.view_mut().bind(index, item);
                    return Ok(f(entry.view_mut()));
                }
            }
            Source::Static(children) => {
                let view = {
                    let children = children.lock();
                    let len = children.drawable.len();
                    children
                        .drawable
                        .get(index)
                        .and_then(|&raw| children.views.get(raw))
                        .map(Arc::clone)
                        .ok_or(ProviderError::StaleIndex { index, len })?
                };
                let mut view = view.lock();
                Ok(f(&mut *view))
            }
        }
    }

    /// Returns the instance bound to `index` to the pool.
    ///
    /// Idempotent: returns `false` when `index` was not in use, and always
    /// `false` for static providers.
    pub fn mark_hidden(&self, index: usize) -> bool {
        let Source::Templated(t) = &self.source else {
            return false;
        };
        let Some(binding) = t.in_use.lock().remove(&index) else {
            return false;
        };
        let Some(entry) = binding.take() else {
            return false;
        };
        if let Some(pool) = t.current_pool() {
            pool.recycle(entry, ReturnMode::Reset);
        }
        true
    }

    /// Returns every in-use instance to the pool. Returns how many were bound.
    pub fn mark_all_hidden(&self) -> usize {
        let Source::Templated(t) = &self.source else {
            return 0;
        };
        let drained = t.drain_in_use();
        let count = drained.len();
        if let Some(pool) = t.current_pool() {
            for entry in drained {
                pool.recycle(entry, ReturnMode::Reset);
            }
        }
        count
    }

    /// The instance currently bound to `index`, if any.
    #[must_use]
    pub fn bound_view(&self, index: usize) -> Option<ViewId> {
        match &self.source {
            Source::Templated(t) => t.in_use.lock().get(&index).map(|binding| binding.id),
            Source::Static(_) => None,
        }
    }

    /// Indices currently bound to pooled instances, ascending.
    #[must_use]
    pub fn in_use_indices(&self) -> Vec<usize> {
        match &self.source {
            Source::Templated(t) => {
                let mut indices: Vec<usize> = t.in_use.lock().keys().copied().collect();
                indices.sort_unstable();
                indices
            }
            Source::Static(_) => Vec::new(),
        }
    }

    /// Number of indices bound to pooled instances.
    #[must_use]
    pub fn in_use_count(&self) -> usize {
        match &self.source {
            Source::Templated(t) => t.in_use.lock().len(),
            Source::Static(_) => 0,
        }
    }

    /// The current pool, if templates are initialized.
    #[must_use]
    pub fn pool(&self) -> Option<Arc<ViewPool<V>>> {
        match &self.source {
            Source::Templated(t) => t.current_pool(),
            Source::Static(_) => None,
        }
    }

    /// The template the current pool was built from.
    #[must_use]
    pub fn template(&self) -> Option<Template<V>> {
        match &self.source {
            Source::Templated(t) => t.state.lock().template.clone(),
            Source::Static(_) => None,
        }
    }

    /// Installs a template and data source.
    ///
    /// When the template matches the current one, the pool and every
    /// instance are kept: the capacity is adjusted, in-use instances past the
    /// end of the new data are returned, and the rest have their cached render
    /// state invalidated. Otherwise in-use instances are returned, the old pool
    /// is torn down, and a new pool is built, on a worker thread when
    /// [`PoolConfig::rebuild_delay`] is set. A newer call always wins over a
    /// rebuild still in flight.
    pub fn initialize(
        &self,
        template: Template<V>,
        data: Arc<[V::Data]>,
        config: &PoolConfig,
    ) -> Result<Initialization, ProviderError> {
        let Source::Templated(t) = &self.source else {
            return Err(ProviderError::NotTemplated);
        };

        let mut state = t.state.lock();
        state.epoch += 1;
        let epoch = state.epoch;

        let soft = state.status == Status::Ready
            && state
                .template
                .as_ref()
                .is_some_and(|current| current.same_as(&template));
        if soft && let Some(pool) = state.pool.clone() {
            let len = data.len();
            state.data = data;
            drop(state);

            pool.set_max_size(config.max_size);
            let stale: Vec<Binding<V>> = {
                let mut in_use = t.in_use.lock();
                let stale_keys: Vec<usize> = in_use.keys().copied().filter(|&i| i >= len).collect();
                stale_keys
                    .into_iter()
                    .filter_map(|index| in_use.remove(&index))
                    .collect()
            };
            for entry in stale.into_iter().filter_map(Binding::take) {
                pool.recycle(entry, ReturnMode::Reset);
            }
            self.invalidate_bound();
            if let Err(err) = pool.reserve_up_to(config.prewarm) {
                log::debug!("prewarm after soft reinitialization stopped: {err}");
            }
            log::debug!(
                "soft reinitialization kept pool generation {} for {len} items",
                pool.generation()
            );
            return Ok(Initialization::Soft);
        }

        let old_pool = state.pool.take();
        state.template = Some(template.clone());
        state.data = data;
        state.status = Status::Rebuilding;
        state.next_generation = state.next_generation.wrapping_add(1);
        let generation = state.next_generation;
        drop(state);

        let drained = t.drain_in_use();
        if let Some(old_pool) = old_pool {
            for entry in drained {
                old_pool.recycle(entry, ReturnMode::Reset);
            }
            old_pool.dispose();
            log::debug!(
                "tore down pool generation {} for template change",
                old_pool.generation()
            );
        }

        if let Some(delay) = config.rebuild_delay {
            let worker = Arc::clone(t);
            let worker_config = config.clone();
            let worker_template = template.clone();
            let spawned = thread::Builder::new()
                .name("trellis-pool-rebuild".into())
                .spawn(move || {
                    thread::sleep(delay);
                    if !worker.is_current(epoch) {
                        log::debug!("pool rebuild generation {generation} superseded before start");
                        return RebuildOutcome::Superseded;
                    }
                    let pool = build_pool(&worker_template, generation, &worker_config);
                    if worker.publish(epoch, pool) {
                        log::debug!("published pool generation {generation} from worker");
                        RebuildOutcome::Published
                    } else {
                        log::debug!("discarded superseded pool generation {generation}");
                        RebuildOutcome::Superseded
                    }
                });
            match spawned {
                Ok(handle) => return Ok(Initialization::Deferred(RebuildHandle { handle })),
                Err(err) => {
                    log::warn!("could not spawn pool rebuild worker, rebuilding inline: {err}");
                }
            }
        }

        let pool = build_pool(&template, generation, config);
        if t.publish(epoch, pool) {
            Ok(Initialization::Rebuilt)
        } else {
            Ok(Initialization::Superseded)
        }
    }

    /// Invalidates the cached render state of every in-use instance. Returns
    /// how many were invalidated; always `0` for static providers.
    pub fn invalidate_bound(&self) -> usize {
        let Source::Templated(t) = &self.source else {
            return 0;
        };
        let mut invalidated = 0;
        for slot in t.bound_slots() {
            if let Some(entry) = slot.lock().as_mut() {
                entry.view_mut().invalidate();
                invalidated += 1;
            }
        }
        invalidated
    }

    /// Synchronously grows the pool towards `target` live instances.
    pub fn prewarm(&self, target: usize) -> Result<usize, ProviderError> {
        let Source::Templated(t) = &self.source else {
            return Err(ProviderError::NotTemplated);
        };
        let (pool, _) = t.current()?;
        Ok(pool.reserve_up_to(target)?)
    }

    /// Grows the pool towards `target` live instances on a worker thread.
    ///
    /// Returns `None` when there is nothing to do or no worker could be spawned.
    pub fn prewarm_async(&self, target: usize) -> Option<JoinHandle<usize>> {
        let Source::Templated(t) = &self.source else {
            return None;
        };
        let (pool, _) = t.current().ok()?;
        if pool.live_count() >= target.min(pool.max_size()) {
            return None;
        }
        log::debug!(
            "prewarming pool generation {} towards {target} instances",
            pool.generation()
        );
        thread::Builder::new()
            .name("trellis-pool-prewarm".into())
            .spawn(move || match pool.reserve_up_to(target) {
                Ok(created) => created,
                Err(PoolError::Disposed) => 0,
                Err(err) => {
                    log::debug!("prewarm stopped: {err}");
                    0
                }
            })
            .ok()
    }

    /// A forward-only pass over every item, bound from a sliding window of
    /// pooled instances instead of the in-use map.
    pub fn sequential(&self) -> Result<SequentialCells<V>, ProviderError> {
        let Source::Templated(t) = &self.source else {
            return Err(ProviderError::NotTemplated);
        };
        let (pool, data) = t.current()?;
        Ok(SequentialCells::new(pool, data))
    }

    /// Returns every in-use instance and tears the pool down.
    ///
    /// A rebuild still in flight is cancelled.
    pub fn dispose(&self) {
        let Source::Templated(t) = &self.source else {
            return;
        };
        let drained = t.drain_in_use();
        let pool = {
            let mut state = t.state.lock();
            state.epoch += 1;
            state.status = Status::Uninitialized;
            state.template = None;
            state.pool.take()
        };
        if let Some(pool) = pool {
            for entry in drained {
                pool.recycle(entry, ReturnMode::Reset);
            }
            pool.dispose();
        }
    }
}
