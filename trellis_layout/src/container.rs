// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The orchestrator tying provider, engine, and virtualizer together.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use arc_swap::ArcSwap;
use kurbo::{Point, Rect, Size};
use parking_lot::Mutex;
use trellis_recycler::{CellProvider, Initialization, PoolConfig, ProviderError, Template};

use crate::engine::{LayoutChild, LayoutFlags, LayoutOptions, measure_structure, remeasure_cell};
use crate::error::MeasureError;
use crate::structure::Structure;
use crate::virtualize::{Culling, ViewportSource, Visibility, virtualize};

/// Work a mutation left for the next [`CellContainer::measure`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LayoutRequest {
    /// Nothing changed.
    #[default]
    None,
    /// Exactly one cell changed size.
    Partial(usize),
    /// The structure has to be rebuilt and measured from scratch.
    Full,
}

impl LayoutRequest {
    /// Combines two pending requests. Two different dirty cells need a full pass.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::None, next) | (next, Self::None) => next,
            (Self::Partial(a), Self::Partial(b)) if a == b => Self::Partial(a),
            _ => Self::Full,
        }
    }

    /// Whether a layout pass is needed.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Result of replacing a template or data source.
#[derive(Debug)]
pub struct TemplateChange {
    /// Layout work now pending.
    pub request: LayoutRequest,
    /// What the provider did with its pool.
    pub initialization: Initialization,
}

/// Owns the structure of one stack, row, or grid and the instances behind it.
///
/// Mutators do not lay anything out; they return the [`LayoutRequest`] now
/// pending so the host can schedule [`measure`](Self::measure). Drawing goes
/// through [`draw`](Self::draw), which culls against the viewport and
/// releases instances that scrolled away.
///
/// The structure used for drawing is published by reference swap: readers
/// get an immutable snapshot, and every pass that changes it works on a copy
/// that replaces the snapshot once complete. A full pass can also run on a
/// worker via [`build_detached`](Self::build_detached) and
/// [`publish`](Self::publish).
///
/// A full pass binds the cells it measures (only the first of each row with
/// [`LayoutFlags::MEASURE_FIRST`]) and hands the oldest back whenever the
/// pool runs dry, so the pool only needs to cover what is on screen.
pub struct CellContainer<V: LayoutChild> {
    provider: CellProvider<V>,
    options: Mutex<LayoutOptions>,
    pool_config: Mutex<PoolConfig>,
    pending: Mutex<LayoutRequest>,
    structure: ArcSwap<Structure>,
    publish_lock: Mutex<()>,
    foreground: ThreadId,
    force_visible: AtomicBool,
    prewarm: Mutex<Option<JoinHandle<usize>>>,
}

impl<V: LayoutChild> core::fmt::Debug for CellContainer<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let structure = self.structure.load();
        f.debug_struct("CellContainer")
            .field("provider", &self.provider)
            .field("options", &*self.options.lock())
            .field("pending", &*self.pending.lock())
            .field("rows", &structure.row_count())
            .field("cells", &structure.cell_count())
            .field("foreground", &self.foreground)
            .finish_non_exhaustive()
    }
}

impl<V: LayoutChild> CellContainer<V> {
    fn with_provider(provider: CellProvider<V>, options: LayoutOptions, pool_config: PoolConfig) -> Self {
        Self {
            provider,
            options: Mutex::new(options),
            pool_config: Mutex::new(pool_config),
            pending: Mutex::new(LayoutRequest::Full),
            structure: ArcSwap::from_pointee(Structure::default()),
            publish_lock: Mutex::new(()),
            foreground: thread::current().id(),
            force_visible: AtomicBool::new(false),
            prewarm: Mutex::new(None),
        }
    }

    /// A container for templated content. Install a template with
    /// [`set_template`](Self::set_template) before measuring.
    ///
    /// The calling thread becomes the foreground thread.
    #[must_use]
    pub fn templated(options: LayoutOptions, pool_config: PoolConfig) -> Self {
        Self::with_provider(CellProvider::templated(), options, pool_config)
    }

    /// A container over pre-existing children.
    ///
    /// The calling thread becomes the foreground thread.
    #[must_use]
    pub fn with_children(children: Vec<V>, options: LayoutOptions) -> Self {
        Self::with_provider(
            CellProvider::with_children(children),
            options,
            PoolConfig::default(),
        )
    }

    /// The provider binding indices to instances.
    #[must_use]
    pub fn provider(&self) -> &CellProvider<V> {
        &self.provider
    }

    /// Current layout options.
    #[must_use]
    pub fn options(&self) -> LayoutOptions {
        self.options.lock().clone()
    }

    /// Whether the calling thread is the one that created the container.
    #[must_use]
    pub fn is_foreground(&self) -> bool {
        thread::current().id() == self.foreground
    }

    fn request(&self, request: LayoutRequest) -> LayoutRequest {
        let mut pending = self.pending.lock();
        *pending = pending.merge(request);
        *pending
    }

    /// Work pending for the next [`measure`](Self::measure).
    #[must_use]
    pub fn pending_request(&self) -> LayoutRequest {
        *self.pending.lock()
    }

    /// Replaces the layout options.
    pub fn set_options(&self, options: LayoutOptions) -> LayoutRequest {
        {
            let mut current = self.options.lock();
            if *current == options {
                return self.pending_request();
            }
            *current = options;
        }
        self.request(LayoutRequest::Full)
    }

    /// Replaces the pool sizing used by later template changes. A new
    /// capacity applies to the current pool right away.
    pub fn set_pool_config(&self, config: PoolConfig) {
        if let Some(pool) = self.provider.pool() {
            pool.set_max_size(config.max_size);
        }
        *self.pool_config.lock() = config;
    }

    /// Installs `template` and `data`.
    ///
    /// Passing the template already installed keeps every instance and only
    /// swaps the data. The next drawn pass after replacing an existing
    /// template shows every cell once, so nothing pops while instances
    /// settle.
    pub fn set_template(
        &self,
        template: Template<V>,
        data: Arc<[V::Data]>,
    ) -> Result<TemplateChange, ProviderError> {
        let had_template = self.provider.template().is_some();
        let config = self.pool_config.lock().clone();
        let initialization = self.provider.initialize(template, data, &config)?;
        if had_template {
            self.force_visible.store(true, Ordering::Release);
        }
        Ok(TemplateChange {
            request: self.request(LayoutRequest::Full),
            initialization,
        })
    }

    /// Replaces the data source, keeping the installed template.
    pub fn set_data(&self, data: Arc<[V::Data]>) -> Result<TemplateChange, ProviderError> {
        let template = self
            .provider
            .template()
            .ok_or(ProviderError::TemplatesNotReady)?;
        self.set_template(template, data)
    }

    /// Replaces static children.
    pub fn set_children(&self, children: Vec<V>) -> LayoutRequest {
        self.provider.set_children(children);
        self.request(LayoutRequest::Full)
    }

    /// Records that the cell at `index` changed size.
    pub fn mark_cell_dirty(&self, index: usize) -> LayoutRequest {
        self.request(LayoutRequest::Partial(index))
    }

    /// Records a structural change: item count, drawability, or row shape.
    pub fn invalidate_structure(&self) -> LayoutRequest {
        self.request(LayoutRequest::Full)
    }

    /// Brings the published structure up to date with pending changes.
    ///
    /// A single dirty cell is re-measured in place when this runs on the
    /// foreground thread, outside [`LayoutFlags::BACKGROUND_BUFFERED`], with
    /// the same inputs as the last full pass. Everything else rebuilds the
    /// structure. On error the previous structure stays published and a full
    /// pass is requested for the next tick.
    pub fn measure(&self, available: Rect, scale: f64) -> Result<Size, MeasureError> {
        let request = core::mem::take(&mut *self.pending.lock());
        let options = self.options();
        let current = self.structure.load_full();
        let same_inputs = current.measured_with() == Some((available, scale));

        match request {
            LayoutRequest::None if same_inputs => return Ok(current.content_size()),
            LayoutRequest::Partial(index)
                if same_inputs
                    && self.is_foreground()
                    && !options.flags.contains(LayoutFlags::BACKGROUND_BUFFERED)
                    && current.source_len() == self.provider.raw_child_count() =>
            {
                drop(current);
                match self.remeasure_published(index, available, scale, &options) {
                    Ok(Some(content)) => return Ok(content),
                    Ok(None) => {}
                    Err(err) => {
                        log::debug!("partial measure of cell {index} aborted: {err}");
                        self.request(LayoutRequest::Full);
                        return Err(err);
                    }
                }
            }
            _ => {}
        }

        match self.build_with(available, scale, &options) {
            Ok(structure) => {
                let content = structure.content_size();
                self.publish(structure);
                Ok(content)
            }
            Err(err) => {
                log::debug!("layout pass aborted, retrying next tick: {err}");
                self.request(LayoutRequest::Full);
                Err(err)
            }
        }
    }

    fn remeasure_published(
        &self,
        index: usize,
        available: Rect,
        scale: f64,
        options: &LayoutOptions,
    ) -> Result<Option<Size>, MeasureError> {
        let _publishing = self.publish_lock.lock();
        let mut next = self.structure.load_full();
        let content = remeasure_cell(
            Arc::make_mut(&mut next),
            &self.provider,
            index,
            available,
            scale,
            options,
        )?;
        if content.is_some() {
            self.structure.store(next);
        }
        Ok(content)
    }

    fn build_with(
        &self,
        available: Rect,
        scale: f64,
        options: &LayoutOptions,
    ) -> Result<Structure, MeasureError> {
        let mut structure = if self.provider.is_templated() {
            Structure::build(self.provider.child_count(), &options.structure)
        } else {
            self.provider.refresh_drawable();
            Structure::build_filtered(self.provider.raw_child_count(), &options.structure, |raw| {
                self.provider.is_drawable_child(raw)
            })
        };
        measure_structure(&mut structure, &self.provider, available, scale, options)?;
        Ok(structure)
    }

    /// Builds and measures a fresh structure without publishing it.
    ///
    /// Safe to call from any thread; hand the result to
    /// [`publish`](Self::publish).
    pub fn build_detached(&self, available: Rect, scale: f64) -> Result<Structure, MeasureError> {
        let options = self.options();
        self.build_with(available, scale, &options)
    }

    /// Makes `structure` the one used for drawing.
    pub fn publish(&self, structure: Structure) {
        let _publishing = self.publish_lock.lock();
        log::debug!(
            "publishing structure with {} rows and {} cells",
            structure.row_count(),
            structure.cell_count()
        );
        self.structure.store(Arc::new(structure));
    }

    /// The structure currently used for drawing.
    #[must_use]
    pub fn structure(&self) -> Arc<Structure> {
        self.structure.load_full()
    }

    /// Content size of the published structure.
    #[must_use]
    pub fn content_size(&self) -> Size {
        self.structure.load().content_size()
    }

    /// Culls the published structure against the viewport and returns the
    /// cells to draw in paint order.
    ///
    /// `origin` is where the container draws its content this frame. After
    /// the first pass over a new structure the pool is prewarmed in the
    /// background towards one extra row above and below the visible cells.
    pub fn draw(&self, origin: Point, viewport: &impl ViewportSource) -> Visibility {
        let viewport = viewport.visible_viewport();
        let virtualizing = self.options.lock().flags.contains(LayoutFlags::VIRTUALIZE);

        let (visibility, fresh) = {
            let _publishing = self.publish_lock.lock();
            let mut next = self.structure.load_full();
            let structure = Arc::make_mut(&mut next);
            let fresh = !structure.is_virtualized();
            let culling = if fresh
                && !structure.is_empty()
                && self.force_visible.swap(false, Ordering::AcqRel)
            {
                Culling::ForceVisible
            } else if virtualizing {
                Culling::Viewport
            } else {
                Culling::Disabled
            };
            let visibility = virtualize(structure, &self.provider, origin, viewport, culling);
            self.structure.store(next);
            (visibility, fresh)
        };

        if fresh && virtualizing {
            self.request_prewarm(visibility.prewarm_target);
        }
        visibility
    }

    fn request_prewarm(&self, target: usize) {
        let mut slot = self.prewarm.lock();
        if slot.as_ref().is_some_and(|running| !running.is_finished()) {
            return;
        }
        if let Some(handle) = self.provider.prewarm_async(target) {
            *slot = Some(handle);
        }
    }

    /// Waits for a background prewarm started by [`draw`](Self::draw).
    /// Returns how many instances it created.
    pub fn join_prewarm(&self) -> Option<usize> {
        let handle = self.prewarm.lock().take()?;
        handle.join().ok()
    }

    /// Returns every bound instance and tears the pool down.
    ///
    /// The published structure is reset to empty.
    pub fn dispose(&self) {
        let prewarm = self.prewarm.lock().take();
        if let Some(handle) = prewarm
            && handle.join().is_err()
        {
            log::warn!("prewarm worker panicked during dispose");
        }
        self.provider.dispose();
        self.publish(Structure::default());
        self.request(LayoutRequest::Full);
    }
}
