// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=trellis_recycler --heading-base-level=0

//! Trellis Recycler: bounded view recycling for virtualized containers.
//!
//! This crate owns the live instances behind a virtualized stack, row, or grid.
//! It knows nothing about geometry; layout and visibility decisions live in
//! `trellis_layout`, which drives this crate through a [`CellProvider`].
//!
//! The core concepts are:
//!
//! - [`CellView`]: the capability surface required from an instance (bind,
//!   unbind, drawability, z-order, render-cache invalidation).
//! - [`ViewPool`]: a bounded, thread-safe store of reusable instances created
//!   on demand from a [`ViewFactory`]. Ownership moves out on
//!   [`ViewPool::get`] and back on [`ViewPool::recycle`], so an instance can
//!   never be held by two logical indices at once.
//! - [`CellProvider`]: binds logical indices either to pooled instances
//!   (templated content) or to pre-existing children (static content). It
//!   owns the in-use map and the pool lifecycle, including cheap "soft"
//!   reinitialization when only the data source changes and superseding
//!   background rebuilds when the template changes.
//! - [`SequentialCells`]: a read-once pass that binds every item through a
//!   sliding window of loans, for consumers that do not keep a structure.
//!
//! ## Minimal example
//!
//! ```rust
//! use std::sync::Arc;
//! use trellis_recycler::{CellProvider, CellView, PoolConfig, Template};
//!
//! #[derive(Default)]
//! struct Label {
//!     text: Option<String>,
//! }
//!
//! impl CellView for Label {
//!     type Data = String;
//!
//!     fn bind(&mut self, _index: usize, data: &String) {
//!         self.text = Some(data.clone());
//!     }
//!
//!     fn unbind(&mut self) {
//!         self.text = None;
//!     }
//! }
//!
//! let provider = CellProvider::templated();
//! let items: Arc<[String]> = (0..100).map(|i| format!("row {i}")).collect();
//! provider
//!     .initialize(Template::new(Arc::new(Label::default)), items, &PoolConfig::with_max_size(8))
//!     .unwrap();
//!
//! let text = provider.with_cell(42, |label| label.text.clone()).unwrap();
//! assert_eq!(text.as_deref(), Some("row 42"));
//!
//! // Scrolling the row away returns its instance to the pool.
//! assert!(provider.mark_hidden(42));
//! assert_eq!(provider.pool().unwrap().idle_count(), 1);
//! ```
//!
//! ## Logging
//!
//! Diagnostics go through the [`log`] facade. An exhausted pool is reported at
//! `warn` while waiting and at `error` when the wait times out; rebuild and
//! prewarm scheduling are reported at `debug`.

mod error;
mod iter;
mod pool;
mod provider;
mod view;

pub use error::{PoolError, ProviderError};
pub use iter::SequentialCells;
pub use pool::{DEFAULT_EXHAUSTED_TIMEOUT, ReturnMode, ViewPool};
pub use provider::{
    CellProvider, Initialization, PoolConfig, RebuildHandle, RebuildOutcome, Template,
};
pub use view::{CellView, Pooled, ViewFactory, ViewId};
