// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=trellis_layout --heading-base-level=0

//! Trellis Layout: incremental cell layout and viewport virtualization.
//!
//! This crate arranges the items of a stack, row, or grid into rows of cells,
//! measures them through the instances a
//! [`CellProvider`](trellis_recycler::CellProvider) binds, and decides which
//! cells need a live instance for the current viewport.
//!
//! The core concepts are:
//!
//! - [`Cell`]: per-slot record of the area offered to a child, what it
//!   measured, where it was arranged, and where it was last drawn.
//! - [`Structure`]: rows of cells built from an item count and
//!   [`StructureOptions`] (column limit, row limit, forced line breaks).
//! - [`measure_structure`] and [`remeasure_cell`]: the full pass, and the
//!   incremental pass that re-measures one changed cell and shifts the rest.
//!   Children take part through the [`LayoutChild`] trait.
//! - [`virtualize`]: culls an arranged structure against a viewport, returns
//!   instances of cells that scrolled away, and orders the rest by z-index.
//! - [`CellContainer`]: owns one structure and its provider. Mutators return a
//!   [`LayoutRequest`] rather than laying out eagerly, and the structure used
//!   for drawing is published as an immutable snapshot.
//!
//! ## Minimal example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use kurbo::{Point, Rect, Size};
//! use trellis_layout::{CellContainer, LayoutChild, LayoutOptions, StructureOptions};
//! use trellis_recycler::{CellView, PoolConfig, Template};
//!
//! #[derive(Default)]
//! struct Swatch {
//!     height: f64,
//! }
//!
//! impl CellView for Swatch {
//!     type Data = f64;
//!
//!     fn bind(&mut self, _index: usize, height: &f64) {
//!         self.height = *height;
//!     }
//!
//!     fn unbind(&mut self) {
//!         self.height = 0.0;
//!     }
//! }
//!
//! impl LayoutChild for Swatch {
//!     fn measure(&mut self, available: Size, _scale: f64) -> Option<Size> {
//!         Some(Size::new(available.width, self.height))
//!     }
//! }
//!
//! // Four columns with an 8px gap.
//! let container = CellContainer::templated(
//!     LayoutOptions::new(StructureOptions::grid(4)).with_spacing(8.0),
//!     PoolConfig::with_max_size(64),
//! );
//! let heights: Arc<[f64]> = (0_u8..40).map(|i| 20.0 + f64::from(i % 3) * 10.0).collect();
//! container
//!     .set_template(Template::new(Arc::new(Swatch::default)), heights)
//!     .unwrap();
//!
//! let content = container.measure(Rect::new(0.0, 0.0, 416.0, 800.0), 1.0).unwrap();
//! assert_eq!(content.width, 416.0);
//!
//! // Only the first three rows fit in a 120px viewport.
//! let frame = container.draw(Point::ZERO, &Rect::new(0.0, 0.0, 416.0, 120.0));
//! assert_eq!(frame.visible.len(), 12);
//! assert_eq!(container.provider().in_use_count(), 12);
//! ```
//!
//! ## Logging
//!
//! Aborted passes and structure publication are reported at `debug` through
//! the [`log`] facade, the incremental path at `trace`.

mod cell;
mod container;
mod engine;
mod error;
mod structure;
mod virtualize;

#[cfg(test)]
mod test_util;

pub use cell::{Cell, Measured};
pub use container::{CellContainer, LayoutRequest, TemplateChange};
pub use engine::{LayoutChild, LayoutFlags, LayoutOptions, measure_structure, remeasure_cell};
pub use error::MeasureError;
pub use structure::{Row, StackKind, Structure, StructureOptions};
pub use virtualize::{Culling, ViewportSource, VisibleCell, Visibility, virtualize};
