// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Measurement and arrangement of a [`Structure`].
//!
//! A full pass walks every cell in traversal order: left to right within a row,
//! rows top to bottom. Each cell is offered an `area` whose width is the
//! row's column width (or the whole available width for unbounded rows) and
//! whose height is the available height. The child measures against that
//! area and then arranges itself inside it; the engine records both results.
//!
//! Offsets accumulate as the walk proceeds. Within a row, the next cell starts
//! one column width (or, for unbounded rows, one measured width) plus spacing
//! to the right. Rows stack downwards by their tallest cell plus spacing.
//! Spacing is only inserted between neighbours, never before the first.
//!
//! [`remeasure_cell`] is the incremental counterpart: it re-measures one cell
//! and translates everything after it by the resulting size delta.

use std::collections::VecDeque;

use kurbo::{Rect, Size, Vec2};
use trellis_recycler::{CellProvider, CellView, ViewPool};

use crate::cell::Measured;
use crate::error::MeasureError;
use crate::structure::{Row, StackKind, Structure, StructureOptions};

/// The measurement surface required from an instance placed in a structure.
pub trait LayoutChild: CellView {
    /// Measures against `available`. `None` opts out of drawing and is
    /// recorded as an empty measurement.
    fn measure(&mut self, available: Size, scale: f64) -> Option<Size>;

    /// Places the child inside `area` given its measured size and returns the
    /// resulting destination. Defaults to the top-left corner of `area`.
    fn arrange(&mut self, area: Rect, measured: Size, scale: f64) -> Rect {
        let _ = scale;
        Rect::from_origin_size(area.origin(), measured)
    }
}

bitflags::bitflags! {
    /// Layout behaviour switches.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct LayoutFlags: u8 {
        /// Divide each row by its own cell count instead of the column limit.
        const DYNAMIC_COLUMNS     = 0b0000_0001;
        /// Measure only the first cell of each row and share its size with the
        /// rest of the row.
        const MEASURE_FIRST       = 0b0000_0010;
        /// Only keep instances for cells that intersect the viewport.
        const VIRTUALIZE          = 0b0000_0100;
        /// Layout runs against a detached buffer; the incremental path is off.
        const BACKGROUND_BUFFERED = 0b0000_1000;
    }
}

impl Default for LayoutFlags {
    fn default() -> Self {
        Self::VIRTUALIZE
    }
}

/// Configuration of a layout pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayoutOptions {
    /// How items are split into rows.
    pub structure: StructureOptions,
    /// Gap between neighbouring columns and between rows, in logical pixels.
    pub spacing: f64,
    /// Behaviour switches.
    pub flags: LayoutFlags,
}

impl LayoutOptions {
    /// Options for the given structure with default spacing and flags.
    #[must_use]
    pub fn new(structure: StructureOptions) -> Self {
        Self {
            structure,
            ..Self::default()
        }
    }

    /// Sets the spacing.
    #[must_use]
    pub fn with_spacing(mut self, spacing: f64) -> Self {
        self.spacing = spacing;
        self
    }

    /// Replaces the flags.
    #[must_use]
    pub fn with_flags(mut self, flags: LayoutFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Number of columns a row of `row_len` cells is divided into, or `None`
    /// when cells advance by their own measured width.
    #[must_use]
    pub fn column_count(&self, row_len: usize) -> Option<usize> {
        match self.structure.columns() {
            Some(_) if self.flags.contains(LayoutFlags::DYNAMIC_COLUMNS) => Some(row_len.max(1)),
            Some(columns) => Some(columns),
            None => match self.structure.kind {
                StackKind::Column => Some(1),
                StackKind::Row => None,
            },
        }
    }

    /// Width of one column when `columns` share `available_width`.
    #[must_use]
    pub fn column_width(&self, available_width: f64, columns: usize) -> f64 {
        let columns = columns.max(1) as f64;
        ((available_width - (columns - 1.0) * self.spacing) / columns)
            .round()
            .max(0.0)
    }

    fn row_column_width(&self, available_width: f64, row_len: usize) -> Option<f64> {
        self.column_count(row_len)
            .map(|columns| self.column_width(available_width, columns))
    }
}

/// What a child reported for one cell.
struct Outcome {
    measured: Measured,
    destination: Rect,
    z_index: i32,
}

fn measure_child<V: LayoutChild>(
    provider: &CellProvider<V>,
    index: usize,
    area: Rect,
    scale: f64,
) -> Result<Outcome, MeasureError> {
    provider
        .with_cell(index, |view| {
            let z_index = view.z_index();
            if !view.can_draw() {
                return Outcome {
                    measured: Measured::Empty,
                    destination: Rect::ZERO,
                    z_index,
                };
            }
            match view.measure(area.size(), scale) {
                Some(size) => Outcome {
                    measured: Measured::Sized { size, scale },
                    destination: view.arrange(area, size, scale),
                    z_index,
                },
                None => Outcome {
                    measured: Measured::Empty,
                    destination: Rect::ZERO,
                    z_index,
                },
            }
        })
        .map_err(|source| MeasureError::Aborted { index, source })
}

/// Returns the oldest instances bound during this pass until the pool can
/// supply one for `index`. Cells released here are bound again on demand.
fn make_room<V: LayoutChild>(
    provider: &CellProvider<V>,
    pool: &ViewPool<V>,
    window: &mut VecDeque<usize>,
    index: usize,
) {
    if provider.bound_view(index).is_some() {
        return;
    }
    while !pool.can_supply() && !pool.is_disposed() {
        let Some(oldest) = window.pop_front() else {
            break;
        };
        provider.mark_hidden(oldest);
        log::trace!("released cell {oldest} to make room for cell {index}");
    }
}

/// Advance of a cell along its row.
fn advance(column_width: Option<f64>, measured: Size) -> f64 {
    column_width.unwrap_or(measured.width)
}

/// Recomputes a row's extent from its cells.
fn settle_row(row: &mut Row, origin_x: f64, column_width: Option<f64>) {
    row.height = row
        .cells
        .iter()
        .filter_map(|cell| cell.measured_size())
        .map(|size| size.height)
        .fold(0.0, f64::max);
    row.width = row.cells.last().map_or(0.0, |cell| {
        let size = cell.measured_size().unwrap_or(Size::ZERO);
        cell.area.x0 - origin_x + advance(column_width, size)
    });
}

fn content_of(structure: &Structure, spacing: f64) -> Size {
    let mut width: f64 = 0.0;
    let mut height = 0.0;
    let mut first = true;
    for row in structure.rows().iter().filter(|row| !row.cells.is_empty()) {
        if !first {
            height += spacing;
        }
        first = false;
        width = width.max(row.width);
        height += row.height;
    }
    Size::new(width, height)
}

/// Measures and arranges every cell of `structure` inside `available`.
///
/// Returns the content size. On error the structure is left partly
/// measured and must not be published; the caller retries on the next tick.
///
/// Cells bound during the pass form a sliding window: when the pool runs dry
/// the oldest of them are returned, so a pool smaller than the item count
/// still completes the pass.
pub fn measure_structure<V: LayoutChild>(
    structure: &mut Structure,
    provider: &CellProvider<V>,
    available: Rect,
    scale: f64,
    options: &LayoutOptions,
) -> Result<Size, MeasureError> {
    if !structure.is_empty() && !provider.templates_ready() {
        return Err(MeasureError::Unavailable(
            trellis_recycler::ProviderError::TemplatesNotReady,
        ));
    }

    let spacing = options.spacing;
    let share = options.flags.contains(LayoutFlags::MEASURE_FIRST);
    let pool = provider.pool();
    // Instances bound before the pass go first.
    let mut window: VecDeque<usize> = provider.in_use_indices().into();
    let mut y = 0.0;
    let mut first_row = true;

    for row in structure.rows_mut() {
        if row.cells.is_empty() {
            continue;
        }
        if !first_row {
            y += spacing;
        }
        first_row = false;

        let column_width = options.row_column_width(available.width(), row.cells.len());
        let mut x = 0.0;
        let mut shared: Option<(Rect, Measured, Rect, i32)> = None;

        for cell in &mut row.cells {
            let area = Rect::from_origin_size(
                (available.x0 + x, available.y0 + y),
                (column_width.unwrap_or(available.width()), available.height()),
            );
            let outcome = match shared {
                Some((first_area, measured, destination, z_index)) => {
                    let offset = area.origin() - first_area.origin();
                    Outcome {
                        measured,
                        destination: if measured.is_empty() {
                            Rect::ZERO
                        } else {
                            destination + offset
                        },
                        z_index,
                    }
                }
                None => {
                    if let Some(pool) = &pool {
                        make_room(provider, pool, &mut window, cell.index);
                    }
                    let outcome = measure_child(provider, cell.index, area, scale)?;
                    if pool.is_some() {
                        window.push_back(cell.index);
                    }
                    outcome
                }
            };
            if share && shared.is_none() {
                shared = Some((area, outcome.measured, outcome.destination, outcome.z_index));
            }

            cell.area = area;
            cell.measured = Some(outcome.measured);
            cell.destination = outcome.destination;
            cell.z_index = outcome.z_index;

            x += advance(column_width, outcome.measured.size()) + spacing;
        }

        settle_row(row, available.x0, column_width);
        y += row.height;
    }

    let content = content_of(structure, spacing);
    structure.set_content_size(content);
    structure.set_measured_with(available, scale);
    Ok(content)
}

/// Re-measures the single cell at `index` and shifts everything after it.
///
/// Cells later in the same row move horizontally when rows advance by
/// measured width; later rows move vertically by the change in row height.
/// A cell that is off screen in a virtualized structure gives its instance
/// back once measured.
///
/// Returns the new content size, or `Ok(None)` when the incremental path does
/// not apply and a full pass is needed instead: the cell is unknown or
/// unmeasured, row sizes are shared, or `available` and `scale` differ from
/// the last full pass.
pub fn remeasure_cell<V: LayoutChild>(
    structure: &mut Structure,
    provider: &CellProvider<V>,
    index: usize,
    available: Rect,
    scale: f64,
    options: &LayoutOptions,
) -> Result<Option<Size>, MeasureError> {
    if options.flags.contains(LayoutFlags::MEASURE_FIRST)
        || structure.measured_with() != Some((available, scale))
    {
        return Ok(None);
    }
    let Some((row_index, column)) = structure.find(index) else {
        return Ok(None);
    };
    let virtualized = structure.is_virtualized();

    let rows = structure.rows_mut();
    let row = &mut rows[row_index];
    let column_width = options.row_column_width(available.width(), row.cells.len());
    let (area, old) = {
        let cell = &row.cells[column];
        match cell.measured {
            Some(measured) => (cell.area, measured),
            None => return Ok(None),
        }
    };

    let outcome = measure_child(provider, index, area, scale)?;
    let delta_x = advance(column_width, outcome.measured.size())
        - advance(column_width, old.size());
    {
        let cell = &mut row.cells[column];
        cell.measured = Some(outcome.measured);
        cell.destination = outcome.destination;
        cell.z_index = outcome.z_index;
        if virtualized && !cell.is_visible {
            provider.mark_hidden(index);
        }
    }
    if delta_x != 0.0 {
        for cell in &mut row.cells[column + 1..] {
            cell.translate(Vec2::new(delta_x, 0.0));
        }
    }

    let old_height = row.height;
    settle_row(row, available.x0, column_width);
    let delta_y = row.height - old_height;
    if delta_y != 0.0 {
        for row in &mut rows[row_index + 1..] {
            for cell in &mut row.cells {
                cell.translate(Vec2::new(0.0, delta_y));
            }
        }
    }
    log::trace!("remeasured cell {index}: shifted siblings by ({delta_x}, {delta_y})");

    let content = content_of(structure, options.spacing);
    structure.set_content_size(content);
    Ok(Some(content))
}
