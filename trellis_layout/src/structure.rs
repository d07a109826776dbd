// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Rows of cells and the builder that produces them.

use kurbo::{Rect, Size};
use smallvec::SmallVec;

use crate::cell::Cell;

/// Main orientation of a container.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum StackKind {
    /// Column-oriented: vertical stacks and grids. Without a column limit
    /// every item starts its own row.
    #[default]
    Column,
    /// Row-oriented: items flow left to right on one line. With a column limit
    /// the line wraps every `max_columns` items.
    Row,
}

/// Inputs of the structure builder.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StructureOptions {
    /// Main orientation.
    pub kind: StackKind,
    /// Maximum cells per row; `<= 0` means unbounded.
    pub max_columns: i32,
    /// Maximum number of rows; `<= 0` means unbounded.
    pub max_rows: i32,
    /// Logical indices that always start a new row.
    pub line_breaks: SmallVec<[usize; 4]>,
}

impl StructureOptions {
    /// A vertical stack: one item per row.
    #[must_use]
    pub fn column() -> Self {
        Self::default()
    }

    /// A single horizontal line.
    #[must_use]
    pub fn row() -> Self {
        Self {
            kind: StackKind::Row,
            ..Self::default()
        }
    }

    /// A column-oriented grid with `columns` cells per row.
    #[must_use]
    pub fn grid(columns: i32) -> Self {
        Self::default().with_max_columns(columns)
    }

    /// Sets the column limit.
    #[must_use]
    pub fn with_max_columns(mut self, max_columns: i32) -> Self {
        self.max_columns = max_columns;
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub fn with_max_rows(mut self, max_rows: i32) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Forces a new row at logical index `index`.
    #[must_use]
    pub fn with_line_break(mut self, index: usize) -> Self {
        if !self.line_breaks.contains(&index) {
            self.line_breaks.push(index);
        }
        self
    }

    /// The column limit, if bounded.
    #[must_use]
    pub fn columns(&self) -> Option<usize> {
        usize::try_from(self.max_columns).ok().filter(|&c| c > 0)
    }

    /// The row limit, if bounded.
    #[must_use]
    pub fn rows(&self) -> Option<usize> {
        usize::try_from(self.max_rows).ok().filter(|&r| r > 0)
    }

    fn breaks_before(&self, index: usize, row_len: usize) -> bool {
        if row_len == 0 {
            return false;
        }
        match self.columns() {
            Some(columns) => row_len >= columns || self.line_breaks.contains(&index),
            None => self.kind == StackKind::Column || self.line_breaks.contains(&index),
        }
    }
}

/// One row of a [`Structure`] with its measured extent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    /// Cells left to right.
    pub cells: Vec<Cell>,
    /// Right edge of the last cell, relative to the row start.
    pub width: f64,
    /// Tallest measured cell.
    pub height: f64,
}

/// Rows of cells laid out left to right, top to bottom.
///
/// A structure is built fresh for every full pass. Once published for drawing
/// it is shared read-only; updates clone it first if anyone else still holds
/// a reference.
#[derive(Clone, Debug, PartialEq)]
pub struct Structure {
    rows: Vec<Row>,
    source_len: usize,
    content: Size,
    measured_with: Option<(Rect, f64)>,
    virtualized: bool,
}

impl Default for Structure {
    fn default() -> Self {
        Self {
            rows: vec![Row::default()],
            source_len: 0,
            content: Size::ZERO,
            measured_with: None,
            virtualized: false,
        }
    }
}

impl Structure {
    /// Builds a structure for `count` items.
    #[must_use]
    pub fn build(count: usize, options: &StructureOptions) -> Self {
        Self::build_filtered(count, options, |_| true)
    }

    /// Builds a structure over `raw_count` items, skipping those for which
    /// `keep` returns `false`.
    ///
    /// Skipped items do not consume a slot: cell indices count kept items
    /// only, so they differ from raw positions once anything is skipped.
    /// Building stops once `max_rows` rows exist and another would be needed.
    #[must_use]
    pub fn build_filtered(
        raw_count: usize,
        options: &StructureOptions,
        mut keep: impl FnMut(usize) -> bool,
    ) -> Self {
        let max_rows = options.rows();
        let mut rows = vec![Row::default()];
        let mut index = 0;

        for raw in 0..raw_count {
            if !keep(raw) {
                continue;
            }
            let current_len = rows.last().map_or(0, |row| row.cells.len());
            if options.breaks_before(index, current_len) {
                if max_rows.is_some_and(|max| rows.len() >= max) {
                    break;
                }
                rows.push(Row::default());
            }
            let row = rows.len() - 1;
            if let Some(last) = rows.last_mut() {
                let column = last.cells.len();
                last.cells.push(Cell::new(index, row, column));
            }
            index += 1;
        }

        Self {
            rows,
            source_len: raw_count,
            ..Self::default()
        }
    }

    /// Rows in order.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    /// Number of rows, including a lone empty row.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.rows.iter().map(|row| row.cells.len()).sum()
    }

    /// Whether there are no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|row| row.cells.is_empty())
    }

    /// Length of the longest row.
    #[must_use]
    pub fn max_row_len(&self) -> usize {
        self.rows.iter().map(|row| row.cells.len()).max().unwrap_or(0)
    }

    /// Cells in traversal order.
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.rows.iter().flat_map(|row| row.cells.iter())
    }

    /// Mutable cells in traversal order.
    pub fn cells_mut(&mut self) -> impl Iterator<Item = &mut Cell> {
        self.rows.iter_mut().flat_map(|row| row.cells.iter_mut())
    }

    /// Row and column of the cell with logical `index`.
    #[must_use]
    pub fn find(&self, index: usize) -> Option<(usize, usize)> {
        // Indices ascend in traversal order, so a row can be picked by its first cell.
        let row = self
            .rows
            .partition_point(|row| row.cells.first().is_some_and(|cell| cell.index <= index))
            .checked_sub(1)?;
        let column = self.rows[row]
            .cells
            .binary_search_by_key(&index, |cell| cell.index)
            .ok()?;
        Some((row, column))
    }

    /// The cell with logical `index`.
    #[must_use]
    pub fn cell(&self, index: usize) -> Option<&Cell> {
        let (row, column) = self.find(index)?;
        self.rows.get(row)?.cells.get(column)
    }

    /// Number of raw items the structure was built from, including skipped ones.
    #[must_use]
    pub const fn source_len(&self) -> usize {
        self.source_len
    }

    /// Available rectangle and scale of the last completed full measurement.
    #[must_use]
    pub const fn measured_with(&self) -> Option<(Rect, f64)> {
        self.measured_with
    }

    pub(crate) fn set_measured_with(&mut self, available: Rect, scale: f64) {
        self.measured_with = Some((available, scale));
    }

    /// Content size computed by the last measurement.
    #[must_use]
    pub const fn content_size(&self) -> Size {
        self.content
    }

    pub(crate) fn set_content_size(&mut self, content: Size) {
        self.content = content;
    }

    /// Whether a virtualization pass has run since the structure was built.
    #[must_use]
    pub const fn is_virtualized(&self) -> bool {
        self.virtualized
    }

    pub(crate) fn set_virtualized(&mut self) {
        self.virtualized = true;
    }
}

#[cfg(test)]
mod tests {
    use super::{StackKind, Structure, StructureOptions};

    fn row_sizes(structure: &Structure) -> Vec<usize> {
        structure.rows().iter().map(|row| row.cells.len()).collect()
    }

    #[test]
    fn empty_input_yields_single_empty_row() {
        let structure = Structure::build(0, &StructureOptions::grid(3));
        assert_eq!(structure.row_count(), 1);
        assert!(structure.is_empty());
    }

    #[test]
    fn grid_rows_fill_to_column_limit() {
        let structure = Structure::build(10, &StructureOptions::grid(3));
        assert_eq!(row_sizes(&structure), vec![3, 3, 3, 1]);
        for n in 1..40_usize {
            for c in 1..7_usize {
                let structure = Structure::build(n, &StructureOptions::grid(c as i32));
                let sizes = row_sizes(&structure);
                assert_eq!(sizes.len(), n.div_ceil(c));
                let (last, full) = sizes.split_last().unwrap();
                assert!(full.iter().all(|&len| len == c));
                let expected_last = if n % c == 0 { c } else { n % c };
                assert_eq!(*last, expected_last);
            }
        }
    }

    #[test]
    fn unbounded_column_puts_each_item_on_its_own_row() {
        let structure = Structure::build(4, &StructureOptions::column());
        assert_eq!(row_sizes(&structure), vec![1, 1, 1, 1]);
    }

    #[test]
    fn unbounded_row_keeps_a_single_line() {
        let structure = Structure::build(5, &StructureOptions::row());
        assert_eq!(row_sizes(&structure), vec![5]);
        assert_eq!(structure.rows()[0].cells[4].column, 4);
    }

    #[test]
    fn line_breaks_start_new_rows() {
        let options = StructureOptions::row().with_line_break(2).with_line_break(0);
        let structure = Structure::build(5, &options);
        assert_eq!(row_sizes(&structure), vec![2, 3]);

        let grid = StructureOptions::grid(3).with_line_break(1);
        assert_eq!(row_sizes(&Structure::build(5, &grid)), vec![1, 3, 1]);
    }

    #[test]
    fn row_limit_truncates() {
        let options = StructureOptions::grid(2).with_max_rows(2);
        let structure = Structure::build(9, &options);
        assert_eq!(row_sizes(&structure), vec![2, 2]);
        assert_eq!(structure.cell_count(), 4);
        assert_eq!(structure.source_len(), 9);
    }

    #[test]
    fn filtered_items_do_not_consume_slots() {
        let options = StructureOptions {
            kind: StackKind::Row,
            max_columns: 2,
            ..StructureOptions::default()
        };
        let structure = Structure::build_filtered(5, &options, |raw| raw != 1);
        assert_eq!(row_sizes(&structure), vec![2, 2]);
        let indices: Vec<usize> = structure.cells().map(|cell| cell.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn find_locates_cells() {
        let structure = Structure::build(10, &StructureOptions::grid(3));
        assert_eq!(structure.find(0), Some((0, 0)));
        assert_eq!(structure.find(5), Some((1, 2)));
        assert_eq!(structure.find(9), Some((3, 0)));
        assert_eq!(structure.find(10), None);
        assert_eq!(structure.cell(7).map(|cell| (cell.row, cell.column)), Some((2, 1)));
    }
}
