// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-slot measured and arranged state.

use kurbo::{Rect, Size, Vec2};

/// Size a child reported, tagged with the scale it was measured at.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Measured {
    /// The child opted out of drawing.
    Empty,
    /// The child's size in logical pixels.
    Sized {
        /// Measured size.
        size: Size,
        /// Device-pixel ratio used for the measurement.
        scale: f64,
    },
}

impl Measured {
    /// The measured size, or [`Size::ZERO`] when empty.
    #[must_use]
    pub const fn size(&self) -> Size {
        match self {
            Self::Empty => Size::ZERO,
            Self::Sized { size, .. } => *size,
        }
    }

    /// Whether the child opted out of drawing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Scale used for the measurement.
    #[must_use]
    pub const fn scale(&self) -> Option<f64> {
        match self {
            Self::Empty => None,
            Self::Sized { scale, .. } => Some(*scale),
        }
    }
}

/// One logical slot in a [`Structure`](crate::Structure).
///
/// `measured` and `destination` mean nothing until the engine has visited the
/// cell; `measured` stays `None` until then. `drawn` and `is_visible` are
/// rewritten by every virtualization pass.
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    /// Position in the logical item sequence.
    pub index: usize,
    /// Row of this cell in its structure.
    pub row: usize,
    /// Column of this cell within its row.
    pub column: usize,
    /// Space offered to the child for measurement.
    pub area: Rect,
    /// What the child reported, once measured.
    pub measured: Option<Measured>,
    /// Arranged placement, including the child's own alignment.
    pub destination: Rect,
    /// Absolute on-canvas rectangle from the last draw pass.
    pub drawn: Rect,
    /// Paint order override captured at measurement.
    pub z_index: i32,
    /// Result of the last virtualization pass.
    pub is_visible: bool,
}

impl Cell {
    /// A fresh, unmeasured cell.
    #[must_use]
    pub const fn new(index: usize, row: usize, column: usize) -> Self {
        Self {
            index,
            row,
            column,
            area: Rect::ZERO,
            measured: None,
            destination: Rect::ZERO,
            drawn: Rect::ZERO,
            z_index: 0,
            is_visible: false,
        }
    }

    /// Whether the engine has visited this cell.
    #[must_use]
    pub const fn is_measured(&self) -> bool {
        self.measured.is_some()
    }

    /// Measured size, once measured. Empty measurements report [`Size::ZERO`].
    #[must_use]
    pub fn measured_size(&self) -> Option<Size> {
        self.measured.as_ref().map(Measured::size)
    }

    /// Arranged placement, once measured.
    #[must_use]
    pub fn arranged(&self) -> Option<Rect> {
        self.measured.map(|_| self.destination)
    }

    /// Whether there is anything to draw for this cell.
    #[must_use]
    pub fn has_content(&self) -> bool {
        matches!(self.measured, Some(Measured::Sized { .. }))
            && self.destination.width() > 0.0
            && self.destination.height() > 0.0
    }

    pub(crate) fn translate(&mut self, by: Vec2) {
        self.area = self.area + by;
        if matches!(self.measured, Some(Measured::Sized { .. })) {
            self.destination = self.destination + by;
        }
    }
}

#[cfg(test)]
mod tests {
    use kurbo::{Rect, Size, Vec2};

    use super::{Cell, Measured};

    #[test]
    fn fresh_cell_is_unmeasured() {
        let cell = Cell::new(4, 1, 0);
        assert!(!cell.is_measured());
        assert_eq!(cell.arranged(), None);
        assert_eq!(cell.measured_size(), None);
        assert!(!cell.has_content());
    }

    #[test]
    fn empty_measurement_has_no_content() {
        let mut cell = Cell::new(0, 0, 0);
        cell.measured = Some(Measured::Empty);
        assert_eq!(cell.measured_size(), Some(Size::ZERO));
        assert!(!cell.has_content());
    }

    #[test]
    fn translate_moves_area_and_destination() {
        let mut cell = Cell::new(0, 0, 0);
        cell.area = Rect::new(0.0, 0.0, 100.0, 50.0);
        cell.measured = Some(Measured::Sized {
            size: Size::new(40.0, 20.0),
            scale: 1.0,
        });
        cell.destination = Rect::new(0.0, 0.0, 40.0, 20.0);
        cell.translate(Vec2::new(0.0, 15.0));
        assert_eq!(cell.area, Rect::new(0.0, 15.0, 100.0, 65.0));
        assert_eq!(cell.destination, Rect::new(0.0, 15.0, 40.0, 35.0));
    }
}
