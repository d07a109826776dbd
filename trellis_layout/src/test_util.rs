// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A sized tile view shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use kurbo::Size;
use parking_lot::Mutex;
use trellis_recycler::{CellView, ViewFactory};

use crate::engine::LayoutChild;

#[derive(Debug)]
pub(crate) struct TileData {
    pub(crate) size: Mutex<Size>,
    pub(crate) z_index: i32,
    pub(crate) drawable: bool,
}

impl TileData {
    pub(crate) fn new(width: f64, height: f64) -> Self {
        Self {
            size: Mutex::new(Size::new(width, height)),
            z_index: 0,
            drawable: true,
        }
    }

    pub(crate) fn with_z(mut self, z_index: i32) -> Self {
        self.z_index = z_index;
        self
    }

    pub(crate) fn hidden(mut self) -> Self {
        self.drawable = false;
        self
    }
}

pub(crate) fn tile_data(sizes: impl IntoIterator<Item = (f64, f64)>) -> Arc<[TileData]> {
    sizes
        .into_iter()
        .map(|(width, height)| TileData::new(width, height))
        .collect()
}

#[derive(Debug)]
pub(crate) struct Tile {
    pub(crate) serial: u64,
    pub(crate) bound: Option<usize>,
    pub(crate) size: Size,
    pub(crate) z_index: i32,
    pub(crate) drawable: bool,
    pub(crate) measures: usize,
    pub(crate) invalidations: usize,
}

impl Tile {
    fn blank(serial: u64) -> Self {
        Self {
            serial,
            bound: None,
            size: Size::ZERO,
            z_index: 0,
            drawable: true,
            measures: 0,
            invalidations: 0,
        }
    }

    /// A static child with a fixed size.
    pub(crate) fn fixed(width: f64, height: f64) -> Self {
        Self {
            size: Size::new(width, height),
            ..Self::blank(0)
        }
    }

    pub(crate) fn undrawable(mut self) -> Self {
        self.drawable = false;
        self
    }
}

impl CellView for Tile {
    type Data = TileData;

    fn bind(&mut self, index: usize, data: &TileData) {
        self.bound = Some(index);
        self.size = *data.size.lock();
        self.z_index = data.z_index;
        self.drawable = data.drawable;
    }

    fn unbind(&mut self) {
        self.bound = None;
        self.size = Size::ZERO;
        self.z_index = 0;
        self.drawable = true;
    }

    fn can_draw(&self) -> bool {
        self.drawable
    }

    fn z_index(&self) -> i32 {
        self.z_index
    }

    fn invalidate(&mut self) {
        self.invalidations += 1;
    }
}

impl LayoutChild for Tile {
    fn measure(&mut self, _available: Size, _scale: f64) -> Option<Size> {
        self.measures += 1;
        Some(self.size)
    }
}

/// A factory of blank tiles and the number of tiles it has created.
pub(crate) fn tile_factory() -> (ViewFactory<Tile>, Arc<AtomicU64>) {
    let created = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&created);
    let factory: ViewFactory<Tile> =
        Arc::new(move || Tile::blank(counter.fetch_add(1, Ordering::SeqCst)));
    (factory, created)
}
