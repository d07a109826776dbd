// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Read-once traversal over templated cells.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::PoolError;
use crate::pool::{ReturnMode, ViewPool};
use crate::view::{CellView, Pooled};

/// A forward-only pass that binds every item in order.
///
/// Instead of the provider's persistent in-use map, this keeps a bounded
/// window of instances on loan. The window holds at most the pool's capacity;
/// once it is full, or the pool cannot supply another instance without
/// waiting, the oldest loan is returned before the next one is borrowed.
///
/// The pass is finite and does not restart on its own; call
/// [`reset`](Self::reset) to begin again. Create one per consuming thread.
/// Dropping it returns every loaned instance.
pub struct SequentialCells<V: CellView> {
    pool: Arc<ViewPool<V>>,
    data: Arc<[V::Data]>,
    window: VecDeque<(usize, Pooled<V>)>,
    capacity: usize,
    next: usize,
}

impl<V: CellView> core::fmt::Debug for SequentialCells<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SequentialCells")
            .field("len", &self.data.len())
            .field("next", &self.next)
            .field("on_loan", &self.window.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<V: CellView> SequentialCells<V> {
    pub(crate) fn new(pool: Arc<ViewPool<V>>, data: Arc<[V::Data]>) -> Self {
        let capacity = pool.max_size().max(1);
        Self {
            pool,
            data,
            window: VecDeque::with_capacity(capacity),
            capacity,
            next: 0,
        }
    }

    /// Total number of items in the pass.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the pass has no items at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Items not yet visited.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.next
    }

    /// Instances currently on loan.
    #[must_use]
    pub fn on_loan(&self) -> usize {
        self.window.len()
    }

    /// Binds the next item and returns it with its index.
    ///
    /// Returns `Ok(None)` once every item was visited.
    pub fn advance(&mut self) -> Result<Option<(usize, &mut V)>, PoolError> {
        let index = self.next;
        let Some(item) = self.data.get(index) else {
            return Ok(None);
        };

        while !self.window.is_empty()
            && (self.window.len() >= self.capacity || !self.pool.can_supply())
        {
            if let Some((_, oldest)) = self.window.pop_front() {
                self.pool.recycle(oldest, ReturnMode::Reset);
            }
        }

        let mut entry = self.pool.get()?;
        entry.view_mut().bind(index, item);
        self.next += 1;
        self.window.push_back((index, entry));
        Ok(self
            .window
            .back_mut()
            .map(|(index, entry)| (*index, entry.view_mut())))
    }

    /// Visits every remaining item. Returns how many were visited.
    pub fn for_each_remaining(
        &mut self,
        mut f: impl FnMut(usize, &mut V),
    ) -> Result<usize, PoolError> {
        let mut visited = 0;
        while let Some((index, view)) = self.advance()? {
            f(index, view);
            visited += 1;
        }
        Ok(visited)
    }

    /// Returns every loaned instance and rewinds to the first item.
    pub fn reset(&mut self) {
        self.release();
        self.next = 0;
    }

    fn release(&mut self) {
        for (_, entry) in self.window.drain(..) {
            self.pool.recycle(entry, ReturnMode::Reset);
        }
    }
}

impl<V: CellView> Drop for SequentialCells<V> {
    fn drop(&mut self) {
        self.release();
    }
}
