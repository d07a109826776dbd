// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Capability surface required from pooled and static child instances.

use std::sync::Arc;

/// Identifier of a pooled instance.
///
/// The slot is assigned when the pool creates the instance and is never
/// handed out twice by the same pool. The generation identifies the pool
/// itself, so ids minted by a torn-down pool never collide with ids from its
/// replacement.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ViewId(u32, u32);

impl ViewId {
    pub(crate) const fn new(slot: u32, generation: u32) -> Self {
        Self(slot, generation)
    }

    /// Creation slot within the owning pool.
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.0
    }

    /// Generation of the pool that created this instance.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.1
    }
}

/// The minimal surface the recycler needs from a child instance.
///
/// Layout and drawing live elsewhere; this trait only covers binding and
/// the flags consulted when deciding whether a cell participates at all.
pub trait CellView: Send + 'static {
    /// Per-item data context bound into templated instances.
    type Data: Send + Sync + 'static;

    /// Binds the instance to the item at `index`.
    ///
    /// Called both for fresh bindings and for rebinding an instance that is
    /// already mapped to `index`, in case the item changed in place.
    fn bind(&mut self, index: usize, data: &Self::Data);

    /// Clears the bound index and bound data.
    fn unbind(&mut self);

    /// Whether the instance wants to be drawn at all.
    fn can_draw(&self) -> bool {
        true
    }

    /// Paint and iteration order override. Lower values are drawn first.
    fn z_index(&self) -> i32 {
        0
    }

    /// Drops cached render state without unbinding.
    fn invalidate(&mut self) {}
}

/// Creates one fresh instance from a template definition.
pub type ViewFactory<V> = Arc<dyn Fn() -> V + Send + Sync>;

/// An instance owned by a [`ViewPool`](crate::ViewPool) or on loan from it.
#[derive(Debug)]
pub struct Pooled<V> {
    id: ViewId,
    view: V,
}

impl<V> Pooled<V> {
    pub(crate) const fn new(id: ViewId, view: V) -> Self {
        Self { id, view }
    }

    /// Identifier assigned by the pool.
    #[must_use]
    pub const fn id(&self) -> ViewId {
        self.id
    }

    /// Shared access to the instance.
    #[must_use]
    pub const fn view(&self) -> &V {
        &self.view
    }

    /// Mutable access to the instance.
    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }
}
