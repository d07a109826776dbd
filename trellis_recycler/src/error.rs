// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types for pools and providers.

use std::time::Duration;

use thiserror::Error;

/// Failures raised by a [`ViewPool`](crate::ViewPool).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Every instance is on loan and none was returned within the wait timeout.
    ///
    /// With correct sizing this never happens; hosts should grow the pool or
    /// its prewarm margin instead of retrying in a loop.
    #[error("view pool exhausted: {max_size} instances on loan, waited {waited:?}")]
    Exhausted {
        /// Capacity of the pool at the time of the failure.
        max_size: usize,
        /// How long the caller waited for a returned instance.
        waited: Duration,
    },

    /// The pool was torn down.
    #[error("view pool has been disposed")]
    Disposed,
}

/// Failures raised by a [`CellProvider`](crate::CellProvider).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Templates are being rebuilt in the background, or were never initialized.
    #[error("cell templates are not initialized")]
    TemplatesNotReady,

    /// The index does not exist in the current data source or child list.
    #[error("cell index {index} is out of range for {len} items")]
    StaleIndex {
        /// The requested logical index.
        index: usize,
        /// Number of items currently available.
        len: usize,
    },

    /// The operation is only available for templated providers.
    #[error("operation requires templated content")]
    NotTemplated,

    /// The backing pool failed to produce an instance.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl ProviderError {
    /// Returns `true` for conditions that resolve themselves on a later layout pass.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TemplatesNotReady | Self::StaleIndex { .. })
    }
}
