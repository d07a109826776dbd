// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use thiserror::Error;
use trellis_recycler::ProviderError;

/// A measurement pass that could not complete.
///
/// Both variants are retried on the next layout tick; the structure that was
/// being built is discarded rather than published half-measured.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeasureError {
    /// The provider has no instances to offer yet.
    #[error("cell provider unavailable: {0}")]
    Unavailable(#[source] ProviderError),

    /// The provider failed to produce an instance for `index` mid-pass.
    #[error("measurement aborted at cell {index}")]
    Aborted {
        /// Logical index of the cell that could not be bound.
        index: usize,
        /// What the provider reported.
        #[source]
        source: ProviderError,
    },
}

impl MeasureError {
    /// The underlying provider failure.
    #[must_use]
    pub const fn provider_error(&self) -> &ProviderError {
        match self {
            Self::Unavailable(source) | Self::Aborted { source, .. } => source,
        }
    }

    /// Whether the condition clears up on its own, such as a data source swap
    /// racing the pass or a rebuild still in flight.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.provider_error().is_transient()
    }
}
