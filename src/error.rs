//! Error taxonomy for the fetch engine.

use crate::chain::ChainError;
use alloy_primitives::U256;
use thiserror::Error;

/// Message marker legacy chain stores use for a missing-parent condition.
const PARENT_MISSING_MARKER: &str = "could not find parent header";

/// Failure while persisting an emitted batch.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The batch does not attach to the stored chain; a reorg hint, not a
    /// hard storage fault.
    #[error("could not find parent header for block {number}")]
    ParentHeaderMissing { number: U256 },
    /// Any other storage failure.
    #[error(transparent)]
    Other(#[from] eyre::Report),
}

impl StoreError {
    /// True when the failure is a reorg hint. The typed variant is
    /// authoritative; the message substring covers stores that only surface
    /// stringly errors.
    pub fn is_parent_missing(&self) -> bool {
        match self {
            Self::ParentHeaderMissing { .. } => true,
            Self::Other(report) => report.to_string().contains(PARENT_MISSING_MARKER),
        }
    }
}

impl From<ChainError> for StoreError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::ParentHeaderMissing { number } => Self::ParentHeaderMissing { number },
            other => Self::Other(eyre::Report::msg(other.to_string())),
        }
    }
}

/// Errors surfaced by the engine. Recoverable conditions (empty replies,
/// malformed payloads, timeouts) are handled internally and never appear
/// here; `fetch` resolves with the first irrecoverable failure.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport or protocol failure while talking to a peer.
    #[error("peer request failed: {message}")]
    Request { message: String, irrecoverable: bool },
    /// The sink could not persist a completed job.
    #[error("storing fetched items failed: {0}")]
    Store(#[source] StoreError),
    /// Internal accounting went out of bounds.
    #[error("fetcher invariant violated: {0}")]
    Invariant(String),
}
