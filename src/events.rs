//! Event sink seam for sync observability.

use crate::chain::BlockHeader;
use crate::peers::PeerId;

/// Events the fetcher publishes while running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A recoverable fetch failure, with the failing task and peer when known.
    FetcherError {
        error: String,
        task: Option<String>,
        peer: Option<PeerId>,
    },
    /// Headers the chain store accepted, in order.
    FetchedHeaders { headers: Vec<BlockHeader> },
}

/// Consumer of fetcher events, injected at construction.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SyncEvent);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: SyncEvent) {}
}
