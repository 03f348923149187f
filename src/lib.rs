//! Pipelined peer-fetch engine.
//!
//! Reconstructs a contiguous range of blockchain artifacts by issuing ordered
//! sub-requests to a dynamic pool of remote peers, reassembling out-of-order
//! replies in strict index order, and persisting them downstream with bounded
//! memory. The generic engine handles scheduling, timeouts, peer banning,
//! partial-result retry, backpressure, and store-time reorg rewind; concrete
//! backends supply the request/process/store hooks. One backend ships with
//! the crate: block-header fetch over a flow-controlled peer capability.

pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod flow;
mod job;
pub mod peers;
mod queue;
#[cfg(test)]
mod test_utils;

pub use chain::{BlockHeader, ChainError, HeaderChain, MemoryHeaderChain};
pub use config::{FetcherConfig, HeaderFetcherConfig};
pub use error::{FetchError, StoreError};
pub use events::{EventSink, NullEventSink, SyncEvent};
pub use fetcher::headers::{
    HeaderBackend, HeaderClient, HeaderFetcher, HeaderTask, HeadersReply, HeadersRequest,
};
pub use fetcher::{FetchBackend, Fetcher, Reply};
pub use job::{Job, JobState};
pub use peers::{MemoryPeerPool, Peer, PeerId, PeerPool};
