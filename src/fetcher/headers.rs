//! Block-header fetch over a flow-controlled peer capability.

use crate::chain::{BlockHeader, HeaderChain};
use crate::config::HeaderFetcherConfig;
use crate::error::{FetchError, StoreError};
use crate::events::{EventSink, SyncEvent};
use crate::fetcher::{FetchBackend, Fetcher, Reply};
use crate::flow::FlowControl;
use crate::job::Job;
use crate::peers::{Peer, PeerPool};
use alloy_primitives::U256;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Message name the flow-control accounting keys header requests by.
pub const GET_BLOCK_HEADERS: &str = "get_block_headers";

/// A contiguous header range to fetch from one peer, possibly over several
/// partial replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderTask {
    /// First block of the range (highest block when `reverse`).
    pub first: U256,
    pub count: u32,
    pub reverse: bool,
}

/// Wire-level header request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersRequest {
    pub start: U256,
    pub max: u32,
    pub reverse: bool,
}

/// Headers a peer served, with the flow-control buffer value it advertised.
#[derive(Debug, Clone)]
pub struct HeadersReply {
    pub headers: Vec<BlockHeader>,
    pub buffer_value: u32,
}

impl Reply for HeadersReply {
    fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// Wire client serving header requests against a specific peer.
#[async_trait]
pub trait HeaderClient: Send + Sync {
    async fn get_headers(
        &self,
        peer: &Peer,
        request: HeadersRequest,
    ) -> Result<HeadersReply, FetchError>;
}

struct RangeCursor {
    next: U256,
    remaining: u64,
}

/// Header fetch backend: requests header ranges from peers that advertise
/// the header-serving capability, merges partial replies, and appends the
/// completed ranges to the chain store.
pub struct HeaderBackend {
    client: Arc<dyn HeaderClient>,
    flow: Arc<dyn FlowControl>,
    chain: Arc<dyn HeaderChain>,
    events: Arc<dyn EventSink>,
    config: HeaderFetcherConfig,
    cursor: Mutex<RangeCursor>,
}

/// Fetcher specialized to block headers.
pub type HeaderFetcher = Fetcher<HeaderBackend>;

impl HeaderBackend {
    pub fn new(
        client: Arc<dyn HeaderClient>,
        flow: Arc<dyn FlowControl>,
        chain: Arc<dyn HeaderChain>,
        events: Arc<dyn EventSink>,
        config: HeaderFetcherConfig,
    ) -> Self {
        let cursor = RangeCursor {
            next: config.first,
            remaining: config.count,
        };
        Self {
            client,
            flow,
            chain,
            events,
            config,
            cursor: Mutex::new(cursor),
        }
    }
}

#[async_trait]
impl FetchBackend for HeaderBackend {
    type Task = HeaderTask;
    type Reply = HeadersReply;
    type Item = BlockHeader;

    async fn request(
        &self,
        task: &HeaderTask,
        partial: usize,
        peer: &Peer,
    ) -> Result<Option<HeadersReply>, FetchError> {
        if self.flow.max_request_count(peer.id, GET_BLOCK_HEADERS) < self.config.max_per_request {
            debug!(peer = %peer.id, "insufficient flow-control credit; deferring");
            return Ok(None);
        }
        let offset = U256::from(partial as u64);
        let start = if task.reverse {
            task.first.saturating_sub(offset)
        } else {
            task.first.saturating_add(offset)
        };
        let max = task.count.saturating_sub(partial as u32);
        let reply = self
            .client
            .get_headers(
                peer,
                HeadersRequest {
                    start,
                    max,
                    reverse: task.reverse,
                },
            )
            .await?;
        Ok(Some(reply))
    }

    fn process(&self, job: &mut Job<Self>, reply: HeadersReply) -> Option<Vec<BlockHeader>> {
        if let Some(peer) = job.peer() {
            self.flow.handle_reply(peer.id, reply.buffer_value);
        }
        let count = job.task().count as usize;
        let received = reply.headers.len();
        let have = job.partial().len();
        if have + received == count {
            let mut headers = job.take_partial();
            headers.extend(reply.headers);
            Some(headers)
        } else if received > 0 && have + received < count {
            job.extend_partial(reply.headers);
            None
        } else {
            // Oversized replies are malformed; ask again.
            None
        }
    }

    async fn store(&self, headers: Vec<BlockHeader>) -> Result<(), StoreError> {
        let accepted = self.chain.put_headers(headers.clone()).await?;
        debug!(accepted, of = headers.len(), "headers stored");
        let prefix: Vec<BlockHeader> = headers.into_iter().take(accepted).collect();
        self.events.emit(SyncEvent::FetchedHeaders { headers: prefix });
        Ok(())
    }

    fn next_tasks(&self) -> Vec<HeaderTask> {
        let mut cursor = self.cursor.lock();
        let mut tasks = Vec::new();
        while cursor.remaining > 0 {
            let count = cursor.remaining.min(self.config.max_per_request as u64) as u32;
            tasks.push(HeaderTask {
                first: cursor.next,
                count,
                reverse: self.config.reverse,
            });
            let step = U256::from(count);
            cursor.next = if self.config.reverse {
                cursor.next.saturating_sub(step)
            } else {
                cursor.next.saturating_add(step)
            };
            cursor.remaining -= count as u64;
        }
        tasks
    }

    fn peer(&self, pool: &dyn PeerPool) -> Option<Peer> {
        pool.idle(Some(&|peer: &Peer| peer.serve_headers))
    }

    fn rewind_task(&self, task: &HeaderTask, safe_reorg_distance: u32) -> Option<HeaderTask> {
        let step_back = task
            .first
            .saturating_sub(U256::ONE)
            .min(U256::from(safe_reorg_distance));
        if step_back.is_zero() {
            return None;
        }
        Some(HeaderTask {
            first: task.first - step_back,
            count: task.count.saturating_add(step_back.to::<u32>()),
            reverse: task.reverse,
        })
    }
}
