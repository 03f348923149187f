//! Shared scaffolding for engine tests.

use crate::chain::{BlockHeader, ChainError, HeaderChain};
use crate::error::FetchError;
use crate::events::{EventSink, SyncEvent};
use crate::fetcher::headers::{HeaderClient, HeadersReply, HeadersRequest};
use crate::peers::{Peer, PeerId};
use alloy_primitives::{B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Buffer value cooperative test peers advertise; large enough to never gate
/// a default-sized request.
pub const TEST_BUFFER_VALUE: u32 = 192;

pub fn peer_id(value: u8) -> PeerId {
    PeerId::repeat_byte(value)
}

pub fn test_hash(value: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&value.to_be_bytes());
    B256::from(bytes)
}

/// Parent-linked headers for `start..start + count`.
pub fn headers_from(start: u64, count: usize) -> Vec<BlockHeader> {
    (0..count)
        .map(|offset| {
            let number = start + offset as u64;
            BlockHeader {
                number: U256::from(number),
                hash: test_hash(number),
                parent_hash: test_hash(number.wrapping_sub(1)),
            }
        })
        .collect()
}

/// Scripted behavior for one header request.
pub enum ClientAction {
    /// Serve this many headers from the requested start (capped at `max`).
    Serve(usize),
    /// Serve the full requested window.
    Full,
    /// Serve the full window after a delay.
    Delayed(Duration),
    /// Reply with no headers.
    Empty,
    /// Never reply.
    Stall,
    /// Fail the request.
    Fail(&'static str),
}

/// Header client that plays per-peer scripts, serving the full requested
/// window once a script runs out.
#[derive(Default)]
pub struct ScriptedHeaderClient {
    scripts: Mutex<HashMap<PeerId, VecDeque<ClientAction>>>,
    pub calls: Mutex<Vec<(PeerId, HeadersRequest)>>,
}

impl ScriptedHeaderClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, peer: PeerId, actions: Vec<ClientAction>) {
        self.scripts.lock().entry(peer).or_default().extend(actions);
    }

    fn next_action(&self, peer: PeerId) -> ClientAction {
        self.scripts
            .lock()
            .get_mut(&peer)
            .and_then(VecDeque::pop_front)
            .unwrap_or(ClientAction::Full)
    }
}

#[async_trait]
impl HeaderClient for ScriptedHeaderClient {
    async fn get_headers(
        &self,
        peer: &Peer,
        request: HeadersRequest,
    ) -> Result<HeadersReply, FetchError> {
        self.calls.lock().push((peer.id, request.clone()));
        let start = u64::try_from(request.start).expect("test ranges fit u64");
        let serve = |count: usize| HeadersReply {
            headers: headers_from(start, count.min(request.max as usize)),
            buffer_value: TEST_BUFFER_VALUE,
        };
        match self.next_action(peer.id) {
            ClientAction::Serve(count) => Ok(serve(count)),
            ClientAction::Full => Ok(serve(request.max as usize)),
            ClientAction::Delayed(delay) => {
                tokio::time::sleep(delay).await;
                Ok(serve(request.max as usize))
            }
            ClientAction::Empty => Ok(HeadersReply {
                headers: Vec::new(),
                buffer_value: TEST_BUFFER_VALUE,
            }),
            ClientAction::Stall => {
                futures::future::pending::<()>().await;
                unreachable!("pending never resolves")
            }
            ClientAction::Fail(message) => Err(FetchError::Request {
                message: message.into(),
                irrecoverable: false,
            }),
        }
    }
}

/// Chain store that records every batch and can script failures and
/// truncated acceptance.
#[derive(Default)]
pub struct RecordingChain {
    pub batches: Mutex<Vec<Vec<BlockHeader>>>,
    failures: Mutex<VecDeque<ChainError>>,
    accept_limits: Mutex<VecDeque<usize>>,
}

impl RecordingChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `put_headers` call with `error`.
    pub fn fail_next(&self, error: ChainError) {
        self.failures.lock().push_back(error);
    }

    /// Accepts only `count` headers from the next batch.
    pub fn accept_next(&self, count: usize) {
        self.accept_limits.lock().push_back(count);
    }
}

#[async_trait]
impl HeaderChain for RecordingChain {
    async fn put_headers(&self, headers: Vec<BlockHeader>) -> Result<usize, ChainError> {
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        let accepted = self
            .accept_limits
            .lock()
            .pop_front()
            .map_or(headers.len(), |limit| limit.min(headers.len()));
        self.batches
            .lock()
            .push(headers.into_iter().take(accepted).collect());
        Ok(accepted)
    }
}

/// Event sink that keeps everything it sees.
#[derive(Default)]
pub struct RecordingEvents {
    pub events: Mutex<Vec<SyncEvent>>,
}

impl EventSink for RecordingEvents {
    fn emit(&self, event: SyncEvent) {
        self.events.lock().push(event);
    }
}
