//! Engine and specialization configuration.

use alloy_primitives::U256;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(8000);
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_BAN_TIME: Duration = Duration::from_millis(60_000);
pub const DEFAULT_MAX_QUEUE: usize = 4;
pub const DEFAULT_SAFE_REORG_DISTANCE: u32 = 64;
pub const DEFAULT_MAX_PER_REQUEST: u32 = 192;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Per-request deadline before the job expires and the peer is banned.
    pub timeout: Duration,
    /// Idle-poll delay, also the post-failure peer release delay.
    pub interval: Duration,
    /// How long `PeerPool::ban` keeps a misbehaving peer out.
    pub ban_time: Duration,
    /// In-flight window and emit buffer capacity.
    pub max_queue: usize,
    /// Clear fetcher state once every job has been stored.
    pub destroy_when_done: bool,
    /// Upper bound on how far a store-time reorg may rewind a task.
    pub safe_reorg_distance: u32,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_INTERVAL,
            ban_time: DEFAULT_BAN_TIME,
            max_queue: DEFAULT_MAX_QUEUE,
            destroy_when_done: true,
            safe_reorg_distance: DEFAULT_SAFE_REORG_DISTANCE,
        }
    }
}

/// Header fetch configuration: the contiguous range to reconstruct and the
/// per-request ceiling the peer capability allows.
#[derive(Debug, Clone)]
pub struct HeaderFetcherConfig {
    /// First block of the range (highest block when `reverse`).
    pub first: U256,
    /// Total number of headers to fetch.
    pub count: u64,
    /// Hard cap on headers requested from one peer in one message.
    pub max_per_request: u32,
    /// Walk the range from `first` downwards.
    pub reverse: bool,
}

impl Default for HeaderFetcherConfig {
    fn default() -> Self {
        Self {
            first: U256::ZERO,
            count: 0,
            max_per_request: DEFAULT_MAX_PER_REQUEST,
            reverse: false,
        }
    }
}
