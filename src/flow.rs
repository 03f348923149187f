//! Per-peer flow control for rate-limited peer capabilities.

use crate::peers::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Per-peer credit accounting that limits outstanding requests of a given
/// message kind. Light-client style servers advertise a buffer value with
/// every reply; the fetcher must not ask for more than the credit covers.
pub trait FlowControl: Send + Sync {
    /// How many items of `message` kind the peer can currently serve.
    fn max_request_count(&self, peer: PeerId, message: &str) -> u32;

    /// Updates the peer's credit from the buffer value a reply carried.
    fn handle_reply(&self, peer: PeerId, buffer_value: u32);
}

/// Credit window refreshed by reply buffer values. Unknown peers start at the
/// configured limit; each reply replaces the credit with the advertised
/// value, capped at the limit.
#[derive(Debug)]
pub struct WindowFlowControl {
    limit: u32,
    credits: RwLock<HashMap<PeerId, u32>>,
}

impl WindowFlowControl {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            credits: RwLock::new(HashMap::new()),
        }
    }
}

impl FlowControl for WindowFlowControl {
    fn max_request_count(&self, peer: PeerId, _message: &str) -> u32 {
        let credits = self.credits.read();
        credits.get(&peer).copied().unwrap_or(self.limit)
    }

    fn handle_reply(&self, peer: PeerId, buffer_value: u32) {
        let mut credits = self.credits.write();
        credits.insert(peer, buffer_value.min(self.limit));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer_id(value: u8) -> PeerId {
        PeerId::repeat_byte(value)
    }

    #[test]
    fn unknown_peers_start_at_the_limit() {
        let flow = WindowFlowControl::new(192);
        assert_eq!(flow.max_request_count(peer_id(1), "get_block_headers"), 192);
    }

    #[test]
    fn replies_refresh_the_credit() {
        let flow = WindowFlowControl::new(192);
        flow.handle_reply(peer_id(1), 64);
        assert_eq!(flow.max_request_count(peer_id(1), "get_block_headers"), 64);

        flow.handle_reply(peer_id(1), 10_000);
        assert_eq!(flow.max_request_count(peer_id(1), "get_block_headers"), 192);
    }
}
