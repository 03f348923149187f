//! Header chain store contract and an in-memory implementation.

use alloy_primitives::{B256, U256};
use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

/// Minimal header representation the fetcher moves around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: U256,
    pub hash: B256,
    pub parent_hash: B256,
}

/// Errors for header insertion.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The first header of the batch does not attach to the stored chain.
    #[error("could not find parent header for block {number}")]
    ParentHeaderMissing { number: U256 },
    /// The store rejected the header for a non-reorg reason.
    #[error("header store rejected block {number}: {reason}")]
    Rejected { number: U256, reason: String },
}

/// Persistent header store. `put_headers` appends in order and returns how
/// many headers of the batch it accepted.
#[async_trait]
pub trait HeaderChain: Send + Sync {
    async fn put_headers(&self, headers: Vec<BlockHeader>) -> Result<usize, ChainError>;
}

/// In-memory parent-linked header chain for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryHeaderChain {
    head: RwLock<Option<BlockHeader>>,
    stored: RwLock<Vec<BlockHeader>>,
}

impl MemoryHeaderChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the chain at an existing head header.
    pub fn with_head(head: BlockHeader) -> Self {
        Self {
            head: RwLock::new(Some(head)),
            stored: RwLock::new(Vec::new()),
        }
    }

    pub fn head(&self) -> Option<BlockHeader> {
        self.head.read().clone()
    }

    pub fn stored(&self) -> Vec<BlockHeader> {
        self.stored.read().clone()
    }
}

#[async_trait]
impl HeaderChain for MemoryHeaderChain {
    async fn put_headers(&self, headers: Vec<BlockHeader>) -> Result<usize, ChainError> {
        let mut head = self.head.write();
        let mut stored = self.stored.write();
        let mut accepted = 0usize;
        for header in headers {
            match head.as_ref() {
                Some(current) if header.parent_hash != current.hash => {
                    if accepted == 0 {
                        return Err(ChainError::ParentHeaderMissing {
                            number: header.number,
                        });
                    }
                    // A later gap truncates the batch to the accepted prefix.
                    break;
                }
                _ => {}
            }
            *head = Some(header.clone());
            stored.push(header);
            accepted += 1;
        }
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_from_u64(value: u64) -> B256 {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        B256::from(bytes)
    }

    fn header(number: u64, parent: u64) -> BlockHeader {
        BlockHeader {
            number: U256::from(number),
            hash: hash_from_u64(number + 1),
            parent_hash: hash_from_u64(parent + 1),
        }
    }

    #[tokio::test]
    async fn accepts_linked_headers() {
        let chain = MemoryHeaderChain::with_head(header(0, 0));
        let accepted = chain
            .put_headers(vec![header(1, 0), header(2, 1)])
            .await
            .expect("put headers");
        assert_eq!(accepted, 2);
        assert_eq!(chain.head().map(|h| h.number), Some(U256::from(2)));
    }

    #[tokio::test]
    async fn rejects_unlinked_first_header() {
        let chain = MemoryHeaderChain::with_head(header(0, 0));
        let err = chain
            .put_headers(vec![header(5, 9)])
            .await
            .expect_err("gap must be rejected");
        assert_eq!(
            err,
            ChainError::ParentHeaderMissing {
                number: U256::from(5)
            }
        );
    }

    #[tokio::test]
    async fn truncates_at_a_later_gap() {
        let chain = MemoryHeaderChain::with_head(header(0, 0));
        let accepted = chain
            .put_headers(vec![header(1, 0), header(7, 9)])
            .await
            .expect("prefix accepted");
        assert_eq!(accepted, 1);
    }
}
