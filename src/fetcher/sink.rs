//! Storage sink: the single consumer of the ordered emit stream.

use crate::error::StoreError;
use crate::fetcher::FetchBackend;
use crate::job::Job;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// What the sink reports back to the engine after each write.
pub(crate) enum SinkFeedback<B: FetchBackend> {
    /// The batch was persisted; `jobs` of them are now finished.
    Stored { jobs: usize },
    /// The write failed; the jobs come back for re-scheduling or teardown.
    Failed {
        jobs: Vec<Job<B>>,
        error: StoreError,
    },
}

/// Consumes emitted jobs in index order and persists them through the
/// backend's `store` hook. Ready jobs are drained greedily so single-item and
/// batched writes share one code path; item order within a batch follows the
/// channel order, which is ascending by job index.
pub(crate) async fn run_sink<B: FetchBackend>(
    backend: Arc<B>,
    mut rx: mpsc::Receiver<Job<B>>,
    feedback: mpsc::UnboundedSender<SinkFeedback<B>>,
) {
    while let Some(job) = rx.recv().await {
        let mut batch = vec![job];
        while let Ok(job) = rx.try_recv() {
            batch.push(job);
        }

        let mut items = Vec::new();
        for job in &mut batch {
            if let Some(result) = job.result.take() {
                items.extend(result);
            }
        }

        let first_index = batch.first().map(|job| job.index).unwrap_or_default();
        match backend.store(items).await {
            Ok(()) => {
                debug!(jobs = batch.len(), first_index, "batch stored");
                if feedback
                    .send(SinkFeedback::Stored { jobs: batch.len() })
                    .is_err()
                {
                    break;
                }
            }
            Err(error) => {
                warn!(jobs = batch.len(), first_index, error = %error, "store failed");
                if feedback
                    .send(SinkFeedback::Failed { jobs: batch, error })
                    .is_err()
                {
                    break;
                }
            }
        }
    }
}
