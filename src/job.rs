//! Job model: the unit of fetch concurrency.

use crate::fetcher::FetchBackend;
use crate::peers::Peer;
use std::fmt;
use std::time::Instant;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Queued inbound, waiting for a peer.
    Idle,
    /// Dispatched to a peer, reply outstanding.
    Active,
    /// The request deadline elapsed; any late reply is dropped.
    Expired,
}

/// One unit of fetch work. The index is assigned once, stays dense across the
/// fetcher's lifetime, and defines the total emit order; everything else
/// mutates as the job cycles through dispatch and re-enqueue.
pub struct Job<B: FetchBackend> {
    pub(crate) index: u64,
    pub(crate) task: B::Task,
    pub(crate) state: JobState,
    pub(crate) peer: Option<Peer>,
    pub(crate) time: Instant,
    pub(crate) partial: Vec<B::Item>,
    pub(crate) result: Option<Vec<B::Item>>,
}

impl<B: FetchBackend> Job<B> {
    pub(crate) fn new(index: u64, task: B::Task) -> Self {
        Self {
            index,
            task,
            state: JobState::Idle,
            peer: None,
            time: Instant::now(),
            partial: Vec::new(),
            result: None,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn task(&self) -> &B::Task {
        &self.task
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// The peer currently serving this job, set only while dispatched.
    pub fn peer(&self) -> Option<&Peer> {
        self.peer.as_ref()
    }

    /// Time of the last enqueue.
    pub fn time(&self) -> Instant {
        self.time
    }

    /// Prefix of items accumulated from prior partial replies.
    pub fn partial(&self) -> &[B::Item] {
        &self.partial
    }

    /// Appends a short reply's items to the accumulated prefix.
    pub fn extend_partial(&mut self, items: Vec<B::Item>) {
        self.partial.extend(items);
    }

    /// Takes the accumulated prefix, leaving the job without one.
    pub fn take_partial(&mut self) -> Vec<B::Item> {
        std::mem::take(&mut self.partial)
    }
}

impl<B: FetchBackend> fmt::Debug for Job<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("index", &self.index)
            .field("task", &self.task)
            .field("state", &self.state)
            .field("peer", &self.peer.as_ref().map(|peer| peer.id))
            .field("partial", &self.partial.len())
            .field("result", &self.result.as_ref().map(Vec::len))
            .finish()
    }
}
