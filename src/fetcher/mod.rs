//! The generic fetch engine.
//!
//! A fetcher reconstructs a contiguous, index-ordered range of artifacts by
//! pairing queued jobs with idle peers, overlapping the peer I/O, and
//! reassembling out-of-order replies into a strictly ordered stream that a
//! single sink task persists. All queues, counters, and peer assignments are
//! owned by one engine task; request futures resolve back into that task, so
//! no state is shared across threads.

pub mod headers;
mod sink;

use crate::config::FetcherConfig;
use crate::error::{FetchError, StoreError};
use crate::events::{EventSink, SyncEvent};
use crate::job::{Job, JobState};
use crate::peers::{Peer, PeerId, PeerPool};
use crate::queue::JobQueue;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use self::sink::{run_sink, SinkFeedback};

/// Raw reply payloads expose emptiness so the engine can treat blank replies
/// uniformly across specializations.
pub trait Reply {
    fn is_empty(&self) -> bool;
}

/// The capability set a concrete fetcher implements. The engine is generic
/// over the task/reply/item triple and drives these hooks from its owner
/// task.
#[async_trait]
pub trait FetchBackend: Send + Sync + Sized + 'static {
    /// Caller-defined description of what to fetch.
    type Task: Clone + fmt::Debug + Send + Sync + 'static;
    /// Raw reply a peer produced for one request.
    type Reply: Reply + Send + 'static;
    /// Storage item the reply is processed into.
    type Item: Clone + Send + Sync + 'static;

    /// Issues the request for `task` against `peer`. `partial` is the number
    /// of items already accumulated for the task; implementations shift the
    /// requested window past them. `Ok(None)` re-queues the job for another
    /// peer.
    async fn request(
        &self,
        task: &Self::Task,
        partial: usize,
        peer: &Peer,
    ) -> Result<Option<Self::Reply>, FetchError>;

    /// Turns a raw reply into storage items. Returning the full item
    /// sequence completes the job; returning `None` after extending the
    /// job's partial re-queues the remainder; returning `None` without
    /// touching the job re-queues the whole task.
    fn process(&self, job: &mut Job<Self>, reply: Self::Reply) -> Option<Vec<Self::Item>>;

    /// Persists one emitted batch of items.
    async fn store(&self, items: Vec<Self::Item>) -> Result<(), StoreError>;

    /// Lazily produces more tasks; polled once per scheduling pass.
    fn next_tasks(&self) -> Vec<Self::Task> {
        Vec::new()
    }

    /// Selects a peer for the next dispatch.
    fn peer(&self, pool: &dyn PeerPool) -> Option<Peer> {
        pool.idle(None)
    }

    /// Rewrites `task` to restart up to `safe_reorg_distance` items earlier
    /// after the sink reported a missing parent. `None` means the task kind
    /// cannot rewind and the failure is fatal.
    fn rewind_task(&self, task: &Self::Task, safe_reorg_distance: u32) -> Option<Self::Task> {
        let _ = (task, safe_reorg_distance);
        None
    }
}

enum RequestOutcome<B: FetchBackend> {
    Reply(Option<B::Reply>),
    Failed(FetchError),
    TimedOut,
}

struct RequestDone<B: FetchBackend> {
    index: u64,
    peer: Peer,
    outcome: RequestOutcome<B>,
}

type RequestFuture<B> = Pin<Box<dyn Future<Output = RequestDone<B>> + Send>>;
type ReleaseFuture = Pin<Box<dyn Future<Output = PeerId> + Send>>;

enum Tick<B: FetchBackend> {
    Resolved(RequestDone<B>),
    Release(PeerId),
    Sink(SinkFeedback<B>),
    Idle,
}

struct SinkParts<B: FetchBackend> {
    rx: mpsc::Receiver<Job<B>>,
    feedback_tx: mpsc::UnboundedSender<SinkFeedback<B>>,
}

/// Pipelined fetch engine over a concrete backend.
pub struct Fetcher<B: FetchBackend> {
    backend: Arc<B>,
    pool: Arc<dyn PeerPool>,
    events: Arc<dyn EventSink>,
    config: FetcherConfig,

    inbound: JobQueue<B>,
    outbound: JobQueue<B>,
    active: HashMap<u64, Job<B>>,
    in_flight: FuturesUnordered<RequestFuture<B>>,
    releases: FuturesUnordered<ReleaseFuture>,

    sink_tx: Option<mpsc::Sender<Job<B>>>,
    sink_parts: Option<SinkParts<B>>,
    feedback_rx: mpsc::UnboundedReceiver<SinkFeedback<B>>,

    next_index: u64,
    total: u64,
    processed: u64,
    finished: u64,
    running: bool,
    errored: Option<FetchError>,
}

impl<B: FetchBackend> Fetcher<B> {
    pub fn new(
        backend: Arc<B>,
        pool: Arc<dyn PeerPool>,
        events: Arc<dyn EventSink>,
        config: FetcherConfig,
    ) -> Self {
        let (sink_tx, sink_rx) = mpsc::channel(config.max_queue.max(1));
        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            pool,
            events,
            config,
            inbound: JobQueue::new(),
            outbound: JobQueue::new(),
            active: HashMap::new(),
            in_flight: FuturesUnordered::new(),
            releases: FuturesUnordered::new(),
            sink_tx: Some(sink_tx),
            sink_parts: Some(SinkParts {
                rx: sink_rx,
                feedback_tx,
            }),
            feedback_rx,
            next_index: 0,
            total: 0,
            processed: 0,
            finished: 0,
            running: false,
            errored: None,
        }
    }

    /// Jobs enqueued over the fetcher's lifetime, minus undispatched work
    /// discarded by an irrecoverable teardown.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Jobs emitted to the sink so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Jobs whose storage call returned successfully.
    pub fn finished(&self) -> u64 {
        self.finished
    }

    /// Adds a task, assigning it the next dense index.
    pub fn enqueue_task(&mut self, task: B::Task) {
        let index = self.next_index;
        self.next_index += 1;
        self.total += 1;
        self.inbound.push(Job::new(index, task));
    }

    /// Runs the fetch to completion: every enqueued job stored, or the first
    /// irrecoverable failure. Recoverable conditions (empty replies, short
    /// replies, timeouts, transport errors) are retried internally and
    /// surface only as events and logs.
    pub async fn fetch(&mut self) -> Result<(), FetchError> {
        let parts = self
            .sink_parts
            .take()
            .ok_or_else(|| FetchError::Invariant("fetch may only run once".into()))?;
        let sink_task = tokio::spawn(run_sink(
            Arc::clone(&self.backend),
            parts.rx,
            parts.feedback_tx,
        ));
        self.running = true;

        while self.running {
            for task in self.backend.next_tasks() {
                self.enqueue_task(task);
            }
            while self.next() {}
            if self.finished == self.total && self.inbound.is_empty() && self.active.is_empty() {
                debug!(total = self.total, "all jobs stored; fetch complete");
                self.running = false;
                break;
            }

            let tick = tokio::select! {
                Some(done) = self.in_flight.next() => Tick::Resolved(done),
                Some(peer) = self.releases.next() => Tick::Release(peer),
                Some(feedback) = self.feedback_rx.recv() => Tick::Sink(feedback),
                _ = tokio::time::sleep(self.config.interval) => Tick::Idle,
            };
            match tick {
                Tick::Resolved(done) => self.on_request_resolved(done),
                Tick::Release(peer) => self.pool.set_idle(peer, true),
                Tick::Sink(feedback) => self.on_sink_feedback(feedback),
                Tick::Idle => {}
            }
        }

        // Close the emit stream; the sink drains and exits on its own unless
        // the engine is tearing down on an error.
        self.sink_tx = None;
        if self.errored.is_some() {
            sink_task.abort();
        }
        let _ = sink_task.await;

        if let Some(error) = self.errored.take() {
            return Err(error);
        }
        if self.config.destroy_when_done {
            self.destroy();
        }
        Ok(())
    }

    /// Attempts one dispatch. Returns false when nothing is dispatchable
    /// this tick: no inbound job, a full emit buffer, the lowest job beyond
    /// the in-flight window, or no idle peer.
    fn next(&mut self) -> bool {
        let Some(index) = self.inbound.peek_index() else {
            return false;
        };
        let Some(sink_tx) = self.sink_tx.as_ref() else {
            return false;
        };
        if sink_tx.capacity() == 0 {
            trace!(index, "emit buffer full; holding dispatch");
            return false;
        }
        if index > self.processed + self.config.max_queue as u64 {
            trace!(
                index,
                processed = self.processed,
                max_queue = self.config.max_queue,
                "job beyond dispatch window"
            );
            return false;
        }
        let Some(peer) = self.backend.peer(self.pool.as_ref()) else {
            trace!(index, "no idle peer");
            return false;
        };
        let Some(mut job) = self.inbound.pop() else {
            return false;
        };

        self.pool.set_idle(peer.id, false);
        job.state = JobState::Active;
        job.peer = Some(peer.clone());
        debug!(
            index,
            task = ?job.task,
            peer = %peer.id,
            partial = job.partial.len(),
            "job dispatched"
        );

        let backend = Arc::clone(&self.backend);
        let task = job.task.clone();
        let partial = job.partial.len();
        let deadline = self.config.timeout;
        self.in_flight.push(Box::pin(async move {
            let outcome =
                match tokio::time::timeout(deadline, backend.request(&task, partial, &peer)).await
                {
                    Ok(Ok(reply)) => RequestOutcome::Reply(reply),
                    Ok(Err(error)) => RequestOutcome::Failed(error),
                    Err(_) => RequestOutcome::TimedOut,
                };
            RequestDone {
                index,
                peer,
                outcome,
            }
        }));
        self.active.insert(index, job);
        true
    }

    fn on_request_resolved(&mut self, done: RequestDone<B>) {
        let RequestDone {
            index,
            peer,
            outcome,
        } = done;
        match outcome {
            RequestOutcome::Reply(reply) => self.assemble(index, peer, reply),
            RequestOutcome::Failed(error) => {
                let irrecoverable = matches!(
                    error,
                    FetchError::Request {
                        irrecoverable: true,
                        ..
                    }
                );
                let jobs: Vec<_> = self.active.remove(&index).into_iter().collect();
                self.failure(jobs, Some(error), irrecoverable, false);
            }
            RequestOutcome::TimedOut => self.expire(index, peer),
        }
    }

    /// Normalizes a resolved request: drops stale results, re-queues empty
    /// and incomplete replies, promotes completed jobs to outbound.
    fn assemble(&mut self, index: u64, peer: Peer, reply: Option<B::Reply>) {
        let Some(mut job) = self.active.remove(&index) else {
            trace!(index, "dropping reply for expired or unknown job");
            return;
        };
        if job.state != JobState::Active {
            trace!(index, state = ?job.state, "dropping reply for non-active job");
            return;
        }

        match reply {
            Some(reply) if !reply.is_empty() => {
                // The peer served; hand it back before the payload is examined.
                self.pool.set_idle(peer.id, true);
                match self.backend.process(&mut job, reply) {
                    Some(items) => {
                        job.peer = None;
                        job.result = Some(items);
                        self.outbound.push(job);
                        self.emit();
                    }
                    None => {
                        debug!(index, partial = job.partial.len(), "incomplete reply; re-queueing");
                        self.re_enqueue(job, false);
                    }
                }
            }
            _ => {
                debug!(index, peer = %peer.id, "empty reply; re-queueing");
                self.re_enqueue(job, false);
                self.release_later(peer.id);
            }
        }
    }

    /// Drains outbound into the sink channel while the lowest index is next
    /// in line and the channel has room. Sole mechanism for in-order
    /// delivery to storage.
    fn emit(&mut self) {
        let Some(sink_tx) = self.sink_tx.as_ref() else {
            return;
        };
        while self
            .outbound
            .peek_index()
            .is_some_and(|index| index <= self.processed)
        {
            let Some(job) = self.outbound.pop() else {
                break;
            };
            match sink_tx.try_send(job) {
                Ok(()) => {
                    self.processed += 1;
                }
                Err(TrySendError::Full(job) | TrySendError::Closed(job)) => {
                    self.outbound.push(job);
                    break;
                }
            }
        }
    }

    fn on_sink_feedback(&mut self, feedback: SinkFeedback<B>) {
        match feedback {
            SinkFeedback::Stored { jobs } => {
                self.finished += jobs as u64;
                self.emit();
            }
            SinkFeedback::Failed { mut jobs, error } => {
                if error.is_parent_missing() {
                    // The lowest-index task owns the missing parent; rewind
                    // it and refetch the whole batch.
                    let rewound = jobs.first().and_then(|job| {
                        self.backend
                            .rewind_task(&job.task, self.config.safe_reorg_distance)
                    });
                    if let Some(task) = rewound {
                        if let Some(first) = jobs.first_mut() {
                            debug!(index = first.index, task = ?task, "task rewound after missing parent");
                            first.task = task;
                        }
                        for job in &mut jobs {
                            job.partial.clear();
                        }
                        self.failure(jobs, Some(FetchError::Store(error)), false, true);
                        self.emit();
                        return;
                    }
                }
                self.failure(jobs, Some(FetchError::Store(error)), true, true);
            }
        }
    }

    /// Classifies a failure: irrecoverable failures ban the primary peer and
    /// stop the engine; recoverable ones re-enqueue the still-active jobs
    /// and give the peer back after one interval.
    fn failure(
        &mut self,
        jobs: Vec<Job<B>>,
        error: Option<FetchError>,
        irrecoverable: bool,
        dequeued: bool,
    ) {
        let primary_peer = jobs.first().and_then(|job| job.peer.clone());
        if let Some(error) = error.as_ref() {
            if self.running {
                self.events.emit(SyncEvent::FetcherError {
                    error: error.to_string(),
                    task: jobs.first().map(|job| format!("{:?}", job.task)),
                    peer: primary_peer.as_ref().map(|peer| peer.id),
                });
            }
        }

        if irrecoverable {
            if let Some(peer) = primary_peer {
                if self.pool.contains(peer.id) {
                    self.pool.ban(peer.id, self.config.ban_time);
                }
            }
            let dropped = self.inbound.clear() as u64;
            self.total = self.total.saturating_sub(dropped);
            self.running = false;
            if self.errored.is_none() {
                self.errored = error;
            }
            warn!(dropped, "irrecoverable failure; fetcher stopped");
        } else {
            if let Some(peer) = primary_peer {
                self.release_later(peer.id);
            }
            for job in jobs {
                if job.state == JobState::Active {
                    self.re_enqueue(job, dequeued);
                }
            }
        }
    }

    /// The armed request deadline elapsed: the job expires, the peer is
    /// banned if it is still a pool member, and the job keeps its emit slot.
    fn expire(&mut self, index: u64, peer: Peer) {
        let Some(mut job) = self.active.remove(&index) else {
            return;
        };
        job.state = JobState::Expired;
        warn!(
            index,
            peer = %peer.id,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "request timed out"
        );
        if self.pool.contains(peer.id) {
            self.pool.ban(peer.id, self.config.ban_time);
        }
        self.re_enqueue(job, false);
    }

    /// Puts a job back on inbound with its index intact.
    fn re_enqueue(&mut self, mut job: Job<B>, dequeued: bool) {
        job.state = JobState::Idle;
        job.peer = None;
        job.result = None;
        job.time = Instant::now();
        if dequeued {
            // The job had already been counted as emitted.
            self.processed = self.processed.saturating_sub(1);
        }
        self.inbound.push(job);
    }

    /// Returns the peer to idle after one interval.
    fn release_later(&mut self, peer: PeerId) {
        let delay = self.config.interval;
        self.releases.push(Box::pin(async move {
            tokio::time::sleep(delay).await;
            peer
        }));
    }

    fn destroy(&mut self) {
        self.inbound.clear();
        self.outbound.clear();
        self.active.clear();
        self.in_flight = FuturesUnordered::new();
        self.releases = FuturesUnordered::new();
    }
}
