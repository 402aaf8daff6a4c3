//! Range fetch scheduler.
//!
//! Owns a fixed set of fetch threads and a priority-sorted queue of pending
//! range requests. At most `max_in_flight` requests are dispatched at once;
//! when one resolves the next queued request takes its slot.
//!
//! Completion is delivered by polling ([`RangeScheduler::poll`] /
//! [`RangeScheduler::wait`]) on the control thread, so callers never see
//! callbacks from a fetch thread.
//!
//! Failed requests are retried with the same range at `priority - 1`, up to
//! `max_retries` times. A request that exhausts its retries surfaces as
//! [`RangeEvent::Failed`] and the rest of the queue keeps flowing.
//!
//! An epoch counter invalidates everything in flight on [`RangeScheduler::abort`]:
//! fetch threads finish their current request but the result is discarded.

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, error, trace, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::TransportError;
use crate::net::source::{ByteRange, RangeSource};

pub type RequestId = u64;

/// Priority given by [`RangeScheduler::prioritize`].
pub const PRIORITY_URGENT: i32 = 1000;
pub const PRIORITY_NORMAL: i32 = 0;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_in_flight: usize,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 3,
            max_retries: 3,
            timeout: Duration::from_secs(30),
        }
    }
}

/// What the scheduler reports back to the control thread.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeEvent {
    Received {
        id: RequestId,
        range: ByteRange,
        data: Bytes,
    },
    /// Permanent failure after retries.
    Failed {
        id: RequestId,
        range: ByteRange,
        error: TransportError,
    },
    /// Every enqueued request has been resolved.
    Completed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub queued: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Clone)]
struct Request {
    id: RequestId,
    range: ByteRange,
    priority: i32,
    retries: u32,
    /// Insertion order, breaks priority ties FIFO.
    seq: u64,
}

struct Job {
    id: RequestId,
    range: ByteRange,
    epoch: u64,
    timeout: Duration,
}

struct Outcome {
    id: RequestId,
    epoch: u64,
    result: Result<Bytes, TransportError>,
}

pub struct RangeScheduler {
    config: SchedulerConfig,
    queue: Vec<Request>,
    active: HashMap<RequestId, Request>,
    /// Active requests cancelled by the caller; their results are dropped.
    cancelled: HashSet<RequestId>,
    job_tx: Option<Sender<Job>>,
    result_rx: Receiver<Outcome>,
    epoch: Arc<AtomicU64>,
    handles: Vec<thread::JoinHandle<()>>,
    status: SchedulerStatus,
    next_id: RequestId,
    next_seq: u64,
    /// Set by enqueue, cleared when `Completed` is emitted.
    completion_due: bool,
}

impl RangeScheduler {
    pub fn new(source: Arc<dyn RangeSource>, config: SchedulerConfig) -> Self {
        let threads = config.max_in_flight.max(1);
        let (job_tx, job_rx) = unbounded::<Job>();
        let (result_tx, result_rx) = unbounded::<Outcome>();
        let epoch = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::with_capacity(threads);
        for fetcher_id in 0..threads {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let source = Arc::clone(&source);
            let epoch = Arc::clone(&epoch);

            let handle = thread::Builder::new()
                .name(format!("fourds-fetch-{}", fetcher_id))
                .spawn(move || {
                    trace!("Fetcher {} started", fetcher_id);
                    for job in job_rx.iter() {
                        // Skip requests aborted before they reached a thread
                        if epoch.load(Ordering::Relaxed) != job.epoch {
                            continue;
                        }
                        let result = source.fetch(job.range, job.timeout);
                        let outcome = Outcome {
                            id: job.id,
                            epoch: job.epoch,
                            result,
                        };
                        if result_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                    trace!("Fetcher {} stopped", fetcher_id);
                })
                .expect("Failed to spawn fetch thread");
            handles.push(handle);
        }

        debug!(
            "RangeScheduler: {} fetch threads for {}",
            threads,
            source.describe()
        );

        Self {
            config,
            queue: Vec::new(),
            active: HashMap::new(),
            cancelled: HashSet::new(),
            job_tx: Some(job_tx),
            result_rx,
            epoch,
            handles,
            status: SchedulerStatus::default(),
            next_id: 0,
            next_seq: 0,
            completion_due: false,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Hand out the next request id. Restarts from 0 after [`reset`](Self::reset).
    pub fn allocate_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Schedule `range` under `id`. Dispatches immediately if a slot is free.
    pub fn enqueue(&mut self, range: ByteRange, id: RequestId, priority: i32) {
        trace!("enqueue #{} {} (priority {})", id, range, priority);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.insert(Request {
            id,
            range,
            priority,
            retries: 0,
            seq,
        });
        self.completion_due = true;
        self.dispatch();
    }

    /// Move a queued request to the front. Returns false if `id` is unknown
    /// or already resolved; true if it is queued or already in flight.
    pub fn prioritize(&mut self, id: RequestId) -> bool {
        if self.active.contains_key(&id) {
            return true;
        }
        let Some(pos) = self.queue.iter().position(|r| r.id == id) else {
            return false;
        };
        let mut req = self.queue.remove(pos);
        debug!("prioritize #{} {}", id, req.range);
        req.priority = PRIORITY_URGENT;
        self.insert(req);
        self.dispatch();
        true
    }

    /// Drop one request, queued or in flight. No event is emitted for it.
    pub fn cancel(&mut self, id: RequestId) -> bool {
        if let Some(pos) = self.queue.iter().position(|r| r.id == id) {
            self.queue.remove(pos);
            self.dispatch();
            return true;
        }
        if self.active.remove(&id).is_some() {
            self.cancelled.insert(id);
            self.dispatch();
            return true;
        }
        false
    }

    /// Drop every queued and in-flight request. Results still in flight are
    /// discarded when they arrive.
    pub fn abort(&mut self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.queue.is_empty() || !self.active.is_empty() {
            debug!(
                "abort: {} queued, {} active (epoch {})",
                self.queue.len(),
                self.active.len(),
                epoch
            );
        }
        self.queue.clear();
        self.active.clear();
        self.cancelled.clear();
        self.completion_due = false;
        while self.result_rx.try_recv().is_ok() {}
    }

    /// Abort and forget all bookkeeping. A reset scheduler behaves like a new one.
    pub fn reset(&mut self) {
        self.abort();
        self.status = SchedulerStatus::default();
        self.next_id = 0;
        self.next_seq = 0;
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            queued: self.queue.len(),
            active: self.active.len(),
            ..self.status.clone()
        }
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.active.is_empty()
    }

    /// Collect results that have already arrived. Never blocks.
    pub fn poll(&mut self) -> Vec<RangeEvent> {
        let mut events = Vec::new();
        while let Ok(outcome) = self.result_rx.try_recv() {
            self.resolve(outcome, &mut events);
        }
        self.finish(&mut events);
        events
    }

    /// Block until at least one result arrives or `timeout` passes, then
    /// collect everything available.
    pub fn wait(&mut self, timeout: Duration) -> Vec<RangeEvent> {
        let mut events = Vec::new();
        if !self.is_idle() {
            let deadline = Instant::now() + timeout;
            loop {
                match self.result_rx.recv_deadline(deadline) {
                    Ok(outcome) => {
                        let before = events.len();
                        self.resolve(outcome, &mut events);
                        // A discarded result (stale or retried) keeps waiting
                        if events.len() > before || self.is_idle() {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }
        events.extend(self.poll());
        events
    }

    fn resolve(&mut self, outcome: Outcome, events: &mut Vec<RangeEvent>) {
        if outcome.epoch != self.epoch.load(Ordering::SeqCst) {
            trace!("dropping stale result for #{}", outcome.id);
            return;
        }
        if self.cancelled.remove(&outcome.id) {
            trace!("dropping cancelled result for #{}", outcome.id);
            self.dispatch();
            return;
        }
        let Some(mut req) = self.active.remove(&outcome.id) else {
            return;
        };

        match outcome.result {
            Ok(data) => {
                trace!("#{} {} received {} bytes", req.id, req.range, data.len());
                self.status.completed += 1;
                self.status.bytes_received += data.len() as u64;
                events.push(RangeEvent::Received {
                    id: req.id,
                    range: req.range,
                    data,
                });
            }
            Err(error) if req.retries < self.config.max_retries => {
                req.retries += 1;
                req.priority -= 1;
                warn!(
                    "#{} {} failed: {} (retry {}/{})",
                    req.id, req.range, error, req.retries, self.config.max_retries
                );
                self.status.retried += 1;
                self.insert(req);
            }
            Err(error) => {
                error!(
                    "#{} {} failed permanently after {} retries: {}",
                    req.id, req.range, req.retries, error
                );
                self.status.failed += 1;
                events.push(RangeEvent::Failed {
                    id: req.id,
                    range: req.range,
                    error,
                });
            }
        }
        self.dispatch();
    }

    fn finish(&mut self, events: &mut Vec<RangeEvent>) {
        self.dispatch();
        if self.completion_due && self.is_idle() {
            self.completion_due = false;
            events.push(RangeEvent::Completed);
        }
    }

    /// Queue stays sorted: highest priority first, then oldest first.
    fn insert(&mut self, req: Request) {
        let pos = self
            .queue
            .partition_point(|r| (r.priority, std::cmp::Reverse(r.seq)) >= (req.priority, std::cmp::Reverse(req.seq)));
        self.queue.insert(pos, req);
    }

    fn dispatch(&mut self) {
        let Some(tx) = &self.job_tx else { return };
        let epoch = self.epoch.load(Ordering::SeqCst);
        while self.active.len() + self.cancelled.len() < self.config.max_in_flight.max(1) && !self.queue.is_empty() {
            let req = self.queue.remove(0);
            trace!("dispatch #{} {}", req.id, req.range);
            let job = Job {
                id: req.id,
                range: req.range,
                epoch,
                timeout: self.config.timeout,
            };
            if tx.send(job).is_err() {
                warn!("fetch threads gone, dropping #{}", req.id);
                continue;
            }
            self.active.insert(req.id, req);
        }
    }
}

impl Drop for RangeScheduler {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("RangeScheduler shutting down ({} threads)...", num_threads);

        self.epoch.fetch_add(1, Ordering::SeqCst);
        // Closing the job channel ends each fetcher's loop
        self.job_tx = None;

        // A fetch blocked on the network is not waited for
        let deadline = Instant::now() + Duration::from_millis(500);
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, detaching fetch threads");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
        trace!("All {} fetchers stopped", num_threads);
    }
}
