//! Fixed pool of decode threads.
//!
//! Each worker owns its own [`MeshDecoder`] and receives one chunk at a time
//! over a channel; the decoded frame comes back over another. Chunks and frames
//! are moved, never shared, so no worker can touch the chunk queue or frame
//! cache.
//!
//! Workers may finish out of order. Results carry their dispatch sequence
//! number and are released by [`DecodePool::collect`] strictly in dispatch
//! order, so the frame cache sees container order.
//!
//! Epoch mechanism discards in-flight work on [`DecodePool::reset`] (seek,
//! destroy) without waiting for it. Stale jobs still report back, so the
//! pool keeps counting a worker as busy until it is.

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, trace, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::core::codec::{DecoderFactory, MeshFrame};
use crate::error::DecodeError;
use crate::format::record::Chunk;
use crate::format::sequence::SequenceInfo;

/// Upper bound on auto-sized pools.
pub const MAX_AUTO_WORKERS: usize = 8;

/// Worker count for `requested` (0 = one per core, clamped to `1..=8`).
pub fn worker_count(requested: usize) -> usize {
    if requested > 0 {
        requested
    } else {
        num_cpus::get().clamp(1, MAX_AUTO_WORKERS)
    }
}

pub type Decoded = Result<MeshFrame, DecodeError>;

struct DecodeJob {
    seq: u64,
    epoch: u64,
    chunk: Chunk,
}

struct DecodeOutcome {
    seq: u64,
    epoch: u64,
    /// None when the job was skipped as stale.
    result: Option<Decoded>,
    elapsed: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecodeStats {
    pub decoded: u64,
    pub failed: u64,
    pub total_time: Duration,
    pub peak_time: Duration,
}

impl DecodeStats {
    pub fn average_time(&self) -> Duration {
        match self.decoded {
            0 => Duration::ZERO,
            n => self.total_time / n as u32,
        }
    }
}

pub struct DecodePool {
    job_tx: Option<Sender<DecodeJob>>,
    result_rx: Receiver<DecodeOutcome>,
    handles: Vec<thread::JoinHandle<()>>,
    epoch: Arc<AtomicU64>,
    workers: usize,
    /// Sequence number of the next submitted chunk.
    next_seq: u64,
    /// Sequence number of the next result to release.
    next_out: u64,
    /// Jobs handed to workers and not yet reported back, stale ones included.
    in_flight: usize,
    /// Results that finished ahead of an earlier submission.
    reorder: BTreeMap<u64, Decoded>,
    stats: DecodeStats,
}

impl DecodePool {
    /// Spawn `workers` threads, each with its own decoder from `factory`.
    pub fn new(workers: usize, factory: Arc<dyn DecoderFactory>, info: &SequenceInfo) -> Self {
        let workers = workers.max(1);
        let (job_tx, job_rx) = unbounded::<DecodeJob>();
        let (result_tx, result_rx) = unbounded::<DecodeOutcome>();
        let epoch = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let factory = Arc::clone(&factory);
            let epoch = Arc::clone(&epoch);
            let info = *info;

            let handle = thread::Builder::new()
                .name(format!("fourds-decode-{}", worker_id))
                .spawn(move || {
                    trace!("Decoder {} started", worker_id);
                    let mut decoder = factory.create(&info);

                    for job in job_rx.iter() {
                        let t0 = Instant::now();
                        // Stale work from before a reset
                        let result = (epoch.load(Ordering::Relaxed) == job.epoch).then(|| {
                            match catch_unwind(AssertUnwindSafe(|| decoder.decode(&job.chunk))) {
                                Ok(r) => r,
                                Err(panic) => {
                                    let msg = panic
                                        .downcast_ref::<&str>()
                                        .map(|s| s.to_string())
                                        .or_else(|| panic.downcast_ref::<String>().cloned())
                                        .unwrap_or_else(|| "unknown panic".into());
                                    // Decoder state is suspect after a panic
                                    decoder = factory.create(&info);
                                    Err(DecodeError::Panicked(msg))
                                }
                            }
                        });
                        let outcome = DecodeOutcome {
                            seq: job.seq,
                            epoch: job.epoch,
                            result,
                            elapsed: t0.elapsed(),
                        };
                        if result_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                    trace!("Decoder {} stopped", worker_id);
                })
                .expect("Failed to spawn decode thread");
            handles.push(handle);
        }

        debug!("DecodePool: {} workers", workers);

        Self {
            job_tx: Some(job_tx),
            result_rx,
            handles,
            epoch,
            workers,
            next_seq: 0,
            next_out: 0,
            in_flight: 0,
            reorder: BTreeMap::new(),
            stats: DecodeStats::default(),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Workers with nothing assigned.
    pub fn idle_workers(&self) -> usize {
        self.workers.saturating_sub(self.in_flight)
    }

    /// Submitted chunks whose frames have not been collected yet.
    pub fn pending(&self) -> usize {
        self.in_flight + self.reorder.len()
    }

    /// Hand one chunk to the pool.
    pub fn submit(&mut self, chunk: Chunk) {
        let Some(tx) = &self.job_tx else { return };
        let job = DecodeJob {
            seq: self.next_seq,
            epoch: self.epoch.load(Ordering::SeqCst),
            chunk,
        };
        trace!("decode submit #{} (offset {})", job.seq, job.chunk.offset);
        if tx.send(job).is_ok() {
            self.next_seq += 1;
            self.in_flight += 1;
        }
    }

    /// Finished results, in submission order. Never blocks.
    pub fn collect(&mut self) -> Vec<Decoded> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        while let Ok(outcome) = self.result_rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            let Some(result) = outcome.result.filter(|_| outcome.epoch == epoch) else {
                trace!("decode #{} stale, discarded", outcome.seq);
                continue;
            };
            match &result {
                Ok(_) => {
                    self.stats.decoded += 1;
                    self.stats.total_time += outcome.elapsed;
                    self.stats.peak_time = self.stats.peak_time.max(outcome.elapsed);
                }
                Err(e) => {
                    self.stats.failed += 1;
                    warn!("decode #{} failed: {}", outcome.seq, e);
                }
            }
            self.reorder.insert(outcome.seq, result);
        }

        let mut out = Vec::new();
        while let Some(result) = self.reorder.remove(&self.next_out) {
            out.push(result);
            self.next_out += 1;
        }
        out
    }

    /// Forget all in-flight work. Workers finish their current chunk but the
    /// result is discarded by [`collect`](Self::collect), which is also where
    /// the workers it occupied count as idle again.
    pub fn reset(&mut self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if self.pending() > 0 {
            debug!("DecodePool reset: dropping {} pending (epoch {})", self.pending(), epoch);
        }
        self.reorder.clear();
        self.next_out = self.next_seq;
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats.clone()
    }
}

impl Drop for DecodePool {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("DecodePool shutting down ({} threads)...", num_threads);

        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.job_tx = None;

        // In-flight decodes are not waited for past the deadline
        let deadline = Instant::now() + Duration::from_millis(500);
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, detaching decode threads");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
        trace!("All {} decoders stopped", num_threads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::{MeshDecoder, RAW_CODEC, RawMeshFactory, encode_raw, synthetic_mesh};
    use crate::format::record::{RecordHeader, kind};

    fn info() -> SequenceInfo {
        SequenceInfo {
            frame_count: 100,
            bloc_count: 10,
            frame_rate: 30.0,
            max_vertices: 0,
            max_triangles: 0,
            texture_encoding: 0,
            texture_width: 0,
            texture_height: 0,
            additional_tracks: 0,
        }
    }

    fn chunk(frame: u32, codec: u16) -> Chunk {
        let payload = encode_raw(&synthetic_mesh(frame, 8));
        let h = RecordHeader {
            record_type: kind::FRAME_INTER,
            codec,
            version: 1,
            size: payload.len() as u32,
        };
        Chunk::new(h, frame as u64 * 1000, payload.into())
    }

    fn collect_all(pool: &mut DecodePool, n: usize) -> Vec<Decoded> {
        let mut out = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while out.len() < n && Instant::now() < deadline {
            out.extend(pool.collect());
            thread::sleep(Duration::from_millis(1));
        }
        out
    }

    /// Sleeps longer for low frame numbers so results finish out of order.
    struct SlowFirst;

    impl MeshDecoder for SlowFirst {
        fn decode(&mut self, chunk: &Chunk) -> Result<MeshFrame, DecodeError> {
            let frame = u32::from_le_bytes([chunk.payload[0], chunk.payload[1], chunk.payload[2], chunk.payload[3]]);
            thread::sleep(Duration::from_millis(20u64.saturating_sub(frame as u64 * 2)));
            Ok(MeshFrame {
                frame_index: frame,
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_results_in_dispatch_order() {
        let factory = |_: &SequenceInfo| -> Box<dyn MeshDecoder> { Box::new(SlowFirst) };
        let mut pool = DecodePool::new(4, Arc::new(factory), &info());
        for i in 0..8 {
            pool.submit(chunk(i, RAW_CODEC));
        }
        assert_eq!(pool.pending(), 8);
        let out = collect_all(&mut pool, 8);
        let order: Vec<u32> = out.into_iter().map(|r| r.unwrap().frame_index).collect();
        assert_eq!(order, (0..8).collect::<Vec<_>>());
        assert_eq!(pool.pending(), 0);
        assert_eq!(pool.idle_workers(), 4);
    }

    #[test]
    fn test_failure_is_dropped_not_fatal() {
        let mut pool = DecodePool::new(2, Arc::new(RawMeshFactory), &info());
        pool.submit(chunk(0, RAW_CODEC));
        pool.submit(chunk(1, 0xdead));
        pool.submit(chunk(2, RAW_CODEC));
        let out = collect_all(&mut pool, 3);
        assert_eq!(out.len(), 3);
        assert!(out[0].is_ok());
        assert!(matches!(out[1], Err(DecodeError::Unsupported { .. })));
        assert_eq!(out[2].as_ref().unwrap().frame_index, 2);

        let stats = pool.stats();
        assert_eq!(stats.decoded, 2);
        assert_eq!(stats.failed, 1);
        assert!(stats.peak_time >= stats.average_time());
    }

    struct Panicky;

    impl MeshDecoder for Panicky {
        fn decode(&mut self, chunk: &Chunk) -> Result<MeshFrame, DecodeError> {
            if chunk.offset == 0 {
                panic!("bad chunk");
            }
            Ok(MeshFrame::default())
        }
    }

    #[test]
    fn test_panic_contained() {
        let factory = |_: &SequenceInfo| -> Box<dyn MeshDecoder> { Box::new(Panicky) };
        let mut pool = DecodePool::new(1, Arc::new(factory), &info());
        pool.submit(chunk(0, RAW_CODEC));
        pool.submit(chunk(1, RAW_CODEC));
        let out = collect_all(&mut pool, 2);
        assert!(matches!(&out[0], Err(DecodeError::Panicked(m)) if m == "bad chunk"));
        assert!(out[1].is_ok());
    }

    #[test]
    fn test_reset_discards_in_flight() {
        let factory = |_: &SequenceInfo| -> Box<dyn MeshDecoder> { Box::new(SlowFirst) };
        let mut pool = DecodePool::new(2, Arc::new(factory), &info());
        for i in 0..4 {
            pool.submit(chunk(i, RAW_CODEC));
        }
        pool.reset();

        pool.submit(chunk(9, RAW_CODEC));
        let out = collect_all(&mut pool, 1);
        thread::sleep(Duration::from_millis(60));
        let late = pool.collect();
        assert_eq!(out.len() + late.len(), 1);
        assert_eq!(out[0].as_ref().unwrap().frame_index, 9);
        assert_eq!(pool.pending(), 0);
        assert_eq!(pool.stats().decoded, 1);
    }

    #[test]
    fn test_reset_keeps_busy_workers_counted() {
        let factory = |_: &SequenceInfo| -> Box<dyn MeshDecoder> { Box::new(SlowFirst) };
        let mut pool = DecodePool::new(2, Arc::new(factory), &info());
        pool.submit(chunk(0, RAW_CODEC));
        pool.submit(chunk(1, RAW_CODEC));
        thread::sleep(Duration::from_millis(2));
        pool.reset();

        // Both workers are still sleeping on the old chunks
        assert_eq!(pool.pending(), 2);
        assert_eq!(pool.idle_workers(), 0);
        assert!(pool.collect().is_empty());

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.pending() > 0 && Instant::now() < deadline {
            assert!(pool.collect().is_empty());
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(pool.pending(), 0);
        assert_eq!(pool.idle_workers(), 2);
        assert_eq!(pool.stats().decoded, 0);
    }

    #[test]
    fn test_worker_count() {
        assert_eq!(worker_count(3), 3);
        let auto = worker_count(0);
        assert!((1..=MAX_AUTO_WORKERS).contains(&auto));
    }
}
