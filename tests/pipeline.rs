//! End-to-end pipeline tests over in-memory sources.

use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fourds::core::codec::RawMeshFactory;
use fourds::events::{LoopWrapped, PlaybackEnded, RangeFailed};
use fourds::format::writer::{Container, synthesize};
use fourds::net::source::MemorySource;
use fourds::{
    ByteRange, ManualClock, MeshFrame, RangeSource, Renderer, SequenceInfo, Stream, StreamConfig, TransportError,
    downcast_event,
};

/// One frame at 30 fps, rounded up so each step lands on the next frame.
const STEP: Duration = Duration::from_nanos(33_333_334);
const OPEN: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct Recorder {
    inits: Arc<AtomicUsize>,
    frames: Arc<Mutex<Vec<u32>>>,
}

impl Renderer for Recorder {
    fn init(&mut self, _info: &SequenceInfo) {
        self.inits.fetch_add(1, Ordering::SeqCst);
    }
    fn render(&mut self, frame: &MeshFrame) {
        self.frames.lock().unwrap().push(frame.frame_index);
    }
}

impl Recorder {
    fn shown(&self) -> Vec<u32> {
        self.frames.lock().unwrap().clone()
    }
}

/// Fails every request starting at `fail_at`, records all others.
struct TestSource {
    inner: MemorySource,
    fail_at: Option<u64>,
    /// Responses are delayed longer the earlier they start.
    reverse_delay: bool,
    /// Fixed latency on every response.
    delay: Duration,
    requests: Arc<Mutex<Vec<ByteRange>>>,
}

impl TestSource {
    fn new(c: &Container) -> Self {
        Self {
            inner: MemorySource::new(c.bytes.clone()),
            fail_at: None,
            reverse_delay: false,
            delay: Duration::ZERO,
            requests: Arc::default(),
        }
    }
}

impl RangeSource for TestSource {
    fn fetch(&self, range: ByteRange, timeout: Duration) -> Result<Bytes, TransportError> {
        self.requests.lock().unwrap().push(range);
        if self.fail_at == Some(range.start) {
            return Err(TransportError::Status(503));
        }
        if self.reverse_delay {
            let rank = self.inner.len().saturating_sub(range.start) * 20 / self.inner.len().max(1);
            std::thread::sleep(Duration::from_millis(rank));
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.inner.fetch(range, timeout)
    }

    fn describe(&self) -> String {
        format!("test {}", self.inner.describe())
    }
}

fn config(cache: usize) -> StreamConfig {
    StreamConfig {
        max_cached_frames: cache,
        decode_workers: 2,
        play_on_load: false,
        ..StreamConfig::default()
    }
}

/// One request per bloc.
fn per_bloc(mut cfg: StreamConfig) -> StreamConfig {
    cfg.parallel_threshold = 0;
    cfg.max_part_size = 1;
    cfg.max_requests = 4;
    cfg.max_retries = 1;
    cfg
}

fn stream_over(source: impl RangeSource + 'static, cfg: StreamConfig) -> (Stream, ManualClock) {
    let clock = ManualClock::new();
    let s = Stream::new(Arc::new(source), cfg, Arc::new(RawMeshFactory), Arc::new(clock.clone()));
    (s, clock)
}

fn settle(s: &mut Stream, until: impl Fn(&Stream) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        s.tick_decode().unwrap();
        if until(s) {
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("stream did not settle: {:?}", s);
}

/// Tick decode until a frame is cached, or give up quietly.
fn feed(s: &mut Stream) {
    let deadline = Instant::now() + Duration::from_millis(300);
    while Instant::now() < deadline {
        s.tick_decode().unwrap();
        if s.stats().frame_cache > 0 {
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Advance the clock one step at a time, keeping the cache fed.
fn play_steps(s: &mut Stream, clock: &ManualClock, steps: usize) {
    for _ in 0..steps {
        clock.advance(STEP);
        feed(s);
        s.tick_playback().unwrap();
    }
}

fn count<E: fourds::events::Event>(s: &Stream) -> usize {
    s.events().poll().iter().filter(|e| downcast_event::<E>(e).is_some()).count()
}

fn network_idle(s: &Stream) -> bool {
    let n = s.stats().network;
    n.active == 0 && n.queued == 0
}

#[test]
fn test_clock_reaches_frame_30_after_one_second() {
    let c = synthesize(300, 30.0, 10, 32).unwrap();
    let (mut s, clock) = stream_over(TestSource::new(&c), config(20));
    let rec = Recorder::default();
    s.attach_renderer(rec.clone());

    s.open_blocking(OPEN).unwrap();
    assert_eq!(s.sequence_total_length(), 300);
    assert_eq!(s.sequence_index().map(|i| i.bloc_count()), Some(30));
    assert_eq!(rec.inits.load(Ordering::SeqCst), 1);

    settle(&mut s, |s| s.is_ready());
    s.play().unwrap();
    s.tick_playback().unwrap();
    play_steps(&mut s, &clock, 30);

    assert_eq!(s.current_frame(), Some(30));
    assert_eq!(rec.shown(), (0..=30).collect::<Vec<_>>());
    assert_eq!(s.stats().dropped, 0);
}

#[test]
fn test_lost_bloc_does_not_stop_the_others() {
    let c = synthesize(300, 30.0, 10, 32).unwrap();
    let lost = c.blocs[7].byte_offset as u64;
    let mut source = TestSource::new(&c);
    source.fail_at = Some(lost);

    let mut cfg = per_bloc(config(20));
    cfg.wrap = false;
    let (mut s, clock) = stream_over(source, cfg);
    let rec = Recorder::default();
    s.attach_renderer(rec.clone());
    s.open_blocking(OPEN).unwrap();
    settle(&mut s, |s| s.is_ready());

    s.play().unwrap();
    s.tick_playback().unwrap();
    play_steps(&mut s, &clock, 310);

    let shown = rec.shown();
    let blocs: BTreeSet<u32> = shown.iter().map(|f| f / 10).collect();
    assert!(!blocs.contains(&7), "frames of the failed bloc were shown");
    assert_eq!(blocs.len(), 29);
    assert_eq!(shown.last(), Some(&299));
    assert!(shown.windows(2).all(|w| w[0] < w[1]));

    let events = s.events().poll();
    let failed: Vec<_> = events
        .iter()
        .filter_map(|e| downcast_event::<RangeFailed>(e))
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].range.start, lost);
    assert!(events.iter().any(|e| downcast_event::<PlaybackEnded>(e).is_some()));
}

#[test]
fn test_cache_cap_holds_back_decode() {
    let c = synthesize(100, 30.0, 10, 32).unwrap();
    let (mut s, clock) = stream_over(TestSource::new(&c), config(5));
    s.attach_renderer(Recorder::default());
    s.open_blocking(OPEN).unwrap();
    settle(&mut s, |s| s.is_ready());
    assert_eq!(s.stats().frame_cache, 5);

    // Nothing consumes: the cache stays at its cap
    for _ in 0..50 {
        s.tick_decode().unwrap();
        std::thread::sleep(Duration::from_millis(1));
    }
    let stats = s.stats();
    assert_eq!(stats.frame_cache, 5);
    assert_eq!(stats.decode.decoded, 5);

    // Consuming frames lets dispatch resume
    s.play().unwrap();
    s.tick_playback().unwrap();
    play_steps(&mut s, &clock, 3);
    settle(&mut s, |s| s.stats().frame_cache == 5 && s.stats().decode.decoded > 5);
    assert!(s.stats().frame_cache <= 5);
}

#[test]
fn test_loop_wraps_to_first_frame() {
    let c = synthesize(20, 30.0, 10, 16).unwrap();
    let (mut s, clock) = stream_over(TestSource::new(&c), config(5));
    let rec = Recorder::default();
    s.attach_renderer(rec.clone());
    s.open_blocking(OPEN).unwrap();
    settle(&mut s, |s| s.is_ready());

    s.play().unwrap();
    s.tick_playback().unwrap();
    play_steps(&mut s, &clock, 25);

    let shown = rec.shown();
    assert_eq!(&shown[..20], &(0..20).collect::<Vec<_>>()[..]);
    assert_eq!(shown[20], 0);
    assert!(count::<LoopWrapped>(&s) >= 1);
}

#[test]
fn test_reopen_issues_same_requests() {
    let c = synthesize(60, 30.0, 10, 16).unwrap();
    let source = TestSource::new(&c);
    let requests = Arc::clone(&source.requests);
    let mut cfg = config(8);
    cfg.wrap = false;
    let (mut s, _) = stream_over(source, cfg);
    let idle = |s: &Stream| {
        let n = s.stats().network;
        s.is_ready() && n.active == 0 && n.queued == 0
    };

    s.open_blocking(OPEN).unwrap();
    settle(&mut s, idle);
    let cold: BTreeSet<(u64, u64)> = requests.lock().unwrap().drain(..).map(|r| (r.start, r.end)).collect();

    s.open_blocking(OPEN).unwrap();
    assert!(!s.is_ready());
    settle(&mut s, idle);
    let warm: BTreeSet<(u64, u64)> = requests.lock().unwrap().drain(..).map(|r| (r.start, r.end)).collect();

    assert!(!cold.is_empty());
    assert_eq!(cold, warm);
    assert_eq!(s.stats().frame_cache, 8);
}

#[test]
fn test_out_of_order_parts_play_in_order() {
    let c = synthesize(60, 30.0, 10, 64).unwrap();
    let mut source = TestSource::new(&c);
    source.reverse_delay = true;
    let (mut s, clock) = stream_over(source, per_bloc(config(10)));
    let rec = Recorder::default();
    s.attach_renderer(rec.clone());
    s.open_blocking(OPEN).unwrap();
    settle(&mut s, |s| s.is_ready());

    s.play().unwrap();
    s.tick_playback().unwrap();
    play_steps(&mut s, &clock, 40);

    assert_eq!(rec.shown(), (0..=40).collect::<Vec<_>>());
}

#[test]
fn test_replace_source_reopens_on_new_sequence() {
    let a = synthesize(30, 30.0, 10, 16).unwrap();
    let b = synthesize(50, 25.0, 5, 16).unwrap();
    let (mut s, _) = stream_over(TestSource::new(&a), config(5));
    let rec = Recorder::default();
    s.attach_renderer(rec.clone());
    s.open_blocking(OPEN).unwrap();
    assert_eq!(s.sequence_total_length(), 30);

    s.replace_source(Arc::new(MemorySource::new(b.bytes.clone()))).unwrap();
    assert!(!s.is_open());
    s.open_blocking(OPEN).unwrap();
    assert_eq!(s.sequence_total_length(), 50);
    assert_eq!(s.sequence_info().map(|i| i.frame_rate), Some(25.0));
    assert_eq!(rec.inits.load(Ordering::SeqCst), 2);
    settle(&mut s, |s| s.is_ready());
}

#[test]
fn test_resident_sequence_replays_without_refetch() {
    let c = synthesize(20, 30.0, 10, 16).unwrap();
    let source = TestSource::new(&c);
    let requests = Arc::clone(&source.requests);
    let (mut s, clock) = stream_over(source, config(5));
    let rec = Recorder::default();
    s.attach_renderer(rec.clone());
    s.open_blocking(OPEN).unwrap();
    settle(&mut s, |s| s.is_ready());

    // Switching on an open stream rewinds and buffers the whole sequence
    s.set_keep_chunks_resident(true).unwrap();
    assert!(s.config().keep_chunks_resident);
    settle(&mut s, |s| {
        let st = s.stats();
        st.chunk_queue == 20 && st.frame_cache == 5 && network_idle(s)
    });
    let fetched = requests.lock().unwrap().len();

    s.play().unwrap();
    s.tick_playback().unwrap();
    play_steps(&mut s, &clock, 45);

    let shown = rec.shown();
    let lap: Vec<u32> = (0..20).collect();
    assert_eq!(&shown[..20], &lap[..]);
    assert_eq!(&shown[20..40], &lap[..]);
    assert!(count::<LoopWrapped>(&s) >= 2);
    assert_eq!(requests.lock().unwrap().len(), fetched, "resident replay hit the network");
    assert_eq!(s.stats().chunk_queue, 20);
}

#[test]
fn test_chunk_queue_stays_under_ceiling() {
    // 400 frames: ceiling is 300 chunks, the cache only takes 2 frames
    let c = synthesize(400, 30.0, 10, 16).unwrap();
    let source = TestSource::new(&c);
    let requests = Arc::clone(&source.requests);
    let (mut s, _) = stream_over(source, config(2));
    s.open_blocking(OPEN).unwrap();
    assert_eq!(s.sequence_info().map(|i| i.chunk_ceiling()), Some(300));

    settle(&mut s, |s| {
        let queued = s.stats().chunk_queue;
        assert!(queued <= 300, "{} chunks queued", queued);
        s.is_ready() && queued >= 290 && network_idle(s)
    });
    let fetched = requests.lock().unwrap().len();

    // Decode is parked on the full cache; nothing more may be fetched
    for _ in 0..50 {
        s.tick_decode().unwrap();
        assert!(s.stats().chunk_queue <= 300);
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(requests.lock().unwrap().len(), fetched);
    assert_eq!(s.stats().frame_cache, 2);
}

#[test]
fn test_seek_into_queued_part_moves_it_forward() {
    let c = synthesize(60, 30.0, 10, 16).unwrap();
    let mut source = TestSource::new(&c);
    source.delay = Duration::from_millis(150);
    let requests = Arc::clone(&source.requests);
    let mut cfg = per_bloc(config(5));
    cfg.wrap = false;
    let (mut s, _) = stream_over(source, cfg);
    s.open_blocking(OPEN).unwrap();

    // Blocs 0..4 are in flight, 4 and 5 wait behind them
    s.seek(55).unwrap();
    settle(&mut s, |s| s.is_ready() && network_idle(s));

    let log = requests.lock().unwrap().clone();
    let at = |b: usize| -> Vec<usize> {
        let start = c.blocs[b].byte_offset as u64;
        log.iter().enumerate().filter(|(_, r)| r.start == start).map(|(i, _)| i).collect()
    };
    for b in 0..6 {
        assert_eq!(at(b).len(), 1, "bloc {} fetched {} times", b, at(b).len());
    }
    assert!(at(5)[0] < at(4)[0], "seek target was not moved ahead");
    assert_eq!(s.stats().network.failed, 0);
    assert_eq!(s.stats().frame_cache, 5);
}

