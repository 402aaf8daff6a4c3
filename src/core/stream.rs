//! Per-sequence stream orchestrator.
//!
//! A [`Stream`] owns every pipeline stage for one sequence:
//! scheduler -> loader/streamer -> demux -> chunk queue -> decode pool ->
//! frame cache -> player -> renderer. Everything runs on the caller's thread
//! except range fetches and decodes, which come back as messages.
//!
//! Two periodic tasks drive it, both non-blocking:
//! - [`Stream::tick_decode`] drains network results, demuxes completed windows,
//!   issues the next window and dispatches chunks while the frame cache has
//!   room. Cadence `1000 / (fps x 6)` ms.
//! - [`Stream::tick_playback`] advances the clock and renders new frames.
//!   Cadence one frame.
//!
//! [`Stream::run_for`] wires both to crossbeam tickers. Format errors are fatal:
//! the stream tears itself down and reports [`StreamFailed`]. Transport and
//! decode failures only lose their own blocs or frames.

use bytes::Bytes;
use crossbeam_channel::{after, select, tick};
use log::{debug, error, info, trace, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::StreamConfig;
use crate::core::chunk_queue::{ChunkQueue, QueueMode};
use crate::core::clock::{AudioSink, TimeSource};
use crate::core::codec::{DecoderFactory, MeshFrame};
use crate::core::decode_pool::{DecodePool, DecodeStats, worker_count};
use crate::core::frame_cache::FrameCache;
use crate::core::loader::{LoadProgress, Loader};
use crate::core::player::{PlaybackState, Player, TickReport};
use crate::core::streamer::{Streamer, StreamerConfig};
use crate::error::{StreamError, StreamResult};
use crate::events::{
    AudioTrackLoaded, DecodeFailed, EventBus, FrameShown, FramesDropped, LoopWrapped, PlaybackEnded,
    PlaybackStateChanged, RangeFailed, SequenceOpened, StreamFailed, StreamReady,
};
use crate::format::demux::demux;
use crate::format::record::Chunk;
use crate::format::sequence::{SequenceIndex, SequenceInfo};
use crate::net::scheduler::{RangeEvent, RangeScheduler, SchedulerStatus};
use crate::net::source::RangeSource;

/// Volume restored by [`Stream::unmute`] when no earlier level is known.
pub const DEFAULT_VOLUME: f32 = 0.5;

/// Tick rate used by [`Stream::run_for`] before the sequence is open.
const FALLBACK_FRAME_RATE: f32 = 30.0;

/// Consumer of decoded frames.
pub trait Renderer: Send {
    /// Called once per opened sequence, before any frame.
    fn init(&mut self, info: &SequenceInfo);
    /// Called once per newly displayed frame.
    fn render(&mut self, frame: &MeshFrame);
}

/// Point-in-time snapshot of a stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    pub state: PlaybackState,
    pub ready: bool,
    pub current_frame: Option<u32>,
    pub displayed: u64,
    pub dropped: u64,
    pub chunk_queue: usize,
    pub frame_cache: usize,
    pub frame_cache_bytes: usize,
    pub decode: DecodeStats,
    pub network: SchedulerStatus,
}

/// Stages that only exist while a sequence is open.
struct Session {
    index: SequenceIndex,
    queue: ChunkQueue,
    /// Demuxed chunks waiting for queue room. Only a bloc larger than the
    /// queue or an index that undercounts its frames puts anything here.
    overflow: VecDeque<Chunk>,
    pool: DecodePool,
    player: Player,
}

impl Session {
    /// Free chunk slots, net of chunks already waiting for one.
    fn room(&self) -> usize {
        self.queue.room().saturating_sub(self.overflow.len())
    }

    fn has_chunks(&self) -> bool {
        !self.queue.is_empty() || !self.overflow.is_empty()
    }

    /// Move waiting chunks into the queue while it has room.
    fn refill(&mut self) -> usize {
        let mut moved = 0;
        while let Some(chunk) = self.overflow.pop_front() {
            if let Err(chunk) = self.queue.push(chunk) {
                self.overflow.push_front(chunk);
                break;
            }
            moved += 1;
        }
        moved
    }

    fn clear_chunks(&mut self) {
        self.queue.clear();
        self.overflow.clear();
    }
}

pub struct Stream {
    config: StreamConfig,
    factory: Arc<dyn DecoderFactory>,
    clock: Arc<dyn TimeSource>,
    events: EventBus,
    sched: RangeScheduler,
    loader: Loader,
    streamer: Streamer,
    cache: FrameCache,
    session: Option<Session>,
    renderer: Option<Box<dyn Renderer>>,
    audio: Option<Box<dyn AudioSink>>,
    /// Audio track that arrived before a sink was attached.
    audio_track: Option<(u16, Bytes)>,
    saved_volume: Option<f32>,
    ready: bool,
    destroyed: bool,
}

impl Stream {
    pub fn new(
        source: Arc<dyn RangeSource>,
        config: StreamConfig,
        factory: Arc<dyn DecoderFactory>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        debug!("Stream over {} ({:?})", source.describe(), config);
        let sched = RangeScheduler::new(source, config.scheduler());
        let streamer = Streamer::new(streamer_config(&config, false));
        let cache = FrameCache::new(config.max_cached_frames);
        Self {
            config,
            factory,
            clock,
            events: EventBus::new(),
            sched,
            loader: Loader::new(),
            streamer,
            cache,
            session: None,
            renderer: None,
            audio: None,
            audio_track: None,
            saved_volume: None,
            ready: false,
            destroyed: false,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// The frame cache filled at least once since open.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn state(&self) -> PlaybackState {
        self.session.as_ref().map_or(PlaybackState::Stopped, |s| s.player.state())
    }

    pub fn current_frame(&self) -> Option<u32> {
        self.session.as_ref().and_then(|s| s.player.current_frame())
    }

    pub fn sequence_index(&self) -> Option<&SequenceIndex> {
        self.session.as_ref().map(|s| &s.index)
    }

    pub fn sequence_info(&self) -> Option<&SequenceInfo> {
        self.session.as_ref().map(|s| &s.index.info)
    }

    /// Frame count of the open sequence, 0 before open.
    pub fn sequence_total_length(&self) -> u32 {
        self.sequence_info().map_or(0, |i| i.frame_count)
    }

    pub fn attach_renderer(&mut self, mut renderer: impl Renderer + 'static) {
        if let Some(s) = &self.session {
            renderer.init(&s.index.info);
        }
        self.renderer = Some(Box::new(renderer));
    }

    pub fn attach_audio(&mut self, mut sink: impl AudioSink + 'static) {
        if let Some((codec, data)) = self.audio_track.take() {
            sink.load(data, codec);
        }
        self.audio = Some(Box::new(sink));
    }

    // ========== Open ==========

    /// Start reading the structural records. Returns immediately; the sequence
    /// opens during later [`tick_decode`](Self::tick_decode) calls.
    ///
    /// Reopening first tears the pipeline down, so a reopened stream issues the
    /// same requests as a fresh one.
    pub fn open(&mut self) -> StreamResult<()> {
        self.ensure_alive()?;
        self.teardown();
        info!("Opening stream");
        self.loader.start(&mut self.sched);
        Ok(())
    }

    /// [`open`](Self::open), then wait until the bloc index is parsed.
    pub fn open_blocking(&mut self, timeout: Duration) -> StreamResult<()> {
        self.open()?;
        let deadline = Instant::now() + timeout;
        while self.session.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return Err(StreamError::OpenTimeout(timeout));
            }
            let events = self.sched.wait(deadline - now);
            if events.is_empty() && self.sched.is_idle() {
                return Err(StreamError::NotOpen);
            }
            self.handle_network(events)?;
        }
        Ok(())
    }

    // ========== Ticks ==========

    /// One streaming/decode step.
    pub fn tick_decode(&mut self) -> StreamResult<()> {
        self.ensure_alive()?;
        let events = self.sched.poll();
        self.handle_network(events)?;
        if self.session.is_none() {
            return Ok(());
        }
        self.drain_window()?;
        self.pump(false);
        self.collect_frames();
        self.dispatch();
        self.check_ready();
        Ok(())
    }

    /// One playback step. Renders at most one frame.
    pub fn tick_playback(&mut self) -> StreamResult<TickReport> {
        self.ensure_alive()?;
        let now = self.clock.now();
        let Some(s) = self.session.as_mut() else {
            return Ok(TickReport::default());
        };
        let report = s.player.tick(now, &mut self.cache, sink(&mut self.audio));

        if let Some(frame) = report.shown {
            if let (Some(r), Some(held)) = (self.renderer.as_mut(), s.player.held()) {
                r.render(held);
            }
            self.events.emit(FrameShown { frame });
        }
        if report.dropped > 0 {
            debug!("dropped {} stale frames (target {:?})", report.dropped, report.target);
            self.events.emit(FramesDropped {
                count: report.dropped,
                target: report.target.unwrap_or(0),
            });
        }
        if report.wrapped {
            self.events.emit(LoopWrapped);
        }
        if report.ended {
            self.events.emit(PlaybackEnded);
            self.events.emit(PlaybackStateChanged {
                state: PlaybackState::Stopped,
            });
        }
        Ok(report)
    }

    /// Drive both ticks on the calling thread for `duration`.
    pub fn run_for(&mut self, duration: Duration) -> StreamResult<()> {
        self.ensure_alive()?;
        let fps = self.sequence_info().map_or(FALLBACK_FRAME_RATE, |i| i.frame_rate);
        let decode = tick(self.config.decode_tick(fps));
        let playback = tick(self.config.playback_tick(fps));
        let deadline = after(duration);
        loop {
            select! {
                recv(decode) -> _ => self.tick_decode()?,
                recv(playback) -> _ => {
                    self.tick_playback()?;
                }
                recv(deadline) -> _ => return Ok(()),
            }
        }
    }

    // ========== Playback control ==========

    pub fn play(&mut self) -> StreamResult<()> {
        self.ensure_alive()?;
        if self.renderer.is_none() {
            return Err(StreamError::NoRenderer);
        }
        let now = self.clock.now();
        let s = self.session.as_mut().ok_or(StreamError::NotOpen)?;
        if s.player.play(now, sink(&mut self.audio)) {
            self.events.emit(PlaybackStateChanged {
                state: PlaybackState::Playing,
            });
        }
        Ok(())
    }

    pub fn pause(&mut self) -> StreamResult<()> {
        self.ensure_alive()?;
        let now = self.clock.now();
        let s = self.session.as_mut().ok_or(StreamError::NotOpen)?;
        if s.player.pause(now, sink(&mut self.audio)) {
            self.events.emit(PlaybackStateChanged {
                state: PlaybackState::Paused,
            });
        }
        Ok(())
    }

    /// Stop and rewind to the first frame.
    pub fn stop(&mut self) -> StreamResult<()> {
        self.ensure_alive()?;
        let s = self.session.as_mut().ok_or(StreamError::NotOpen)?;
        let was = s.player.state();
        s.player.stop(sink(&mut self.audio));
        self.reposition(0);
        if was != PlaybackState::Stopped {
            self.events.emit(PlaybackStateChanged {
                state: PlaybackState::Stopped,
            });
        }
        Ok(())
    }

    /// Jump to `frame`. Streaming restarts at the bloc holding it; frames
    /// between the key frame and `frame` are dropped by the clock.
    pub fn seek(&mut self, frame: u32) -> StreamResult<()> {
        self.ensure_alive()?;
        let now = self.clock.now();
        let s = self.session.as_mut().ok_or(StreamError::NotOpen)?;
        let frame = frame.min(s.index.info.frame_count.saturating_sub(1));
        s.player.seek(frame, now, sink(&mut self.audio));
        self.reposition(frame);
        Ok(())
    }

    pub fn mute(&mut self) {
        if let Some(a) = self.audio.as_mut() {
            let volume = a.volume();
            if volume > 0.0 {
                self.saved_volume = Some(volume);
            }
            a.set_volume(0.0);
        }
    }

    pub fn unmute(&mut self) {
        if let Some(a) = self.audio.as_mut() {
            a.set_volume(self.saved_volume.take().unwrap_or(DEFAULT_VOLUME));
        }
    }

    /// Switch between FIFO and resident chunk buffering. On an open stream the
    /// pipeline rewinds to frame 0 so the resident buffer holds the whole
    /// sequence.
    pub fn set_keep_chunks_resident(&mut self, keep: bool) -> StreamResult<()> {
        self.ensure_alive()?;
        if self.config.keep_chunks_resident == keep {
            return Ok(());
        }
        self.config.keep_chunks_resident = keep;
        let now = self.clock.now();
        let Some(s) = self.session.as_mut() else {
            return Ok(());
        };
        let resident = resident_for(&self.config, &s.index.info);
        info!("Chunk residency {}, rewinding", if resident { "on" } else { "off" });

        s.pool.reset();
        s.clear_chunks();
        s.queue
            .set_mode(if resident { QueueMode::Resident } else { QueueMode::Fifo });
        s.player.seek(0, now, sink(&mut self.audio));
        self.cache.clear();
        self.streamer.restart_at(0, &mut self.sched);
        self.streamer.set_wrap(self.config.wrap && !resident);
        self.pump(true);
        Ok(())
    }

    /// Abort all requests, stop playback and drop every buffer. Terminal: all
    /// later calls fail with [`StreamError::Destroyed`].
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        info!("Destroying stream");
        self.teardown();
        self.renderer = None;
        self.audio = None;
        self.destroyed = true;
    }

    /// Tear down the current sequence and read from `source` on the next
    /// [`open`](Self::open). Renderer and audio sink stay attached.
    pub fn replace_source(&mut self, source: Arc<dyn RangeSource>) -> StreamResult<()> {
        self.ensure_alive()?;
        info!("Replacing source with {}", source.describe());
        self.teardown();
        self.sched = RangeScheduler::new(source, self.config.scheduler());
        Ok(())
    }

    pub fn stats(&self) -> StreamStats {
        let s = self.session.as_ref();
        StreamStats {
            state: self.state(),
            ready: self.ready,
            current_frame: self.current_frame(),
            displayed: s.map_or(0, |s| s.player.displayed()),
            dropped: s.map_or(0, |s| s.player.dropped()),
            chunk_queue: s.map_or(0, |s| s.queue.len()),
            frame_cache: self.cache.len(),
            frame_cache_bytes: self.cache.byte_size(),
            decode: s.map(|s| s.pool.stats()).unwrap_or_default(),
            network: self.sched.status(),
        }
    }

    // ========== Internals ==========

    fn ensure_alive(&self) -> StreamResult<()> {
        if self.destroyed {
            Err(StreamError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn teardown(&mut self) {
        self.sched.reset();
        self.loader = Loader::new();
        self.streamer.reset();
        if let Some(mut s) = self.session.take() {
            s.pool.reset();
            s.player.stop(sink(&mut self.audio));
        }
        self.cache.clear();
        self.audio_track = None;
        self.ready = false;
    }

    /// Report a fatal error and tear the sequence down.
    fn fail(&mut self, error: StreamError) -> StreamError {
        error!("Stream failed: {}", error);
        self.teardown();
        self.events.emit(StreamFailed { error: error.clone() });
        error
    }

    fn handle_network(&mut self, events: Vec<RangeEvent>) -> StreamResult<()> {
        for event in events {
            match event {
                RangeEvent::Received { id, range, data } => {
                    if self.loader.owns(id) {
                        let progress = self.loader.on_received(id, data, &mut self.sched);
                        self.apply_progress(progress)?;
                    } else if !self.streamer.window_mut().is_some_and(|w| w.accept(id, data)) {
                        trace!("stale range #{} {} ignored", id, range);
                    }
                }
                RangeEvent::Failed { id, range, error } => {
                    if self.loader.owns(id) {
                        let progress = self.loader.on_failed(id, error);
                        self.apply_progress(progress)?;
                    } else if self.streamer.window_mut().is_some_and(|w| w.fail(id)) {
                        error!("range {} failed permanently: {}", range, error);
                        self.events.emit(RangeFailed { range, error });
                    }
                }
                RangeEvent::Completed => trace!("scheduler idle"),
            }
        }
        Ok(())
    }

    fn apply_progress(&mut self, progress: StreamResult<Vec<LoadProgress>>) -> StreamResult<()> {
        let progress = match progress {
            Ok(p) => p,
            Err(e) => return Err(self.fail(e)),
        };
        for p in progress {
            match p {
                LoadProgress::Opened(index) => self.on_opened(index),
                LoadProgress::Audio { codec, data } => self.on_audio(codec, data),
                LoadProgress::Finished => debug!("structural load finished"),
            }
        }
        Ok(())
    }

    fn on_opened(&mut self, index: SequenceIndex) {
        let info = index.info;
        let resident = resident_for(&self.config, &info);
        let mode = if resident { QueueMode::Resident } else { QueueMode::Fifo };
        let workers = worker_count(self.config.decode_workers);
        info!(
            "Sequence open: {} frames @ {} fps, {} blocs, {} decode workers, chunk ceiling {} ({:?})",
            info.frame_count,
            info.frame_rate,
            index.bloc_count(),
            workers,
            info.chunk_ceiling(),
            mode
        );

        if let Some(r) = self.renderer.as_mut() {
            r.init(&info);
        }
        self.streamer = Streamer::new(streamer_config(&self.config, resident));
        self.session = Some(Session {
            queue: ChunkQueue::new(info.chunk_ceiling(), mode),
            overflow: VecDeque::new(),
            pool: DecodePool::new(workers, Arc::clone(&self.factory), &info),
            player: Player::new(&info, self.config.wrap),
            index,
        });
        self.events.emit(SequenceOpened { info });
        self.pump(false);
    }

    fn on_audio(&mut self, codec: u16, data: Bytes) {
        self.events.emit(AudioTrackLoaded { codec, len: data.len() });
        match self.audio.as_mut() {
            Some(a) => a.load(data, codec),
            None => self.audio_track = Some((codec, data)),
        }
    }

    /// Issue the next bulk window if the chunk queue has room for it.
    fn pump(&mut self, urgent: bool) -> bool {
        let Some(s) = self.session.as_ref() else {
            return false;
        };
        self.streamer
            .pump(&s.index, s.room(), !s.has_chunks(), &mut self.sched, urgent)
    }

    /// Demux a completed window into the chunk queue.
    fn drain_window(&mut self) -> StreamResult<()> {
        let Some((window, skip_before)) = self.streamer.take_complete() else {
            self.seal_if_done();
            return Ok(());
        };
        for b in window.failed_blocs() {
            warn!("bloc {} lost for this pass", b);
        }

        let mut chunks = Vec::new();
        for (start, bytes) in window.segments() {
            match demux(start, &bytes) {
                Ok(d) => {
                    if d.trailing > 0 {
                        trace!("{} trailing bytes after {}", d.trailing, start);
                    }
                    chunks.extend(d.chunks);
                }
                Err(e) => return Err(self.fail(e.into())),
            }
        }

        let skip = skip_before.unwrap_or(0);
        let Some(s) = self.session.as_mut() else {
            return Ok(());
        };
        s.overflow.extend(chunks.into_iter().filter(|c| c.offset >= skip));
        let queued = s.refill();
        if !s.overflow.is_empty() {
            debug!("chunk queue full, {} chunks wait for room", s.overflow.len());
        }
        debug!(
            "blocs {}..{} queued {} chunks ({} in queue)",
            window.blocs.start,
            window.blocs.end,
            queued,
            s.queue.len()
        );
        self.seal_if_done();
        Ok(())
    }

    /// A resident buffer is complete once the cursor ran off the end and the
    /// last window landed.
    fn seal_if_done(&mut self) {
        if let Some(s) = self.session.as_mut() {
            if s.queue.mode() == QueueMode::Resident
                && s.overflow.is_empty()
                && self.streamer.is_exhausted()
                && !self.streamer.in_flight()
            {
                s.queue.seal();
            }
        }
    }

    fn collect_frames(&mut self) {
        let Some(s) = self.session.as_mut() else {
            return;
        };
        for result in s.pool.collect() {
            match result {
                Ok(frame) => {
                    if let Err(frame) = self.cache.push(frame) {
                        warn!("frame cache full, dropping frame {}", frame.frame_index);
                    }
                }
                Err(error) => self.events.emit(DecodeFailed { error }),
            }
        }
    }

    /// Hand chunks to idle workers. Skipped while decoded plus in-flight
    /// frames would overflow the frame cache.
    fn dispatch(&mut self) {
        let Some(s) = self.session.as_mut() else {
            return;
        };
        let cap = self.cache.capacity();
        let mut sent = 0;
        while sent < self.config.chunks_per_tick
            && s.pool.idle_workers() > 0
            && self.cache.len() + s.pool.pending() < cap
        {
            let Some(chunk) = s.queue.next_for_decode() else {
                break;
            };
            s.pool.submit(chunk);
            sent += 1;
        }
        s.refill();
        if sent > 0 {
            trace!("dispatched {} chunks, {} pending", sent, s.pool.pending());
        }
    }

    fn check_ready(&mut self) {
        if self.ready {
            return;
        }
        let Some(s) = self.session.as_ref() else {
            return;
        };
        let target = self.cache.capacity().min(s.index.info.frame_count as usize);
        // A short or damaged sequence may never fill the cache
        let drained = self.streamer.is_exhausted()
            && !self.streamer.in_flight()
            && s.queue.undispatched() == 0
            && s.overflow.is_empty()
            && s.pool.pending() == 0
            && !self.cache.is_empty();
        if self.cache.len() < target && !drained {
            return;
        }

        self.ready = true;
        info!("Stream ready: {} frames cached", self.cache.len());
        self.events.emit(StreamReady {
            cached: self.cache.len(),
        });
        if self.config.show_placeholder {
            self.show_placeholder();
        } else if self.config.play_on_load {
            if let Err(e) = self.play() {
                warn!("Play on load skipped: {}", e);
            }
        }
    }

    fn show_placeholder(&mut self) {
        let Some(s) = self.session.as_mut() else {
            return;
        };
        if let Some(frame) = s.player.show_first(&mut self.cache) {
            if let (Some(r), Some(held)) = (self.renderer.as_mut(), s.player.held()) {
                r.render(held);
            }
            self.events.emit(FrameShown { frame });
        }
    }

    /// Flush decoded and queued work and restart streaming at the bloc
    /// holding `frame`.
    fn reposition(&mut self, frame: u32) {
        let Some(s) = self.session.as_mut() else {
            return;
        };
        let b = s.index.bloc_for_frame(frame);
        let (offset, _) = s.index.bloc_bounds(b);
        s.pool.reset();
        self.cache.clear();

        if s.queue.mode() == QueueMode::Resident {
            if !s.queue.position_at(offset) {
                self.streamer.prioritize(b, &mut self.sched);
            }
            debug!("reposition to frame {} (bloc {}), resident", frame, b);
            return;
        }

        s.clear_chunks();
        if self.streamer.focus(b, &s.index, &mut self.sched) {
            debug!("reposition to frame {}: bloc {} already in flight", frame, b);
        } else {
            self.streamer.restart_at(b, &mut self.sched);
            self.streamer.pump(&s.index, s.room(), true, &mut self.sched, true);
            debug!("reposition to frame {}: refetching from bloc {}", frame, b);
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("open", &self.is_open())
            .field("ready", &self.ready)
            .field("destroyed", &self.destroyed)
            .field("state", &self.state())
            .field("frame_cache", &self.cache.len())
            .finish()
    }
}

/// Resident buffering applies only when the whole sequence fits under the
/// chunk ceiling.
fn resident_for(config: &StreamConfig, info: &SequenceInfo) -> bool {
    if !config.keep_chunks_resident {
        return false;
    }
    let fits = info.frame_count as usize <= info.chunk_ceiling();
    if !fits {
        warn!(
            "{} frames exceed the chunk ceiling of {}, keeping FIFO buffering",
            info.frame_count,
            info.chunk_ceiling()
        );
    }
    fits
}

fn streamer_config(config: &StreamConfig, resident: bool) -> StreamerConfig {
    StreamerConfig {
        fetch_size: config.fetch_size,
        split: config.split_policy(),
        // A resident buffer replays itself; the network pass runs once
        wrap: config.wrap && !resident,
    }
}

fn sink(audio: &mut Option<Box<dyn AudioSink>>) -> Option<&mut dyn AudioSink> {
    match audio {
        Some(a) => Some(&mut **a),
        None => None,
    }
}
