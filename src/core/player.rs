//! Playback clock with drop-frame sync.
//!
//! The player owns playback state and at most one held frame. Each tick it
//! turns elapsed time into a target frame index, then pops the frame cache
//! until the held frame matches the target. Stale frames are discarded, never
//! interpolated, so playback stays locked to wall or audio time under decode
//! pressure.
//!
//! # Timing Model
//!
//! `elapsed = (now - start_time) + frame_offset / fps`, or the audio track
//! position when audio is loaded and playing. Past the sequence duration the
//! time origin wraps and the current frame resets to "none" so the next pop
//! resynchronizes from scratch.
//!
//! # States
//!
//! `Stopped -> Playing -> Paused -> Playing -> Stopped`. Starvation (empty
//! cache) is not a state: the last shown frame simply stays on screen.

use log::{debug, info, trace};
use serde::Serialize;
use std::time::Duration;

use crate::core::clock::AudioSink;
use crate::core::codec::MeshFrame;
use crate::core::frame_cache::FrameCache;
use crate::format::sequence::SequenceInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// What one playback tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub target: Option<u32>,
    /// Frame index newly handed to the renderer this tick.
    pub shown: Option<u32>,
    pub dropped: u32,
    pub wrapped: bool,
    /// Reached the end with looping disabled.
    pub ended: bool,
}

#[derive(Debug)]
pub struct Player {
    frame_count: u32,
    fps: f64,
    looping: bool,
    state: PlaybackState,
    /// Clock time playback (re)started at.
    start_time: Duration,
    /// Frame playback (re)started from.
    frame_offset: u32,
    /// `None` is the resync sentinel: set on loop wrap, seek and stop.
    current: Option<u32>,
    held: Option<MeshFrame>,
    last_shown: Option<u32>,
    displayed: u64,
    dropped: u64,
}

impl Player {
    pub fn new(info: &SequenceInfo, looping: bool) -> Self {
        Self {
            frame_count: info.frame_count.max(1),
            fps: info.frame_rate as f64,
            looping,
            state: PlaybackState::Stopped,
            start_time: Duration::ZERO,
            frame_offset: 0,
            current: None,
            held: None,
            last_shown: None,
            displayed: 0,
            dropped: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn current_frame(&self) -> Option<u32> {
        self.current
    }

    pub fn held(&self) -> Option<&MeshFrame> {
        self.held.as_ref()
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Sequence duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frame_count as f64 / self.fps
    }

    pub fn displayed(&self) -> u64 {
        self.displayed
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Seconds into the sequence, before loop wrapping.
    pub fn elapsed(&self, now: Duration, audio: Option<&dyn AudioSink>) -> f64 {
        let offset = self.frame_offset as f64 / self.fps;
        if self.state != PlaybackState::Playing {
            return offset;
        }
        match audio {
            Some(a) if a.is_loaded() && a.is_playing() => a.position(),
            _ => now.saturating_sub(self.start_time).as_secs_f64() + offset,
        }
    }

    /// Frame index the clock wants on screen at `now`.
    pub fn target_frame(&self, now: Duration, audio: Option<&dyn AudioSink>) -> u32 {
        let mut t = self.elapsed(now, audio);
        if self.looping {
            t %= self.duration();
        }
        self.frame_at(t)
    }

    fn frame_at(&self, t: f64) -> u32 {
        ((t * self.fps).floor().max(0.0) as u32).min(self.frame_count - 1)
    }

    pub fn play(&mut self, now: Duration, audio: Option<&mut dyn AudioSink>) -> bool {
        if self.state == PlaybackState::Playing {
            return false;
        }
        info!("Playback started at frame {}", self.frame_offset);
        self.state = PlaybackState::Playing;
        self.start_time = now;
        if let Some(a) = audio.filter(|a| a.is_loaded()) {
            a.play(self.frame_offset as f64 / self.fps);
        }
        true
    }

    /// Freeze playback. The current frame becomes the resume offset; the
    /// frame cache is left alone.
    pub fn pause(&mut self, now: Duration, audio: Option<&mut dyn AudioSink>) -> bool {
        if self.state != PlaybackState::Playing {
            return false;
        }
        let resume = match self.current {
            Some(f) => f,
            None => self.target_frame(now, audio.as_deref()),
        };
        self.frame_offset = resume;
        self.state = PlaybackState::Paused;
        if let Some(a) = audio {
            a.pause();
        }
        info!("Playback paused at frame {}", resume);
        true
    }

    pub fn stop(&mut self, audio: Option<&mut dyn AudioSink>) {
        if self.state != PlaybackState::Stopped {
            info!("Playback stopped");
        }
        self.state = PlaybackState::Stopped;
        self.frame_offset = 0;
        self.current = None;
        self.held = None;
        self.last_shown = None;
        if let Some(a) = audio {
            a.stop();
        }
    }

    /// Restart the clock at `frame`. The caller is responsible for flushing
    /// frames decoded for the old position.
    pub fn seek(&mut self, frame: u32, now: Duration, audio: Option<&mut dyn AudioSink>) {
        let frame = frame.min(self.frame_count - 1);
        debug!("seek to frame {}", frame);
        self.frame_offset = frame;
        self.start_time = now;
        self.current = None;
        self.held = None;
        self.last_shown = None;
        if self.state == PlaybackState::Playing {
            if let Some(a) = audio.filter(|a| a.is_loaded()) {
                a.play(frame as f64 / self.fps);
            }
        }
    }

    /// Show the first available frame without starting playback.
    pub fn show_first(&mut self, cache: &mut FrameCache) -> Option<u32> {
        if self.held.is_none() {
            self.held = cache.pop();
        }
        let idx = self.held.as_ref()?.frame_index;
        self.current = Some(idx);
        if self.last_shown == Some(idx) {
            return None;
        }
        self.last_shown = Some(idx);
        self.displayed += 1;
        Some(idx)
    }

    /// One playback step. No-op unless playing.
    pub fn tick(&mut self, now: Duration, cache: &mut FrameCache, mut audio: Option<&mut dyn AudioSink>) -> TickReport {
        let mut report = TickReport::default();
        if self.state != PlaybackState::Playing {
            return report;
        }

        let mut t = self.elapsed(now, audio.as_deref());
        let duration = self.duration();
        if t >= duration {
            if !self.looping {
                info!("Playback reached end of sequence");
                self.state = PlaybackState::Stopped;
                self.frame_offset = 0;
                if let Some(a) = audio.as_deref_mut() {
                    a.stop();
                }
                report.ended = true;
                return report;
            }
            t %= duration;
            self.start_time = now.saturating_sub(Duration::from_secs_f64(t));
            self.frame_offset = 0;
            self.current = None;
            // The old lap's frame must not restart audio at the lap end
            self.held = None;
            self.last_shown = None;
            report.wrapped = true;
            if let Some(a) = audio.as_deref_mut() {
                a.stop();
            }
            debug!("loop wrap, t={:.3}s", t);
        }

        let target = self.frame_at(t);
        report.target = Some(target);

        if self.held.is_none() {
            self.held = cache.pop();
        }
        while let Some(h) = &self.held {
            if h.frame_index == target || self.is_ahead(h.frame_index, target) || cache.is_empty() {
                break;
            }
            if self.last_shown != Some(h.frame_index) {
                trace!("drop frame {} (target {})", h.frame_index, target);
                report.dropped += 1;
            }
            self.held = cache.pop();
        }
        self.dropped += report.dropped as u64;

        // A frame from the future waits until the clock reaches it
        let Some(idx) = self.held.as_ref().map(|h| h.frame_index) else {
            return report;
        };
        if self.is_ahead(idx, target) {
            return report;
        }

        self.current = Some(idx);
        if self.last_shown != Some(idx) {
            self.last_shown = Some(idx);
            self.displayed += 1;
            report.shown = Some(idx);
        }

        // Resume at the clock position, not at a possibly stale held frame
        if let Some(a) = audio.filter(|a| a.is_loaded() && !a.is_playing()) {
            a.play(t);
        }
        report
    }

    /// True if `frame` is still ahead of `target` in the current lap.
    fn is_ahead(&self, frame: u32, target: u32) -> bool {
        if frame <= target {
            return false;
        }
        !self.looping || frame - target < self.frame_count / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::{ManualClock, SilentAudio, TimeSource};
    use std::sync::Arc;

    fn info(frames: u32, fps: f32) -> SequenceInfo {
        SequenceInfo {
            frame_count: frames,
            bloc_count: 1,
            frame_rate: fps,
            max_vertices: 0,
            max_triangles: 0,
            texture_encoding: 0,
            texture_width: 0,
            texture_height: 0,
            additional_tracks: 0,
        }
    }

    fn cache_with(range: std::ops::Range<u32>) -> FrameCache {
        let mut c = FrameCache::new(1000);
        for i in range {
            c.push(MeshFrame {
                frame_index: i,
                ..Default::default()
            })
            .unwrap();
        }
        c
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_state_machine() {
        let mut p = Player::new(&info(30, 30.0), true);
        assert_eq!(p.state(), PlaybackState::Stopped);
        assert!(p.play(ms(0), None));
        assert!(!p.play(ms(10), None));
        assert_eq!(p.state(), PlaybackState::Playing);
        assert!(p.pause(ms(100), None));
        assert_eq!(p.state(), PlaybackState::Paused);
        assert!(p.play(ms(200), None));
        p.stop(None);
        assert_eq!(p.state(), PlaybackState::Stopped);
        assert_eq!(p.current_frame(), None);
    }

    #[test]
    fn test_tick_tracks_time() {
        let mut p = Player::new(&info(300, 30.0), true);
        let mut cache = cache_with(0..300);
        p.play(ms(0), None);

        let r = p.tick(ms(0), &mut cache, None);
        assert_eq!(r.shown, Some(0));

        let r = p.tick(ms(1000), &mut cache, None);
        assert_eq!(r.target, Some(30));
        assert_eq!(r.shown, Some(30));
        // Frames 1..=29 were never shown
        assert_eq!(r.dropped, 29);
        assert_eq!(p.current_frame(), Some(30));

        // Same frame again: nothing new for the renderer
        let r = p.tick(ms(1010), &mut cache, None);
        assert_eq!(r.shown, None);
    }

    #[test]
    fn test_starvation_holds_frame() {
        let mut p = Player::new(&info(100, 25.0), true);
        let mut cache = cache_with(0..3);
        p.play(ms(0), None);
        p.tick(ms(0), &mut cache, None);
        let r = p.tick(ms(2000), &mut cache, None);
        // Cache drained, last frame stays
        assert_eq!(r.shown, Some(2));
        let r = p.tick(ms(2100), &mut cache, None);
        assert_eq!(r.shown, None);
        assert_eq!(p.held().map(|f| f.frame_index), Some(2));
    }

    #[test]
    fn test_future_frame_waits() {
        let mut p = Player::new(&info(100, 10.0), true);
        let mut cache = cache_with(5..10);
        p.play(ms(0), None);
        let r = p.tick(ms(0), &mut cache, None);
        assert_eq!(r.shown, None);
        assert_eq!(cache.len(), 4);
        let r = p.tick(ms(500), &mut cache, None);
        assert_eq!(r.shown, Some(5));
    }

    #[test]
    fn test_loop_wrap_lands_on_first_frame() {
        let mut p = Player::new(&info(30, 30.0), true);
        let mut cache = cache_with(0..30);
        p.play(ms(0), None);
        p.tick(ms(980), &mut cache, None);
        assert_eq!(p.current_frame(), Some(29));

        for i in 0..30 {
            cache
                .push(MeshFrame {
                    frame_index: i,
                    ..Default::default()
                })
                .unwrap();
        }
        let r = p.tick(ms(1010), &mut cache, None);
        assert!(r.wrapped);
        assert_eq!(r.target, Some(0));
        assert_eq!(r.shown, Some(0));
        assert!(p.target_frame(ms(1010), None) < 1);
    }

    #[test]
    fn test_no_loop_ends() {
        let mut p = Player::new(&info(10, 10.0), false);
        let mut cache = cache_with(0..10);
        p.play(ms(0), None);
        p.tick(ms(500), &mut cache, None);
        let r = p.tick(ms(1200), &mut cache, None);
        assert!(r.ended);
        assert_eq!(p.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_pause_resume_offset() {
        let mut p = Player::new(&info(100, 10.0), true);
        let mut cache = cache_with(0..100);
        p.play(ms(0), None);
        p.tick(ms(1500), &mut cache, None);
        assert_eq!(p.current_frame(), Some(15));
        p.pause(ms(1550), None);
        assert_eq!(p.target_frame(ms(9000), None), 15);

        p.play(ms(10_000), None);
        assert_eq!(p.target_frame(ms(10_250), None), 17);
    }

    #[test]
    fn test_seek_restarts_clock() {
        let mut p = Player::new(&info(100, 10.0), true);
        let mut cache = cache_with(0..5);
        p.play(ms(0), None);
        p.tick(ms(0), &mut cache, None);
        p.seek(60, ms(3000), None);
        assert_eq!(p.current_frame(), None);
        assert!(p.held().is_none());
        assert_eq!(p.target_frame(ms(3150), None), 61);
    }

    #[test]
    fn test_audio_is_master_clock() {
        let clock = ManualClock::new();
        let mut audio = SilentAudio::new(Arc::new(clock.clone()));
        audio.load(bytes::Bytes::from_static(b"x"), 0);

        let mut p = Player::new(&info(100, 10.0), true);
        let mut cache = cache_with(0..100);
        p.play(clock.now(), Some(&mut audio));
        assert!(audio.is_playing());

        // Audio runs ahead of the wall clock passed to tick
        clock.advance(ms(2000));
        let r = p.tick(ms(500), &mut cache, Some(&mut audio));
        assert_eq!(r.target, Some(20));
    }

    #[test]
    fn test_wrap_restarts_audio_at_frame() {
        let clock = ManualClock::new();
        let mut audio = SilentAudio::new(Arc::new(clock.clone()));
        audio.load(bytes::Bytes::from_static(b"x"), 0);

        let mut p = Player::new(&info(10, 10.0), true);
        let mut cache = cache_with(0..10);
        p.play(clock.now(), Some(&mut audio));
        clock.advance(ms(1050));
        cache.clear();
        for i in 0..10 {
            cache
                .push(MeshFrame {
                    frame_index: i,
                    ..Default::default()
                })
                .unwrap();
        }
        let r = p.tick(clock.now(), &mut cache, Some(&mut audio));
        assert!(r.wrapped);
        assert_eq!(r.shown, Some(0));
        // Restarted from frame 0
        assert!(audio.is_playing());
        assert!(audio.position() < 0.1);
    }

    #[test]
    fn test_wrap_on_empty_cache_restarts_audio_at_lap_start() {
        let clock = ManualClock::new();
        let mut audio = SilentAudio::new(Arc::new(clock.clone()));
        audio.load(bytes::Bytes::from_static(b"x"), 0);

        let mut p = Player::new(&info(10, 10.0), true);
        let mut cache = cache_with(0..10);
        p.play(clock.now(), Some(&mut audio));
        clock.set(ms(950));
        let r = p.tick(clock.now(), &mut cache, Some(&mut audio));
        assert_eq!(r.shown, Some(9));

        // Next lap not decoded yet
        clock.set(ms(1050));
        let r = p.tick(clock.now(), &mut cache, Some(&mut audio));
        assert!(r.wrapped);
        assert_eq!(r.target, Some(0));
        assert_eq!(r.shown, None);
        assert!(p.held().is_none());
        assert!(!audio.is_playing());

        for i in 0..10 {
            cache
                .push(MeshFrame {
                    frame_index: i,
                    ..Default::default()
                })
                .unwrap();
        }
        clock.set(ms(1150));
        let r = p.tick(clock.now(), &mut cache, Some(&mut audio));
        assert_eq!(r.target, Some(1));
        assert_eq!(r.shown, Some(1));
        assert!(audio.is_playing());
        assert!(audio.position() < 0.2, "audio restarted at {:.3}s", audio.position());

        clock.set(ms(1350));
        let r = p.tick(clock.now(), &mut cache, Some(&mut audio));
        assert_eq!(r.target, Some(3));
    }
}
