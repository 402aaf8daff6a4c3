//! Time sources and the audio sink seam.
//!
//! The playback clock reads time through [`TimeSource`] so tests can drive it
//! with [`ManualClock`]. When an audio track is loaded and playing, the
//! [`AudioSink`] position becomes the master clock instead.

use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic time since an arbitrary origin.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, d: Duration) {
        self.nanos.fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, t: Duration) {
        self.nanos.store(t.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// Playback side of an audio track.
pub trait AudioSink: Send {
    /// Hand over the encoded track.
    fn load(&mut self, data: Bytes, codec: u16);
    fn is_loaded(&self) -> bool;
    /// Start playing from `offset` seconds.
    fn play(&mut self, offset: f64);
    fn pause(&mut self);
    fn stop(&mut self);
    fn is_playing(&self) -> bool;
    /// Current track position in seconds.
    fn position(&self) -> f64;
    fn volume(&self) -> f32;
    fn set_volume(&mut self, volume: f32);
}

/// An audio sink that produces no sound but keeps a track position driven by
/// a [`TimeSource`]. Used when no audio device is wired up.
pub struct SilentAudio {
    clock: Arc<dyn TimeSource>,
    loaded: Option<usize>,
    started_at: Option<Duration>,
    offset: f64,
    volume: f32,
}

impl SilentAudio {
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            clock,
            loaded: None,
            started_at: None,
            offset: 0.0,
            volume: 1.0,
        }
    }

    /// Size of the loaded track in bytes.
    pub fn track_len(&self) -> Option<usize> {
        self.loaded
    }
}

impl AudioSink for SilentAudio {
    fn load(&mut self, data: Bytes, _codec: u16) {
        self.loaded = Some(data.len());
    }

    fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn play(&mut self, offset: f64) {
        self.offset = offset;
        self.started_at = Some(self.clock.now());
    }

    fn pause(&mut self) {
        self.offset = self.position();
        self.started_at = None;
    }

    fn stop(&mut self) {
        self.offset = 0.0;
        self.started_at = None;
    }

    fn is_playing(&self) -> bool {
        self.started_at.is_some()
    }

    fn position(&self) -> f64 {
        match self.started_at {
            Some(t0) => self.offset + self.clock.now().saturating_sub(t0).as_secs_f64(),
            None => self.offset,
        }
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared() {
        let a = ManualClock::new();
        let b = a.clone();
        a.advance(Duration::from_millis(250));
        assert_eq!(b.now(), Duration::from_millis(250));
        b.set(Duration::from_secs(3));
        assert_eq!(a.now(), Duration::from_secs(3));
    }

    #[test]
    fn test_silent_audio_position() {
        let clock = ManualClock::new();
        let mut audio = SilentAudio::new(Arc::new(clock.clone()));
        audio.load(Bytes::from_static(b"ogg"), 0);
        assert!(audio.is_loaded());

        audio.play(2.0);
        clock.advance(Duration::from_millis(500));
        assert!((audio.position() - 2.5).abs() < 1e-9);

        audio.pause();
        clock.advance(Duration::from_secs(1));
        assert!(!audio.is_playing());
        assert!((audio.position() - 2.5).abs() < 1e-9);

        audio.stop();
        assert_eq!(audio.position(), 0.0);
    }
}
