//! Stream events.
//!
//! The stream emits events on the control thread as they happen and queues
//! them; the caller drains the queue with [`EventBus::poll`] from its own loop.
//! Events come out in emission order.
//!
//! Transport and decode failures never cross the pipeline as errors; they are
//! reported here, scoped to the range or chunk that failed.

use log::warn;
use std::any::Any;
use std::sync::Mutex;

use crate::core::player::PlaybackState;
use crate::error::{DecodeError, StreamError, TransportError};
use crate::format::sequence::SequenceInfo;
use crate::net::source::ByteRange;

/// Maximum events in queue before oldest are evicted
const MAX_QUEUE_SIZE: usize = 1000;

/// Marker trait for events. Events must be Send + Sync + 'static.
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
}

// Blanket impl for all qualifying types
impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Boxed event for queue storage
pub type BoxedEvent = Box<dyn Event>;

// ========== Stream events ==========

/// Sequence info and bloc index are parsed; streaming starts.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceOpened {
    pub info: SequenceInfo,
}

/// An additional audio track arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrackLoaded {
    pub codec: u16,
    pub len: usize,
}

/// The frame cache filled for the first time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReady {
    pub cached: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameShown {
    pub frame: u32,
}

/// Stale frames discarded to catch up with the clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramesDropped {
    pub count: u32,
    pub target: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailed {
    pub error: DecodeError,
}

/// A range request failed after all retries. Its blocs are lost for this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeFailed {
    pub range: ByteRange,
    pub error: TransportError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackStateChanged {
    pub state: PlaybackState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopWrapped;

/// Non-looping playback reached the last frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackEnded;

/// Fatal error; the stream has been torn down.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFailed {
    pub error: StreamError,
}

// ========== Bus ==========

/// Bounded queue of emitted events, drained by the caller.
pub struct EventBus {
    queue: Mutex<Vec<BoxedEvent>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("queue_len", &self.queue_len()).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Queue an event. A full queue drops its oldest half first.
    pub fn emit<E: Event>(&self, event: E) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= MAX_QUEUE_SIZE {
            let evict_count = queue.len() / 2;
            warn!("event queue full ({} events), evicting oldest {}", queue.len(), evict_count);
            queue.drain(0..evict_count);
        }
        queue.push(Box::new(event));
    }

    /// Take every event queued since the last poll.
    ///
    /// ```ignore
    /// for event in stream.events().poll() {
    ///     if let Some(e) = downcast_event::<RangeFailed>(&event) { ... }
    /// }
    /// ```
    pub fn poll(&self) -> Vec<BoxedEvent> {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

/// The event inside `event` if it is an `E`.
///
/// Derefs to `dyn Event` first: the box itself also implements `Event`
/// through the blanket impl and would downcast as `Box<dyn Event>`.
#[inline]
pub fn downcast_event<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}
