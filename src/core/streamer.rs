//! Bulk streaming cursor.
//!
//! Walks the bloc index issuing one bulk window at a time. A window grows bloc
//! by bloc until it reaches the fetch size, but never beyond what the chunk
//! queue can take, so a completed window always fits. Only one window is in
//! flight per stream.

use log::{debug, trace};
use std::ops::Range;

use crate::format::sequence::SequenceIndex;
use crate::net::assembler::{FetchWindow, SplitPolicy};
use crate::net::scheduler::{PRIORITY_NORMAL, PRIORITY_URGENT, RangeScheduler, RequestId};

#[derive(Debug, Clone, Copy)]
pub struct StreamerConfig {
    pub fetch_size: u64,
    pub split: SplitPolicy,
    /// Restart from the first bloc after the last one.
    pub wrap: bool,
}

#[derive(Debug)]
pub struct Streamer {
    config: StreamerConfig,
    /// Next bloc to fetch.
    cursor: usize,
    window: Option<FetchWindow>,
    /// One pass finished and wrapping is off.
    exhausted: bool,
    /// Chunks before this offset are discarded from the next completed window.
    skip_before: Option<u64>,
}

impl Streamer {
    pub fn new(config: StreamerConfig) -> Self {
        Self {
            config,
            cursor: 0,
            window: None,
            exhausted: false,
            skip_before: None,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn in_flight(&self) -> bool {
        self.window.is_some()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn set_wrap(&mut self, wrap: bool) {
        self.config.wrap = wrap;
    }

    /// Blocs the next window would cover, given `room` free chunk slots.
    /// `None` when the next bloc does not fit yet.
    pub fn next_window(&self, index: &SequenceIndex, room: usize, queue_empty: bool) -> Option<Range<usize>> {
        if self.exhausted || self.window.is_some() {
            return None;
        }
        let first = self.cursor;
        let mut frames = 0usize;
        let mut bytes = 0u64;
        let mut end = first;
        while end < index.bloc_count() && bytes < self.config.fetch_size {
            let bloc_frames = index.blocs[end].frame_count() as usize;
            // An oversized bloc is fetched alone into an empty queue
            let fits = frames + bloc_frames <= room || (end == first && queue_empty);
            if !fits {
                break;
            }
            frames += bloc_frames;
            bytes += index.bloc_len(end);
            end += 1;
        }
        (end > first).then_some(first..end)
    }

    /// Issue the next window if the queue has room. Returns true if a window
    /// went out.
    pub fn pump(
        &mut self,
        index: &SequenceIndex,
        room: usize,
        queue_empty: bool,
        sched: &mut RangeScheduler,
        urgent: bool,
    ) -> bool {
        let Some(blocs) = self.next_window(index, room, queue_empty) else {
            return false;
        };
        let mut window = FetchWindow::plan(index, blocs.clone(), self.config.split);
        let ranges: Vec<_> = window.parts().iter().map(|p| p.range).collect();
        for (i, range) in ranges.into_iter().enumerate() {
            let id = sched.allocate_id();
            // A seek only needs its first part ahead of everything else
            let priority = if urgent && i == 0 { PRIORITY_URGENT } else { PRIORITY_NORMAL };
            sched.enqueue(range, id, priority);
            window.assign(i, id);
        }
        debug!(
            "window blocs {}..{} ({} bytes, {} parts)",
            blocs.start,
            blocs.end,
            window.range().len(),
            window.parts().len()
        );

        self.cursor = blocs.end;
        if self.cursor >= index.bloc_count() {
            if self.config.wrap {
                trace!("cursor wraps to bloc 0");
                self.cursor = 0;
            } else {
                self.exhausted = true;
            }
        }
        self.window = Some(window);
        true
    }

    pub fn owns(&self, id: RequestId) -> bool {
        self.window.as_ref().is_some_and(|w| w.owns(id))
    }

    pub fn window(&self) -> Option<&FetchWindow> {
        self.window.as_ref()
    }

    pub fn window_mut(&mut self) -> Option<&mut FetchWindow> {
        self.window.as_mut()
    }

    /// Take the in-flight window once all of its parts resolved.
    pub fn take_complete(&mut self) -> Option<(FetchWindow, Option<u64>)> {
        if self.window.as_ref().is_some_and(FetchWindow::is_complete) {
            return self.window.take().map(|w| (w, self.skip_before.take()));
        }
        None
    }

    /// Move the part of the in-flight window holding bloc `b` to the front.
    /// Returns false if the window does not cover `b`.
    pub fn prioritize(&self, b: usize, sched: &mut RangeScheduler) -> bool {
        let Some(window) = self.window.as_ref().filter(|w| w.blocs.contains(&b)) else {
            return false;
        };
        if let Some(id) = window.id_for_bloc(b) {
            sched.prioritize(id);
        }
        true
    }

    /// Like [`prioritize`](Self::prioritize), and also drop everything before
    /// `b` once the window lands.
    pub fn focus(&mut self, b: usize, index: &SequenceIndex, sched: &mut RangeScheduler) -> bool {
        if !self.prioritize(b, sched) {
            return false;
        }
        self.skip_before = Some(index.bloc_bounds(b).0);
        true
    }

    /// Abandon the in-flight window and restart at bloc `b`.
    pub fn restart_at(&mut self, b: usize, sched: &mut RangeScheduler) {
        if let Some(window) = self.window.take() {
            for part in window.parts() {
                if let Some(id) = part.id {
                    sched.cancel(id);
                }
            }
        }
        self.cursor = b;
        self.exhausted = false;
        self.skip_before = None;
    }

    /// Forget all state. The next pump starts at bloc 0.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.window = None;
        self.exhausted = false;
        self.skip_before = None;
    }
}
