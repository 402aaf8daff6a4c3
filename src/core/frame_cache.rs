//! Bounded FIFO of decoded frames waiting for playback.
//!
//! The single backpressure point of the pipeline: decode dispatch stops while
//! the cache is full. A full cache rejects pushes instead of evicting.

use std::collections::VecDeque;

use crate::core::codec::MeshFrame;

#[derive(Debug)]
pub struct FrameCache {
    frames: VecDeque<MeshFrame>,
    capacity: usize,
}

impl FrameCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a frame. Gives it back if the cache is full.
    pub fn push(&mut self, frame: MeshFrame) -> Result<(), MeshFrame> {
        if self.is_full() {
            return Err(frame);
        }
        self.frames.push_back(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<MeshFrame> {
        self.frames.pop_front()
    }

    pub fn front(&self) -> Option<&MeshFrame> {
        self.frames.front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    /// Bytes held by cached frames.
    pub fn byte_size(&self) -> usize {
        self.frames.iter().map(MeshFrame::byte_size).sum()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
