//! Bounded buffer of demuxed, undecoded frame chunks.
//!
//! Two modes:
//! - [`QueueMode::Fifo`]: chunks leave the queue when dispatched to decode.
//! - [`QueueMode::Resident`]: chunks stay; a read cursor walks them and wraps
//!   once the buffer is sealed, so a downloaded sequence replays without
//!   re-fetching.
//!
//! Either way the queue never holds more than its capacity.

use log::{debug, trace};
use std::collections::VecDeque;

use crate::format::record::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueMode {
    #[default]
    Fifo,
    Resident,
}

#[derive(Debug)]
pub struct ChunkQueue {
    chunks: VecDeque<Chunk>,
    capacity: usize,
    mode: QueueMode,
    /// Next chunk to dispatch in resident mode.
    cursor: usize,
    /// Resident mode only: no more chunks will arrive, cursor may wrap.
    sealed: bool,
}

impl ChunkQueue {
    pub fn new(capacity: usize, mode: QueueMode) -> Self {
        Self {
            chunks: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            mode,
            cursor: 0,
            sealed: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn room(&self) -> usize {
        self.capacity - self.chunks.len()
    }

    /// Append a chunk. Gives it back if the queue is at capacity.
    pub fn push(&mut self, chunk: Chunk) -> Result<(), Chunk> {
        if self.chunks.len() >= self.capacity {
            return Err(chunk);
        }
        self.chunks.push_back(chunk);
        Ok(())
    }

    /// Next chunk to decode, in container order.
    ///
    /// FIFO: removes it. Resident: clones it (payload is shared) and advances
    /// the cursor.
    pub fn next_for_decode(&mut self) -> Option<Chunk> {
        match self.mode {
            QueueMode::Fifo => self.chunks.pop_front(),
            QueueMode::Resident => {
                if self.cursor >= self.chunks.len() {
                    if !self.sealed || self.chunks.is_empty() {
                        return None;
                    }
                    trace!("resident queue: cursor wraps after {} chunks", self.chunks.len());
                    self.cursor = 0;
                }
                let chunk = self.chunks.get(self.cursor).cloned();
                self.cursor += 1;
                chunk
            }
        }
    }

    /// Chunks still to be dispatched before the buffer runs dry.
    pub fn undispatched(&self) -> usize {
        match self.mode {
            QueueMode::Fifo => self.chunks.len(),
            QueueMode::Resident => self.chunks.len() - self.cursor.min(self.chunks.len()),
        }
    }

    /// Mark a resident buffer as complete so its cursor can wrap.
    pub fn seal(&mut self) {
        if !self.sealed {
            debug!("resident queue sealed with {} chunks", self.chunks.len());
        }
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Resident mode: move the cursor to the first chunk at or after `offset`.
    ///
    /// Returns false if no resident chunk starts there yet; the cursor then
    /// parks past the last chunk and picks up the next one pushed.
    pub fn position_at(&mut self, offset: u64) -> bool {
        if self.mode != QueueMode::Resident {
            return false;
        }
        match self.chunks.iter().position(|c| c.offset >= offset) {
            Some(i) => {
                self.cursor = i;
                true
            }
            None => {
                self.cursor = self.chunks.len();
                false
            }
        }
    }

    /// Switch mode. Going back to FIFO drops chunks the cursor already passed.
    pub fn set_mode(&mut self, mode: QueueMode) {
        if mode == self.mode {
            return;
        }
        if mode == QueueMode::Fifo {
            let consumed = self.cursor.min(self.chunks.len());
            self.chunks.drain(..consumed);
        }
        self.mode = mode;
        self.cursor = 0;
        self.sealed = false;
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.cursor = 0;
        self.sealed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::record::{RecordHeader, kind};
    use bytes::Bytes;

    fn chunk(offset: u64) -> Chunk {
        let h = RecordHeader {
            record_type: kind::FRAME_INTER,
            codec: 0,
            version: 1,
            size: 0,
        };
        Chunk::new(h, offset, Bytes::new())
    }

    #[test]
    fn test_fifo_order_and_capacity() {
        let mut q = ChunkQueue::new(3, QueueMode::Fifo);
        for i in 0..3 {
            q.push(chunk(i)).unwrap();
        }
        assert_eq!(q.room(), 0);
        assert_eq!(q.push(chunk(9)).unwrap_err().offset, 9);
        assert_eq!(q.len(), 3);

        assert_eq!(q.next_for_decode().unwrap().offset, 0);
        assert_eq!(q.room(), 1);
        assert_eq!(q.next_for_decode().unwrap().offset, 1);
        assert_eq!(q.next_for_decode().unwrap().offset, 2);
        assert!(q.next_for_decode().is_none());
    }

    #[test]
    fn test_resident_cycles_when_sealed() {
        let mut q = ChunkQueue::new(10, QueueMode::Resident);
        for i in 0..3 {
            q.push(chunk(i)).unwrap();
        }
        let first: Vec<_> = (0..3).filter_map(|_| q.next_for_decode()).map(|c| c.offset).collect();
        assert_eq!(first, vec![0, 1, 2]);
        // Not sealed: more chunks may still arrive
        assert!(q.next_for_decode().is_none());
        assert_eq!(q.len(), 3);

        q.seal();
        let again: Vec<_> = (0..4).filter_map(|_| q.next_for_decode()).map(|c| c.offset).collect();
        assert_eq!(again, vec![0, 1, 2, 0]);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn test_resident_position_at() {
        let mut q = ChunkQueue::new(10, QueueMode::Resident);
        for off in [100, 200, 300, 400] {
            q.push(chunk(off)).unwrap();
        }
        assert!(q.position_at(250));
        assert_eq!(q.next_for_decode().unwrap().offset, 300);
        assert!(!q.position_at(1000));
        // Parked until a later chunk arrives
        assert!(q.next_for_decode().is_none());
        q.push(chunk(1000)).unwrap();
        assert_eq!(q.next_for_decode().unwrap().offset, 1000);
    }

    #[test]
    fn test_mode_switch_drops_consumed() {
        let mut q = ChunkQueue::new(10, QueueMode::Resident);
        for i in 0..4 {
            q.push(chunk(i)).unwrap();
        }
        q.next_for_decode();
        q.next_for_decode();
        q.set_mode(QueueMode::Fifo);
        assert_eq!(q.len(), 2);
        assert_eq!(q.next_for_decode().unwrap().offset, 2);
    }

    #[test]
    fn test_clear() {
        let mut q = ChunkQueue::new(2, QueueMode::Resident);
        q.push(chunk(0)).unwrap();
        q.seal();
        q.clear();
        assert!(q.is_empty());
        assert!(!q.is_sealed());
        assert_eq!(q.room(), 2);
    }
}
