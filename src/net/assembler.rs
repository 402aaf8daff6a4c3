//! Bulk window planning and reassembly.
//!
//! A streaming window covers a run of consecutive blocs. Large windows are
//! split into sub-ranges that are fetched concurrently; every cut falls on a
//! bloc boundary so each sub-range demultiplexes on its own. Once every part
//! has resolved, received parts are stitched back together in byte-offset
//! order, whatever order they arrived in.

use bytes::{Bytes, BytesMut};
use std::ops::Range;

use crate::format::sequence::SequenceIndex;
use crate::net::scheduler::RequestId;
use crate::net::source::ByteRange;

#[derive(Debug, Clone, PartialEq)]
enum PartState {
    Pending,
    Received(Bytes),
    Failed,
}

#[derive(Debug, Clone)]
pub struct WindowPart {
    pub range: ByteRange,
    pub blocs: Range<usize>,
    pub id: Option<RequestId>,
    state: PartState,
}

/// Split settings.
#[derive(Debug, Clone, Copy)]
pub struct SplitPolicy {
    /// Windows at or below this size go out as a single request.
    pub parallel_threshold: u64,
    pub max_part: u64,
    pub parallelism: usize,
}

/// One logical bulk fetch, possibly spread over several requests.
#[derive(Debug, Clone)]
pub struct FetchWindow {
    pub blocs: Range<usize>,
    parts: Vec<WindowPart>,
}

impl FetchWindow {
    /// Plan the fetch of `blocs` (non-empty, contiguous).
    pub fn plan(index: &SequenceIndex, blocs: Range<usize>, policy: SplitPolicy) -> Self {
        let start = index.bloc_bounds(blocs.start).0;
        let end = index.bloc_bounds(blocs.end - 1).1;
        let total = end - start;

        let part_target = if total > policy.parallel_threshold {
            policy.max_part.min(total.div_ceil(policy.parallelism.max(1) as u64)).max(1)
        } else {
            total
        };

        let mut parts = Vec::new();
        let mut first = blocs.start;
        let mut part_start = start;
        for b in blocs.clone() {
            let bloc_end = index.bloc_bounds(b).1;
            if bloc_end - part_start >= part_target || b + 1 == blocs.end {
                parts.push(WindowPart {
                    range: ByteRange::new(part_start, bloc_end),
                    blocs: first..b + 1,
                    id: None,
                    state: PartState::Pending,
                });
                first = b + 1;
                part_start = bloc_end;
            }
        }

        Self { blocs, parts }
    }

    pub fn parts(&self) -> &[WindowPart] {
        &self.parts
    }

    /// Whole byte span of the window.
    pub fn range(&self) -> ByteRange {
        match (self.parts.first(), self.parts.last()) {
            (Some(a), Some(b)) => ByteRange::new(a.range.start, b.range.end),
            _ => ByteRange::new(0, 0),
        }
    }

    pub fn assign(&mut self, part: usize, id: RequestId) {
        self.parts[part].id = Some(id);
    }

    /// Request id of the part holding bloc `b`.
    pub fn id_for_bloc(&self, b: usize) -> Option<RequestId> {
        self.parts.iter().find(|p| p.blocs.contains(&b)).and_then(|p| p.id)
    }

    pub fn owns(&self, id: RequestId) -> bool {
        self.parts.iter().any(|p| p.id == Some(id))
    }

    /// Store a received part. Returns false if `id` is not part of this window.
    pub fn accept(&mut self, id: RequestId, data: Bytes) -> bool {
        self.set(id, PartState::Received(data))
    }

    pub fn fail(&mut self, id: RequestId) -> bool {
        self.set(id, PartState::Failed)
    }

    fn set(&mut self, id: RequestId, state: PartState) -> bool {
        match self.parts.iter_mut().find(|p| p.id == Some(id)) {
            Some(p) if p.state == PartState::Pending => {
                p.state = state;
                true
            }
            _ => false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.parts.iter().all(|p| p.state != PartState::Pending)
    }

    pub fn failed_blocs(&self) -> impl Iterator<Item = usize> + '_ {
        self.parts
            .iter()
            .filter(|p| p.state == PartState::Failed)
            .flat_map(|p| p.blocs.clone())
    }

    /// Received bytes as contiguous `(absolute_start, bytes)` runs, in offset order.
    ///
    /// Adjacent parts are concatenated. A failed part, or a short body, ends a run.
    pub fn segments(&self) -> Vec<(u64, Bytes)> {
        let mut out = Vec::new();
        let mut run: Option<(u64, Vec<Bytes>)> = None;

        for part in &self.parts {
            let data = match &part.state {
                PartState::Received(d) => d,
                _ => {
                    if let Some(r) = run.take() {
                        out.push(join(r));
                    }
                    continue;
                }
            };
            let run_ref = run.get_or_insert_with(|| (part.range.start, Vec::new()));
            run_ref.1.push(data.clone());
            if data.len() as u64 != part.range.len() {
                if let Some(r) = run.take() {
                    out.push(join(r));
                }
            }
        }
        if let Some(r) = run.take() {
            out.push(join(r));
        }
        out
    }
}

fn join((start, pieces): (u64, Vec<Bytes>)) -> (u64, Bytes) {
    if pieces.len() == 1 {
        return (start, pieces[0].clone());
    }
    let mut buf = BytesMut::with_capacity(pieces.iter().map(Bytes::len).sum());
    for p in &pieces {
        buf.extend_from_slice(p);
    }
    (start, buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::writer::synthesize;

    fn index(frames: u32, bloc: usize, tex: usize) -> (SequenceIndex, Bytes) {
        let c = synthesize(frames, 30.0, bloc, tex).unwrap();
        (SequenceIndex::new(c.header, c.info, c.blocs).unwrap(), c.bytes)
    }

    fn policy(threshold: u64, max_part: u64, n: usize) -> SplitPolicy {
        SplitPolicy {
            parallel_threshold: threshold,
            max_part,
            parallelism: n,
        }
    }

    #[test]
    fn test_small_window_single_part() {
        let (idx, _) = index(40, 10, 0);
        let w = FetchWindow::plan(&idx, 0..4, policy(1 << 20, 1 << 20, 3));
        assert_eq!(w.parts().len(), 1);
        assert_eq!(w.range().start, idx.bloc_bounds(0).0);
        assert_eq!(w.range().end, idx.header.bloc_index_pos);
    }

    #[test]
    fn test_split_on_bloc_boundaries() {
        let (idx, _) = index(60, 5, 256);
        let w = FetchWindow::plan(&idx, 2..12, policy(1, 1 << 20, 4));
        assert!(w.parts().len() > 1);

        let mut expect_start = idx.bloc_bounds(2).0;
        let mut expect_bloc = 2;
        for p in w.parts() {
            assert_eq!(p.range.start, expect_start);
            assert_eq!(p.blocs.start, expect_bloc);
            assert_eq!(p.range.end, idx.bloc_bounds(p.blocs.end - 1).1);
            expect_start = p.range.end;
            expect_bloc = p.blocs.end;
        }
        assert_eq!(expect_bloc, 12);
    }

    #[test]
    fn test_reassembly_any_order() {
        let (idx, bytes) = index(60, 5, 256);
        let mut w = FetchWindow::plan(&idx, 0..12, policy(1, 1 << 20, 4));
        let n = w.parts().len();
        for i in 0..n {
            w.assign(i, 100 + i as u64);
        }

        // Resolve in reverse completion order
        for i in (0..n).rev() {
            assert!(!w.is_complete());
            let r = w.parts()[i].range;
            assert!(w.accept(100 + i as u64, bytes.slice(r.start as usize..r.end as usize)));
        }
        assert!(w.is_complete());

        let segs = w.segments();
        assert_eq!(segs.len(), 1);
        let r = w.range();
        assert_eq!(segs[0].0, r.start);
        assert_eq!(segs[0].1, bytes.slice(r.start as usize..r.end as usize));
    }

    #[test]
    fn test_failed_part_splits_segments() {
        let (idx, bytes) = index(60, 5, 256);
        let mut w = FetchWindow::plan(&idx, 0..12, policy(1, 1 << 20, 4));
        let n = w.parts().len();
        assert!(n >= 3);
        for i in 0..n {
            w.assign(i, i as u64);
        }
        for i in 0..n {
            if i == 1 {
                assert!(w.fail(1));
            } else {
                let r = w.parts()[i].range;
                w.accept(i as u64, bytes.slice(r.start as usize..r.end as usize));
            }
        }
        let segs = w.segments();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].0, w.parts()[0].range.start);
        assert_eq!(segs[1].0, w.parts()[2].range.start);
        assert_eq!(w.failed_blocs().collect::<Vec<_>>(), w.parts()[1].blocs.clone().collect::<Vec<_>>());
        // Duplicate resolutions are ignored
        assert!(!w.accept(1, Bytes::new()));
    }
}
