//! Structural open: header, sequence info, bloc index, then tracks.
//!
//! Every structural record is read the same way: one request for its 9-byte
//! sub-header, then one for exactly `size` payload bytes. The loader is a
//! state machine driven by scheduler events, so opening never blocks the
//! control thread.
//!
//! The sequence is usable once the bloc index is parsed. The track index and
//! additional tracks (audio) keep loading in the background.

use bytes::Bytes;
use log::{debug, info, warn};

use crate::error::{FormatError, StreamError, TransportError};
use crate::format::header::{FileHeader, HEADER_READ_LEN};
use crate::format::record::{RECORD_HEADER_LEN, RecordHeader, RecordKind};
use crate::format::sequence::{SequenceIndex, SequenceInfo, parse_bloc_index, parse_track_index};
use crate::net::scheduler::{PRIORITY_NORMAL, PRIORITY_URGENT, RangeScheduler, RequestId};
use crate::net::source::ByteRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    SequenceInfo,
    BlocIndex,
    TrackIndex,
    Track(usize),
}

impl Target {
    fn expected(&self) -> Option<RecordKind> {
        match self {
            Target::SequenceInfo => Some(RecordKind::SequenceInfo),
            Target::BlocIndex => Some(RecordKind::BlocIndex),
            Target::TrackIndex => Some(RecordKind::TrackIndex),
            // Any type is accepted; unknown ones are skipped
            Target::Track(_) => None,
        }
    }

    fn expected_type(&self) -> u8 {
        use crate::format::record::kind;
        match self {
            Target::SequenceInfo => kind::SEQUENCE_INFO,
            Target::BlocIndex => kind::BLOC_INDEX,
            Target::TrackIndex => kind::TRACK_INDEX,
            Target::Track(_) => kind::AUDIO_TRACK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Idle,
    Header,
    SubHeader(Target, u64),
    Payload(Target, RecordHeader, u64),
    Done,
}

/// What the loader learned from one event.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadProgress {
    /// Sequence info and bloc index are known; streaming can start.
    Opened(SequenceIndex),
    /// An audio track record arrived.
    Audio { codec: u16, data: Bytes },
    /// All structural reads are finished.
    Finished,
}

#[derive(Debug)]
pub struct Loader {
    step: Step,
    pending: Option<RequestId>,
    header: Option<FileHeader>,
    info: Option<SequenceInfo>,
    tracks: Vec<u64>,
    opened: bool,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader {
    pub fn new() -> Self {
        Self {
            step: Step::Idle,
            pending: None,
            header: None,
            info: None,
            tracks: Vec::new(),
            opened: false,
        }
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    pub fn is_done(&self) -> bool {
        self.step == Step::Done
    }

    pub fn owns(&self, id: RequestId) -> bool {
        self.pending == Some(id)
    }

    /// Issue the first request.
    pub fn start(&mut self, sched: &mut RangeScheduler) {
        *self = Self::new();
        self.step = Step::Header;
        self.request(sched, ByteRange::new(0, HEADER_READ_LEN as u64));
    }

    /// Feed the bytes answering the loader's pending request.
    pub fn on_received(
        &mut self,
        id: RequestId,
        data: Bytes,
        sched: &mut RangeScheduler,
    ) -> Result<Vec<LoadProgress>, StreamError> {
        if !self.owns(id) {
            return Ok(Vec::new());
        }
        self.pending = None;

        match self.step {
            Step::Header => {
                let header = FileHeader::parse(&data)?;
                debug!(
                    "header: version {}, seq info @{}, bloc index @{}, tracks @{}",
                    header.version, header.sequence_info_pos, header.bloc_index_pos, header.track_index_pos
                );
                self.header = Some(header);
                self.read_record(sched, Target::SequenceInfo, header.sequence_info_pos);
                Ok(Vec::new())
            }
            Step::SubHeader(target, pos) => {
                let rh = RecordHeader::parse(&data, pos)?;
                if let Some(expected) = target.expected() {
                    if rh.kind() != expected {
                        return Err(FormatError::UnexpectedRecord {
                            offset: pos,
                            expected: target.expected_type(),
                            found: rh.record_type,
                        }
                        .into());
                    }
                }
                self.step = Step::Payload(target, rh, pos);
                let body = pos + RECORD_HEADER_LEN as u64;
                self.request(sched, ByteRange::with_len(body, rh.size as u64));
                Ok(Vec::new())
            }
            Step::Payload(target, rh, pos) => {
                if data.len() < rh.size as usize {
                    return Err(FormatError::TruncatedRecord {
                        offset: pos,
                        available: data.len(),
                        needed: rh.size as usize,
                    }
                    .into());
                }
                self.on_payload(target, rh, pos, data, sched)
            }
            Step::Idle | Step::Done => Ok(Vec::new()),
        }
    }

    /// A structural request failed permanently. Fatal until the sequence is
    /// open; afterwards only the remaining tracks are given up.
    pub fn on_failed(&mut self, id: RequestId, error: TransportError) -> Result<Vec<LoadProgress>, StreamError> {
        if !self.owns(id) {
            return Ok(Vec::new());
        }
        self.pending = None;
        if !self.opened {
            self.step = Step::Done;
            return Err(StreamError::Transport(error));
        }
        warn!("additional tracks unavailable: {}", error);
        self.step = Step::Done;
        Ok(vec![LoadProgress::Finished])
    }

    fn on_payload(
        &mut self,
        target: Target,
        rh: RecordHeader,
        pos: u64,
        data: Bytes,
        sched: &mut RangeScheduler,
    ) -> Result<Vec<LoadProgress>, StreamError> {
        let body = pos + RECORD_HEADER_LEN as u64;
        let header = self.header.ok_or(StreamError::NotOpen)?;

        match target {
            Target::SequenceInfo => {
                let info = SequenceInfo::parse(&data, body)?;
                info!(
                    "sequence: {} frames, {} blocs @ {} fps, {} tracks",
                    info.frame_count, info.bloc_count, info.frame_rate, info.additional_tracks
                );
                self.info = Some(info);
                self.read_record(sched, Target::BlocIndex, header.bloc_index_pos);
                Ok(Vec::new())
            }
            Target::BlocIndex => {
                let info = self.info.ok_or(StreamError::NotOpen)?;
                let blocs = parse_bloc_index(&data, info.bloc_count, body)?;
                let index = SequenceIndex::new(header, info, blocs)?;
                self.opened = true;

                let mut progress = vec![LoadProgress::Opened(index)];
                if info.additional_tracks > 0 {
                    self.read_record(sched, Target::TrackIndex, header.track_index_pos);
                } else {
                    self.step = Step::Done;
                    progress.push(LoadProgress::Finished);
                }
                Ok(progress)
            }
            Target::TrackIndex => {
                let count = self.info.map(|i| i.additional_tracks).unwrap_or(0);
                self.tracks = parse_track_index(&data, count, body)?;
                Ok(self.next_track(sched, 0).into_iter().collect())
            }
            Target::Track(i) => {
                let mut progress = Vec::new();
                if rh.kind() == RecordKind::AudioTrack {
                    info!("audio track: {} bytes (codec {})", data.len(), rh.codec);
                    progress.push(LoadProgress::Audio {
                        codec: rh.codec,
                        data,
                    });
                } else {
                    debug!("skipping additional track {} of type {}", i, rh.record_type);
                }
                progress.extend(self.next_track(sched, i + 1));
                Ok(progress)
            }
        }
    }

    fn next_track(&mut self, sched: &mut RangeScheduler, i: usize) -> Option<LoadProgress> {
        match self.tracks.get(i) {
            Some(&pos) => {
                self.read_record(sched, Target::Track(i), pos);
                None
            }
            None => {
                self.step = Step::Done;
                Some(LoadProgress::Finished)
            }
        }
    }

    fn read_record(&mut self, sched: &mut RangeScheduler, target: Target, pos: u64) {
        self.step = Step::SubHeader(target, pos);
        self.request(sched, ByteRange::with_len(pos, RECORD_HEADER_LEN as u64));
    }

    fn request(&mut self, sched: &mut RangeScheduler, range: ByteRange) {
        let priority = if self.opened { PRIORITY_NORMAL } else { PRIORITY_URGENT };
        let id = sched.allocate_id();
        sched.enqueue(range, id, priority);
        self.pending = Some(id);
    }
}
