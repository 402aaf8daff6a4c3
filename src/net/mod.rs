//! Byte-range transport: sources, the fetch scheduler and window reassembly.

pub mod assembler;
pub mod scheduler;
pub mod source;

pub use assembler::{FetchWindow, SplitPolicy};
pub use scheduler::{RangeEvent, RangeScheduler, RequestId, SchedulerConfig, SchedulerStatus};
pub use source::{ByteRange, FileSource, HttpSource, MemorySource, RangeSource, open_source};
