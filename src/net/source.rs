//! Byte-range sources.
//!
//! A [`RangeSource`] answers "give me bytes `[start, end)` of the container".
//! Three implementations:
//! - [`HttpSource`]: HTTP `Range` requests via blocking `reqwest`
//! - [`FileSource`]: local file, seek + read
//! - [`MemorySource`]: an in-memory buffer (tests, `synth | play`)
//!
//! A range that runs past the end of the source is clamped; the caller sees a
//! short body. A range that starts past the end is an error.

use bytes::Bytes;
use log::{debug, trace};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::TransportError;

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "inverted range {start}..{end}");
        Self { start, end }
    }

    pub fn with_len(start: u64, len: u64) -> Self {
        Self::new(start, start + len)
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end
    }

    /// HTTP `Range` header value. HTTP ranges are inclusive.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }

    /// Clamp to a source of `len` bytes.
    fn clamp_to(&self, len: u64) -> Result<Self, TransportError> {
        if self.start >= len && !self.is_empty() {
            return Err(TransportError::OutOfBounds {
                start: self.start,
                end: self.end,
                len,
            });
        }
        Ok(Self::new(self.start.min(len), self.end.min(len)))
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Something that serves byte ranges of one container.
pub trait RangeSource: Send + Sync {
    fn fetch(&self, range: ByteRange, timeout: Duration) -> Result<Bytes, TransportError>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Range requests over HTTP(S).
pub struct HttpSource {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpSource {
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("fourds/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl RangeSource for HttpSource {
    fn fetch(&self, range: ByteRange, timeout: Duration) -> Result<Bytes, TransportError> {
        trace!("GET {} Range: {}", self.url, range.header_value());
        let resp = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, range.header_value())
            .timeout(timeout)
            .send()?;

        match resp.status().as_u16() {
            206 => Ok(resp.bytes()?),
            200 => {
                // Server ignored Range and sent the whole body
                debug!("{}: range ignored by server, slicing full body", self.url);
                let body = resp.bytes()?;
                let r = range.clamp_to(body.len() as u64)?;
                Ok(body.slice(r.start as usize..r.end as usize))
            }
            416 => Err(TransportError::OutOfBounds {
                start: range.start,
                end: range.end,
                len: 0,
            }),
            code => Err(TransportError::Status(code)),
        }
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Ranges read from a local file.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref().to_path_buf();
        // Fail early on a missing file rather than on the first fetch
        std::fs::metadata(&path)?;
        Ok(Self { path })
    }
}

impl RangeSource for FileSource {
    fn fetch(&self, range: ByteRange, _timeout: Duration) -> Result<Bytes, TransportError> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        let r = range.clamp_to(len)?;
        file.seek(SeekFrom::Start(r.start))?;
        let mut buf = Vec::with_capacity(r.len() as usize);
        file.take(r.len()).read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Ranges sliced from an in-memory buffer. Zero-copy.
#[derive(Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl RangeSource for MemorySource {
    fn fetch(&self, range: ByteRange, _timeout: Duration) -> Result<Bytes, TransportError> {
        let r = range.clamp_to(self.len())?;
        Ok(self.data.slice(r.start as usize..r.end as usize))
    }

    fn describe(&self) -> String {
        format!("memory ({} bytes)", self.data.len())
    }
}

/// Pick a source for `uri`: `http(s)://` goes over the network, anything else
/// (optionally `file://`-prefixed) is a local path.
pub fn open_source(uri: &str) -> Result<Arc<dyn RangeSource>, TransportError> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        Ok(Arc::new(HttpSource::new(uri)?))
    } else {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        Ok(Arc::new(FileSource::new(path)?))
    }
}
