use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};
use rouille::{Request, Response};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::net::source::{ByteRange, FileSource, RangeSource};

/// What a `Range` header asks for, resolved against the file length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable range: send the whole file.
    Full,
    Partial(ByteRange),
    Unsatisfiable,
}

/// Resolve a `Range` header value against a body of `len` bytes.
///
/// Supports `bytes=a-b`, `bytes=a-` and `bytes=-n`. Multi-range and malformed
/// headers fall back to [`RangeRequest::Full`].
pub fn parse_range(header: Option<&str>, len: u64) -> RangeRequest {
    let Some(ranges) = header.and_then(|h| h.trim().strip_prefix("bytes=")) else {
        return RangeRequest::Full;
    };
    if ranges.contains(',') {
        return RangeRequest::Full;
    }
    let Some((first, last)) = ranges.split_once('-') else {
        return RangeRequest::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // Suffix: last n bytes
        return match last.parse::<u64>() {
            Ok(0) => RangeRequest::Unsatisfiable,
            Ok(n) if len > 0 => RangeRequest::Partial(ByteRange::new(len.saturating_sub(n), len)),
            Ok(_) => RangeRequest::Unsatisfiable,
            Err(_) => RangeRequest::Full,
        };
    }

    let Ok(start) = first.parse::<u64>() else {
        return RangeRequest::Full;
    };
    let end = if last.is_empty() {
        len
    } else {
        match last.parse::<u64>() {
            Ok(e) if e >= start => (e + 1).min(len),
            _ => return RangeRequest::Full,
        }
    };
    if start >= len {
        return RangeRequest::Unsatisfiable;
    }
    RangeRequest::Partial(ByteRange::new(start, end))
}

#[derive(Serialize)]
struct Health {
    file: String,
    size: u64,
}

/// Serves one file with byte-range support.
pub struct RangeServer {
    path: PathBuf,
    len: u64,
    source: FileSource,
}

/// Handle to a server running on a background thread.
pub struct RunningServer {
    addr: SocketAddr,
    handle: Option<JoinHandle<()>>,
    stop_tx: Option<mpsc::Sender<()>>,
}

impl RunningServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL of the served file.
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl RangeServer {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = std::fs::metadata(&path)
            .with_context(|| format!("Cannot serve {}", path.display()))?
            .len();
        let source = FileSource::new(&path).with_context(|| format!("Cannot open {}", path.display()))?;
        Ok(Self { path, len, source })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Serve on `addr` until the process exits.
    pub fn run(self, addr: &str) -> Result<()> {
        info!("Serving {} ({} bytes) on http://{}", self.path.display(), self.len, addr);
        let server = Arc::new(self);
        rouille::start_server(addr, move |request| server.handle(request))
    }

    /// Serve on `addr` from a background thread. Port 0 picks a free port.
    pub fn spawn(self, addr: &str) -> Result<RunningServer> {
        let server = Arc::new(self);
        let handler = Arc::clone(&server);
        let http = rouille::Server::new(addr, move |request| handler.handle(request))
            .map_err(|e| anyhow!("Failed to bind {}: {}", addr, e))?;
        let bound = http.server_addr();
        info!("Serving {} on http://{}", server.path.display(), bound);
        let (handle, stop_tx) = http.stoppable();
        Ok(RunningServer {
            addr: bound,
            handle: Some(handle),
            stop_tx: Some(stop_tx),
        })
    }

    fn handle(&self, request: &Request) -> Response {
        let response = match (request.method(), request.url().as_str()) {
            ("GET", "/health") => Response::json(&Health {
                file: self.path.display().to_string(),
                size: self.len,
            }),
            ("GET", _) => self.serve(request),
            _ => Response::text("Method not allowed").with_status_code(405),
        };
        response.with_additional_header("Access-Control-Allow-Origin", "*")
    }

    fn serve(&self, request: &Request) -> Response {
        let header = request.header("Range");
        let (status, range) = match parse_range(header, self.len) {
            RangeRequest::Full => (200, ByteRange::new(0, self.len)),
            RangeRequest::Partial(r) => (206, r),
            RangeRequest::Unsatisfiable => {
                debug!("416 for {:?} (len {})", header, self.len);
                return Response::empty_204()
                    .with_status_code(416)
                    .with_additional_header("Content-Range", format!("bytes */{}", self.len));
            }
        };

        let body = if !range.is_empty() {
            match self.source.fetch(range, Duration::from_secs(30)) {
                Ok(b) => b.to_vec(),
                Err(e) => {
                    warn!("read {} failed: {}", range, e);
                    return Response::text(e.to_string()).with_status_code(500);
                }
            }
        } else {
            Vec::new()
        };
        debug!("{} {} -> {} ({} bytes)", request.method(), range, status, range.len());

        let mut response = Response::from_data("application/octet-stream", body)
            .with_status_code(status)
            .with_additional_header("Accept-Ranges", "bytes");
        if status == 206 {
            response = response.with_additional_header(
                "Content-Range",
                format!("bytes {}-{}/{}", range.start, range.end - 1, self.len),
            );
        }
        response
    }
}
