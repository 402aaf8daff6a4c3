//! HTTP byte-range file server.
//!
//! Serves one local container file the way a CDN would, so the streaming
//! pipeline can be exercised over real HTTP.
//!
//! # Endpoints
//!
//! | Method | Path      | Description                                   |
//! |--------|-----------|-----------------------------------------------|
//! | GET    | `/health` | Served file and its size (JSON)               |
//! | GET    | any other | File body; honors `Range: bytes=...`          |
//!
//! Responses: `206` with `Content-Range` for a satisfiable range, `200` with
//! the whole file when no (or an unparseable) range is sent, `416` with
//! `Content-Range: bytes */len` when the range starts past the end.

mod range;

pub use range::{RangeRequest, RangeServer, RunningServer, parse_range};
