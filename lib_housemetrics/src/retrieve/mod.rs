//! # Data Retrieval Module
//!
//! Generic clients for talking to upstream devices and services. Pollers never
//! touch `reqwest` directly; they go through the primitives here so that status
//! classification, body logging and cancellation behave the same everywhere.
//!
//! ## Contained Modules:
//!
//! - **`http_client`**: `HttpClient`, the request helper. Unary JSON exchanges
//!   and a long-lived streaming GET, both shaped by a caller-supplied request
//!   mutator. Any non-2xx status becomes `RequestError::Rejected`.
//! - **`event_stream`**: turns a line-oriented `event:`/`data:` push feed into
//!   a channel of `StreamEvent`s with drop-on-full delivery and exactly-once
//!   teardown.

/// Request helper built on `reqwest`.
pub mod http_client;
/// Server-push line protocol client.
pub mod event_stream;

pub use event_stream::{EventStream, LineParser, StreamEvent, StreamStats};
pub use http_client::{bearer_opt, url_opt, HttpClient, HttpClientBuilder, RequestError};
