//! # housemetrics shared library
//!
//! Everything the `housemetrics` server is made of lives here, gated by
//! folder-level features the same way the modules are laid out on disk:
//!
//! - **`retrieve`**: the request helper (`HttpClient`) and the server-push
//!   event stream client (`EventStream`).
//! - **`store`**: the metric sink capability and its implementations.
//! - **`core`**: the poller capability, the scheduled task that drives it,
//!   and the factory that wires tasks together.
//! - **`ingestors`**: pollers for the individual upstream devices/services.
//! - **`endpoints`**: webhook handlers for pushed events.
//! - **`loggers`**, **`configs`**, **`utils`**: the ambient plumbing.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "core")]
pub mod core;
#[cfg(feature = "endpoints")]
pub mod endpoints;
#[cfg(feature = "ingestors")]
pub mod ingestors;
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "retrieve")]
pub mod retrieve;
#[cfg(feature = "store")]
pub mod store;
#[cfg(feature = "utils")]
pub mod utils;
