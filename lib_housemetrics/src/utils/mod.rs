//! # Utilities Module
//!
//! Small, dependency-free helpers shared by the ingestors, the endpoints and
//! the configuration layer.
//!
//! ## Contained Modules:
//!
//! - **`aqi`**: converts a PM2.5 concentration into a US EPA Air Quality Index.
//! - **`duration`**: parses `10s` / `5m` / `1h30m` style durations for flags
//!   and environment variables.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// PM2.5 to AQI conversion.
pub mod aqi;
/// Human-readable duration parsing.
pub mod duration;

pub use aqi::pm25_to_aqi;
pub use duration::parse_duration;
