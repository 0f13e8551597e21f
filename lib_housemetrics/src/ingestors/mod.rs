//! # Data Ingestors Module
//!
//! One [`Poller`](crate::core::Poller) per upstream device or service. Each
//! poller is handed a `PollerContext` by the task factory and its own
//! settings struct by the binary; base URLs are part of the settings so the
//! pollers can be pointed at a local stand-in.
//!
//! ## Contained Modules:
//! - **`awair`**: indoor air quality, per device, with a derived PM2.5 AQI.
//! - **`ambient_weather`**: weather station readings.
//! - **`flume`**: per-minute water usage since the previous successful poll.
//! - **`purpleair`**: particulate readings from a sensor on the local network.
//! - **`particle`**: a push source consuming the Particle event feed through
//!   the event stream client.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// AmbientWeather station poller.
pub mod ambient_weather;
/// Awair air quality poller.
pub mod awair;
/// Flume water meter poller.
pub mod flume;
/// Particle event feed consumer.
pub mod particle;
/// PurpleAir local sensor poller.
pub mod purpleair;

// --- Public API Re-exports ---
pub use ambient_weather::{AmbientWeather, AmbientWeatherSettings, AMBIENT_WEATHER_API};
pub use awair::{Awair, AwairSettings, AWAIR_API};
pub use flume::{Flume, FlumeSettings, FLUME_API};
pub use particle::{Particle, ParticleSettings, DEFAULT_EVENT_TYPE, PARTICLE_STREAM};
pub use purpleair::{PurpleAir, PurpleAirSettings};
