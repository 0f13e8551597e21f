//! # Metric Sinks
//!
//! Pollers and webhook handlers never know where their data ends up. They
//! write individual points `(timestamp, name, value, tags)` into a
//! [`MetricSink`], and the binary decides at startup which one that is.
//!
//! ## Contained Modules:
//!
//! - **`log_store`**: `LogStore`, which writes every point to the log.
//! - **`influx_store`**: `InfluxStore`, which writes through the InfluxDB v2
//!   HTTP API in line protocol.
//! - **`memory_store`**: `MemoryStore`, which keeps points in memory for
//!   assertions.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Sink that writes points to the log.
pub mod log_store;
/// InfluxDB v2 sink.
pub mod influx_store;
/// In-memory sink.
pub mod memory_store;

pub use influx_store::{InfluxSettings, InfluxStore};
pub use log_store::LogStore;
pub use memory_store::MemoryStore;

/// Point tags. Keys are unique and iterate in a stable order.
pub type Tags = BTreeMap<String, String>;

/// Builds a [`Tags`] map from `(key, value)` pairs.
pub fn tags<I, K, V>(pairs: I) -> Tags
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// The value of one point.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl MetricValue {
    /// Converts a scalar JSON value. Arrays, objects and `null` have no
    /// metric representation and yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// A fully described point, as recorded by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub ts: DateTime<Utc>,
    pub name: String,
    pub value: MetricValue,
    pub tags: Tags,
}

/// Sink configuration problems detected by [`MetricSink::init`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store setting `{0}` is required")]
    MissingSetting(&'static str),

    #[error("invalid store url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// # Metric Sink
///
/// Shared by every running task at once, hence `Send + Sync` and `&self`.
/// `write` is fire-and-forget: sinks log their own failures and never
/// hand them back to the poller.
#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Validates configuration before any task starts.
    fn init(&self) -> Result<(), StoreError>;

    /// Records one point.
    async fn write(
        &self,
        token: &CancellationToken,
        ts: DateTime<Utc>,
        name: &str,
        value: MetricValue,
        tags: &Tags,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_scalars_convert() {
        assert_eq!(MetricValue::from_json(&json!(7)), Some(MetricValue::Int(7)));
        assert_eq!(
            MetricValue::from_json(&json!(21.5)),
            Some(MetricValue::Float(21.5))
        );
        assert_eq!(
            MetricValue::from_json(&json!(true)),
            Some(MetricValue::Bool(true))
        );
        assert_eq!(
            MetricValue::from_json(&json!("on")),
            Some(MetricValue::Text("on".into()))
        );
        assert_eq!(MetricValue::from_json(&json!(null)), None);
        assert_eq!(MetricValue::from_json(&json!([1, 2])), None);
    }

    #[test]
    fn tags_are_ordered_by_key() {
        let t = tags([("zone", "front"), ("device", "office")]);
        let keys: Vec<_> = t.keys().cloned().collect();
        assert_eq!(keys, ["device", "zone"]);
    }
}
