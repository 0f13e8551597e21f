use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::{MetricSink, MetricValue, Point, StoreError, Tags};

/// Keeps every point in memory, in write order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    points: Mutex<Vec<Point>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all points written so far.
    pub fn points(&self) -> Vec<Point> {
        self.points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Points with the given metric name.
    pub fn named(&self, name: &str) -> Vec<Point> {
        self.points()
            .into_iter()
            .filter(|p| p.name == name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MetricSink for MemoryStore {
    fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn write(
        &self,
        _token: &CancellationToken,
        ts: DateTime<Utc>,
        name: &str,
        value: MetricValue,
        tags: &Tags,
    ) {
        self.points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Point {
                ts,
                name: name.to_string(),
                value,
                tags: tags.clone(),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tags;

    #[tokio::test]
    async fn records_points_in_order() {
        let store = MemoryStore::new();
        let token = CancellationToken::new();
        let ts = Utc::now();

        store
            .write(&token, ts, "a", MetricValue::Int(1), &Tags::new())
            .await;
        store
            .write(&token, ts, "b", MetricValue::Float(2.5), &tags([("k", "v")]))
            .await;

        let points = store.points();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].name, "a");
        assert_eq!(points[1].value, MetricValue::Float(2.5));
        assert_eq!(store.named("b")[0].tags["k"], "v");
    }
}
