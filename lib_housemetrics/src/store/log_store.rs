use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Span};

use super::{MetricSink, MetricValue, StoreError, Tags};

/// Writes every point to the log at `info`. Useful when no database is
/// around, or to see what the pollers would send.
#[derive(Debug)]
pub struct LogStore {
    span: Span,
}

impl LogStore {
    pub fn new() -> Self {
        Self {
            span: info_span!("store", store = "log"),
        }
    }
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSink for LogStore {
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
        self.span.in_scope(|| {
            info!(%ts, metric = name, val = %value, ?tags, "store");
        });
    }
}
