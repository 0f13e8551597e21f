//! # Core Scheduling Module
//!
//! The concurrency substrate every data source runs on.
//!
//! ## Core Components:
//!
//! - **`looper`**: `ScheduledTask`, which drives one [`Poller`] through its
//!   `init`/`poll` lifecycle on a fixed cadence and cools down for a fixed
//!   interval whenever the upstream rejects a request.
//!
//! - **`factory`**: `TaskFactory`, which builds one scheduled task per
//!   configured source (span, shared `HttpClient`, shared sink) and
//!   `spawn_all`, which runs them on the tokio runtime.
//!
//! The rule that ties them together: no poll error is ever fatal to a task.
//! Only the shared cancellation token stops one.

#![warn(missing_docs)]

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::retrieve::RequestError;
use crate::store::MetricSink;

/// Builds scheduled tasks and runs them.
pub mod factory;
/// The per-source scheduler.
pub mod looper;

// --- Public API Re-exports ---
pub use factory::{spawn_all, PollerContext, TaskFactory};
pub use looper::{PollStats, ScheduledTask, SourceSchedule, DEFAULT_COOLDOWN};

/// Why a single `poll` call failed.
#[derive(Debug, Error)]
pub enum PollError {
    /// A unary exchange with the upstream failed.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The event stream could not be opened.
    #[error("event stream: {0}")]
    Stream(#[source] RequestError),

    /// The upstream answered, but with data that makes no sense.
    #[error("invalid upstream data: {0}")]
    Invalid(String),

    /// `init` left the poller without what it needs to poll.
    #[error("poller not ready: {0}")]
    NotReady(&'static str),

    /// Anything else.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PollError {
    /// `true` only when the upstream rejected a request with a non-2xx
    /// status. The scheduler cools down on exactly this case.
    pub fn is_rejected(&self) -> bool {
        match self {
            Self::Request(e) | Self::Stream(e) => e.is_rejected(),
            _ => false,
        }
    }
}

/// # Poller
///
/// One data source. `init` runs once before the first poll and has no error
/// channel: a poller that cannot initialize logs why and stays degraded
/// (its polls then return [`PollError::NotReady`]).
#[async_trait]
pub trait Poller: Send {
    /// One-time setup before the first poll.
    fn init(&mut self);

    /// Fetches the current readings and writes them to `sink`. Outbound
    /// requests must honor `token`.
    async fn poll(
        &mut self,
        token: &CancellationToken,
        sink: &dyn MetricSink,
    ) -> Result<(), PollError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn only_wrapped_rejections_trigger_cooldown() {
        let rejected = || RequestError::Rejected {
            status: StatusCode::TOO_MANY_REQUESTS,
        };
        assert!(PollError::Request(rejected()).is_rejected());
        assert!(PollError::Stream(rejected()).is_rejected());

        assert!(!PollError::Request(RequestError::Cancelled).is_rejected());
        assert!(!PollError::Invalid("missing DateTime".into()).is_rejected());
        assert!(!PollError::NotReady("no url").is_rejected());
        assert!(!PollError::Other(anyhow::anyhow!("boom")).is_rejected());
    }
}
