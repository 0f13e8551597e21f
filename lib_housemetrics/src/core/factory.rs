//! Wiring of scheduled tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::looper::{ScheduledTask, SourceSchedule, DEFAULT_COOLDOWN};
use super::Poller;
use crate::retrieve::HttpClient;
use crate::store::MetricSink;

/// What a poller constructor gets handed.
#[derive(Debug, Clone)]
pub struct PollerContext {
    /// Source name, as used in the `looper` span.
    pub name: String,
    /// The shared request helper.
    pub client: HttpClient,
}

/// Builds one [`ScheduledTask`] per source around the shared client and sink.
#[derive(Clone)]
pub struct TaskFactory {
    client: HttpClient,
    sink: Arc<dyn MetricSink>,
    cooldown: Duration,
}

impl TaskFactory {
    /// A factory using [`DEFAULT_COOLDOWN`].
    pub fn new(client: HttpClient, sink: Arc<dyn MetricSink>) -> Self {
        Self {
            client,
            sink,
            cooldown: DEFAULT_COOLDOWN,
        }
    }

    /// Overrides the rejection cooldown of every task built afterwards.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// The shared sink, for webhook handlers and for [`spawn_all`].
    pub fn sink(&self) -> Arc<dyn MetricSink> {
        Arc::clone(&self.sink)
    }

    /// The shared request helper.
    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Builds the poller with `constructor` and binds it to `schedule`.
    pub fn make_looper<P, F>(&self, name: &str, schedule: SourceSchedule, constructor: F) -> ScheduledTask
    where
        P: Poller + 'static,
        F: FnOnce(PollerContext) -> P,
    {
        let poller = constructor(PollerContext {
            name: name.to_string(),
            client: self.client.clone(),
        });
        debug!(looper = name, enabled = schedule.enabled, freq = ?schedule.freq, "looper built");
        ScheduledTask::new(name, schedule, Box::new(poller)).with_cooldown(self.cooldown)
    }
}

/// Spawns every task on its own tokio task. The caller joins the returned
/// set after cancelling `token`.
pub fn spawn_all(
    tasks: Vec<ScheduledTask>,
    token: &CancellationToken,
    sink: &Arc<dyn MetricSink>,
) -> JoinSet<()> {
    let mut set = JoinSet::new();
    for task in tasks {
        set.spawn(task.run(token.clone(), Arc::clone(sink)));
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PollError;
    use crate::store::{MemoryStore, MetricValue, Tags};
    use async_trait::async_trait;
    use chrono::Utc;

    struct Counter {
        name: String,
    }

    #[async_trait]
    impl Poller for Counter {
        fn init(&mut self) {}

        async fn poll(
            &mut self,
            token: &CancellationToken,
            sink: &dyn MetricSink,
        ) -> Result<(), PollError> {
            sink.write(token, Utc::now(), &self.name, MetricValue::Int(1), &Tags::new())
                .await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_tasks_share_the_sink_and_stop_together() {
        let store = Arc::new(MemoryStore::new());
        let sink: Arc<dyn MetricSink> = store.clone();
        let factory = TaskFactory::new(HttpClient::new().unwrap(), Arc::clone(&sink));

        let every = SourceSchedule::every(Duration::from_secs(10));
        let tasks = vec![
            factory.make_looper("a", every, |ctx| Counter { name: ctx.name }),
            factory.make_looper("b", every, |ctx| Counter { name: ctx.name }),
            factory.make_looper("off", SourceSchedule::disabled(every.freq), |ctx| Counter {
                name: ctx.name,
            }),
        ];
        assert_eq!(tasks[2].name(), "off");

        let token = CancellationToken::new();
        let mut set = spawn_all(tasks, &token, &factory.sink());

        tokio::time::sleep(Duration::from_secs(15)).await;
        token.cancel();
        while let Some(res) = set.join_next().await {
            res.unwrap();
        }

        assert_eq!(store.named("a").len(), 2);
        assert_eq!(store.named("b").len(), 2);
        assert!(store.named("off").is_empty());
    }
}
