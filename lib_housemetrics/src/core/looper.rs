//! # Scheduled Task
//!
//! ```text
//! Created ──disabled──▶ Disabled
//!    │
//!    └──enabled──▶ Running ──token cancelled──▶ Stopped
//! ```
//!
//! A running task calls `init` once, polls immediately, then polls on every
//! tick of a fixed cadence until the shared token is cancelled. Ticks that
//! fall due while a poll is still running are not queued up; at most one
//! is pending when the poll returns.
//!
//! ## Failure policy
//! - upstream rejected (non-2xx): log at `info`, sleep the cooldown, carry on.
//!   The sleep does not watch the token, so shutdown can lag by up to one
//!   cooldown.
//! - any other error: log at `error`, carry on at the normal cadence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument, Span};

use super::Poller;
use crate::store::MetricSink;

/// Pause after the upstream rejects a request.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// When and whether a source runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSchedule {
    /// Disabled sources never poll.
    pub enabled: bool,
    /// Cadence between polls. Must be non-zero.
    pub freq: Duration,
}

impl SourceSchedule {
    /// An enabled schedule at the given cadence.
    pub fn every(freq: Duration) -> Self {
        Self {
            enabled: true,
            freq,
        }
    }

    /// A disabled schedule.
    pub fn disabled(freq: Duration) -> Self {
        Self {
            enabled: false,
            freq,
        }
    }
}

/// Counters kept by a running task.
#[derive(Debug, Default)]
pub struct PollStats {
    polls: AtomicU64,
    rejected: AtomicU64,
    errors: AtomicU64,
}

impl PollStats {
    /// Number of `poll` calls made.
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    /// Polls that ended in an upstream rejection (and a cooldown).
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Polls that ended in any other error.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// One source, its cadence and the poller that reads it.
pub struct ScheduledTask {
    name: String,
    schedule: SourceSchedule,
    cooldown: Duration,
    poller: Box<dyn Poller>,
    span: Span,
    stats: Arc<PollStats>,
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

impl ScheduledTask {
    /// Binds `poller` to a schedule. Log lines of the task and its poller
    /// are recorded in a `looper = <name>` span.
    pub fn new(name: impl Into<String>, schedule: SourceSchedule, poller: Box<dyn Poller>) -> Self {
        let name = name.into();
        let span = info_span!("looper", looper = %name);
        Self {
            name,
            schedule,
            cooldown: DEFAULT_COOLDOWN,
            poller,
            span,
            stats: Arc::new(PollStats::default()),
        }
    }

    /// Overrides the rejection cooldown.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Source name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The schedule the task was built with.
    pub fn schedule(&self) -> SourceSchedule {
        self.schedule
    }

    /// Counters shared with the running task.
    pub fn stats(&self) -> Arc<PollStats> {
        Arc::clone(&self.stats)
    }

    /// Runs until `token` is cancelled, or returns at once when disabled.
    /// Never fails: every poll error is absorbed per the failure policy.
    pub async fn run(self, token: CancellationToken, sink: Arc<dyn MetricSink>) {
        let span = self.span.clone();
        self.drive(token, sink).instrument(span).await
    }

    async fn drive(mut self, token: CancellationToken, sink: Arc<dyn MetricSink>) {
        if !self.schedule.enabled {
            info!("disabled");
            return;
        }

        self.poller.init();

        let freq = self.schedule.freq;
        info!(freq = ?freq, "starting");
        let mut ticker = interval_at(Instant::now() + freq, freq);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.poll_once(&token, sink.as_ref()).await;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.poll_once(&token, sink.as_ref()).await,
            }
        }

        info!("stopping");
    }

    async fn poll_once(&mut self, token: &CancellationToken, sink: &dyn MetricSink) {
        self.stats.polls.fetch_add(1, Ordering::Relaxed);

        match self.poller.poll(token, sink).await {
            Ok(()) => {}
            Err(e) if e.is_rejected() => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                info!(error = %e, cooldown = ?self.cooldown, "failed request.. sleeping");
                tokio::time::sleep(self.cooldown).await;
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "poll error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PollError;
    use crate::retrieve::RequestError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Outcome {
        Ok,
        Rejected,
        Failed,
    }

    #[derive(Clone, Default)]
    struct Recorder {
        inits: Arc<AtomicU64>,
        calls: Arc<Mutex<Vec<Instant>>>,
    }

    impl Recorder {
        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    /// Plays back a script of outcomes, then succeeds forever.
    struct ScriptedPoller {
        recorder: Recorder,
        script: VecDeque<Outcome>,
        busy_for: Duration,
    }

    #[async_trait]
    impl Poller for ScriptedPoller {
        fn init(&mut self) {
            self.recorder.inits.fetch_add(1, Ordering::SeqCst);
        }

        async fn poll(
            &mut self,
            _token: &CancellationToken,
            _sink: &dyn MetricSink,
        ) -> Result<(), PollError> {
            self.recorder.calls.lock().unwrap().push(Instant::now());
            if !self.busy_for.is_zero() {
                tokio::time::sleep(self.busy_for).await;
            }
            match self.script.pop_front().unwrap_or(Outcome::Ok) {
                Outcome::Ok => Ok(()),
                Outcome::Rejected => Err(PollError::Request(RequestError::Rejected {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                })),
                Outcome::Failed => Err(PollError::Invalid("bad payload".into())),
            }
        }
    }

    const FREQ: Duration = Duration::from_secs(10);

    fn task(schedule: SourceSchedule, script: &[Outcome]) -> (ScheduledTask, Recorder) {
        let recorder = Recorder::default();
        let poller = ScriptedPoller {
            recorder: recorder.clone(),
            script: script.iter().copied().collect(),
            busy_for: Duration::ZERO,
        };
        (ScheduledTask::new("test", schedule, Box::new(poller)), recorder)
    }

    fn sink() -> Arc<dyn MetricSink> {
        Arc::new(MemoryStore::new())
    }

    fn gaps(times: &[Instant]) -> Vec<Duration> {
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn first_poll_is_immediate() {
        let (task, recorder) = task(SourceSchedule::every(FREQ), &[]);
        let token = CancellationToken::new();
        let start = Instant::now();
        let handle = tokio::spawn(task.run(token.clone(), sink()));

        tokio::time::sleep(Duration::from_millis(1)).await;
        let calls = recorder.call_times();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], start);
        assert_eq!(recorder.inits.load(Ordering::SeqCst), 1);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn polls_follow_the_cadence() {
        let (task, recorder) = task(SourceSchedule::every(FREQ), &[]);
        let token = CancellationToken::new();
        let handle = tokio::spawn(task.run(token.clone(), sink()));

        tokio::time::sleep(Duration::from_secs(35)).await;
        token.cancel();
        handle.await.unwrap();

        let calls = recorder.call_times();
        assert_eq!(calls.len(), 4);
        assert!(gaps(&calls).iter().all(|g| *g == FREQ));
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_task_never_polls() {
        let (task, recorder) = task(SourceSchedule::disabled(FREQ), &[]);
        let token = CancellationToken::new();

        tokio::time::timeout(Duration::from_millis(1), task.run(token, sink()))
            .await
            .expect("disabled task returns at once");

        assert!(recorder.call_times().is_empty());
        assert_eq!(recorder.inits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_applies_the_cooldown() {
        let (task, recorder) = task(SourceSchedule::every(FREQ), &[Outcome::Rejected]);
        let stats = task.stats();
        let token = CancellationToken::new();
        let handle = tokio::spawn(task.run(token.clone(), sink()));

        tokio::time::sleep(Duration::from_secs(75)).await;
        token.cancel();
        handle.await.unwrap();

        let calls = recorder.call_times();
        assert!(calls.len() >= 2);
        assert!(calls[1] - calls[0] >= DEFAULT_COOLDOWN);
        assert_eq!(stats.rejected(), 1);
        assert_eq!(stats.errors(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_keep_the_cadence() {
        let (task, recorder) = task(SourceSchedule::every(FREQ), &[Outcome::Failed, Outcome::Failed]);
        let stats = task.stats();
        let token = CancellationToken::new();
        let handle = tokio::spawn(task.run(token.clone(), sink()));

        tokio::time::sleep(Duration::from_secs(25)).await;
        token.cancel();
        handle.await.unwrap();

        let calls = recorder.call_times();
        assert_eq!(calls.len(), 3);
        assert_eq!(gaps(&calls), [FREQ, FREQ]);
        assert_eq!(stats.errors(), 2);
        assert_eq!(stats.rejected(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_without_a_final_poll() {
        let (task, recorder) = task(SourceSchedule::every(FREQ), &[]);
        let token = CancellationToken::new();
        let handle = tokio::spawn(task.run(token.clone(), sink()));

        tokio::time::sleep(Duration::from_secs(15)).await;
        token.cancel();
        tokio::time::timeout(FREQ, handle)
            .await
            .expect("run returns within one tick")
            .unwrap();

        assert_eq!(recorder.call_times().len(), 2);
        tokio::time::sleep(FREQ * 3).await;
        assert_eq!(recorder.call_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_cooldown_waits_for_the_sleep() {
        let cooldown = Duration::from_secs(30);
        let (task, recorder) = task(SourceSchedule::every(FREQ), &[Outcome::Rejected]);
        let token = CancellationToken::new();
        let start = Instant::now();
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let handle = tokio::spawn({
            let token = token.clone();
            async move {
                task.with_cooldown(cooldown).run(token, sink()).await;
                flag.store(true, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        token.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!done.load(Ordering::SeqCst));

        handle.await.unwrap();
        assert!(Instant::now() - start >= cooldown);
        assert_eq!(recorder.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_polls_do_not_queue_ticks() {
        let recorder = Recorder::default();
        let poller = ScriptedPoller {
            recorder: recorder.clone(),
            script: VecDeque::new(),
            busy_for: Duration::from_secs(25),
        };
        let task = ScheduledTask::new("slow", SourceSchedule::every(FREQ), Box::new(poller));
        let token = CancellationToken::new();
        let handle = tokio::spawn(task.run(token.clone(), sink()));

        // Polls start at 0 and 25 (the one pending tick), then 50.
        tokio::time::sleep(Duration::from_secs(55)).await;
        token.cancel();
        handle.await.unwrap();

        let calls = recorder.call_times();
        assert_eq!(gaps(&calls[..3]), [Duration::from_secs(25), Duration::from_secs(25)]);
    }
}
