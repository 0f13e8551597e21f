//! # Event Stream Client
//!
//! Converts a server-push feed that follows a two-line protocol
//!
//! ```text
//! event: <type>
//! data: <payload>
//! ```
//!
//! into a lazily produced, non-restartable sequence of [`StreamEvent`]s.
//!
//! ## Key Design Principles:
//! - **Best-effort parsing**: an `event:` line opens a pending event, the next
//!   `data:` line completes and emits it. A `data:` line with nothing pending is
//!   discarded. Blank lines and any other line leave the pending state alone.
//! - **Drop-on-full delivery**: the producer hands a finished event to the
//!   consumer with `try_send` over a one-slot queue. If the consumer has not
//!   drained the slot the event is dropped and counted in [`StreamStats`].
//!   The line reader never waits on the consumer.
//! - **Exactly-once teardown**: two tasks run per stream, a line reader and a
//!   watcher. They share one stop token, a child of the caller's token. The
//!   reader cancels it on read error or end of body; the caller cancels it on
//!   shutdown. The watcher waits for it, drops the only strong sender (closing
//!   the output) and joins the reader, which has dropped the body (closing the
//!   connection). No matter which trigger fires first, the output closes once.
//! - **No reconnection**: once the sequence yields `None` it stays exhausted.
//!   Open a new `EventStream` to keep receiving.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Stream, TryStreamExt};
use reqwest::Request;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use super::http_client::{HttpClient, RequestError};

/// One slot: the consumer must be (nearly) ready for an event to be delivered.
const DELIVERY_CAPACITY: usize = 1;

/// A `{type, data}` record rebuilt from an `event:` line and the `data:` line after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// Payload of the `event:` line.
    pub kind: String,
    /// Payload of the `data:` line.
    pub data: String,
}

/// The two-line protocol state machine, free of any I/O.
#[derive(Debug, Default)]
pub struct LineParser {
    pending: Option<String>,
}

impl LineParser {
    /// Feeds one line (with or without its terminator). Returns an event when
    /// the line completes one.
    pub fn feed(&mut self, line: &str) -> Option<StreamEvent> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        if line.is_empty() {
            return None;
        }

        if let Some(data) = line.strip_prefix("data: ") {
            return self.pending.take().map(|kind| StreamEvent {
                kind,
                data: data.to_string(),
            });
        }

        if let Some(kind) = line.strip_prefix("event: ") {
            self.pending = Some(kind.to_string());
        }
        None
    }

    /// `true` while an `event:` line is waiting for its `data:` line.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Delivery counters shared between the producer and whoever holds the stream.
#[derive(Debug, Default)]
pub struct StreamStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl StreamStats {
    /// Events handed to the consumer queue.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Events discarded because the consumer was not ready.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// `true` once the watcher has closed the output.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// # Event Stream
///
/// The consumer side of a running stream. Implements
/// `Stream<Item = StreamEvent>`; dropping it tears the stream down.
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
    stats: Arc<StreamStats>,
    stop: CancellationToken,
}

impl EventStream {
    /// Issues a streaming GET through `client` and starts consuming its body.
    pub async fn open<F>(
        client: &HttpClient,
        token: &CancellationToken,
        mutate: F,
    ) -> Result<Self, RequestError>
    where
        F: FnOnce(&mut Request),
    {
        let response = client.stream(token, mutate).await?;
        let body = response.bytes_stream().map_err(std::io::Error::other);
        let reader = BufReader::new(StreamReader::new(body));
        Ok(Self::from_reader(reader, token))
    }

    /// Starts the reader and watcher tasks over any buffered byte source.
    pub fn from_reader<R>(reader: R, token: &CancellationToken) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(DELIVERY_CAPACITY);
        let stats = Arc::new(StreamStats::default());
        let stop = token.child_token();

        let reader_task = tokio::spawn(read_lines(
            reader,
            tx.downgrade(),
            stop.clone(),
            Arc::clone(&stats),
        ));
        tokio::spawn(watch(stop.clone(), tx, reader_task, Arc::clone(&stats)));

        Self { rx, stats, stop }
    }

    /// Waits for the next event. `None` once the stream has terminated.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Shared delivery counters.
    pub fn stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.stats)
    }

    /// Resolves once a termination trigger has fired and the reader has
    /// stopped consuming lines.
    pub async fn terminated(&self) {
        self.stop.cancelled().await;
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Line reader task. Owns the body; returning drops it and closes the connection.
async fn read_lines<R>(
    mut reader: R,
    output: mpsc::WeakSender<StreamEvent>,
    stop: CancellationToken,
    stats: Arc<StreamStats>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut parser = LineParser::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => {
                debug!("event stream reached end of body");
                break;
            }
            Ok(_) if !buf.ends_with(b"\n") => {
                debug!(line = %String::from_utf8_lossy(&buf), "event stream ended mid-line");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "event stream read error");
                break;
            }
        }

        // Bytes that are not UTF-8 become U+FFFD; the line is parsed like any other.
        let line = String::from_utf8_lossy(&buf);
        trace!(line = %line.trim_end(), "event line");
        if let Some(event) = parser.feed(&line) {
            deliver(&output, event, &stats);
        }
    }

    stop.cancel();
}

fn deliver(output: &mpsc::WeakSender<StreamEvent>, event: StreamEvent, stats: &StreamStats) {
    let Some(tx) = output.upgrade() else {
        stats.dropped.fetch_add(1, Ordering::Relaxed);
        return;
    };

    match tx.try_send(event) {
        Ok(()) => {
            stats.delivered.fetch_add(1, Ordering::Relaxed);
        }
        Err(TrySendError::Full(event)) | Err(TrySendError::Closed(event)) => {
            stats.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(kind = %event.kind, "consumer not ready, event dropped");
        }
    }
}

/// Watcher task: the single place the output gets closed.
async fn watch(
    stop: CancellationToken,
    output: mpsc::Sender<StreamEvent>,
    reader: JoinHandle<()>,
    stats: Arc<StreamStats>,
) {
    stop.cancelled().await;
    // Flagged before the sender goes, so a consumer that sees `None` also sees the flag.
    stats.closed.store(true, Ordering::Release);
    drop(output);

    if let Err(e) = reader.await {
        error!(error = %e, "event stream reader task failed");
    }
    debug!(
        delivered = stats.delivered(),
        dropped = stats.dropped(),
        "event stream closed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    const BUDGET: Duration = Duration::from_secs(2);

    #[test]
    fn event_then_data_yields_one_event() {
        let mut parser = LineParser::default();
        assert_eq!(parser.feed("event: foo\n"), None);
        assert_eq!(
            parser.feed("data: bar\n"),
            Some(StreamEvent {
                kind: "foo".into(),
                data: "bar".into()
            })
        );
        assert!(!parser.has_pending());
    }

    #[test]
    fn lone_data_line_is_discarded() {
        let mut parser = LineParser::default();
        assert_eq!(parser.feed("data: x\n"), None);
        assert!(!parser.has_pending());
    }

    #[test]
    fn blank_and_unknown_lines_keep_pending_state() {
        let mut parser = LineParser::default();
        parser.feed("event: lum\n");
        assert_eq!(parser.feed("\n"), None);
        assert_eq!(parser.feed(": keepalive\n"), None);
        assert!(parser.has_pending());

        let event = parser.feed("data: {\"data\":\"1\"}\r\n").unwrap();
        assert_eq!(event.kind, "lum");
        assert_eq!(event.data, "{\"data\":\"1\"}");
    }

    #[test]
    fn second_event_line_replaces_pending() {
        let mut parser = LineParser::default();
        parser.feed("event: first\n");
        parser.feed("event: second\n");
        assert_eq!(parser.feed("data: d\n").unwrap().kind, "second");
    }

    #[tokio::test]
    async fn reader_emits_event_then_ends_at_eof() {
        let token = CancellationToken::new();
        let mut stream = EventStream::from_reader(&b"event: foo\n\ndata: bar\n"[..], &token);

        let event = timeout(BUDGET, stream.next_event()).await.unwrap();
        assert_eq!(
            event,
            Some(StreamEvent {
                kind: "foo".into(),
                data: "bar".into()
            })
        );
        assert_eq!(timeout(BUDGET, stream.next_event()).await.unwrap(), None);
        assert!(stream.stats().is_closed());
    }

    #[tokio::test]
    async fn partial_final_line_is_not_emitted() {
        let token = CancellationToken::new();
        let stream = EventStream::from_reader(&b"event: foo\ndata: bar"[..], &token);

        let events: Vec<_> = timeout(BUDGET, stream.collect()).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn slow_consumer_does_not_block_the_reader() {
        let mut feed = String::new();
        for i in 0..100 {
            feed.push_str(&format!("event: tick\ndata: {i}\n"));
        }
        let feed: &'static [u8] = Box::leak(feed.into_bytes().into_boxed_slice());

        let token = CancellationToken::new();
        let mut stream = EventStream::from_reader(feed, &token);

        // Nobody receives while the reader runs through all 100 events.
        timeout(BUDGET, stream.terminated()).await.unwrap();
        let stats = stream.stats();
        assert_eq!(stats.delivered(), 1);
        assert_eq!(stats.dropped(), 99);

        assert_eq!(stream.next_event().await.unwrap().data, "0");
        assert_eq!(timeout(BUDGET, stream.next_event()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn cancel_then_eof_closes_once() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let token = CancellationToken::new();
        let mut stream = EventStream::from_reader(BufReader::new(reader), &token);

        writer.write_all(b"event: a\ndata: 1\n").await.unwrap();
        assert_eq!(timeout(BUDGET, stream.next_event()).await.unwrap().unwrap().data, "1");

        token.cancel();
        assert_eq!(timeout(BUDGET, stream.next_event()).await.unwrap(), None);

        // The connection is already gone; the late EOF must not fault anything.
        drop(writer);
        assert_eq!(timeout(BUDGET, stream.next_event()).await.unwrap(), None);
        assert!(stream.stats().is_closed());
    }

    #[tokio::test]
    async fn invalid_utf8_line_does_not_end_the_stream() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let token = CancellationToken::new();
        let mut stream = EventStream::from_reader(BufReader::new(reader), &token);

        writer.write_all(b"event: a\ndata: \xff\xfe\n").await.unwrap();
        let mangled = timeout(BUDGET, stream.next_event()).await.unwrap().unwrap();
        assert_eq!(mangled.kind, "a");
        assert_eq!(mangled.data, "\u{fffd}\u{fffd}");

        writer.write_all(b"\xc3\x28 garbage\nevent: b\ndata: ok\n").await.unwrap();
        assert_eq!(
            timeout(BUDGET, stream.next_event()).await.unwrap(),
            Some(StreamEvent {
                kind: "b".into(),
                data: "ok".into(),
            })
        );
        assert!(!stream.stats().is_closed());
    }

    #[tokio::test]
    async fn eof_then_cancel_closes_once() {
        let (writer, reader) = tokio::io::duplex(64);
        let token = CancellationToken::new();
        let mut stream = EventStream::from_reader(BufReader::new(reader), &token);

        drop(writer);
        assert_eq!(timeout(BUDGET, stream.next_event()).await.unwrap(), None);

        token.cancel();
        assert_eq!(timeout(BUDGET, stream.next_event()).await.unwrap(), None);
        assert!(stream.stats().is_closed());
    }

    #[tokio::test]
    async fn parent_token_is_left_untouched_by_eof() {
        let token = CancellationToken::new();
        let stream = EventStream::from_reader(&b""[..], &token);

        timeout(BUDGET, stream.terminated()).await.unwrap();
        assert!(!token.is_cancelled());
    }
}
