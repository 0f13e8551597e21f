//! InfluxDB v2 sink.
//!
//! Each point becomes one line of line protocol with a single `value` field,
//! POSTed to `{dest}/api/v2/write?org=..&bucket=..&precision=ns`.

use std::fmt::Write as _;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument, Span};

use super::{MetricSink, MetricValue, StoreError, Tags};
use crate::retrieve::HttpClient;

const LINE_PROTOCOL: &str = "text/plain; charset=utf-8";

/// Connection settings for [`InfluxStore`].
#[derive(Debug, Clone, Default)]
pub struct InfluxSettings {
    /// Base address, e.g. `http://influx.local:8086`.
    pub dest: String,
    pub bucket: String,
    pub token: String,
    pub org: String,
}

impl InfluxSettings {
    fn write_url(&self) -> Result<Url, StoreError> {
        let required = [
            ("influxdb-dest", &self.dest),
            ("influxdb-token", &self.token),
            ("influxdb-org", &self.org),
            ("influxdb-bucket", &self.bucket),
        ];
        if let Some((name, _)) = required.iter().find(|(_, v)| v.is_empty()) {
            return Err(StoreError::MissingSetting(*name));
        }

        let base = self.dest.trim_end_matches('/');
        let url = Url::parse_with_params(
            &format!("{base}/api/v2/write"),
            [
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ],
        )?;
        Ok(url)
    }
}

/// # InfluxDB Sink
///
/// Write failures are logged at `error` and swallowed; a poller never sees
/// them.
#[derive(Debug)]
pub struct InfluxStore {
    client: HttpClient,
    settings: InfluxSettings,
    write_url: OnceLock<Url>,
    span: Span,
}

impl InfluxStore {
    pub fn new(client: HttpClient, settings: InfluxSettings) -> Self {
        Self {
            client,
            settings,
            write_url: OnceLock::new(),
            span: info_span!("store", store = "influxdb"),
        }
    }
}

#[async_trait]
impl MetricSink for InfluxStore {
    fn init(&self) -> Result<(), StoreError> {
        let url = self.settings.write_url()?;
        let _ = self.write_url.set(url);
        Ok(())
    }

    async fn write(
        &self,
        token: &CancellationToken,
        ts: DateTime<Utc>,
        name: &str,
        value: MetricValue,
        tags: &Tags,
    ) {
        let span = self.span.clone();
        async {
            let Some(url) = self.write_url.get().cloned() else {
                error!(metric = name, "write before init");
                return;
            };
            let Some(line) = encode_line(ts, name, &value, tags) else {
                warn!(metric = name, val = %value, "point has no line protocol form, skipped");
                return;
            };
            debug!(%ts, metric = name, val = %value, ?tags, "write");

            let auth = HeaderValue::from_str(&format!("Token {}", self.settings.token));
            let result = self
                .client
                .send_body(token, line, LINE_PROTOCOL, move |req| {
                    *req.url_mut() = url;
                    if let Ok(auth) = auth {
                        req.headers_mut().insert(AUTHORIZATION, auth);
                    }
                })
                .await;

            if let Err(e) = result {
                error!(error = %e, metric = name, "write error");
            }
        }
        .instrument(span)
        .await
    }
}

/// Encodes one point as a line of line protocol. `None` for values that
/// InfluxDB cannot store (non-finite floats, out-of-range timestamps).
pub fn encode_line(ts: DateTime<Utc>, name: &str, value: &MetricValue, tags: &Tags) -> Option<String> {
    let nanos = ts.timestamp_nanos_opt()?;

    let mut line = escape_key(name, &[',', ' ']);
    for (k, v) in tags {
        if v.is_empty() {
            continue;
        }
        line.push(',');
        line.push_str(&escape_key(k, &[',', '=', ' ']));
        line.push('=');
        line.push_str(&escape_key(v, &[',', '=', ' ']));
    }

    line.push_str(" value=");
    match value {
        MetricValue::Int(i) => {
            let _ = write!(line, "{i}i");
        }
        MetricValue::Float(f) if f.is_finite() => {
            let _ = write!(line, "{f}");
        }
        MetricValue::Float(_) => return None,
        MetricValue::Bool(b) => {
            let _ = write!(line, "{b}");
        }
        MetricValue::Text(s) => {
            line.push('"');
            line.push_str(&escape_text(s));
            line.push('"');
        }
    }

    let _ = write!(line, " {nanos}");
    Some(line)
}

/// Measurement names and tag keys/values. Line breaks cannot be escaped
/// there, so they become spaces (which are).
fn escape_key(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if c == '\n' || c == '\r' { ' ' } else { c };
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// String field values: only `"` and `\` are escaped.
fn escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
