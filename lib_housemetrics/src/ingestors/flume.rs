//! # Flume Water Meter Poller
//!
//! Every poll authenticates with a password grant, then asks for per-minute
//! water usage between the end of the last successful window and now. The
//! Flume API speaks local wall-clock time (America/Los_Angeles) in both
//! directions.
//!
//! The window only advances after a successful query, so a failed poll is
//! covered by the next one.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::{America::Los_Angeles, Tz};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::core::{PollError, Poller, PollerContext};
use crate::retrieve::{bearer_opt, url_opt, HttpClient};
use crate::store::{tags, MetricSink, MetricValue, Tags};

/// Public Flume API.
pub const FLUME_API: &str = "https://api.flumetech.com";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const LOCAL_TZ: Tz = Los_Angeles;

/// Settings for [`Flume`].
#[derive(Debug, Clone)]
pub struct FlumeSettings {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_id: String,
    pub device_id: String,
    pub api_base: String,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    #[serde(default)]
    data: Vec<TokenData>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct QueryReply {
    #[serde(default)]
    data: Vec<QueryData>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    query: Vec<QueryEntry>,
}

#[derive(Debug, Deserialize)]
struct QueryEntry {
    #[serde(default)]
    datetime: String,
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Debug)]
struct Endpoints {
    token: Url,
    query: Url,
}

/// Polls water usage of one Flume device.
pub struct Flume {
    client: HttpClient,
    settings: FlumeSettings,
    endpoints: Option<Endpoints>,
    since: DateTime<Utc>,
    unit_tags: Tags,
}

impl Flume {
    pub fn new(ctx: PollerContext, settings: FlumeSettings) -> Self {
        Self {
            client: ctx.client,
            settings,
            endpoints: None,
            since: Utc::now(),
            unit_tags: tags([("unit", "gallons")]),
        }
    }

    fn endpoints(&self) -> Result<Endpoints, url::ParseError> {
        let s = &self.settings;
        let base = s.api_base.trim_end_matches('/');
        Ok(Endpoints {
            token: Url::parse(&format!("{base}/oauth/token"))?,
            query: Url::parse(&format!(
                "{base}/users/{}/devices/{}/query",
                s.user_id, s.device_id
            ))?,
        })
    }

    async fn access_token(&self, token: &CancellationToken, url: Url) -> Result<String, PollError> {
        let s = &self.settings;
        let body = TokenRequest {
            grant_type: "password",
            client_id: &s.client_id,
            client_secret: &s.client_secret,
            username: &s.username,
            password: &s.password,
        };
        let reply: TokenReply = self.client.send_json(token, &body, url_opt(url)).await?;
        reply
            .data
            .into_iter()
            .next()
            .map(|d| d.access_token)
            .ok_or_else(|| PollError::Invalid("token reply carried no access token".into()))
    }
}

/// Formats an instant as Flume local wall-clock time.
fn local_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&LOCAL_TZ).format(TIME_FORMAT).to_string()
}

/// Reads a Flume local wall-clock time back into UTC.
fn parse_local_time(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, TIME_FORMAT).ok()?;
    LOCAL_TZ
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}

#[async_trait]
impl Poller for Flume {
    fn init(&mut self) {
        self.since = Utc::now();
        match self.endpoints() {
            Ok(endpoints) => self.endpoints = Some(endpoints),
            Err(e) => error!(error = %e, "couldn't parse URL"),
        }
    }

    async fn poll(
        &mut self,
        token: &CancellationToken,
        sink: &dyn MetricSink,
    ) -> Result<(), PollError> {
        let Some(endpoints) = &self.endpoints else {
            return Err(PollError::NotReady("flume urls"));
        };
        let query_url = endpoints.query.clone();
        let access = self.access_token(token, endpoints.token.clone()).await?;

        let now = Utc::now();
        let query = json!({
            "queries": [{
                "since_datetime": local_time(self.since),
                "until_datetime": local_time(now),
                "request_id": "query",
                "bucket": "MIN",
                "operation": "SUM",
                "units": "GALLONS",
            }]
        });

        let reply: QueryReply = self
            .client
            .send_json(token, &query, bearer_opt(query_url, &access))
            .await?;

        for entry in reply.data.into_iter().flat_map(|d| d.query) {
            let ts = if entry.datetime.is_empty() {
                Utc::now()
            } else {
                parse_local_time(&entry.datetime).unwrap_or_else(|| {
                    error!(datetime = %entry.datetime, "could not parse timestamp");
                    Utc::now()
                })
            };
            let Some(value) = MetricValue::from_json(&entry.value) else {
                debug!(value = %entry.value, "usage value skipped");
                continue;
            };
            sink.write(token, ts, "flume.usage", value, &self.unit_tags)
                .await;
        }

        self.since = now;
        Ok(())
    }
}
