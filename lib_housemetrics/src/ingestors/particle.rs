//! # Particle Event Poller
//!
//! A push source. Each poll opens the Particle server-sent event feed and
//! consumes it until it ends (shutdown, disconnect, or the server closing it).
//! The scheduler's next tick opens a fresh feed; nothing here reconnects.
//!
//! Only the configured event types are written, as `particle.<type>` with a
//! `coreid` tag. Events arriving while a previous one is being written are
//! dropped by the stream client.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::core::{PollError, Poller, PollerContext};
use crate::retrieve::{url_opt, EventStream, HttpClient, StreamEvent};
use crate::store::{tags, MetricSink, MetricValue};

/// Public Particle device event feed.
pub const PARTICLE_STREAM: &str = "https://api.particle.io/v1/devices/events";

/// Event type written when none is configured.
pub const DEFAULT_EVENT_TYPE: &str = "lum-full-avg";

/// Settings for [`Particle`].
#[derive(Debug, Clone)]
pub struct ParticleSettings {
    pub stream_url: String,
    /// Access token, sent as the `access_token` query parameter.
    pub auth: String,
    pub event_types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EventData {
    #[serde(rename = "data")]
    value: String,
    #[serde(default)]
    coreid: String,
    #[serde(default)]
    published_at: String,
}

/// A decoded point from one event.
#[derive(Debug, PartialEq)]
struct Reading {
    name: String,
    value: f64,
    coreid: String,
    ts: DateTime<Utc>,
}

/// Consumes the Particle event feed.
pub struct Particle {
    client: HttpClient,
    settings: ParticleSettings,
    event_types: HashSet<String>,
    url: Option<Url>,
}

impl Particle {
    pub fn new(ctx: PollerContext, settings: ParticleSettings) -> Self {
        let mut event_types: HashSet<String> = settings.event_types.iter().cloned().collect();
        if event_types.is_empty() {
            event_types.insert(DEFAULT_EVENT_TYPE.to_string());
        }
        Self {
            client: ctx.client,
            settings,
            event_types,
            url: None,
        }
    }

    fn decode(&self, event: &StreamEvent) -> Option<Reading> {
        if !self.event_types.contains(&event.kind) {
            return None;
        }

        let data: EventData = match serde_json::from_str(&event.data) {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, kind = %event.kind, data = %event.data, "couldn't parse event data");
                return None;
            }
        };

        let value: f64 = match data.value.trim().parse() {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, value = %data.value, "could not convert data value");
                return None;
            }
        };

        let ts = match DateTime::parse_from_rfc3339(&data.published_at) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                error!(error = %e, published_at = %data.published_at, "could not parse published_at");
                Utc::now()
            }
        };

        Some(Reading {
            name: format!("particle.{}", event.kind),
            value,
            coreid: data.coreid,
            ts,
        })
    }
}

#[async_trait]
impl Poller for Particle {
    fn init(&mut self) {
        match Url::parse(&self.settings.stream_url) {
            Ok(mut url) => {
                url.query_pairs_mut()
                    .append_pair("access_token", &self.settings.auth);
                self.url = Some(url);
            }
            Err(e) => error!(error = %e, "couldn't parse URL"),
        }
    }

    async fn poll(
        &mut self,
        token: &CancellationToken,
        sink: &dyn MetricSink,
    ) -> Result<(), PollError> {
        let url = self.url.clone().ok_or(PollError::NotReady("particle stream url"))?;
        let mut events = EventStream::open(&self.client, token, url_opt(url))
            .await
            .map_err(PollError::Stream)?;

        while let Some(event) = events.next_event().await {
            debug!(kind = %event.kind, data = %event.data, "event received");
            let Some(reading) = self.decode(&event) else {
                continue;
            };
            let core_tags = tags([("coreid", reading.coreid)]);
            sink.write(
                token,
                reading.ts,
                &reading.name,
                MetricValue::Float(reading.value),
                &core_tags,
            )
            .await;
        }

        let stats = events.stats();
        info!(
            delivered = stats.delivered(),
            dropped = stats.dropped(),
            "event channel closed"
        );
        Ok(())
    }
}
