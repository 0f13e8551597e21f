//! PurpleAir sensor poller, reading the device's local `/json` endpoint.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::core::{PollError, Poller, PollerContext};
use crate::retrieve::{url_opt, HttpClient};
use crate::store::{MetricSink, MetricValue, Tags};

const TIME_FORMAT: &str = "%Y/%m/%dT%H:%M:%Sz";

/// Fields of the local JSON document written as `purpleair.<field>`.
pub const METRICS: [&str; 16] = [
    "p_0_3_um",
    "p_0_5_um",
    "p_1_0_um",
    "p_2_5_um",
    "p_5_0_um",
    "p_10_0_um",
    "pm1_0_cf_1",
    "pm2_5_cf_1",
    "pm10_0_cf_1",
    "pm1_0_atm",
    "pm2_5_atm",
    "pm10_0_atm",
    "pm2.5_aqi",
    "current_humidity",
    "current_temp_f",
    "pressure",
];

/// Settings for [`PurpleAir`].
#[derive(Debug, Clone)]
pub struct PurpleAirSettings {
    /// Host (and optional port) of the sensor on the local network.
    pub host: String,
}

/// Polls one PurpleAir sensor.
pub struct PurpleAir {
    client: HttpClient,
    settings: PurpleAirSettings,
    url: Option<Url>,
}

impl PurpleAir {
    pub fn new(ctx: PollerContext, settings: PurpleAirSettings) -> Self {
        Self {
            client: ctx.client,
            settings,
            url: None,
        }
    }
}

#[async_trait]
impl Poller for PurpleAir {
    fn init(&mut self) {
        match Url::parse(&format!("http://{}/json", self.settings.host)) {
            Ok(url) => self.url = Some(url),
            Err(e) => error!(error = %e, host = %self.settings.host, "failed to start"),
        }
    }

    async fn poll(
        &mut self,
        token: &CancellationToken,
        sink: &dyn MetricSink,
    ) -> Result<(), PollError> {
        let url = self.url.clone().ok_or(PollError::NotReady("purpleair url"))?;
        let reading: serde_json::Map<String, serde_json::Value> =
            self.client.get_json(token, url_opt(url)).await?;

        let raw_ts = reading
            .get("DateTime")
            .ok_or_else(|| PollError::Invalid("did not find DateTime in reading".into()))?;
        let raw_ts = raw_ts
            .as_str()
            .ok_or_else(|| PollError::Invalid(format!("DateTime was not a string: {raw_ts}")))?;
        let ts = NaiveDateTime::parse_from_str(raw_ts, TIME_FORMAT)
            .map_err(|e| PollError::Invalid(format!("DateTime `{raw_ts}`: {e}")))?
            .and_utc();

        let no_tags = Tags::new();
        for name in METRICS {
            let Some(value) = reading.get(name).and_then(MetricValue::from_json) else {
                continue;
            };
            sink.write(token, ts, &format!("purpleair.{name}"), value, &no_tags)
                .await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn device_clock_format_parses_as_utc() {
        let ts = NaiveDateTime::parse_from_str("2024/03/09T17:04:05z", TIME_FORMAT)
            .unwrap()
            .and_utc();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 9, 17, 4, 5).unwrap());
    }

    #[test]
    fn init_builds_the_local_url() {
        let mut poller = PurpleAir::new(
            PollerContext {
                name: "purpleair".into(),
                client: HttpClient::new().unwrap(),
            },
            PurpleAirSettings {
                host: "10.0.0.42".into(),
            },
        );
        poller.init();
        assert_eq!(poller.url.unwrap().as_str(), "http://10.0.0.42/json");
    }
}
