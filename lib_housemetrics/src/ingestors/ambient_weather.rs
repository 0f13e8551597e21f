//! AmbientWeather station poller.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Url;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::core::{PollError, Poller, PollerContext};
use crate::retrieve::{url_opt, HttpClient};
use crate::store::{MetricSink, MetricValue, Tags};

/// Public AmbientWeather REST API.
pub const AMBIENT_WEATHER_API: &str = "https://api.ambientweather.net";

/// Settings for [`AmbientWeather`].
#[derive(Debug, Clone)]
pub struct AmbientWeatherSettings {
    /// Station MAC address.
    pub mac: String,
    pub api_key: String,
    pub app_key: String,
    pub api_base: String,
}

#[derive(Debug, Deserialize)]
struct WeatherReading {
    #[serde(rename = "lastData")]
    last_data: Option<Box<WeatherReading>>,
    #[serde(default)]
    dateutc: i64,
    #[serde(default)]
    tempf: f64,
    #[serde(default)]
    humidity: f64,
    #[serde(default)]
    winddir: f64,
    #[serde(default)]
    windgustmph: f64,
    #[serde(default)]
    windspeedmph: f64,
    #[serde(default)]
    solarradiation: f64,
    #[serde(default)]
    uv: f64,
    #[serde(default)]
    hourlyrainin: f64,
    #[serde(default)]
    eventrainin: f64,
}

impl WeatherReading {
    fn metrics(&self) -> [(&'static str, f64); 9] {
        [
            ("outdoor_temp", self.tempf),
            ("outdoor_hum", self.humidity),
            ("wind_dir", self.winddir),
            ("wind_gust", self.windgustmph),
            ("wind_speed", self.windspeedmph),
            ("solar_radiation", self.solarradiation),
            ("uv_index", self.uv),
            ("rain_rate_hourly", self.hourlyrainin),
            ("rain_event_accum", self.eventrainin),
        ]
    }
}

/// Polls the most recent reading of one station.
pub struct AmbientWeather {
    client: HttpClient,
    settings: AmbientWeatherSettings,
    url: Option<Url>,
}

impl AmbientWeather {
    pub fn new(ctx: PollerContext, settings: AmbientWeatherSettings) -> Self {
        Self {
            client: ctx.client,
            settings,
            url: None,
        }
    }
}

#[async_trait]
impl Poller for AmbientWeather {
    fn init(&mut self) {
        let s = &self.settings;
        let base = s.api_base.trim_end_matches('/');
        let url = Url::parse_with_params(
            &format!("{base}/v1/devices/{}", s.mac),
            [
                ("apiKey", s.api_key.as_str()),
                ("applicationKey", s.app_key.as_str()),
                ("limit", "1"),
            ],
        );
        match url {
            Ok(url) => self.url = Some(url),
            Err(e) => error!(error = %e, "failed to start"),
        }
    }

    async fn poll(
        &mut self,
        token: &CancellationToken,
        sink: &dyn MetricSink,
    ) -> Result<(), PollError> {
        let url = self
            .url
            .clone()
            .ok_or(PollError::NotReady("ambient weather url"))?;
        let readings: Vec<WeatherReading> = self.client.get_json(token, url_opt(url)).await?;

        let no_tags = Tags::new();
        for reading in readings {
            let reading = match reading.last_data {
                Some(last) => *last,
                None => reading,
            };
            let ts = Utc
                .timestamp_millis_opt(reading.dateutc)
                .single()
                .ok_or_else(|| PollError::Invalid(format!("dateutc {} out of range", reading.dateutc)))?;

            for (name, value) in reading.metrics() {
                sink.write(token, ts, name, MetricValue::Float(value), &no_tags)
                    .await;
            }
        }

        Ok(())
    }
}
