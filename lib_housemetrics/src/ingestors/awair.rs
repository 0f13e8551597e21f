//! # Awair Poller
//!
//! Reads the latest air data of every configured Awair device from the
//! developer API. Devices are given as `name:type:id`; the name becomes the
//! `device` tag, type and id address the device in the API.
//!
//! Every sensor component is written as `awair.<comp>`. A `pm25` reading
//! additionally produces `awair.pm25_aqi`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::core::{PollError, Poller, PollerContext};
use crate::retrieve::{bearer_opt, HttpClient};
use crate::store::{tags, MetricSink, MetricValue};
use crate::utils::pm25_to_aqi;

/// Public Awair developer API.
pub const AWAIR_API: &str = "https://developer-apis.awair.is";

/// Settings for [`Awair`].
#[derive(Debug, Clone)]
pub struct AwairSettings {
    /// Access token sent as a bearer token.
    pub token: String,
    /// Devices as `name:type:id`.
    pub devices: Vec<String>,
    /// API base, [`AWAIR_API`] unless pointed elsewhere.
    pub api_base: String,
}

#[derive(Debug, Deserialize)]
struct AwairReading {
    #[serde(default)]
    data: Vec<AwairEntry>,
}

#[derive(Debug, Deserialize)]
struct AwairEntry {
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    sensors: Vec<AwairSensor>,
}

#[derive(Debug, Deserialize)]
struct AwairSensor {
    comp: String,
    value: serde_json::Value,
}

#[derive(Debug)]
struct Device {
    name: String,
    url: Url,
}

/// Polls every configured Awair device.
pub struct Awair {
    client: HttpClient,
    settings: AwairSettings,
    devices: Vec<Device>,
}

impl Awair {
    pub fn new(ctx: PollerContext, settings: AwairSettings) -> Self {
        Self {
            client: ctx.client,
            settings,
            devices: Vec::new(),
        }
    }

    fn device(&self, entry: &str) -> Option<Device> {
        let parts: Vec<&str> = entry.split(':').collect();
        let [name, kind, id] = parts.as_slice() else {
            error!(device = entry, "bad device");
            return None;
        };

        let base = self.settings.api_base.trim_end_matches('/');
        let raw = format!("{base}/v1/users/self/devices/{kind}/{id}/air-data/latest");
        match Url::parse(&raw) {
            Ok(url) => Some(Device {
                name: (*name).to_string(),
                url,
            }),
            Err(e) => {
                error!(error = %e, device = name, "couldn't parse URL");
                None
            }
        }
    }
}

#[async_trait]
impl Poller for Awair {
    fn init(&mut self) {
        self.devices = self
            .settings
            .devices
            .iter()
            .filter_map(|entry| self.device(entry))
            .collect();
    }

    async fn poll(
        &mut self,
        token: &CancellationToken,
        sink: &dyn MetricSink,
    ) -> Result<(), PollError> {
        if self.devices.is_empty() {
            return Err(PollError::NotReady("no valid awair devices"));
        }
        debug!("polling devices");

        for device in &self.devices {
            let reading: AwairReading = self
                .client
                .get_json(token, bearer_opt(device.url.clone(), &self.settings.token))
                .await?;

            let dev_tags = tags([("device", device.name.as_str())]);
            for entry in reading.data {
                let ts = match DateTime::parse_from_rfc3339(&entry.timestamp) {
                    Ok(ts) => ts.with_timezone(&Utc),
                    Err(e) => {
                        error!(error = %e, timestamp = %entry.timestamp, "could not parse timestamp");
                        Utc::now()
                    }
                };

                for sensor in entry.sensors {
                    let Some(value) = MetricValue::from_json(&sensor.value) else {
                        debug!(comp = %sensor.comp, value = %sensor.value, "sensor value skipped");
                        continue;
                    };
                    let pm25 = (sensor.comp == "pm25").then(|| value.as_f64()).flatten();

                    sink.write(token, ts, &format!("awair.{}", sensor.comp), value, &dev_tags)
                        .await;
                    if let Some(pm25) = pm25 {
                        sink.write(
                            token,
                            ts,
                            "awair.pm25_aqi",
                            MetricValue::Int(pm25_to_aqi(pm25)),
                            &dev_tags,
                        )
                        .await;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn awair(devices: &[&str]) -> Awair {
        Awair::new(
            PollerContext {
                name: "awair".into(),
                client: HttpClient::new().unwrap(),
            },
            AwairSettings {
                token: "t".into(),
                devices: devices.iter().map(|d| d.to_string()).collect(),
                api_base: AWAIR_API.into(),
            },
        )
    }

    #[test]
    fn init_keeps_well_formed_devices_only() {
        let mut poller = awair(&["office:awair-element:1234", "broken", "a:b"]);
        poller.init();

        assert_eq!(poller.devices.len(), 1);
        assert_eq!(poller.devices[0].name, "office");
        assert_eq!(
            poller.devices[0].url.as_str(),
            "https://developer-apis.awair.is/v1/users/self/devices/awair-element/1234/air-data/latest"
        );
    }

    #[tokio::test]
    async fn poll_without_devices_is_not_ready() {
        let mut poller = awair(&[]);
        poller.init();
        let sink = crate::store::MemoryStore::new();

        let err = poller
            .poll(&CancellationToken::new(), &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::NotReady(_)));
        assert!(sink.is_empty());
    }
}
