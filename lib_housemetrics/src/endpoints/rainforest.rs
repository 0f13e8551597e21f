//! Rainforest Eagle uploads. Values arrive as `0x`-prefixed hex strings; the
//! timestamp counts seconds from 2000-01-01 UTC, the demand is a signed
//! 32-bit wattage.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::any;
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, error, instrument};

use super::HookContext;
use crate::store::{MetricValue, Tags};

/// 2000-01-01T00:00:00Z as a Unix timestamp.
const EAGLE_EPOCH: i64 = 946_684_800;

#[derive(Debug, Deserialize)]
struct Upload {
    #[serde(rename = "InstantaneousDemand", default)]
    demand: Option<InstantaneousDemand>,
}

#[derive(Debug, Deserialize)]
struct InstantaneousDemand {
    #[serde(rename = "TimeStamp", default)]
    timestamp: String,
    #[serde(rename = "Demand", default)]
    demand: String,
}

#[derive(Debug, PartialEq)]
struct Demand {
    ts: DateTime<Utc>,
    watts: f64,
}

pub(crate) fn routes(ctx: HookContext) -> Router {
    Router::new()
        .route("/rainforest", any(handle))
        .with_state(Arc::new(ctx))
}

fn parse_hex(raw: &str) -> Result<i64, std::num::ParseIntError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    i64::from_str_radix(digits, 16)
}

impl InstantaneousDemand {
    fn decode(&self) -> Result<Demand, String> {
        let secs = parse_hex(&self.timestamp).map_err(|e| format!("TimeStamp `{}`: {e}", self.timestamp))?;
        let ts = EAGLE_EPOCH
            .checked_add(secs)
            .and_then(|unix| Utc.timestamp_opt(unix, 0).single())
            .ok_or_else(|| format!("TimeStamp `{}` out of range", self.timestamp))?;

        let raw = parse_hex(&self.demand).map_err(|e| format!("Demand `{}`: {e}", self.demand))?;
        // The meter sends a two's complement i32 (negative while exporting).
        let watts = f64::from(raw as i32);

        Ok(Demand { ts, watts })
    }
}

#[instrument(name = "endpoint", skip_all, fields(endpoint = "rainforest"))]
async fn handle(State(ctx): State<Arc<HookContext>>, body: Bytes) -> StatusCode {
    let text = String::from_utf8_lossy(&body);
    let upload: Upload = match quick_xml::de::from_str(&text) {
        Ok(upload) => upload,
        Err(e) => {
            error!(error = %e, reading = %text, "reading decode error");
            return StatusCode::OK;
        }
    };

    let Some(reading) = upload.demand.filter(|d| !d.demand.is_empty()) else {
        debug!("upload without demand");
        return StatusCode::OK;
    };

    match reading.decode() {
        Ok(Demand { ts, watts }) => {
            ctx.sink
                .write(&ctx.token, ts, "watts", MetricValue::Float(watts), &Tags::new())
                .await;
        }
        Err(e) => error!(error = %e, "reading decode error"),
    }

    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::WebhookSettings;
    use super::*;

    const UPLOAD: &str = r#"<rainforest macId="0xd8d5b9000000" version="undefined" timestamp="1700000000s">
  <InstantaneousDemand>
    <DeviceMacId>0xd8d5b9000000</DeviceMacId>
    <MeterMacId>0x00135001000000</MeterMacId>
    <TimeStamp>0x2cf1a2b0</TimeStamp>
    <Demand>0x0004d2</Demand>
    <Multiplier>0x00000001</Multiplier>
    <Divisor>0x000003e8</Divisor>
  </InstantaneousDemand>
</rainforest>"#;

    #[test]
    fn demand_is_a_signed_32_bit_value() {
        let reading = InstantaneousDemand {
            timestamp: "0x00000000".into(),
            demand: "0xfffffc18".into(),
        };
        let demand = reading.decode().unwrap();
        assert_eq!(demand.watts, -1000.0);
        assert_eq!(demand.ts, Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn upload_writes_watts_at_meter_time() {
        let (app, store) = app(WebhookSettings::default());
        let status = send(app, post("/rainforest", UPLOAD)).await;

        assert_eq!(status, StatusCode::OK);
        let points = store.named("watts");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, MetricValue::Float(1234.0));
        assert_eq!(points[0].ts.timestamp(), EAGLE_EPOCH + 0x2cf1a2b0);
    }

    #[tokio::test]
    async fn uploads_without_demand_are_accepted() {
        let (app, store) = app(WebhookSettings::default());
        let other = r#"<rainforest><NetworkInfo><Status>Connected</Status></NetworkInfo></rainforest>"#;

        assert_eq!(send(app.clone(), post("/rainforest", other)).await, StatusCode::OK);
        assert_eq!(send(app, post("/rainforest", "<<<")).await, StatusCode::OK);
        assert!(store.is_empty());
    }

    #[test]
    fn out_of_range_timestamp_is_a_decode_error() {
        let reading = InstantaneousDemand {
            timestamp: "0x7fffffffffffffff".into(),
            demand: "0x10".into(),
        };
        let err = reading.decode().unwrap_err();
        assert!(err.contains("out of range"), "{err}");
    }

    #[tokio::test]
    async fn out_of_range_timestamp_is_accepted_and_skipped() {
        let (app, store) = app(WebhookSettings::default());
        let upload = UPLOAD.replace("0x2cf1a2b0", "0x7fffffffffffffff");

        assert_eq!(send(app, post("/rainforest", &upload)).await, StatusCode::OK);
        assert!(store.is_empty());
    }
}
