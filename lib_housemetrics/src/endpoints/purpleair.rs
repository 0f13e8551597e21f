use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::any;
use axum::Router;
use chrono::Utc;
use tracing::{debug, error, instrument};

use super::HookContext;
use crate::store::{MetricValue, Tags};

/// Fields of an upload written as points, under their own names.
const METRICS: [&str; 15] = [
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
    "current_humidity",
    "current_temp_f",
    "pressure",
];

struct PurpleAir {
    ctx: HookContext,
    header_name: String,
    header_value: String,
}

pub(crate) fn routes(ctx: HookContext, header_name: String, header_value: String) -> Router {
    Router::new()
        .route("/purpleair", any(handle))
        .with_state(Arc::new(PurpleAir {
            ctx,
            header_name,
            header_value,
        }))
}

impl PurpleAir {
    /// A missing header reads as empty, so an unconfigured secret accepts
    /// requests without one.
    fn authorized(&self, headers: &HeaderMap) -> bool {
        let sent = headers
            .get(self.header_name.as_str())
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        sent == self.header_value
    }
}

#[instrument(name = "endpoint", skip_all, fields(endpoint = "purpleair"))]
async fn handle(
    State(hook): State<Arc<PurpleAir>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if method != Method::POST || !hook.authorized(&headers) {
        return StatusCode::NOT_FOUND;
    }
    debug!(body = %String::from_utf8_lossy(&body), "upload");

    let reading: serde_json::Map<String, serde_json::Value> = match serde_json::from_slice(&body) {
        Ok(reading) => reading,
        Err(e) => {
            error!(error = %e, body = %String::from_utf8_lossy(&body), "decode error");
            return StatusCode::OK;
        }
    };

    let ts = Utc::now();
    let no_tags = Tags::new();
    for name in METRICS {
        if let Some(value) = reading.get(name).and_then(MetricValue::from_json) {
            hook.ctx
                .sink
                .write(&hook.ctx.token, ts, name, value, &no_tags)
                .await;
        }
    }

    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::WebhookSettings;
    use crate::store::MetricValue;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    fn settings() -> WebhookSettings {
        WebhookSettings {
            purpleair_header_name: "X-Sensor-Key".into(),
            purpleair_header_value: "s3cret".into(),
            ..Default::default()
        }
    }

    fn upload(key: Option<&str>, body: &str) -> Request<Body> {
        let mut req = Request::post("/purpleair");
        if let Some(key) = key {
            req = req.header("X-Sensor-Key", key);
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn listed_fields_are_written() {
        let (app, store) = app(settings());
        let body = r#"{"SensorId":"84:f3","pm2_5_atm":4.2,"current_temp_f":71,"pm2.5_aqi":17,"Geo":"PurpleAir-1"}"#;

        assert_eq!(send(app, upload(Some("s3cret"), body)).await, StatusCode::OK);

        let mut names: Vec<_> = store.points().into_iter().map(|p| p.name).collect();
        names.sort();
        assert_eq!(names, ["current_temp_f", "pm2_5_atm"]);
        assert_eq!(store.named("pm2_5_atm")[0].value, MetricValue::Float(4.2));
        assert_eq!(store.named("current_temp_f")[0].value, MetricValue::Int(71));
    }

    #[tokio::test]
    async fn wrong_or_missing_secret_is_404() {
        let (app, store) = app(settings());
        let body = r#"{"pm2_5_atm":4.2}"#;

        assert_eq!(send(app.clone(), upload(Some("nope"), body)).await, StatusCode::NOT_FOUND);
        assert_eq!(send(app.clone(), upload(None, body)).await, StatusCode::NOT_FOUND);
        assert_eq!(
            send(app, Request::put("/purpleair").header("X-Sensor-Key", "s3cret").body(Body::empty()).unwrap()).await,
            StatusCode::NOT_FOUND
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn bad_json_is_accepted() {
        let (app, store) = app(settings());
        assert_eq!(send(app, upload(Some("s3cret"), "[1,")).await, StatusCode::OK);
        assert!(store.is_empty());
    }
}
