use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::routing::any;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, error, instrument};

use super::HookContext;
use crate::store::{tags, MetricValue};

struct Rachio {
    ctx: HookContext,
    external_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ZoneEvent {
    timestamp: String,
    zone_name: String,
    sub_type: String,
    zone_run_state: String,
    external_id: String,
}

pub(crate) fn routes(ctx: HookContext, external_id: String) -> Router {
    Router::new()
        .route("/rachio/webhook", any(handle))
        .with_state(Arc::new(Rachio { ctx, external_id }))
}

/// 1 when a zone starts, 0 when it completes, -1 for anything else.
fn zone_status(sub_type: &str) -> i64 {
    match sub_type {
        "ZONE_STARTED" => 1,
        "ZONE_COMPLETED" => 0,
        _ => -1,
    }
}

#[instrument(name = "endpoint", skip_all, fields(endpoint = "rachio"))]
async fn handle(State(hook): State<Arc<Rachio>>, method: Method, body: Bytes) -> StatusCode {
    if method != Method::POST {
        return StatusCode::NOT_FOUND;
    }

    let event: ZoneEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            if !body.is_empty() {
                error!(error = %e, event = %String::from_utf8_lossy(&body), "event decode error");
            }
            return StatusCode::OK;
        }
    };

    if event.external_id != hook.external_id {
        return StatusCode::NOT_FOUND;
    }

    let status = zone_status(&event.sub_type);
    if status < 0 {
        error!(event = %String::from_utf8_lossy(&body), "invalid event");
    }
    debug!(zone = %event.zone_name, state = %event.zone_run_state, at = %event.timestamp, status, "zone event");

    let zone = tags([("name", event.zone_name)]);
    hook.ctx
        .sink
        .write(&hook.ctx.token, Utc::now(), "sprinkler", MetricValue::Int(status), &zone)
        .await;

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
            rachio_external_id: "hook-secret".into(),
            ..Default::default()
        }
    }

    fn event(sub_type: &str, external_id: &str) -> String {
        format!(
            r#"{{"timestamp":"2024-06-01T06:00:00Z","zoneName":"Front Lawn","subType":"{sub_type}","zoneRunState":"STARTED","externalId":"{external_id}"}}"#
        )
    }

    #[tokio::test]
    async fn zone_started_writes_one() {
        let (app, store) = app(settings());
        let status = send(app, post("/rachio/webhook", &event("ZONE_STARTED", "hook-secret"))).await;

        assert_eq!(status, StatusCode::OK);
        let points = store.named("sprinkler");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, MetricValue::Int(1));
        assert_eq!(points[0].tags["name"], "Front Lawn");
    }

    #[tokio::test]
    async fn zone_completed_and_unknown_subtypes() {
        let (app, store) = app(settings());
        send(app.clone(), post("/rachio/webhook", &event("ZONE_COMPLETED", "hook-secret"))).await;
        send(app, post("/rachio/webhook", &event("SCHEDULE_STARTED", "hook-secret"))).await;

        let values: Vec<_> = store.named("sprinkler").into_iter().map(|p| p.value).collect();
        assert_eq!(values, [MetricValue::Int(0), MetricValue::Int(-1)]);
    }

    #[tokio::test]
    async fn wrong_secret_or_method_is_404() {
        let (app, store) = app(settings());
        let wrong = send(app.clone(), post("/rachio/webhook", &event("ZONE_STARTED", "guess"))).await;
        let get = send(
            app,
            Request::get("/rachio/webhook").body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(wrong, StatusCode::NOT_FOUND);
        assert_eq!(get, StatusCode::NOT_FOUND);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn undecodable_body_is_accepted_and_ignored() {
        let (app, store) = app(settings());
        let status = send(app, post("/rachio/webhook", "{not json")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(store.is_empty());
    }
}
