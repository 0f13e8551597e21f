//! # Retrieval Integration Tests
//!
//! Drives the request helper, the event stream client and the InfluxDB
//! writer against axum servers bound to ephemeral local ports, so every
//! byte crosses a real socket.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

mod support;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Json;
use chrono::{TimeZone, Utc};
use reqwest::Url;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use lib_housemetrics::retrieve::{EventStream, RequestError, bearer_opt, url_opt};
use lib_housemetrics::store::influx_store::encode_line;
use lib_housemetrics::store::{InfluxSettings, InfluxStore, MetricSink, MetricValue, Tags, tags};

use support::{client, serve, trickle};

fn at(base: &str, path: &str) -> Url {
    Url::parse(&format!("{base}{path}")).unwrap()
}

async fn echo_auth(headers: HeaderMap) -> Json<Value> {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    Json(json!({ "auth": auth }))
}

async fn echo_body(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({ "got": body }))
}

fn upstream() -> Router {
    Router::new()
        .route("/auth", get(echo_auth))
        .route("/echo", post(echo_body))
        .route("/down", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
        .route("/html", get(|| async { "<html>not json</html>" }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                "late"
            }),
        )
}

#[tokio::test]
async fn get_json_applies_the_mutator() {
    let base = serve(upstream()).await;
    let token = CancellationToken::new();

    let reply: Value = client()
        .get_json(&token, bearer_opt(at(&base, "/auth"), "s3cret"))
        .await
        .unwrap();

    assert_eq!(reply["auth"], "Bearer s3cret");
}

#[tokio::test]
async fn send_json_posts_the_encoded_body() {
    let base = serve(upstream()).await;
    let token = CancellationToken::new();

    let reply: Value = client()
        .send_json(&token, &json!({ "grant_type": "password" }), url_opt(at(&base, "/echo")))
        .await
        .unwrap();

    assert_eq!(reply["got"]["grant_type"], "password");
}

#[tokio::test]
async fn non_success_status_is_rejected() {
    let base = serve(upstream()).await;
    let token = CancellationToken::new();

    let err = client()
        .get_json::<Value, _>(&token, url_opt(at(&base, "/down")))
        .await
        .unwrap_err();

    assert!(err.is_rejected());
    assert!(matches!(err, RequestError::Rejected { status } if status == StatusCode::SERVICE_UNAVAILABLE));
}

#[tokio::test]
async fn undecodable_body_is_a_decode_error() {
    let base = serve(upstream()).await;
    let token = CancellationToken::new();

    let err = client()
        .get_json::<Value, _>(&token, url_opt(at(&base, "/html")))
        .await
        .unwrap_err();

    assert!(!err.is_rejected());
    assert!(matches!(err, RequestError::Decode { .. }));
}

#[tokio::test]
async fn cancellation_aborts_an_in_flight_request() {
    let base = serve(upstream()).await;
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = client()
        .get_json::<Value, _>(&token, url_opt(at(&base, "/slow")))
        .await
        .unwrap_err();

    assert!(matches!(err, RequestError::Cancelled));
}

fn event_source() -> Router {
    Router::new()
        .route(
            "/events",
            get(|| async {
                trickle(vec![
                    "event: temp\n".into(),
                    "data: 21.5\n\n".into(),
                    ": keepalive\n".into(),
                    "event: hum\r\n".into(),
                    "data: 40\r\n".into(),
                ])
            }),
        )
        .route("/forbidden", get(|| async { StatusCode::FORBIDDEN }))
}

#[tokio::test]
async fn event_stream_reads_a_live_body_to_the_end() {
    let base = serve(event_source()).await;
    let token = CancellationToken::new();

    let mut events = EventStream::open(&client(), &token, url_opt(at(&base, "/events")))
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(event) = events.next_event().await {
        seen.push((event.kind, event.data));
    }

    assert_eq!(
        seen,
        [
            ("temp".to_string(), "21.5".to_string()),
            ("hum".to_string(), "40".to_string()),
        ]
    );
    events.terminated().await;
    let stats = events.stats();
    assert_eq!(stats.delivered(), 2);
    assert!(stats.is_closed());
    assert!(!token.is_cancelled());
}

#[tokio::test]
async fn event_stream_stops_when_the_token_is_cancelled() {
    let app = Router::new().route(
        "/forever",
        get(|| async { trickle((0..1000).map(|i| format!("event: tick\ndata: {i}\n")).collect()) }),
    );
    let base = serve(app).await;
    let token = CancellationToken::new();

    let mut events = EventStream::open(&client(), &token, url_opt(at(&base, "/forever")))
        .await
        .unwrap();
    assert!(events.next_event().await.is_some());

    token.cancel();
    let drained = tokio::time::timeout(Duration::from_secs(2), async {
        while events.next_event().await.is_some() {}
    })
    .await;

    assert!(drained.is_ok(), "stream kept delivering after cancellation");
}

#[tokio::test]
async fn event_stream_open_reports_rejection() {
    let base = serve(event_source()).await;
    let token = CancellationToken::new();

    let err = EventStream::open(&client(), &token, url_opt(at(&base, "/forbidden")))
        .await
        .err()
        .unwrap();

    assert!(err.is_rejected());
}

#[derive(Debug, Clone)]
struct Written {
    query: HashMap<String, String>,
    auth: String,
    content_type: String,
    body: String,
}

type Writes = Arc<Mutex<Vec<Written>>>;

async fn record_write(
    State(writes): State<Writes>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let fail = body.starts_with("broken");
    writes.lock().unwrap().push(Written {
        query,
        auth: header("authorization"),
        content_type: header("content-type"),
        body,
    });
    if fail {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn influx() -> (InfluxStore, Writes) {
    let writes = Writes::default();
    let app = Router::new()
        .route("/api/v2/write", post(record_write))
        .with_state(Arc::clone(&writes));
    let base = serve(app).await;

    let store = InfluxStore::new(
        client(),
        InfluxSettings {
            dest: format!("{base}/"),
            bucket: "home".into(),
            token: "t0k3n".into(),
            org: "house".into(),
        },
    );
    store.init().unwrap();
    (store, writes)
}

#[tokio::test]
async fn influx_store_posts_line_protocol() {
    let (store, writes) = influx().await;
    let token = CancellationToken::new();
    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let device = tags([("device", "office")]);

    store
        .write(&token, ts, "awair.temp", MetricValue::Float(21.5), &device)
        .await;

    let writes = writes.lock().unwrap().clone();
    assert_eq!(writes.len(), 1);
    let write = &writes[0];
    assert_eq!(write.query["org"], "house");
    assert_eq!(write.query["bucket"], "home");
    assert_eq!(write.query["precision"], "ns");
    assert_eq!(write.auth, "Token t0k3n");
    assert!(write.content_type.starts_with("text/plain"));
    assert_eq!(
        write.body,
        encode_line(ts, "awair.temp", &MetricValue::Float(21.5), &device).unwrap()
    );
}

#[tokio::test]
async fn influx_store_survives_a_failed_write() {
    let (store, writes) = influx().await;
    let token = CancellationToken::new();
    let ts = Utc::now();
    let none = Tags::new();

    store
        .write(&token, ts, "broken", MetricValue::Int(1), &none)
        .await;
    store
        .write(&token, ts, "watts", MetricValue::Float(512.0), &none)
        .await;

    let names: Vec<_> = writes
        .lock()
        .unwrap()
        .iter()
        .map(|w| w.body.split(' ').next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(names, ["broken", "watts"]);
}

#[test]
fn influx_store_init_names_the_missing_setting() {
    let store = InfluxStore::new(
        client(),
        InfluxSettings {
            dest: "http://localhost:8086".into(),
            bucket: "home".into(),
            token: String::new(),
            org: "house".into(),
        },
    );

    let err = store.init().unwrap_err();
    assert!(err.to_string().contains("influxdb-token"), "{err}");
}
