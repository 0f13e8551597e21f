//! # Poller Integration Tests
//!
//! Points every poller at a local axum server impersonating its upstream
//! and checks the points that land in a `MemoryStore`. The last tests run
//! a real `ScheduledTask` against a rejecting upstream to observe the
//! cooldown end to end.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

mod support;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use lib_housemetrics::core::{PollError, Poller, SourceSchedule, TaskFactory};
use lib_housemetrics::ingestors::{
    AmbientWeather, AmbientWeatherSettings, Awair, AwairSettings, Flume, FlumeSettings, Particle,
    ParticleSettings, PurpleAir, PurpleAirSettings,
};
use lib_housemetrics::store::{MemoryStore, MetricSink, MetricValue, tags};
use lib_housemetrics::utils::pm25_to_aqi;

use support::{client, context, serve, trickle};

fn bearer(headers: &HeaderMap) -> &str {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

// --- Awair ---

async fn awair_latest(Path((kind, id)): Path<(String, String)>, headers: HeaderMap) -> Response {
    if bearer(&headers) != "Bearer awair-token" {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    assert_eq!((kind.as_str(), id.as_str()), ("awair-element", "1234"));
    Json(json!({
        "data": [{
            "timestamp": "2024-05-01T12:00:00.000Z",
            "score": 92,
            "sensors": [
                { "comp": "temp", "value": 21.5 },
                { "comp": "pm25", "value": 12 }
            ]
        }]
    }))
    .into_response()
}

async fn awair_upstream() -> String {
    serve(Router::new().route(
        "/v1/users/self/devices/{kind}/{id}/air-data/latest",
        get(awair_latest),
    ))
    .await
}

fn awair(base: String, token: &str) -> Awair {
    let mut poller = Awair::new(
        context("awair"),
        AwairSettings {
            token: token.into(),
            devices: vec!["office:awair-element:1234".into()],
            api_base: base,
        },
    );
    poller.init();
    poller
}

#[tokio::test]
async fn awair_writes_sensors_and_derived_aqi() {
    let base = awair_upstream().await;
    let store = MemoryStore::new();
    let token = CancellationToken::new();

    awair(base, "awair-token").poll(&token, &store).await.unwrap();

    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let office = tags([("device", "office")]);

    let temp = store.named("awair.temp");
    assert_eq!(temp.len(), 1);
    assert_eq!(temp[0].value, MetricValue::Float(21.5));
    assert_eq!(temp[0].ts, ts);
    assert_eq!(temp[0].tags, office);

    assert_eq!(store.named("awair.pm25")[0].value, MetricValue::Int(12));
    let aqi = store.named("awair.pm25_aqi");
    assert_eq!(aqi[0].value, MetricValue::Int(pm25_to_aqi(12.0)));
    assert_eq!(aqi[0].tags, office);
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn awair_bad_token_is_a_rejection() {
    let base = awair_upstream().await;
    let store = MemoryStore::new();
    let token = CancellationToken::new();

    let err = awair(base, "expired").poll(&token, &store).await.unwrap_err();

    assert!(err.is_rejected());
    assert!(store.is_empty());
}

// --- Ambient Weather ---

async fn ambient_devices(
    Path(mac): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if query.get("apiKey").map(String::as_str) != Some("api")
        || query.get("applicationKey").map(String::as_str) != Some("app")
    {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    assert_eq!(mac, "00:11:22:33:44:55");
    assert_eq!(query.get("limit").map(String::as_str), Some("1"));
    Json(json!([{
        "macAddress": mac,
        "lastData": {
            "dateutc": 1714564800000_i64,
            "tempf": 68.2,
            "humidity": 40,
            "windspeedmph": 3.1,
            "uv": 5
        }
    }]))
    .into_response()
}

#[tokio::test]
async fn ambient_weather_writes_the_last_reading() {
    let base = serve(Router::new().route("/v1/devices/{mac}", get(ambient_devices))).await;
    let store = MemoryStore::new();
    let token = CancellationToken::new();

    let mut poller = AmbientWeather::new(
        context("ambientweather"),
        AmbientWeatherSettings {
            mac: "00:11:22:33:44:55".into(),
            api_key: "api".into(),
            app_key: "app".into(),
            api_base: base,
        },
    );
    poller.init();
    poller.poll(&token, &store).await.unwrap();

    assert_eq!(store.len(), 9);
    let temp = store.named("outdoor_temp");
    assert_eq!(temp[0].value, MetricValue::Float(68.2));
    assert_eq!(temp[0].ts, Utc.timestamp_millis_opt(1714564800000).unwrap());
    assert_eq!(store.named("outdoor_hum")[0].value, MetricValue::Float(40.0));
    assert_eq!(store.named("uv_index")[0].value, MetricValue::Float(5.0));
    assert_eq!(store.named("rain_event_accum")[0].value, MetricValue::Float(0.0));
}

// --- Flume ---

async fn flume_token(Json(body): Json<Value>) -> Response {
    if body["grant_type"] != "password" || body["password"] != "hunter2" {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({ "success": true, "data": [{ "access_token": "flume-access" }] })).into_response()
}

async fn flume_query(
    Path((user, device)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if bearer(&headers) != "Bearer flume-access" {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    assert_eq!((user.as_str(), device.as_str()), ("u1", "d1"));
    let query = &body["queries"][0];
    assert_eq!(query["bucket"], "MIN");
    assert_eq!(query["units"], "GALLONS");
    assert!(query["since_datetime"].is_string() && query["until_datetime"].is_string());

    Json(json!({
        "data": [{
            "query": [
                { "datetime": "2024-05-01 05:00:00", "value": 1.5 },
                { "datetime": "2024-05-01 05:01:00", "value": 0 }
            ]
        }]
    }))
    .into_response()
}

fn flume(base: String, password: &str) -> Flume {
    let mut poller = Flume::new(
        context("flume"),
        FlumeSettings {
            client_id: "id".into(),
            client_secret: "secret".into(),
            username: "me".into(),
            password: password.into(),
            user_id: "u1".into(),
            device_id: "d1".into(),
            api_base: base,
        },
    );
    poller.init();
    poller
}

async fn flume_upstream() -> String {
    serve(
        Router::new()
            .route("/oauth/token", post(flume_token))
            .route("/users/{user}/devices/{device}/query", post(flume_query)),
    )
    .await
}

#[tokio::test]
async fn flume_exchanges_a_token_then_queries_usage() {
    let base = flume_upstream().await;
    let store = MemoryStore::new();
    let token = CancellationToken::new();

    flume(base, "hunter2").poll(&token, &store).await.unwrap();

    let usage = store.named("flume.usage");
    assert_eq!(usage.len(), 2);
    assert_eq!(usage[0].value, MetricValue::Float(1.5));
    assert_eq!(usage[1].value, MetricValue::Int(0));
    // Pacific daylight time in May.
    assert_eq!(usage[0].ts, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    assert_eq!(usage[0].tags, tags([("unit", "gallons")]));
}

#[tokio::test]
async fn flume_token_refusal_is_a_rejection() {
    let base = flume_upstream().await;
    let store = MemoryStore::new();
    let token = CancellationToken::new();

    let err = flume(base, "wrong").poll(&token, &store).await.unwrap_err();

    assert!(err.is_rejected());
    assert!(store.is_empty());
}

// --- PurpleAir ---

#[tokio::test]
async fn purpleair_prefixes_local_readings() {
    let base = serve(Router::new().route(
        "/json",
        get(|| async {
            Json(json!({
                "SensorId": "84:f3:eb:00:00:00",
                "DateTime": "2024/05/01T12:00:00z",
                "pm2_5_atm": 4.2,
                "pm2.5_aqi": 17,
                "current_temp_f": 71,
                "Geo": "PurpleAir-1"
            }))
        }),
    ))
    .await;
    let store = MemoryStore::new();
    let token = CancellationToken::new();

    let mut poller = PurpleAir::new(
        context("purpleair"),
        PurpleAirSettings {
            host: base.trim_start_matches("http://").to_string(),
        },
    );
    poller.init();
    poller.poll(&token, &store).await.unwrap();

    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    assert_eq!(store.len(), 3);
    assert_eq!(store.named("purpleair.pm2_5_atm")[0].value, MetricValue::Float(4.2));
    assert_eq!(store.named("purpleair.pm2.5_aqi")[0].value, MetricValue::Int(17));
    assert!(store.points().iter().all(|p| p.ts == ts));
}

#[tokio::test]
async fn purpleair_without_timestamp_is_invalid() {
    let base = serve(Router::new().route("/json", get(|| async { Json(json!({ "pm2_5_atm": 4.2 })) }))).await;
    let store = MemoryStore::new();
    let token = CancellationToken::new();

    let mut poller = PurpleAir::new(
        context("purpleair"),
        PurpleAirSettings {
            host: base.trim_start_matches("http://").to_string(),
        },
    );
    poller.init();
    let err = poller.poll(&token, &store).await.unwrap_err();

    assert!(matches!(err, PollError::Invalid(_)));
    assert!(store.is_empty());
}

// --- Particle ---

async fn particle_events(Query(query): Query<HashMap<String, String>>) -> Response {
    if query.get("access_token").map(String::as_str) != Some("particle-auth") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let event = |kind: &str, value: &str| {
        vec![
            format!("event: {kind}\n"),
            format!(
                "data: {{\"data\":\"{value}\",\"ttl\":60,\"published_at\":\"2024-05-01T12:00:00.000Z\",\"coreid\":\"core-7\"}}\n\n"
            ),
        ]
    };
    let mut chunks = vec![":ok\n\n".to_string()];
    chunks.extend(event("lum-full-avg", "123.5"));
    chunks.extend(event("spark/status", "online"));
    chunks.extend(event("lum-full-avg", "not-a-number"));
    trickle(chunks).into_response()
}

fn particle(base: &str, auth: &str) -> Particle {
    let mut poller = Particle::new(
        context("particle"),
        ParticleSettings {
            stream_url: format!("{base}/v1/devices/events"),
            auth: auth.into(),
            event_types: vec!["lum-full-avg".into()],
        },
    );
    poller.init();
    poller
}

#[tokio::test]
async fn particle_records_subscribed_events_until_the_stream_ends() {
    let base = serve(Router::new().route("/v1/devices/events", get(particle_events))).await;
    let store = MemoryStore::new();
    let token = CancellationToken::new();

    particle(&base, "particle-auth").poll(&token, &store).await.unwrap();

    let points = store.points();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].name, "particle.lum-full-avg");
    assert_eq!(points[0].value, MetricValue::Float(123.5));
    assert_eq!(points[0].tags, tags([("coreid", "core-7")]));
    assert_eq!(points[0].ts, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
}

#[tokio::test]
async fn particle_open_failure_is_a_stream_error() {
    let base = serve(Router::new().route("/v1/devices/events", get(particle_events))).await;
    let store = MemoryStore::new();
    let token = CancellationToken::new();

    let err = particle(&base, "wrong").poll(&token, &store).await.unwrap_err();

    assert!(matches!(err, PollError::Stream(_)));
    assert!(store.is_empty());
}

// --- Scheduling ---

#[derive(Clone, Default)]
struct Hits(Arc<AtomicUsize>);

async fn throttled(State(hits): State<Hits>) -> StatusCode {
    hits.0.fetch_add(1, Ordering::SeqCst);
    StatusCode::TOO_MANY_REQUESTS
}

#[tokio::test]
async fn rejected_poll_pauses_the_task_for_the_cooldown() {
    let hits = Hits::default();
    let base = serve(
        Router::new()
            .route("/json", get(throttled))
            .with_state(hits.clone()),
    )
    .await;
    let store: Arc<dyn MetricSink> = Arc::new(MemoryStore::new());
    let factory =
        TaskFactory::new(client(), Arc::clone(&store)).with_cooldown(Duration::from_millis(400));

    let host = base.trim_start_matches("http://").to_string();
    let task = factory.make_looper(
        "purpleair",
        SourceSchedule::every(Duration::from_millis(50)),
        |ctx| PurpleAir::new(ctx, PurpleAirSettings { host }),
    );
    let stats = task.stats();
    let token = CancellationToken::new();
    let handle = tokio::spawn(task.run(token.clone(), store));

    tokio::time::sleep(Duration::from_millis(250)).await;
    token.cancel();
    handle.await.unwrap();

    // One request, then the rest of the window spent cooling down.
    assert_eq!(hits.0.load(Ordering::SeqCst), 1);
    assert_eq!(stats.rejected(), 1);
    assert_eq!(stats.errors(), 0);
}

#[tokio::test]
async fn healthy_upstream_is_polled_on_the_cadence() {
    let hits = Hits::default();
    let counter = hits.clone();
    let base = serve(Router::new().route(
        "/json",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.0.fetch_add(1, Ordering::SeqCst);
                Json(json!({ "DateTime": "2024/05/01T12:00:00z", "pressure": 1012.5 }))
            }
        }),
    ))
    .await;
    let memory = Arc::new(MemoryStore::new());
    let sink: Arc<dyn MetricSink> = memory.clone();
    let factory = TaskFactory::new(client(), Arc::clone(&sink));

    let host = base.trim_start_matches("http://").to_string();
    let task = factory.make_looper(
        "purpleair",
        SourceSchedule::every(Duration::from_millis(100)),
        |ctx| PurpleAir::new(ctx, PurpleAirSettings { host }),
    );
    let token = CancellationToken::new();
    let handle = tokio::spawn(task.run(token.clone(), sink));

    tokio::time::sleep(Duration::from_millis(350)).await;
    token.cancel();
    handle.await.unwrap();

    let polls = hits.0.load(Ordering::SeqCst);
    assert!((3..=5).contains(&polls), "{polls} polls");
    assert_eq!(memory.named("purpleair.pressure").len(), polls);
}
