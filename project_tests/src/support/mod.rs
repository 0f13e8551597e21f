//! Shared helpers: local axum upstreams and a short-timeout client.

#![allow(dead_code)]

use std::convert::Infallible;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use futures_util::stream;
use tokio::net::TcpListener;

use lib_housemetrics::core::PollerContext;
use lib_housemetrics::retrieve::HttpClient;

/// Serves `app` on an ephemeral local port and returns its base URL.
pub async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn client() -> HttpClient {
    HttpClient::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

pub fn context(name: &str) -> PollerContext {
    PollerContext {
        name: name.to_string(),
        client: client(),
    }
}

/// A response body that yields `chunks` one at a time with a short pause
/// before each, then ends.
pub fn trickle(chunks: Vec<String>) -> Body {
    let body = stream::unfold(chunks.into_iter(), |mut rest| async move {
        let chunk = rest.next()?;
        tokio::time::sleep(Duration::from_millis(25)).await;
        Some((Ok::<_, Infallible>(Bytes::from(chunk)), rest))
    });
    Body::from_stream(body)
}
