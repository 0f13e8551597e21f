//! # Webhook Endpoints
//!
//! Stateless translators from pushed HTTP requests to metric points. Each
//! handler validates method and shared secret (404 on mismatch), decodes its
//! source-specific payload, writes zero or more points and answers 200.
//! A body that cannot be decoded is logged and still answered with 200:
//! the sender cannot fix it by retrying.
//!
//! ## Contained Modules:
//! - **`rachio`**: sprinkler zone start/stop events (`/rachio/webhook`).
//! - **`rainforest`**: instantaneous power demand from a Rainforest Eagle
//!   gateway (`/rainforest`).
//! - **`purpleair`**: PurpleAir sensor uploads (`/purpleair`).

use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::store::MetricSink;

/// Rachio sprinkler webhook.
pub mod rachio;
/// Rainforest Eagle demand webhook.
pub mod rainforest;
/// PurpleAir upload webhook.
pub mod purpleair;

/// Shared secrets of the webhook senders.
#[derive(Debug, Clone, Default)]
pub struct WebhookSettings {
    /// Rachio `externalId` expected in every event.
    pub rachio_external_id: String,
    /// Header PurpleAir must send...
    pub purpleair_header_name: String,
    /// ...with this value.
    pub purpleair_header_value: String,
}

/// Everything a handler needs, shared across requests.
#[derive(Clone)]
pub(crate) struct HookContext {
    sink: Arc<dyn MetricSink>,
    /// Cancelled at shutdown; handed to sink writes.
    token: CancellationToken,
}

/// Mounts every webhook on one router.
pub fn router(sink: Arc<dyn MetricSink>, settings: &WebhookSettings, token: CancellationToken) -> Router {
    let ctx = HookContext { sink, token };
    Router::new()
        .merge(rachio::routes(ctx.clone(), settings.rachio_external_id.clone()))
        .merge(rainforest::routes(ctx.clone()))
        .merge(purpleair::routes(
            ctx,
            settings.purpleair_header_name.clone(),
            settings.purpleair_header_value.clone(),
        ))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn unknown_paths_are_404() {
        let (app, store) = app(WebhookSettings::default());
        assert_eq!(send(app, post("/nope", "{}")).await, StatusCode::NOT_FOUND);
        assert!(store.is_empty());
    }
}
