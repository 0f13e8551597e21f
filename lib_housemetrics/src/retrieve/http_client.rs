//! # HTTP Retrieval Utilities
//!
//! An asynchronous request helper around `reqwest`. Every call takes a
//! *request mutator*: a closure that receives the outbound `reqwest::Request`
//! and points it at the right URL with the right headers. That closure is the
//! only place endpoint-specific auth or query parameters live, so the same
//! primitive serves every upstream.
//!
//! ## Status classification
//! Any response status outside `[200, 300)` short-circuits as
//! [`RequestError::Rejected`] before the body is read. Decode failures are
//! reported separately as [`RequestError::Decode`] (with the offending body),
//! transport failures as [`RequestError::Transport`].
//!
//! ## Cancellation
//! Every exchange races the caller's `CancellationToken`. A token that fires
//! while the request is in flight drops the request future (aborting the
//! connection) and yields [`RequestError::Cancelled`].

use std::time::Duration;

use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Request, Response, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Placeholder destination; mutators are expected to replace it.
const BLANK_URL: &str = "about:blank";

/// Per-request timeout applied to unary exchanges. Streaming GETs never time out.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_USER_AGENT: &str = concat!("housemetrics/", env!("CARGO_PKG_VERSION"));

/// Everything that can go wrong while talking to an upstream.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The upstream answered with a non-2xx status. This is the "failed
    /// request" sentinel the scheduler cools down on.
    #[error("failed request: upstream answered {status}")]
    Rejected {
        /// The status code the upstream returned.
        status: StatusCode,
    },

    /// Connection, timeout or body-read failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body did not match the expected shape.
    #[error("could not decode response body: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
        /// The raw body, kept for diagnosis.
        body: String,
    },

    /// The request body could not be serialized.
    #[error("could not encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    /// The cancellation token fired before the exchange completed.
    #[error("request cancelled")]
    Cancelled,

    /// A URL could not be built.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl RequestError {
    /// `true` when the upstream rejected the request with a non-2xx status.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Mutator that only sets the destination URL.
pub fn url_opt(url: Url) -> impl FnOnce(&mut Request) {
    move |req: &mut Request| {
        *req.url_mut() = url;
    }
}

/// Mutator that sets the destination URL and a `Bearer` authorization header.
pub fn bearer_opt(url: Url, token: &str) -> impl FnOnce(&mut Request) {
    let header = HeaderValue::from_str(&format!("Bearer {token}"));
    move |req: &mut Request| {
        *req.url_mut() = url;
        match header {
            Ok(value) => {
                req.headers_mut().insert(AUTHORIZATION, value);
            }
            Err(e) => warn!(error = %e, "bearer token is not a valid header value"),
        }
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpClientBuilder {
    user_agent: String,
    timeout: Duration,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl HttpClientBuilder {
    /// Overrides the `User-Agent` header sent with every request.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Overrides the per-request timeout of unary exchanges.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the client.
    ///
    /// No client-wide timeout is configured: it would also cut long-lived
    /// streaming bodies. Unary exchanges set their own.
    pub fn build(self) -> Result<HttpClient, RequestError> {
        let inner = reqwest::Client::builder()
            .user_agent(self.user_agent)
            .build()?;
        Ok(HttpClient {
            inner,
            timeout: self.timeout,
        })
    }
}

/// # HTTP Client
///
/// A cheap-to-clone handle shared by every poller. Connection pooling is
/// whatever `reqwest` provides by default.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    timeout: Duration,
}

impl HttpClient {
    /// Creates a client with default settings.
    pub fn new() -> Result<Self, RequestError> {
        HttpClientBuilder::default().build()
    }

    /// Returns a builder for a customised client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Issues a GET and decodes the JSON response into `T`.
    pub async fn get_json<T, F>(&self, token: &CancellationToken, mutate: F) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
        F: FnOnce(&mut Request),
    {
        let mut req = blank_request(Method::GET)?;
        *req.timeout_mut() = Some(self.timeout);
        mutate(&mut req);

        let response = self.execute(token, req).await?;
        read_json(token, response, "GetJSON").await
    }

    /// Serializes `body` as JSON, POSTs it and decodes the JSON response into `T`.
    pub async fn send_json<B, T, F>(
        &self,
        token: &CancellationToken,
        body: &B,
        mutate: F,
    ) -> Result<T, RequestError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
        F: FnOnce(&mut Request),
    {
        let bytes = serde_json::to_vec(body).map_err(RequestError::Encode)?;
        debug!(body = %String::from_utf8_lossy(&bytes), "SendJSON req body");

        let mut req = blank_request(Method::POST)?;
        *req.timeout_mut() = Some(self.timeout);
        req.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *req.body_mut() = Some(bytes.into());
        mutate(&mut req);

        let response = self.execute(token, req).await?;
        read_json(token, response, "SendJSON").await
    }

    /// POSTs a raw body and only checks the status; the response body is discarded.
    pub async fn send_body<F>(
        &self,
        token: &CancellationToken,
        body: String,
        content_type: &'static str,
        mutate: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(&mut Request),
    {
        let mut req = blank_request(Method::POST)?;
        *req.timeout_mut() = Some(self.timeout);
        req.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        *req.body_mut() = Some(body.into());
        mutate(&mut req);

        self.execute(token, req).await.map(drop)
    }

    /// Issues a GET and hands back the live response for line-oriented
    /// consumption. The body is not buffered and the request has no timeout.
    pub async fn stream<F>(&self, token: &CancellationToken, mutate: F) -> Result<Response, RequestError>
    where
        F: FnOnce(&mut Request),
    {
        let mut req = blank_request(Method::GET)?;
        mutate(&mut req);
        self.execute(token, req).await
    }

    /// Sends the request under the token and classifies the status.
    async fn execute(&self, token: &CancellationToken, req: Request) -> Result<Response, RequestError> {
        let method = req.method().clone();
        let url = redacted(req.url());

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(RequestError::Cancelled),
            res = self.inner.execute(req) => res?,
        };

        let status = response.status();
        if !status.is_success() {
            debug!(%method, %url, %status, "upstream rejected request");
            return Err(RequestError::Rejected { status });
        }

        Ok(response)
    }
}

fn blank_request(method: Method) -> Result<Request, RequestError> {
    Ok(Request::new(method, Url::parse(BLANK_URL)?))
}

/// Reads the whole body under the token and decodes it, logging it either way.
async fn read_json<T: DeserializeOwned>(
    token: &CancellationToken,
    response: Response,
    label: &'static str,
) -> Result<T, RequestError> {
    let body = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(RequestError::Cancelled),
        text = response.text() => text?,
    };
    debug!(body = %body, "{label} recv body");

    serde_json::from_str(&body).map_err(|source| {
        error!(error = %source, body = %body, "{label} decode error");
        RequestError::Decode { source, body }
    })
}

/// Drops the query string so credentials passed as parameters stay out of logs.
fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request {
        blank_request(Method::GET).unwrap()
    }

    #[test]
    fn url_opt_sets_destination_only() {
        let mut req = request();
        url_opt(Url::parse("https://example.test/air?limit=1").unwrap())(&mut req);

        assert_eq!(req.url().as_str(), "https://example.test/air?limit=1");
        assert!(req.headers().is_empty());
    }

    #[test]
    fn bearer_opt_sets_destination_and_authorization() {
        let mut req = request();
        bearer_opt(Url::parse("https://example.test/devices").unwrap(), "token-123")(&mut req);

        assert_eq!(req.url().host_str(), Some("example.test"));
        assert_eq!(
            req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Bearer token-123")
        );
    }

    #[test]
    fn only_rejected_is_the_sentinel() {
        let rejected = RequestError::Rejected {
            status: StatusCode::SERVICE_UNAVAILABLE,
        };
        assert!(rejected.is_rejected());
        assert!(!RequestError::Cancelled.is_rejected());

        let decode = RequestError::Decode {
            source: serde_json::from_str::<u32>("nope").unwrap_err(),
            body: "nope".into(),
        };
        assert!(!decode.is_rejected());
    }

    #[test]
    fn redacted_strips_query_credentials() {
        let url = Url::parse("https://api.example.test/v1/devices/x?apiKey=secret").unwrap();
        assert_eq!(redacted(&url), "https://api.example.test/v1/devices/x");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_before_network() {
        let client = HttpClient::new().unwrap();
        let token = CancellationToken::new();
        token.cancel();

        // Port 9 (discard) on a non-routable address: never reached because
        // the cancelled branch is polled first.
        let err = client
            .get_json::<serde_json::Value, _>(
                &token,
                url_opt(Url::parse("http://10.255.255.1:9/").unwrap()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RequestError::Cancelled));
    }
}
