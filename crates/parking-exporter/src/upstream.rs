//! Client for the parking guidance layer of the Konstanz open data platform.

use reqwest::{StatusCode, Url};
use serde::{de, Deserialize};
use thiserror::Error;

use std::{future::Future, time::Duration};

use parking_metrics::UpstreamRecord;

/// Query endpoint of the parking guidance system feature layer.
pub const DEFAULT_UPSTREAM_URL: &str = "https://services.gis.konstanz.digital/geoportal/rest/services/Fachdaten/Parkplaetze_Parkleitsystem/MapServer/0/query";

/// Query parameters requesting all features with all fields as JSON.
const QUERY_PARAMS: [(&str, &str); 4] = [
    ("where", "1=1"),
    ("outFields", "*"),
    ("SR", "4326"),
    ("f", "json"),
];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Error fetching records from the upstream.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or timed out.
    #[error("failed sending request: {0}")]
    Transport(#[source] reqwest::Error),
    /// The upstream responded with a non-success HTTP status.
    #[error("upstream responded with HTTP status {0}")]
    Status(StatusCode),
    /// The response body could not be read.
    #[error("failed reading response body: {0}")]
    Body(#[source] reqwest::Error),
    /// The response body is not valid JSON or doesn't match the expected schema.
    #[error("failed parsing response: {0}")]
    Parse(#[from] serde_json::Error),
    /// The upstream reported an error in the response payload.
    #[error("upstream reported error {code}: {message}")]
    Upstream {
        /// Error code reported by the upstream.
        code: i64,
        /// Human-readable error message.
        message: String,
    },
}

impl FetchError {
    /// Returns a short stable identifier of the error kind suitable for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Status(_) => "status",
            Self::Body(_) => "body",
            Self::Parse(_) => "parse",
            Self::Upstream { .. } => "upstream",
        }
    }
}

/// Source of upstream records fetched once per refresh cycle.
pub trait RecordSource: Send + Sync {
    /// Fetches all records. No retries are performed.
    fn fetch(&self) -> impl Future<Output = Result<Vec<UpstreamRecord>, FetchError>> + Send;
}

/// Response of the feature layer query. On failure, the platform responds with HTTP 200
/// and an `error` object instead of features.
#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    features: Option<Vec<Feature>>,
    #[serde(default)]
    error: Option<UpstreamErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    attributes: UpstreamRecord,
}

#[derive(Debug, Deserialize)]
struct UpstreamErrorPayload {
    code: i64,
    #[serde(default)]
    message: String,
}

impl QueryResponse {
    fn parse(raw: &[u8]) -> Result<Vec<UpstreamRecord>, FetchError> {
        let response: Self = serde_json::from_slice(raw)?;
        if let Some(error) = response.error {
            return Err(FetchError::Upstream {
                code: error.code,
                message: error.message,
            });
        }
        let features = response
            .features
            .ok_or_else(|| <serde_json::Error as de::Error>::missing_field("features"))?;
        Ok(features
            .into_iter()
            .map(|feature| feature.attributes)
            .collect())
    }
}

/// HTTP client for the upstream feature layer.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    url: Url,
}

impl UpstreamClient {
    /// Creates a client querying the specified feature layer endpoint. Each request will time out
    /// after `request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized (e.g., if the TLS backend
    /// cannot be loaded).
    pub fn new(endpoint: Url, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(request_timeout))
            .user_agent(concat!("parking-exporter/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut url = endpoint;
        url.query_pairs_mut().extend_pairs(QUERY_PARAMS);
        Ok(Self { client, url })
    }

    /// Returns the full query URL used by this client.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl RecordSource for UpstreamClient {
    async fn fetch(&self) -> Result<Vec<UpstreamRecord>, FetchError> {
        tracing::debug!(url = %self.url, "Sending request to upstream");
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(FetchError::Transport)?;

        let status = response.status();
        tracing::debug!(%status, "Received upstream response");
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.bytes().await.map_err(FetchError::Body)?;
        let records = QueryResponse::parse(&body)?;
        tracing::debug!(
            records.len = records.len(),
            body.len = body.len(),
            "Parsed upstream response"
        );
        Ok(records)
    }
}
