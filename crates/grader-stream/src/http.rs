//! Opening the streaming evaluation request over HTTP.
//!
//! The caller supplies the already-serialized JSON body; this module only
//! POSTs it and hands the response body to the driver as a byte stream.

use std::time::Duration;

use futures::StreamExt as _;
use tracing::debug;

use crate::driver::TransportResponse;
use crate::errors::{MonitorError, TransportError};

/// Opens a streaming response for a serialized request body.
#[async_trait::async_trait]
pub trait TransportOpener: Send + Sync {
    async fn open(&self, body: String) -> Result<TransportResponse, TransportError>;
}

/// Configuration for `HttpTransport`.
#[derive(Clone, Debug)]
pub struct HttpTransportConfig {
    /// Endpoint receiving the batch evaluation POST.
    pub url: String,
    /// Extra request headers, sent as given.
    pub headers: Vec<(String, String)>,
    /// Limit for establishing the connection.
    ///
    /// There is no limit on the response as a whole; batch jobs may stream
    /// for a long time.
    pub connect_timeout: Duration,
}

impl HttpTransportConfig {
    /// Creates a config for `url` with a 30 second connect timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Builds a config from `GRADER_STREAM_URL`.
    pub fn from_env() -> Result<Self, MonitorError> {
        let url = std::env::var("GRADER_STREAM_URL").unwrap_or_default();
        if url.trim().is_empty() {
            return Err(MonitorError::Config(
                "missing GRADER_STREAM_URL for the evaluation endpoint".into(),
            ));
        }
        Ok(Self::new(url.trim()))
    }

    /// Adds a request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// `reqwest`-backed opener that POSTs JSON and streams the response body.
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, MonitorError> {
        if config.url.trim().is_empty() {
            return Err(MonitorError::Config("transport url must not be empty".into()));
        }
        reqwest::Url::parse(&config.url)
            .map_err(|e| MonitorError::Config(format!("invalid transport url `{}`: {e}", config.url)))?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| MonitorError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl TransportOpener for HttpTransport {
    async fn open(&self, body: String) -> Result<TransportResponse, TransportError> {
        let mut request = self
            .client
            .post(&self.config.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::connect(format!("evaluation request failed: {e}")))?;
        let status = response.status();
        debug!(url = %self.config.url, %status, "evaluation stream opened");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::read(format!("stream read failed: {e}"))));
        Ok(TransportResponse::new(status.as_u16(), body))
    }
}
