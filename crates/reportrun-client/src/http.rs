//! HTTP implementation of the progress channel.

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use reportrun_core::{FinalReport, ProgressEvent, ResearchRequest, StatusSnapshot, TaskRunId};

use crate::channel::{EventStream, ProgressChannel, ResolveOutcome, SubmitResponse};
use crate::error::ClientError;
use crate::sse::SseParser;

/// Body of a denied admission.
#[derive(Debug, Deserialize)]
struct RateLimitBody {
    #[serde(default)]
    retry_after_seconds: u64,
}

/// Body of an error response.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Body shared by the resolve and finalize endpoints.
#[derive(Debug, Deserialize)]
struct ResolveBody {
    #[serde(default)]
    report: Option<FinalReport>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the delivery server.
#[derive(Clone)]
pub struct HttpChannel {
    inner: reqwest::Client,
    base_url: String,
}

impl HttpChannel {
    /// Create a new channel against the given base URL.
    pub fn new(base_url: &str) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Check if the delivery server is healthy.
    pub async fn health(&self) -> Result<bool, ClientError> {
        let url = format!("{}/health", self.base_url);
        debug!(url = %url, "Checking health");

        let response = self.inner.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    /// Submit a research request through the admission gate.
    pub async fn submit(&self, request: &ResearchRequest) -> Result<SubmitResponse, ClientError> {
        let url = format!("{}/tasks", self.base_url);
        debug!(url = %url, topic = %request.topic, "Submitting task");

        let response = self.inner.post(&url).json(request).send().await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => {
                let body: RateLimitBody = response
                    .json()
                    .await
                    .map_err(|e| ClientError::Serialization(e.to_string()))?;
                Err(ClientError::RateLimited {
                    retry_after_secs: body.retry_after_seconds,
                })
            }
            StatusCode::BAD_REQUEST => {
                let body: ErrorBody = response
                    .json()
                    .await
                    .map_err(|e| ClientError::Serialization(e.to_string()))?;
                Err(ClientError::Rejected(body.error))
            }
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| ClientError::Serialization(e.to_string())),
            status => Err(ClientError::Connection(format!("HTTP {status}: {url}"))),
        }
    }

    fn task_url(&self, id: &TaskRunId, suffix: &str) -> String {
        format!("{}/tasks/{}/{}", self.base_url, id, suffix)
    }
}

#[async_trait]
impl ProgressChannel for HttpChannel {
    async fn open_stream(&self, id: &TaskRunId) -> Result<EventStream, ClientError> {
        let url = self.task_url(id, "stream");
        debug!(url = %url, "Opening progress stream");

        let response = self
            .inner
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(ClientError::NotFound(id.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ClientError::Rejected(format!(
                    "stream rejected with HTTP {}",
                    response.status()
                )))
            }
            status => return Err(ClientError::Connection(format!("HTTP {status}: {url}"))),
        }

        Ok(sse_event_stream(response))
    }

    async fn poll_status(&self, id: &TaskRunId) -> Result<StatusSnapshot, ClientError> {
        let url = self.task_url(id, "status");
        debug!(url = %url, "Polling status");

        let response = self.inner.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(id.to_string()));
        }
        if !response.status().is_success() {
            return Err(ClientError::Connection(format!(
                "HTTP {}: {url}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Serialization(e.to_string()))
    }

    async fn resolve(&self, id: &TaskRunId) -> Result<ResolveOutcome, ClientError> {
        let url = self.task_url(id, "resolve");
        debug!(url = %url, "Resolving");

        let response = self.inner.post(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(id.to_string())),
            StatusCode::GATEWAY_TIMEOUT => Ok(ResolveOutcome::StillRunning),
            status if status.is_success() => {
                let body: ResolveBody = response
                    .json()
                    .await
                    .map_err(|e| ClientError::Serialization(e.to_string()))?;
                match body.report {
                    Some(report) => Ok(ResolveOutcome::Terminal(report)),
                    None => Err(ClientError::Serialization(
                        body.error.unwrap_or_else(|| "resolve returned no report".to_string()),
                    )),
                }
            }
            status => Err(ClientError::Connection(format!("HTTP {status}: {url}"))),
        }
    }

    async fn finalize(&self, id: &TaskRunId) -> Result<FinalReport, ClientError> {
        let url = self.task_url(id, "finalize");
        debug!(url = %url, "Finalizing");

        let response = self.inner.post(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(id.to_string())),
            StatusCode::CONFLICT => Err(ClientError::StillRunning),
            status if status.is_success() => {
                let body: ResolveBody = response
                    .json()
                    .await
                    .map_err(|e| ClientError::Serialization(e.to_string()))?;
                body.report.ok_or_else(|| {
                    ClientError::Serialization("finalize returned no report".to_string())
                })
            }
            status => Err(ClientError::Connection(format!("HTTP {status}: {url}"))),
        }
    }
}

/// Build the typed event stream over the raw SSE response body.
fn sse_event_stream(response: reqwest::Response) -> EventStream {
    let stream = stream::unfold(
        (response.bytes_stream(), SseParser::new()),
        |(mut body, mut parser)| async move {
            loop {
                if let Some(data) = parser.next_data() {
                    match serde_json::from_str::<ProgressEvent>(&data) {
                        Ok(event) => return Some((Ok(event), (body, parser))),
                        Err(error) => {
                            // Unknown payloads are tolerated; the terminal
                            // status event is the only load-bearing one.
                            debug!(error = %error, "Skipping unparseable stream payload");
                            continue;
                        }
                    }
                }

                match body.next().await {
                    Some(Ok(chunk)) => parser.push(&chunk),
                    Some(Err(error)) => {
                        return Some((
                            Err(ClientError::Stream(error.to_string())),
                            (body, parser),
                        ))
                    }
                    None => return None,
                }
            }
        },
    );

    Box::pin(stream)
}
