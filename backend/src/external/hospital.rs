//! HTTP client for the hospital (supplying) service
//!
//! Used by the pharmacy to raise indents, fetch dispatch plans and confirm
//! receipt.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use shared::{CreateIndentInput, Indent, IndentStatus, IndentStatusUpdate};

use crate::config::HospitalConfig;
use crate::error::{AppError, AppResult};

/// Header carrying the unauthenticated performer name
pub const PERFORMED_BY_HEADER: &str = "X-Performed-By";

/// Hospital API client
#[derive(Clone)]
pub struct HospitalClient {
    client: Client,
    base_url: String,
    max_retries: u32,
    retry_backoff: Duration,
}

/// Error body returned by the counterpart service
#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    error: RemoteErrorDetail,
}

#[derive(Debug, Deserialize)]
struct RemoteErrorDetail {
    code: String,
    message: String,
}

/// Outcome of a single attempt
enum Attempt {
    Done(Response),
    Retryable(String),
}

impl HospitalClient {
    /// Create a new hospital client
    pub fn new(config: &HospitalConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| AppError::Configuration(format!("hospital client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch an indent with its dispatch plan
    pub async fn get_indent(&self, id: i64) -> AppResult<Indent> {
        let url = format!("{}/indents/{}", self.base_url, id);
        self.send_json(&format!("indent {}", id), true, |c| c.get(&url))
            .await
    }

    /// Ask the hospital to move an indent to `status`
    pub async fn update_status(
        &self,
        id: i64,
        status: IndentStatus,
        performed_by: &str,
    ) -> AppResult<Indent> {
        let url = format!("{}/indents/{}/status", self.base_url, id);
        let body = IndentStatusUpdate {
            status: status.as_str().to_string(),
        };
        // The state machine ignores repeats, so a retried PUT is safe
        self.send_json(&format!("indent {}", id), true, |c| {
            c.put(&url)
                .header(PERFORMED_BY_HEADER, performed_by)
                .json(&body)
        })
        .await
    }

    /// Raise a new indent on the hospital. Not retried: a repeat would
    /// create a second indent.
    pub async fn create_indent(&self, input: &CreateIndentInput) -> AppResult<Indent> {
        let url = format!("{}/indents", self.base_url);
        self.send_json("indent", false, |c| c.post(&url).json(input))
            .await
    }

    async fn send_json<T, F>(&self, resource: &str, retry: bool, build: F) -> AppResult<T>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let retries = if retry { self.max_retries } else { 0 };
        let mut attempt = 0;

        let response = loop {
            match Self::attempt(build(&self.client)).await {
                Attempt::Done(response) => break response,
                Attempt::Retryable(reason) if attempt < retries => {
                    attempt += 1;
                    tracing::warn!(
                        base_url = %self.base_url,
                        attempt,
                        %reason,
                        "Hospital request failed; retrying"
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Attempt::Retryable(reason) => {
                    return Err(AppError::RemoteUnavailable(format!(
                        "hospital service unreachable: {}",
                        reason
                    )));
                }
            }
        };

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                AppError::RemoteRejected(format!("invalid response from hospital: {}", e))
            });
        }

        if status == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("Remote {}", resource)));
        }

        let message = match response.json::<RemoteErrorBody>().await {
            Ok(body) => format!("{} ({})", body.error.message, body.error.code),
            Err(_) => status.to_string(),
        };
        Err(AppError::RemoteRejected(format!(
            "hospital returned {}: {}",
            status.as_u16(),
            message
        )))
    }

    async fn attempt(request: RequestBuilder) -> Attempt {
        match request.send().await {
            Ok(response) if response.status().is_server_error() => {
                Attempt::Retryable(format!("status {}", response.status().as_u16()))
            }
            Ok(response) => Attempt::Done(response),
            Err(e) => Attempt::Retryable(e.to_string()),
        }
    }
}
