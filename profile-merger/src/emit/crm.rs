use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::{
    retry::{retry_after, RetryPolicy},
    Emitter, Request, RequestKind,
};
use crate::error::EmitError;

pub const TRACK_ENDPOINT: &str = "/users/track";
pub const DELETE_ENDPOINT: &str = "/users/delete";

/// Starts at 1 second and doubles up to 30 seconds, five retries in all.
pub const RETRY_POLICY: RetryPolicy =
    RetryPolicy::new(Duration::from_secs(1), 2.0, Duration::from_secs(30), 5);

/// Sends batches to the CRM's bulk user endpoints.
pub struct CrmEmitter {
    client: Client,
    base_url: String,
    api_key: String,
    retry_policy: RetryPolicy,
}

impl CrmEmitter {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            retry_policy: RETRY_POLICY,
        })
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    fn endpoint(kind: RequestKind) -> &'static str {
        match kind {
            RequestKind::Deletions => DELETE_ENDPOINT,
            _ => TRACK_ENDPOINT,
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl Emitter for CrmEmitter {
    async fn send(&self, request: Request<'_>) -> Result<(), EmitError> {
        let endpoint = Self::endpoint(request.kind());
        let url = format!("{}{}", self.base_url, endpoint);
        let body = request.payload()?;

        let mut attempt = 0;
        loop {
            let last_attempt = self.retry_policy.exhausted(attempt);

            let response = match self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(source) if !last_attempt => {
                    let delay = self.retry_policy.delay(attempt, None);
                    warn!(
                        "request to {endpoint} failed, retrying (attempt {attempt}/{}, delay {delay:?}): {source}",
                        self.retry_policy.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                Err(source) => {
                    return Err(EmitError::Request {
                        endpoint: endpoint.to_string(),
                        source,
                    })
                }
            };

            let status = response.status();
            if status.is_success() {
                debug!(
                    "sent {} {} records to {endpoint}",
                    request.len(),
                    request.kind().as_str()
                );
                return Ok(());
            }

            if is_retryable(status) && !last_attempt {
                let delay = self.retry_policy.delay(attempt, retry_after(&response));
                warn!(
                    "{endpoint} returned {status}, retrying (attempt {attempt}/{}, delay {delay:?})",
                    self.retry_policy.max_retries
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let message = response.text().await.unwrap_or_default();
            return Err(EmitError::Status {
                endpoint: endpoint.to_string(),
                status,
                message,
            });
        }
    }
}
