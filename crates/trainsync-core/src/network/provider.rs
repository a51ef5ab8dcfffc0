//! HTTP client for the training provider.
//!
//! Endpoints (relative to the configured base URL):
//! - `POST run` with `{ input: {...}, webhook? }` returns `{ id }`
//! - `GET status/{job_id}` returns `{ status, output?, error? }`; 404 means
//!   the provider has no record of the job

use crate::config::NetworkConfig;
use crate::network::client::{build_http_client, ensure_success, join_url, with_auth};
use crate::network::retry::{with_retry, RetryPolicy};
use crate::network::traits::{ProviderJobStatus, SubmittedJob, TrainingClient, TrainingJobRequest};
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

/// [`TrainingClient`] backed by the provider's HTTP API.
pub struct HttpTrainingClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    status_retry: RetryPolicy,
}

impl HttpTrainingClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            client: build_http_client(NetworkConfig::SUBMIT_TIMEOUT)?,
            base_url: base_url.into(),
            api_key,
            status_retry: RetryPolicy::default(),
        })
    }

    fn submit_body(request: &TrainingJobRequest) -> Value {
        let mut body = json!({
            "input": {
                "job_id": request.job_reference,
                "version_name": request.version_name,
                "entity_kind": request.entity.kind,
                "entity_id": request.entity.entity_id,
                "image_count": request.image_count,
                "dataset_url": request.dataset_url,
                "parameters": request.parameters,
            }
        });
        if let Some(webhook) = &request.webhook_url {
            body["webhook"] = json!(webhook);
        }
        body
    }
}

/// Read the provider job id from a submit response.
pub(crate) fn parse_submit_response(body: &Value) -> SubmittedJob {
    let provider_job_id = body
        .get("id")
        .or_else(|| body.get("job_id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from);
    SubmittedJob { provider_job_id }
}

/// Read a status response body.
pub(crate) fn parse_status_response(body: &Value) -> ProviderJobStatus {
    let text = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    let output = body.get("output");
    let lora_url = text(output.and_then(|o| o.get("loraUrl")))
        .or_else(|| text(output.and_then(|o| o.get("s3_url"))))
        .or_else(|| text(output.and_then(|o| o.get("lora_url"))));

    ProviderJobStatus::Found {
        status: text(body.get("status")).unwrap_or_else(|| "UNKNOWN".to_string()),
        lora_url,
        error: text(body.get("error")),
    }
}

#[async_trait]
impl TrainingClient for HttpTrainingClient {
    async fn submit(&self, request: &TrainingJobRequest) -> Result<SubmittedJob> {
        let url = join_url(&self.base_url, "run");
        info!(
            "Submitting {} {} to training provider",
            request.entity, request.version_name
        );

        // Submissions are not idempotent on the provider side; never retried.
        let response = with_auth(self.client.post(&url), self.api_key.as_deref())
            .json(&Self::submit_body(request))
            .send()
            .await?;
        let response = ensure_success(response, "Training submit").await?;
        let body: Value = response.json().await?;

        let job = parse_submit_response(&body);
        debug!("Provider accepted job: {:?}", job.provider_job_id);
        Ok(job)
    }

    async fn status(&self, job_id: &str) -> Result<ProviderJobStatus> {
        let url = join_url(&self.base_url, &format!("status/{}", job_id));
        let url = url.as_str();
        let client = &self.client;
        let api_key = self.api_key.as_deref();

        with_retry(&self.status_retry, "Training status", move || async move {
            let response = with_auth(client.get(url), api_key)
                .timeout(NetworkConfig::REQUEST_TIMEOUT)
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(ProviderJobStatus::NotFound);
            }
            let response = ensure_success(response, "Training status").await?;
            let body: Value = response.json().await?;
            Ok(parse_status_response(&body))
        })
        .await
    }
}
