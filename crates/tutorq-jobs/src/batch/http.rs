//! HTTP client for a message-batches style external batch API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use tutorq_core::{
    defaults, BatchApi, BatchItemOutcome, BatchItemResult, BatchPoll, BatchRequest, Error, Result,
};

/// Configuration for [`HttpBatchApi`].
#[derive(Debug, Clone)]
pub struct HttpBatchConfig {
    /// Base URL; endpoints live under `/v1/messages/batches`.
    pub base_url: String,
    /// Sent as `x-api-key` when set.
    pub api_key: Option<String>,
    /// Sent as `anthropic-version`.
    pub api_version: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for HttpBatchConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::BATCH_API_URL.to_string(),
            api_key: None,
            api_version: defaults::BATCH_API_VERSION.to_string(),
            timeout_seconds: defaults::BATCH_API_TIMEOUT_SECS,
        }
    }
}

impl HttpBatchConfig {
    /// Load from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `BATCH_API_URL` | `https://api.anthropic.com` |
    /// | `BATCH_API_KEY` | unset |
    /// | `BATCH_API_VERSION` | `2023-06-01` |
    /// | `BATCH_API_TIMEOUT_SECS` | `60` |
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("BATCH_API_URL")
                .unwrap_or_else(|_| defaults::BATCH_API_URL.to_string()),
            api_key: std::env::var("BATCH_API_KEY").ok().filter(|k| !k.is_empty()),
            api_version: std::env::var("BATCH_API_VERSION")
                .unwrap_or_else(|_| defaults::BATCH_API_VERSION.to_string()),
            timeout_seconds: std::env::var("BATCH_API_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::BATCH_API_TIMEOUT_SECS),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[derive(Serialize)]
struct CreateBatchBody<'a> {
    requests: &'a [BatchRequest],
}

#[derive(Debug, Deserialize)]
struct BatchObject {
    id: String,
    processing_status: String,
    #[serde(default)]
    results_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultLine {
    custom_id: String,
    result: ResultBody,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResultBody {
    Succeeded {
        #[serde(default)]
        message: JsonValue,
    },
    Errored {
        #[serde(default)]
        error: JsonValue,
    },
    Canceled,
    Expired,
}

/// External batch API over HTTP.
pub struct HttpBatchApi {
    client: Client,
    config: HttpBatchConfig,
}

impl HttpBatchApi {
    pub fn new(config: HttpBatchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "jobs",
            component = "batch_api",
            base_url = %config.base_url,
            has_api_key = config.api_key.is_some(),
            "Initializing batch API client"
        );

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(HttpBatchConfig::from_env())
    }

    pub fn config(&self) -> &HttpBatchConfig {
        &self.config
    }

    fn batches_url(&self) -> String {
        format!(
            "{}/v1/messages/batches",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Build a request with authentication headers.
    fn build_request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, url)
            .header("anthropic-version", &self.config.api_version);

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("x-api-key", api_key);
        }

        req
    }

    /// Turn a non-2xx response into `Error::ExternalBatch`.
    async fn error_for(response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        Error::ExternalBatch(format!("batch API returned {}: {}", status, message))
    }

    async fn fetch_results(&self, results_url: &str) -> Result<Vec<BatchItemResult>> {
        let response = self.build_request(Method::GET, results_url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        let body = response.text().await?;
        parse_results_jsonl(&body)
    }
}

#[async_trait]
impl BatchApi for HttpBatchApi {
    async fn submit(&self, requests: &[BatchRequest]) -> Result<String> {
        debug!(
            subsystem = "jobs",
            component = "batch_api",
            op = "submit",
            requests = requests.len(),
            "Submitting batch"
        );

        let response = self
            .build_request(Method::POST, &self.batches_url())
            .json(&CreateBatchBody { requests })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let batch: BatchObject = response
            .json()
            .await
            .map_err(|e| Error::ExternalBatch(format!("Failed to parse batch response: {}", e)))?;
        Ok(batch.id)
    }

    async fn poll(&self, batch_id: &str) -> Result<BatchPoll> {
        let url = format!("{}/{}", self.batches_url(), batch_id);
        let response = self.build_request(Method::GET, &url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(BatchPoll::Failed(format!("batch {} not found", batch_id)));
        }
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let batch: BatchObject = response
            .json()
            .await
            .map_err(|e| Error::ExternalBatch(format!("Failed to parse batch response: {}", e)))?;

        match classify_status(&batch.processing_status)? {
            BatchState::Running => Ok(BatchPoll::Running),
            BatchState::Ended => match batch.results_url {
                Some(results_url) => Ok(BatchPoll::Complete(self.fetch_results(&results_url).await?)),
                None => Ok(BatchPoll::Failed(format!(
                    "batch {} ended without results",
                    batch.id
                ))),
            },
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum BatchState {
    Running,
    Ended,
}

fn classify_status(processing_status: &str) -> Result<BatchState> {
    match processing_status {
        "in_progress" | "canceling" => Ok(BatchState::Running),
        "ended" => Ok(BatchState::Ended),
        other => Err(Error::ExternalBatch(format!(
            "unknown processing_status: {}",
            other
        ))),
    }
}

/// Parse a JSON Lines results file into per-item outcomes.
pub fn parse_results_jsonl(body: &str) -> Result<Vec<BatchItemResult>> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let parsed: ResultLine = serde_json::from_str(line)
                .map_err(|e| Error::ExternalBatch(format!("malformed result line: {}", e)))?;
            Ok(BatchItemResult {
                custom_id: parsed.custom_id,
                outcome: outcome_of(parsed.result),
            })
        })
        .collect()
}

fn outcome_of(result: ResultBody) -> BatchItemOutcome {
    match result {
        ResultBody::Succeeded { message } => BatchItemOutcome::Succeeded { output: message },
        ResultBody::Errored { error } => BatchItemOutcome::Errored {
            message: error_message(&error),
        },
        ResultBody::Canceled => BatchItemOutcome::Errored {
            message: "request canceled".to_string(),
        },
        ResultBody::Expired => BatchItemOutcome::Errored {
            message: "request expired".to_string(),
        },
    }
}

/// Errors nest as `{"type": "error", "error": {"message": ...}}`.
fn error_message(error: &JsonValue) -> String {
    error
        .pointer("/error/message")
        .or_else(|| error.get("message"))
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status("in_progress").unwrap(), BatchState::Running);
        assert_eq!(classify_status("canceling").unwrap(), BatchState::Running);
        assert_eq!(classify_status("ended").unwrap(), BatchState::Ended);
        assert!(classify_status("exploded").is_err());
    }

    #[test]
    fn test_parse_results_jsonl() {
        let body = r#"
{"custom_id":"item-0","result":{"type":"succeeded","message":{"content":[{"type":"text","text":"Q1"}]}}}
{"custom_id":"item-1","result":{"type":"errored","error":{"type":"error","error":{"type":"invalid_request_error","message":"max_tokens too large"}}}}

{"custom_id":"item-2","result":{"type":"expired"}}
{"custom_id":"item-3","result":{"type":"canceled"}}
"#;
        let results = parse_results_jsonl(body).unwrap();
        assert_eq!(results.len(), 4);

        assert_eq!(results[0].custom_id, "item-0");
        assert_eq!(
            results[0].outcome,
            BatchItemOutcome::Succeeded {
                output: json!({"content": [{"type": "text", "text": "Q1"}]})
            }
        );
        assert_eq!(
            results[1].outcome,
            BatchItemOutcome::Errored {
                message: "max_tokens too large".to_string()
            }
        );
        assert_eq!(
            results[2].outcome,
            BatchItemOutcome::Errored {
                message: "request expired".to_string()
            }
        );
        assert!(matches!(
            results[3].outcome,
            BatchItemOutcome::Errored { .. }
        ));
    }

    #[test]
    fn test_parse_results_jsonl_rejects_garbage() {
        let err = parse_results_jsonl("{not json}").unwrap_err();
        assert!(matches!(err, Error::ExternalBatch(_)));
    }

    #[test]
    fn test_error_message_fallbacks() {
        assert_eq!(error_message(&json!({"message": "flat"})), "flat");
        assert_eq!(error_message(&json!("plain")), "\"plain\"");
    }

    #[test]
    fn test_batches_url_trims_slash() {
        let api = HttpBatchApi::new(
            HttpBatchConfig::default().with_base_url("http://localhost:9999/"),
        )
        .unwrap();
        assert_eq!(api.batches_url(), "http://localhost:9999/v1/messages/batches");
    }

    #[test]
    fn test_create_body_shape() {
        let requests = vec![BatchRequest::for_item(0, json!({"max_tokens": 10}))];
        let body = serde_json::to_value(CreateBatchBody {
            requests: &requests,
        })
        .unwrap();
        assert_eq!(body["requests"][0]["custom_id"], "item-0");
        assert_eq!(body["requests"][0]["params"]["max_tokens"], 10);
    }
}
