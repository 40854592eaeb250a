//! REST client for the session backend.

use std::time::Duration;

use attune_core::current_unix_timestamp_ms;
use attune_protocol::GraphSnapshot;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

const RETRY_ATTEMPT_HEADER: &str = "x-attune-retry-attempt";
const MAX_RETRY_DELAY_MS: u64 = 30_000;

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("backend {operation} failed with status {status}")]
    Http {
        operation: String,
        status: u16,
        code: Option<String>,
        details: Value,
    },
    #[error("backend {operation} request failed: {source}")]
    Network {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to decode backend {operation} response: {message}")]
    Decode { operation: String, message: String },
    #[error("backend {operation} response is missing '{field}'")]
    MissingField {
        operation: String,
        field: &'static str,
    },
    #[error("invalid backend client configuration: {0}")]
    Config(String),
}

impl ApiClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout_ms: 10_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub session_token: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub expires_in: Option<u64>,
    pub expires_at_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopConcept {
    pub label: String,
    pub canonical: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndSessionResponse {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, alias = "topConcepts")]
    pub top_concepts: Vec<TopConcept>,
}

#[derive(Debug, Deserialize)]
struct RawCreateSession {
    #[serde(default, alias = "sessionId")]
    session_id: Option<String>,
    #[serde(default, alias = "sessionToken")]
    session_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAccessToken {
    #[serde(default, alias = "accessToken")]
    access_token: Option<String>,
    #[serde(default, alias = "expiresIn")]
    expires_in: Option<u64>,
    #[serde(default, alias = "expiresAtMs")]
    expires_at_ms: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct BackendApiClient {
    http: reqwest::Client,
    base_url: Url,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl BackendApiClient {
    pub fn new(config: ApiClientConfig) -> Result<Self, ApiClientError> {
        let trimmed = config.base_url.trim().trim_end_matches('/');
        let base_url = Url::parse(trimmed).map_err(|error| {
            ApiClientError::Config(format!("invalid api base url '{trimmed}': {error}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ApiClientError::Config(format!(
                "api base url '{trimmed}' cannot carry a path"
            )));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("attune-session"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .map_err(|error| {
                ApiClientError::Config(format!("failed to create http client: {error}"))
            })?;

        Ok(Self {
            http,
            base_url,
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// `POST /v1/sessions`. Without a body the backend receives `{"consent": true}`.
    pub async fn create_session(
        &self,
        body: Option<Value>,
    ) -> Result<CreateSessionResponse, ApiClientError> {
        const OPERATION: &str = "create session";
        let url = self.endpoint(&["v1", "sessions"])?;
        let body = body.unwrap_or_else(|| json!({ "consent": true }));
        let raw = self
            .request_json(OPERATION, || self.http.post(url.clone()).json(&body))
            .await?;
        let parsed: RawCreateSession = decode(OPERATION, &raw)?;
        let session_id = parsed
            .session_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| missing(OPERATION, "session_id"))?;
        Ok(CreateSessionResponse {
            session_id,
            session_token: parsed.session_token,
            raw,
        })
    }

    /// `POST /v1/hume/access-token`. `expires_at_ms` is derived from
    /// `expires_in` when the backend does not send it.
    pub async fn fetch_access_token(
        &self,
        session_id: Option<&str>,
    ) -> Result<AccessTokenResponse, ApiClientError> {
        const OPERATION: &str = "access token";
        let url = self.endpoint(&["v1", "hume", "access-token"])?;
        let body = match session_id {
            Some(session_id) => json!({ "session_id": session_id }),
            None => json!({}),
        };
        let raw = self
            .request_json(OPERATION, || self.http.post(url.clone()).json(&body))
            .await?;
        let parsed: RawAccessToken = decode(OPERATION, &raw)?;
        let access_token = parsed
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| missing(OPERATION, "access_token"))?;
        let expires_at_ms = parsed.expires_at_ms.or_else(|| {
            parsed.expires_in.map(|seconds| {
                current_unix_timestamp_ms().saturating_add(seconds.saturating_mul(1_000))
            })
        });
        Ok(AccessTokenResponse {
            access_token,
            expires_in: parsed.expires_in,
            expires_at_ms,
        })
    }

    /// `GET /v1/sessions/{id}/graph`.
    pub async fn fetch_graph_snapshot(
        &self,
        session_id: &str,
    ) -> Result<GraphSnapshot, ApiClientError> {
        let url = self.endpoint(&["v1", "sessions", session_id, "graph"])?;
        let raw = self
            .request_json("graph snapshot", || self.http.get(url.clone()))
            .await?;
        Ok(GraphSnapshot::from_value(&raw))
    }

    /// `POST /v1/sessions/{id}/end`.
    pub async fn end_session(
        &self,
        session_id: &str,
    ) -> Result<EndSessionResponse, ApiClientError> {
        const OPERATION: &str = "end session";
        let url = self.endpoint(&["v1", "sessions", session_id, "end"])?;
        let raw = self
            .request_json(OPERATION, || self.http.post(url.clone()))
            .await?;
        if raw.is_null() {
            return Ok(EndSessionResponse::default());
        }
        decode(OPERATION, &raw)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiClientError::Config("api base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sends with retries on 408/429/5xx and transport errors. An empty
    /// success body decodes to `Value::Null`.
    async fn request_json<F>(
        &self,
        operation: &str,
        mut builder: F,
    ) -> Result<Value, ApiClientError>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder()
                .header(RETRY_ATTEMPT_HEADER, attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.map_err(|source| ApiClientError::Network {
                        operation: operation.to_string(),
                        source,
                    })?;
                    if status.is_success() {
                        return parse_body(operation, &body);
                    }

                    if attempt < self.retry_max_attempts && is_retryable_status(status.as_u16()) {
                        let delay = retry_delay(self.retry_base_delay_ms, attempt, retry_after);
                        tracing::debug!(
                            operation,
                            status = status.as_u16(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying backend request"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let details = serde_json::from_str::<Value>(&body)
                        .unwrap_or_else(|_| Value::String(truncate_for_error(&body, 800)));
                    let code = details
                        .get("code")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    return Err(ApiClientError::Http {
                        operation: operation.to_string(),
                        status: status.as_u16(),
                        code,
                        details,
                    });
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tracing::debug!(operation, attempt, %error, "retrying backend request");
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(ApiClientError::Network {
                        operation: operation.to_string(),
                        source: error,
                    });
                }
            }
        }
    }
}

fn parse_body(operation: &str, body: &str) -> Result<Value, ApiClientError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|error| ApiClientError::Decode {
        operation: operation.to_string(),
        message: error.to_string(),
    })
}

fn decode<T: DeserializeOwned>(operation: &str, raw: &Value) -> Result<T, ApiClientError> {
    if !raw.is_object() {
        return Err(ApiClientError::Decode {
            operation: operation.to_string(),
            message: "expected a JSON object".to_string(),
        });
    }
    serde_json::from_value(raw.clone()).map_err(|error| ApiClientError::Decode {
        operation: operation.to_string(),
        message: error.to_string(),
    })
}

fn missing(operation: &str, field: &'static str) -> ApiClientError {
    ApiClientError::MissingField {
        operation: operation.to_string(),
        field,
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get("retry-after")?.to_str().ok()?;
    let seconds = raw.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(seconds))
}

fn retry_delay(base_delay_ms: u64, attempt: usize, retry_after: Option<Duration>) -> Duration {
    if let Some(delay) = retry_after {
        return delay.max(Duration::from_millis(base_delay_ms));
    }
    let exponent = attempt.saturating_sub(1).min(10) as u32;
    let scaled = base_delay_ms.saturating_mul(2_u64.saturating_pow(exponent));
    Duration::from_millis(scaled.min(MAX_RETRY_DELAY_MS))
}

fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

fn truncate_for_error(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}
