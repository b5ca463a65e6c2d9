//! Task server API client
//!
//! Single-attempt-with-retries request executor plus typed wrappers for each
//! endpoint. Queuing across offline periods is the sync engine's job.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::domain::{NewTag, Tag, Task};
use crate::error::{ApiError, ApiResult};
use super::transport::{HttpRequest, HttpResponse, HttpTransport, Method};

/// Characters escaped in path segments and query values
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

pub const MAX_RETRIES: u32 = 3;
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Retry envelope around every request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: RETRY_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): base * 2^retry
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry)
    }
}

/// Query filters for the task list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskQuery {
    pub completed: Option<bool>,
    pub tag: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl TaskQuery {
    pub fn limit(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    fn to_query_string(&self) -> String {
        let mut params = Vec::new();
        if let Some(completed) = self.completed {
            params.push(format!("completed={}", completed));
        }
        if let Some(tag) = &self.tag {
            params.push(format!("tag={}", utf8_percent_encode(tag, COMPONENT)));
        }
        if let Some(limit) = self.limit {
            params.push(format!("limit={}", limit));
        }
        if let Some(offset) = self.offset {
            params.push(format!("offset={}", offset));
        }

        if params.is_empty() {
            String::new()
        } else {
            format!("?{}", params.join("&"))
        }
    }
}

pub struct ApiClient {
    base_url: String,
    access_token: RwLock<Option<String>>,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: RwLock::new(None),
            transport,
            clock,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_access_token(self, token: Option<String>) -> Self {
        self.set_access_token(token);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the bearer token used by later requests
    pub fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = token;
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.access_token.read().ok().and_then(|t| t.clone())
    }

    /// Issue a request, retrying retryable failures with exponential backoff.
    /// A 204 yields `Value::Null`.
    pub async fn execute(&self, method: Method, path: &str, body: Option<&Value>) -> ApiResult<Value> {
        let request = self.build_request(method, path, body)?;
        let mut retry = 0;

        loop {
            match self.attempt(request.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retry < self.retry.max_retries => {
                    let delay = self.retry.delay_for(retry);
                    retry += 1;
                    warn!(
                        method = method.as_str(),
                        path,
                        status = ?e.status(),
                        attempt = retry,
                        delay_ms = delay.as_millis() as u64,
                        "request failed, retrying: {}", e
                    );
                    self.clock.sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn build_request(&self, method: Method, path: &str, body: Option<&Value>) -> ApiResult<HttpRequest> {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(token) = self.access_token() {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        let body = body
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        Ok(HttpRequest {
            method,
            url: format!("{}{}", self.base_url, path),
            headers,
            body,
        })
    }

    async fn attempt(&self, request: HttpRequest) -> ApiResult<Value> {
        debug!(method = request.method.as_str(), url = %request.url, "sending request");
        let response = self.transport.send(request).await.map_err(ApiError::Network)?;
        interpret(response)
    }

    async fn call<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<Value>) -> ApiResult<T> {
        let value = self.execute(method, path, body.as_ref()).await?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    // ========================
    // Tasks
    // ========================

    pub async fn list_tasks(&self, query: &TaskQuery) -> ApiResult<Vec<Task>> {
        self.call(Method::Get, &format!("/api/tasks{}", query.to_query_string()), None)
            .await
    }

    pub async fn create_task<B: Serialize + ?Sized>(&self, body: &B) -> ApiResult<Task> {
        self.call(Method::Post, "/api/tasks", Some(encode(body)?)).await
    }

    pub async fn get_task(&self, id: &str) -> ApiResult<Task> {
        self.call(Method::Get, &task_path(id), None).await
    }

    pub async fn update_task<B: Serialize + ?Sized>(&self, id: &str, body: &B) -> ApiResult<Task> {
        self.call(Method::Put, &task_path(id), Some(encode(body)?)).await
    }

    pub async fn delete_task(&self, id: &str) -> ApiResult<()> {
        self.execute(Method::Delete, &task_path(id), None).await?;
        Ok(())
    }

    pub async fn complete_task(&self, id: &str, completed: bool) -> ApiResult<Task> {
        self.call(
            Method::Post,
            &format!("{}/complete", task_path(id)),
            Some(json!({ "completed": completed })),
        )
        .await
    }

    pub async fn search_tasks(&self, query: &str, limit: Option<u32>) -> ApiResult<Vec<Task>> {
        let mut body = json!({ "query": query });
        if let Some(limit) = limit {
            body["limit"] = json!(limit);
        }
        self.call(Method::Post, "/api/tasks/search", Some(body)).await
    }

    // ========================
    // Tags
    // ========================

    pub async fn list_tags(&self) -> ApiResult<Vec<Tag>> {
        self.call(Method::Get, "/api/tags", None).await
    }

    pub async fn create_tag(&self, tag: &NewTag) -> ApiResult<Tag> {
        self.call(Method::Post, "/api/tags", Some(encode(tag)?)).await
    }
}

fn task_path(id: &str) -> String {
    format!("/api/tasks/{}", utf8_percent_encode(id, COMPONENT))
}

fn encode<B: Serialize + ?Sized>(body: &B) -> ApiResult<Value> {
    serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Turn a raw response into a value or a classified error
fn interpret(response: HttpResponse) -> ApiResult<Value> {
    let status = response.status;

    if (200..300).contains(&status) {
        if status == 204 || response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_str(&response.body).map_err(|e| ApiError::Decode(e.to_string()));
    }

    let message = match serde_json::from_str::<Value>(&response.body) {
        Ok(body) => body
            .get("message")
            .or_else(|| body.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status)),
        Err(_) => match &response.reason {
            Some(reason) => format!("HTTP {} {}", status, reason),
            None => format!("HTTP {}", status),
        },
    };

    Err(ApiError::Http { status, message })
}
