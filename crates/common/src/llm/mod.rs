//! Language model abstraction
//!
//! Every model-backed stage talks to a [`ModelClient`]: one system prompt,
//! one user prompt, one JSON object back. Providers:
//! - Azure OpenAI deployments
//! - OpenAI-compatible chat completions endpoints
//! - A scripted mock for tests and dry runs

use crate::config::ModelConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Trait for JSON-mode chat completion
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Submit one request and return the decoded JSON object
    async fn complete_json(&self, system: &str, user: &str) -> Result<Value>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Parse a model reply into a JSON object, tolerating a Markdown code fence
pub fn parse_json_object(content: &str) -> Result<Value> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE.get_or_init(|| Regex::new(r"(?s)^\s*```[A-Za-z]*\s*(.*?)\s*```\s*$").ok());

    let body = fence
        .as_ref()
        .and_then(|re| re.captures(content))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(content);

    let value: Value = serde_json::from_str(body.trim()).map_err(|e| AppError::ModelResponse {
        message: format!("reply is not JSON: {}", e),
    })?;

    if !value.is_object() {
        return Err(AppError::ModelResponse {
            message: "reply is not a JSON object".to_string(),
        });
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Azure,
    OpenAi,
}

/// Chat completions client for Azure and OpenAI-compatible endpoints
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    flavor: Flavor,
    url: String,
    api_key: String,
    model: String,
    retry_max_elapsed: Duration,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

impl ChatCompletionsClient {
    /// Azure OpenAI deployment at `endpoint`
    pub fn azure(config: &ModelConfig) -> Result<Self> {
        let endpoint = required(config.endpoint.as_deref(), "model.endpoint")?;
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint.trim_end_matches('/'),
            config.model,
            config.api_version
        );
        Self::build(config, Flavor::Azure, url)
    }

    /// OpenAI or any compatible server; `endpoint` defaults to api.openai.com
    pub fn openai(config: &ModelConfig) -> Result<Self> {
        let base = config
            .endpoint
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");
        let url = format!("{}/chat/completions", base.trim_end_matches('/'));
        Self::build(config, Flavor::OpenAi, url)
    }

    fn build(config: &ModelConfig, flavor: Flavor, url: String) -> Result<Self> {
        let api_key = required(config.api_key.as_deref(), "model.api_key")?.to_string();

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(|e| AppError::Configuration {
            message: format!("Failed to create HTTP client: {}", e),
        })?;

        Ok(Self {
            client,
            flavor,
            url,
            api_key,
            model: config.model.clone(),
            retry_max_elapsed: Duration::from_secs(config.retry_max_elapsed_secs),
        })
    }

    async fn make_request(&self, system: &str, user: &str) -> std::result::Result<String, backoff::Error<AppError>> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            response_format: json!({ "type": "json_object" }),
        };

        let builder = self.client.post(&self.url).json(&request);
        let builder = match self.flavor {
            Flavor::Azure => builder.header("api-key", &self.api_key),
            Flavor::OpenAi => builder.bearer_auth(&self.api_key),
        };

        let response = builder.send().await.map_err(|e| {
            let err = AppError::Model {
                message: format!("Request failed: {}", e),
            };
            if e.is_timeout() || e.is_connect() || e.is_request() {
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = AppError::Model {
                message: format!("API error {}: {}", status, body),
            };
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(backoff::Error::transient(err))
            } else {
                Err(backoff::Error::permanent(err))
            };
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            backoff::Error::permanent(AppError::ModelResponse {
                message: format!("Failed to parse response: {}", e),
            })
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                backoff::Error::permanent(AppError::ModelResponse {
                    message: "Empty response from model".to_string(),
                })
            })
    }
}

#[async_trait]
impl ModelClient for ChatCompletionsClient {
    async fn complete_json(&self, system: &str, user: &str) -> Result<Value> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.retry_max_elapsed),
            ..ExponentialBackoff::default()
        };

        let content = backoff::future::retry_notify(
            policy,
            || self.make_request(system, user),
            |err: AppError, wait: Duration| {
                warn!(error = %err, wait_ms = wait.as_millis() as u64, "Model request failed, retrying");
            },
        )
        .await?;

        debug!(model = %self.model, bytes = content.len(), "Model replied");
        parse_json_object(&content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::Configuration {
            message: format!("{} is required for this model provider", field),
        }),
    }
}

/// A prompt pair received by [`MockModel`]
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCall {
    pub system: String,
    pub user: String,
}

enum MockReply {
    Json(Value),
    Fail(String),
}

type Handler = Box<dyn Fn(&str, &str) -> Result<Value> + Send + Sync>;

/// Scripted model for testing.
///
/// Replies come from the queue first, then the handler, then the fallback.
/// With none of those left the call fails.
#[derive(Default)]
pub struct MockModel {
    queue: Mutex<VecDeque<MockReply>>,
    handler: Option<Handler>,
    fallback: Option<Value>,
    calls: Mutex<Vec<ModelCall>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock that answers every stage with the same well-formed object
    pub fn canned() -> Self {
        Self::new().with_fallback(json!({
            "findings": [
                "Mock finding one.",
                "Mock finding two.",
                "Mock finding three."
            ],
            "one_liner": "Mock summary.",
            "emoji": "🧪",
            "tag": "security",
            "affiliations": [],
            "interest_score": 5,
            "relevant": true,
            "projects": []
        }))
    }

    /// Queue a successful reply
    pub fn respond(self, value: Value) -> Self {
        self.queue_reply(MockReply::Json(value));
        self
    }

    /// Queue a failed call
    pub fn fail(self, message: &str) -> Self {
        self.queue_reply(MockReply::Fail(message.to_string()));
        self
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &str) -> Result<Value> + Send + Sync + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn with_fallback(mut self, value: Value) -> Self {
        self.fallback = Some(value);
        self
    }

    /// Number of requests received so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Every request received so far
    pub fn calls(&self) -> Vec<ModelCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn queue_reply(&self, reply: MockReply) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
    }
}

#[async_trait]
impl ModelClient for MockModel {
    async fn complete_json(&self, system: &str, user: &str) -> Result<Value> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ModelCall {
                system: system.to_string(),
                user: user.to_string(),
            });

        let queued = self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        match queued {
            Some(MockReply::Json(value)) => return Ok(value),
            Some(MockReply::Fail(message)) => return Err(AppError::Model { message }),
            None => {}
        }

        if let Some(ref handler) = self.handler {
            return handler(system, user);
        }

        self.fallback.clone().ok_or_else(|| AppError::Model {
            message: "mock model has no scripted reply".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

/// Create a model client based on configuration
pub fn create_model_client(config: &ModelConfig) -> Result<Arc<dyn ModelClient>> {
    match config.provider.as_str() {
        "azure" => Ok(Arc::new(ChatCompletionsClient::azure(config)?)),
        "openai" => Ok(Arc::new(ChatCompletionsClient::openai(config)?)),
        "mock" => {
            warn!("Using mock model; summaries will be placeholders");
            Ok(Arc::new(MockModel::canned()))
        }
        other => Err(AppError::Configuration {
            message: format!("Unknown model provider '{}'", other),
        }),
    }
}
