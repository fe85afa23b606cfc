use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use portline_core::config::{LlmConfig, LlmProvider};
use portline_whatsapp::RetryPolicy;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// A tool offered to the model, described by a JSON schema.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelRequest {
    pub system: String,
    pub history: Vec<ChatTurn>,
    pub user: String,
    pub tools: Vec<ToolSpec>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), tool_calls: Vec::new() }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self { text: None, tool_calls: calls }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("model transport failed: {0}")]
    Transport(String),
    #[error("model endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model response could not be decoded: {0}")]
    Decode(String),
    #[error("model call exceeded {0}s")]
    Timeout(u64),
    #[error("model client misconfigured: {0}")]
    Client(String),
}

impl LlmError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) | Self::Client(_) => false,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, LlmError>;
}

/// Chat-completions client for OpenAI and Ollama's OpenAI-compatible endpoint.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    retry: RetryPolicy,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = match (&config.base_url, config.provider) {
            (Some(base_url), _) => base_url.clone(),
            (None, LlmProvider::OpenAi) => OPENAI_BASE_URL.to_string(),
            (None, LlmProvider::Ollama) => {
                return Err(LlmError::Client("ollama requires llm.base_url".to_string()))
            }
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| LlmError::Client(error.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            retry: RetryPolicy { max_retries: config.max_retries, ..RetryPolicy::default() },
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn request_body(&self, request: &ModelRequest) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": request.system })];
        messages.extend(
            request.history.iter().map(|turn| json!({ "role": turn.role, "content": turn.content })),
        );
        messages.push(json!({ "role": "user", "content": request.user }));

        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }
        body
    }

    async fn post_once(&self, body: &Value) -> Result<ModelResponse, LlmError> {
        let mut builder = self.http.post(&self.endpoint).json(body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }
        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Timeout(0)
            } else {
                LlmError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }
        let payload: Value =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;
        parse_completion(&payload)
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, LlmError> {
        let body = self.request_body(&request);
        let mut attempt = 0;
        loop {
            match self.post_once(&body).await {
                Ok(response) => return Ok(response),
                Err(error) if error.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        event_name = "agent.llm.retrying",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "model call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Reads `choices[0].message` of a chat-completions payload.
pub fn parse_completion(payload: &Value) -> Result<ModelResponse, LlmError> {
    let message = payload
        .pointer("/choices/0/message")
        .ok_or_else(|| LlmError::Decode("missing choices[0].message".to_string()))?;

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|content| !content.trim().is_empty());

    let mut tool_calls = Vec::new();
    for call in message.get("tool_calls").and_then(Value::as_array).into_iter().flatten() {
        let name = call
            .pointer("/function/name")
            .and_then(Value::as_str)
            .ok_or_else(|| LlmError::Decode("tool call without function name".to_string()))?;
        let arguments = match call.pointer("/function/arguments") {
            Some(Value::String(raw)) if raw.trim().is_empty() => json!({}),
            Some(Value::String(raw)) => serde_json::from_str(raw).map_err(|error| {
                LlmError::Decode(format!("arguments of `{name}` are not JSON: {error}"))
            })?,
            Some(other) => other.clone(),
            None => json!({}),
        };
        tool_calls.push(ToolCall {
            id: call.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            name: name.to_string(),
            arguments,
        });
    }

    Ok(ModelResponse { text, tool_calls })
}

/// Replays queued responses and records every request it receives.
#[derive(Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<Result<ModelResponse, LlmError>>) -> Self {
        Self { responses: Mutex::new(responses.into()), requests: Mutex::default() }
    }

    pub async fn push(&self, response: Result<ModelResponse, LlmError>) {
        self.responses.lock().await.push_back(response);
    }

    pub async fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, LlmError> {
        self.requests.lock().await.push(request);
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Transport("script exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use portline_core::config::{LlmConfig, LlmProvider};

    use super::{
        parse_completion, ChatRole, ChatTurn, LlmError, ModelRequest, OpenAiCompatibleClient,
        ToolSpec,
    };

    fn config(provider: LlmProvider, base_url: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: None,
            base_url: base_url.map(str::to_string),
            model: "llama3.1".to_string(),
            temperature: 0.3,
            timeout_secs: 60,
            max_retries: 2,
        }
    }

    #[test]
    fn endpoint_follows_provider_defaults() {
        let ollama = OpenAiCompatibleClient::from_config(&config(
            LlmProvider::Ollama,
            Some("http://localhost:11434/v1/"),
        ))
        .expect("client");
        assert_eq!(ollama.endpoint(), "http://localhost:11434/v1/chat/completions");

        let openai =
            OpenAiCompatibleClient::from_config(&config(LlmProvider::OpenAi, None)).expect("client");
        assert_eq!(openai.endpoint(), "https://api.openai.com/v1/chat/completions");

        assert!(matches!(
            OpenAiCompatibleClient::from_config(&config(LlmProvider::Ollama, None)),
            Err(LlmError::Client(_))
        ));
    }

    #[test]
    fn request_body_orders_system_history_user_and_lists_tools() {
        let client = OpenAiCompatibleClient::from_config(&config(
            LlmProvider::Ollama,
            Some("http://localhost:11434/v1"),
        ))
        .expect("client");
        let request = ModelRequest {
            system: "sistema".to_string(),
            history: vec![
                ChatTurn::new(ChatRole::User, "hola"),
                ChatTurn::new(ChatRole::Assistant, "¡hola!"),
            ],
            user: "quiero un chip".to_string(),
            tools: vec![ToolSpec {
                name: "getCustomerById".to_string(),
                description: "Get a customer".to_string(),
                parameters: json!({ "type": "object" }),
            }],
        };

        let body = client.request_body(&request);

        let roles: Vec<&str> = body["messages"]
            .as_array()
            .expect("messages")
            .iter()
            .map(|message| message["role"].as_str().expect("role"))
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(body["messages"][3]["content"], "quiero un chip");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "getCustomerById");
    }

    #[test]
    fn parse_completion_reads_text_and_tool_calls() {
        let payload = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "getCustomerByPhoneNumber",
                            "arguments": "{\"phoneNumber\":\"5512345678\"}"
                        }
                    }]
                }
            }]
        });

        let response = parse_completion(&payload).expect("parse");

        assert_eq!(response.text, None);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "getCustomerByPhoneNumber");
        assert_eq!(response.tool_calls[0].arguments["phoneNumber"], "5512345678");
    }

    #[test]
    fn parse_completion_rejects_garbage() {
        assert!(matches!(parse_completion(&json!({ "choices": [] })), Err(LlmError::Decode(_))));

        let bad_arguments = json!({
            "choices": [{ "message": { "tool_calls": [{
                "id": "x", "function": { "name": "updateImei", "arguments": "{not json" }
            }]}}]
        });
        assert!(matches!(parse_completion(&bad_arguments), Err(LlmError::Decode(_))));
    }
}
