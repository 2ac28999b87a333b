//! OpenRouter chat-completions adapter.

use crate::agent::config::SettingsProvider;
use crate::api::client::{ModelClient, ModelFuture};
use crate::api::retry::{RetryConfig, classify_http_error, retry_api_call};
use crate::error::AgentError;
use crate::{ChatCompletion, Message, ToolCall, ToolDef, UsageInfo};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model when neither settings nor CLI pick one.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

/// Default response token cap per request.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

// ── Wire types ─────────────────────────────────────────────────────

/// Chat completion request body.
#[derive(Serialize, Debug)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<&'a [ToolDef]>,
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
///
/// The per-request timeout is read from `settings` on every request.
pub struct OpenRouterClient {
    client: reqwest::Client,
    settings: Arc<dyn SettingsProvider>,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    retry: RetryConfig,
}

impl OpenRouterClient {
    /// Create a client for `model`.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("critic-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            settings,
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.2,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Current per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.settings.settings().request_timeout()
    }

    fn build_request(&self, body: &ChatRequest<'_>) -> reqwest::RequestBuilder {
        self.client
            .post(OPENROUTER_URL)
            .timeout(self.request_timeout())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Title", "critic-rs")
            .json(body)
    }

    /// Send one request without retry or cancellation handling.
    async fn chat(&self, body: &ChatRequest<'_>) -> Result<ChatCompletion, AgentError> {
        debug!(
            "LLM request: model={}, messages={}, tools={}, max_tokens={}",
            body.model,
            body.messages.len(),
            body.tools.map_or(0, |t| t.len()),
            body.max_tokens,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let resp = self
            .build_request(body)
            .send()
            .await
            .map_err(|e| AgentError::Model(format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AgentError::Model(format!("failed to read response: {e}")))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(classify_http_error(status.as_u16(), &text));
        }
        parse_response(&text)
    }
}

/// Decode a successful response body.
fn parse_response(text: &str) -> Result<ChatCompletion, AgentError> {
    let parsed: RawChatResponse = serde_json::from_str(text)
        .map_err(|e| AgentError::Model(format!("failed to parse response: {e}")))?;

    if let Some(err) = parsed.error {
        return Err(classify_http_error(200, &err.message));
    }

    let Some(choice) = parsed.choices.and_then(|c| c.into_iter().next()) else {
        debug!("LLM output: empty (no choices)");
        return Ok(ChatCompletion {
            usage: parsed.usage,
            ..Default::default()
        });
    };

    debug!(
        "LLM output: {} chars text, {} tool call(s)",
        choice.message.content.as_ref().map_or(0, |s| s.len()),
        choice.message.tool_calls.as_ref().map_or(0, |t| t.len()),
    );

    Ok(ChatCompletion {
        content: choice.message.content,
        tool_calls: choice.message.tool_calls.unwrap_or_default(),
        usage: parsed.usage,
        finish_reason: choice.finish_reason,
    })
}

impl ModelClient for OpenRouterClient {
    fn send_request<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDef],
        cancel: &'a CancellationToken,
    ) -> ModelFuture<'a> {
        Box::pin(async move {
            let body = ChatRequest {
                model: &self.model,
                messages,
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                tools: (!tools.is_empty()).then_some(tools),
            };
            tokio::select! {
                _ = cancel.cancelled() => Err(AgentError::Cancelled),
                result = retry_api_call(&self.retry, cancel, || self.chat(&body)) => result,
            }
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::config::{AgentSettings, SharedSettings};

    #[test]
    fn request_omits_empty_tool_list() {
        let messages = vec![Message::user("hi")];
        let req = ChatRequest {
            model: "m",
            messages: &messages,
            max_tokens: 100,
            temperature: 0.0,
            tools: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("tools").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn request_timeout_follows_live_settings() {
        let settings = Arc::new(SharedSettings::new(AgentSettings::default()));
        let client = OpenRouterClient::new("key", "m", settings.clone()).unwrap();
        assert_eq!(client.request_timeout(), Duration::from_secs(120));

        settings.update(|s| s.request_timeout_secs = 7);
        let messages = vec![Message::user("hi")];
        let body = ChatRequest {
            model: "m",
            messages: &messages,
            max_tokens: 10,
            temperature: 0.0,
            tools: None,
        };
        let request = client.build_request(&body).build().unwrap();
        assert_eq!(request.timeout(), Some(&Duration::from_secs(7)));
    }

    #[test]
    fn parses_tool_calls() {
        let body = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{"id": "c1", "type": "function",
                                    "function": {"name": "submit_review", "arguments": "{}"}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let completion = parse_response(body).unwrap();
        assert!(completion.content.is_none());
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].function.name, "submit_review");
        assert_eq!(completion.usage.unwrap().total_tokens, Some(15));
    }

    #[test]
    fn embedded_error_is_classified() {
        let body = r#"{"error": {"message": "This model does not support tool use"}}"#;
        assert!(matches!(
            parse_response(body),
            Err(AgentError::ModelUnsupported(_))
        ));
    }

    #[test]
    fn missing_choices_is_empty_completion() {
        let completion = parse_response(r#"{"choices": []}"#).unwrap();
        assert!(completion.content.is_none());
        assert!(completion.tool_calls.is_empty());
    }
}
