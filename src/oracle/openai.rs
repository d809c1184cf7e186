//! OpenAI Chat Completions oracle.
//!
//! Sends one non-streaming request per failure and forces a call to the
//! assessment function. Compatible with any OpenAI-style endpoint (Azure,
//! Groq, local gateways) via a custom base URL.

use super::{ASSESSMENT_FUNCTION, Oracle, OracleRequest, assessment_parameters_schema};
use crate::error::{Error, Result};
use crate::http::client::Client;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt::Write as _;

// ============================================================================
// Constants
// ============================================================================

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const MAX_ERROR_BODY_CHARS: usize = 500;

// ============================================================================
// OpenAI Oracle
// ============================================================================

pub struct OpenAiOracle {
    client: Client,
    model: String,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for OpenAiOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiOracle")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAiOracle {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: Client::new()?,
            model: model.into(),
            api_key: api_key.into(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        })
    }

    /// Point at an OpenAI-compatible endpoint instead of api.openai.com.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request(&self, request: &OracleRequest) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: build_prompt(request),
            }],
            tools: vec![json!({
                "type": "function",
                "function": {
                    "name": ASSESSMENT_FUNCTION,
                    "description":
                        "Return the failure category and retryability for one failed test.",
                    "parameters": assessment_parameters_schema(),
                }
            })],
            tool_choice: json!({
                "type": "function",
                "function": {"name": ASSESSMENT_FUNCTION}
            }),
            temperature: 0.0,
        }
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    fn name(&self) -> &str {
        &self.model
    }

    async fn assess(&self, request: &OracleRequest) -> Result<String> {
        let body = self.build_request(request);
        let auth = format!("Bearer {}", self.api_key);
        let response = self
            .client
            .post_json(&self.endpoint(), &[("Authorization", auth.as_str())], &body)
            .await?;

        let status = response.status();
        let success = response.is_success();
        let text = response.text().await?;
        if !success {
            let snippet: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(Error::oracle_unavailable(
                self.model.clone(),
                format!("HTTP {status}: {snippet}"),
            ));
        }

        extract_arguments(&text)
    }
}

/// Render the classification prompt for one failure.
#[must_use]
pub fn build_prompt(request: &OracleRequest) -> String {
    let mut prompt = String::from(
        "Classify the failed automated test below and decide whether re-running it could pass.\n\n\
         Decision policy, applied in order:\n\
         1. Transient evidence decides. If the failure evidence shows any 5xx HTTP status, \
         a timeout, a connection or socket error, a deadlock, or 'service unavailable', the \
         failure is retryable. This holds even when the failure surfaces as an assertion, \
         for example an assertion that expected 200 and received 503.\n\
         2. Otherwise the failure is deterministic and not retryable. Typical signals are \
         4xx HTTP statuses, null-reference errors, illegal-argument errors, and assertions \
         comparing data values.\n\n",
    );

    let _ = writeln!(prompt, "Test: {}", request.test_selector);
    let _ = writeln!(
        prompt,
        "Description: {}",
        request.description.as_deref().unwrap_or("none")
    );
    let _ = writeln!(
        prompt,
        "File: {}",
        request.file_path.as_deref().unwrap_or("none")
    );
    let _ = writeln!(
        prompt,
        "Exception: {}",
        request.exception.as_deref().unwrap_or("none")
    );
    let _ = writeln!(
        prompt,
        "Stack trace excerpt:\n---\n{}\n---",
        request.stacktrace_excerpt.as_deref().unwrap_or("none")
    );
    let _ = write!(
        prompt,
        "\nAnswer only by calling `{ASSESSMENT_FUNCTION}` with minified JSON arguments."
    );
    prompt
}

/// Pull the function-call arguments out of a chat completion response body.
///
/// Falls back to the message content when the model answered without a tool call.
pub fn extract_arguments(body: &str) -> Result<String> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| Error::oracle_malformed(format!("unexpected completion payload: {e}")))?;

    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| Error::oracle_malformed("completion has no choices"))?;

    if let Some(call) = message.tool_calls.unwrap_or_default().into_iter().next() {
        return Ok(call.function.arguments);
    }
    match message.content {
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(text),
        _ => Err(Error::oracle_malformed(
            "completion carried neither a tool call nor content",
        )),
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    tools: Vec<Value>,
    tool_choice: Value,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatToolCall {
    function: ChatFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ChatFunctionCall {
    #[serde(default)]
    arguments: String,
}

// ============================================================================
// Tests
// ============================================================================
