use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::app_config::StyleConfig;
use crate::errors::ProviderError;
use crate::providers::StyleRewriter;

const SYSTEM_PROMPT: &str = "你是一个专业的有声书朗读转换助手。请将以下书面语文本改写成适合朗读的自然口语，\
保持原意的同时让表达更加流畅自然。不要添加额外解释，直接输出转换后的文本。";

const USER_PROMPT_PREFIX: &str = "请将下面这段文字转换成适合有声书朗读的口语化表达，保持原文意思不变：\n\n";

/// Preambles some models put before the rewritten text
const PREAMBLES: &[&str] = &[
    "以下是转换后的口语化表达：",
    "以下是适合有声书朗读的口语化表达：",
    "Here is the rewritten text:",
];

/// Chat-completions request
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

/// Chat message format
#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Style rewriter backed by an OpenAI-compatible chat endpoint
#[derive(Debug, Clone)]
pub struct ChatStyleRewriter {
    /// HTTP client for API requests
    client: Client,
    /// Full chat-completions URL
    endpoint: String,
    /// Bearer token
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatStyleRewriter {
    pub fn new(config: &StyleConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::ConnectionError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.resolved_api_key(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl StyleRewriter for ChatStyleRewriter {
    async fn rewrite(&self, text: &str) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system".to_string(), content: SYSTEM_PROMPT.to_string() },
                ChatMessage { role: "user".to_string(), content: format!("{}{}", USER_PROMPT_PREFIX, text) },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::ConnectionError(format!("Style request timed out: {}", e))
                } else {
                    ProviderError::RequestFailed(format!("Failed to send style request: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("Style API error ({}): {}", status, error_text);
            return Err(classify_status(status, error_text));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(format!("Failed to parse style response: {}", e)))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::ParseError("Style response has no choices".to_string()))?;

        let cleaned = clean_reply(&content);
        if cleaned.is_empty() {
            return Err(ProviderError::ParseError("Style response is empty".to_string()));
        }
        debug!("Rewrote {} chars into {} chars", text.chars().count(), cleaned.chars().count());
        Ok(cleaned)
    }
}

/// Map an HTTP error status to a provider error
fn classify_status(status: StatusCode, message: String) -> ProviderError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimitExceeded(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AuthenticationError(message),
        StatusCode::PAYMENT_REQUIRED => ProviderError::QuotaExhausted(message),
        _ => ProviderError::ApiError { status_code: status.as_u16(), message },
    }
}

/// Strip quotes and preambles around a model reply
fn clean_reply(reply: &str) -> String {
    let mut text = reply.trim().trim_matches(|c| c == '"' || c == '\'' || c == '“' || c == '”').to_string();
    for preamble in PREAMBLES {
        text = text.replace(preamble, "");
    }
    text.trim().to_string()
}
