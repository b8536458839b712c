//! Language model client abstraction
//!
//! Provides:
//! - `LanguageModel` trait used by query expansion
//! - OpenAI-compatible chat completions client
//! - Scripted mock for tests

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Text completion service
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a single prompt and return the raw response text
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
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
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// OpenAI-compatible chat completions client
pub struct OpenAiChatModel {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: String,
}

impl OpenAiChatModel {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "llm.api_key is required for the openai provider".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config, api_key })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self.client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::LanguageModelTimeout {
                        timeout_ms: self.config.timeout_secs * 1000,
                    }
                } else {
                    AppError::LanguageModel {
                        message: format!("LLM API request failed: {}", e),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::LanguageModel {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        let chat_response: ChatResponse = response.json().await
            .map_err(|e| AppError::LanguageModel {
                message: format!("Failed to parse LLM response: {}", e),
            })?;

        chat_response.choices.into_iter().next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::LanguageModel {
                message: "Empty response from LLM".to_string(),
            })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// One scripted reply of the mock model
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(String),
    /// Never completes; exercises caller timeouts
    Hang,
}

/// Mock language model replaying scripted replies.
///
/// Once the script is exhausted every call returns the fallback reply.
pub struct MockLanguageModel {
    script: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
    calls: AtomicUsize,
}

impl MockLanguageModel {
    pub fn new(script: Vec<MockReply>, fallback: MockReply) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    /// Model that always answers with the same text
    pub fn replying(text: impl Into<String>) -> Self {
        Self::new(Vec::new(), MockReply::Text(text.into()))
    }

    /// Model whose every call fails
    pub fn failing() -> Self {
        Self::new(Vec::new(), MockReply::Fail("mock language model failure".to_string()))
    }

    /// Number of completed or attempted calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let reply = self.script.lock().await.pop_front().unwrap_or_else(|| self.fallback.clone());

        match reply {
            MockReply::Text(text) => Ok(text),
            MockReply::Fail(message) => Err(AppError::LanguageModel { message }),
            MockReply::Hang => {
                futures::future::pending::<()>().await;
                Err(AppError::LanguageModelUnavailable)
            }
        }
    }

    fn model_name(&self) -> &str {
        "mock-llm"
    }
}

/// Create the expansion language model, or `None` when disabled
pub fn create_language_model(config: &LlmConfig) -> Result<Option<Arc<dyn LanguageModel>>> {
    match config.provider.as_str() {
        "openai" => Ok(Some(Arc::new(OpenAiChatModel::new(config.clone())?))),
        "none" | "" => Ok(None),
        other => {
            tracing::warn!(provider = other, "Unknown LLM provider, query expansion will use rules only");
            Ok(None)
        }
    }
}
