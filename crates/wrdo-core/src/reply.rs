//! Reply generation: prompt construction plus an OpenAI-compatible chat completion client.
//!
//! One request, one response. No streaming and no retry; the client timeout is whatever
//! `upstream_timeout_secs` says.

use crate::error::{AdapterError, AdapterResult, ConfigError};
use crate::turn::EmotionLabel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Everything the generator needs for one turn.
#[derive(Debug, Clone, Copy)]
pub struct ReplyRequest<'a> {
    pub persona: Option<&'a str>,
    pub transcript: &'a str,
    pub emotion: &'a EmotionLabel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content,
        }
    }
}

impl<'a> ReplyRequest<'a> {
    pub fn emotion_directive(&self) -> String {
        format!(
            "The user sounds {}. Let that shape your tone: acknowledge how they feel and reply with matching empathy.",
            self.emotion
        )
    }

    /// With a persona the persona governs tone as the system message and the emotion directive
    /// rides along with it; without one the directive is folded into the user prompt.
    pub fn messages(&self) -> Vec<ChatMessage> {
        match self.persona {
            Some(persona) => vec![
                ChatMessage::new("system", format!("{}\n\n{}", persona, self.emotion_directive())),
                ChatMessage::new("user", self.transcript.to_string()),
            ],
            None => vec![ChatMessage::new(
                "user",
                format!(
                    "{}\n\nThe user said: \"{}\"",
                    self.emotion_directive(),
                    self.transcript
                ),
            )],
        }
    }
}

#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, request: ReplyRequest<'_>) -> AdapterResult<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageResponse>,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client (OpenAI, OpenRouter, local servers).
#[derive(Debug, Clone)]
pub struct ChatCompletionGenerator {
    pub base_url: String,
    pub model: String,
    pub temperature: Option<f32>,
    api_key: String,
    client: reqwest::Client,
}

impl ChatCompletionGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            model: model.into(),
            temperature: None,
            api_key: api_key.into().trim().to_string(),
            client,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
impl ReplyGenerator for ChatCompletionGenerator {
    async fn generate(&self, request: ReplyRequest<'_>) -> AdapterResult<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.model,
            messages: request.messages(),
            temperature: self.temperature,
        };

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(AdapterError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| AdapterError::Malformed(format!("completion parse: {}", e)))?;
        let content = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| AdapterError::Malformed("completion has no message content".into()))?;

        debug!(target: "wrdo::reply", model = %self.model, chars = content.len(), "Reply generated");
        Ok(content.trim().to_string())
    }
}
