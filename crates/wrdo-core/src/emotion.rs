//! **Emotion classifier** - audio in, raw prediction payload out.
//!
//! The classifier itself is best-effort: a reachable service that answers with an unexpected
//! shape is not a failure, `resolve_emotion` degrades it to `"neutral"`. Transport failures
//! (timeout, connection refused, non-2xx) are returned as `AdapterError` and abort the turn.

use crate::audio::StagedAudio;
use crate::error::{AdapterError, AdapterResult, ConfigError};
use crate::turn::EmotionLabel;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    /// Classify one staged clip. Returns the service's JSON payload untouched.
    async fn classify(&self, audio: &StagedAudio) -> AdapterResult<Value>;
}

/// Take the first prediction's first emotion name, verbatim. Anything missing, mistyped, or
/// blank resolves to `"neutral"`.
pub fn resolve_emotion(response: &Value) -> EmotionLabel {
    let predictions = response
        .get("predictions")
        .and_then(Value::as_array)
        .map(Vec::as_slice);
    let first_emotion = match predictions {
        Some([first, ..]) => first
            .get("emotions")
            .and_then(Value::as_array)
            .and_then(|emotions| emotions.first()),
        _ => None,
    };
    match first_emotion
        .and_then(|e| e.get("name"))
        .and_then(Value::as_str)
    {
        Some(name) if !name.trim().is_empty() => EmotionLabel::new(name),
        _ => EmotionLabel::neutral(),
    }
}

/// Hume-style emotion API: multipart `file` upload, `X-Hume-Api-Key` header.
#[derive(Debug, Clone)]
pub struct HumeClassifier {
    pub api_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HumeClassifier {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_url: api_url.into(),
            api_key: api_key.into().trim().to_string(),
            client,
        })
    }
}

#[async_trait]
impl EmotionClassifier for HumeClassifier {
    async fn classify(&self, audio: &StagedAudio) -> AdapterResult<Value> {
        let bytes = audio.read().await?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(audio.file_name().to_string())
            .mime_str(audio.mime())
            .map_err(|e| AdapterError::Config(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let res = self
            .client
            .post(&self.api_url)
            .header("X-Hume-Api-Key", &self.api_key)
            .multipart(form)
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

        match serde_json::from_str::<Value>(&text) {
            Ok(json) => {
                if json.get("predictions").is_none() {
                    warn!(
                        target: "wrdo::emotion",
                        url = %self.api_url,
                        "Emotion payload has no `predictions`; turn will read as neutral"
                    );
                } else {
                    debug!(target: "wrdo::emotion", bytes = text.len(), "Emotion payload received");
                }
                Ok(json)
            }
            Err(e) => {
                warn!(target: "wrdo::emotion", "Emotion payload is not JSON ({}); treating as empty", e);
                Ok(Value::Null)
            }
        }
    }
}
