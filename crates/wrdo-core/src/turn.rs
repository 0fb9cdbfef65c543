//! Turn data model: what comes in, what goes out, and what gets written to the crumb log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label used whenever no emotion could be inferred.
pub const NEUTRAL: &str = "neutral";

/// One user turn: exactly one of audio or text.
#[derive(Debug, Clone)]
pub enum TurnInput {
    Audio(AudioClip),
    Text(String),
}

impl TurnInput {
    pub fn source(&self) -> TurnSource {
        match self {
            TurnInput::Audio(_) => TurnSource::Audio,
            TurnInput::Text(_) => TurnSource::Text,
        }
    }
}

/// Raw uploaded audio plus enough metadata to give the staged file a sensible suffix.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    /// File extension without the dot (e.g. `wav`).
    pub suffix: String,
    pub mime: Option<String>,
}

impl AudioClip {
    /// Build a clip, deriving the suffix from the uploaded file name, then the MIME type, then `wav`.
    pub fn new(bytes: Vec<u8>, file_name: Option<&str>, mime: Option<&str>) -> Self {
        let suffix = file_name
            .and_then(|n| n.rsplit_once('.').map(|(_, ext)| ext))
            .map(sanitize_suffix)
            .filter(|s| !s.is_empty())
            .or_else(|| mime.and_then(suffix_for_mime).map(str::to_string))
            .unwrap_or_else(|| "wav".to_string());
        Self {
            bytes,
            suffix,
            mime: mime.map(str::to_string),
        }
    }

    /// MIME type to send upstream; falls back to one implied by the suffix.
    pub fn mime_or_default(&self) -> &str {
        match self.mime.as_deref() {
            Some(m) if !m.trim().is_empty() => m,
            _ => mime_for_suffix(&self.suffix),
        }
    }
}

fn sanitize_suffix(ext: &str) -> String {
    ext.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase()
}

fn suffix_for_mime(mime: &str) -> Option<&'static str> {
    let base = mime.split(';').next().unwrap_or("").trim();
    match base.to_ascii_lowercase().as_str() {
        "audio/wav" | "audio/x-wav" | "audio/wave" | "audio/vnd.wave" => Some("wav"),
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Some("m4a"),
        "audio/ogg" => Some("ogg"),
        "audio/webm" => Some("webm"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        _ => None,
    }
}

fn mime_for_suffix(suffix: &str) -> &'static str {
    match suffix {
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "ogg" => "audio/ogg",
        "webm" => "audio/webm",
        "flac" => "audio/flac",
        _ => "audio/wav",
    }
}

/// Where the transcript came from. Persisted as `"audio"` / `"text"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnSource {
    Audio,
    Text,
}

impl TurnSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnSource::Audio => "audio",
            TurnSource::Text => "text",
        }
    }
}

/// Open-vocabulary emotion label from the classifier. Unknown labels pass through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmotionLabel(String);

impl EmotionLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn neutral() -> Self {
        Self(NEUTRAL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_neutral(&self) -> bool {
        self.0 == NEUTRAL
    }
}

impl Default for EmotionLabel {
    fn default() -> Self {
        Self::neutral()
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Successful turn payload, serialized verbatim as the `/chat` response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnReply {
    pub you_said: String,
    pub emotion: EmotionLabel,
    pub wrdo_replied: String,
}

/// A turn record before the store stamps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTurnRecord {
    pub text: String,
    pub emotion: EmotionLabel,
    pub reply: String,
    pub source: TurnSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl NewTurnRecord {
    /// Stamp the record. Only stores call this, at write time.
    pub fn stamp(self, created_at: DateTime<Utc>) -> TurnRecord {
        TurnRecord {
            text: self.text,
            emotion: self.emotion,
            reply: self.reply,
            source: self.source,
            user_id: self.user_id,
            created_at,
        }
    }
}

/// Persisted crumb. Never mutated or deleted once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub text: String,
    pub emotion: EmotionLabel,
    pub reply: String,
    pub source: TurnSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
