//! WRDO configuration: defaults → `config/wrdo.toml` → `WRDO__*` env → conventional credential vars.
//!
//! | Key | Default | Conventional env |
//! |-----|---------|------------------|
//! | bind_addr | 0.0.0.0:5000 | - |
//! | persona | "You are WRDO, a smart emotional assistant." | WRDO_PERSONA (empty = no persona) |
//! | upstream_timeout_secs | 30 | - |
//! | max_audio_bytes | 26214400 | - |
//! | llm.api_key / llm.api_url / llm.model | - / https://api.openai.com/v1 / gpt-4 | OPENAI_API_KEY |
//! | llm.temperature | - (service default) | - |
//! | emotion.api_key / emotion.api_url | - / - (required) | HUME_API_KEY / EMOTION_API_URL |
//! | stt.api_key / stt.api_url / stt.api_model | llm.api_key / llm.api_url / whisper-1 | STT_API_KEY |
//! | stt.model_size / stt.model_dir | base / - | WHISPER_MODEL_SIZE / WHISPER_MODEL_DIR |
//! | store.path / store.credentials_path | ./data/crumbs / - | WRDO_STORE_CREDENTIALS |
//! | store.queue_capacity | 1024 | - |
//!
//! Nested keys from the environment use a double underscore: `WRDO__LLM__MODEL=gpt-4o`.
//! The conventional variables win over everything else.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PERSONA: &str = "You are WRDO, a smart emotional assistant.";
pub const DEFAULT_CONFIG_PATH: &str = "config/wrdo.toml";

/// Process-wide tone/identity instruction for the reply generator. Immutable after startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonaConfig {
    instruction: Option<String>,
}

impl PersonaConfig {
    /// Blank instructions are treated as "no persona".
    pub fn new(instruction: impl Into<String>) -> Self {
        let s = instruction.into();
        let trimmed = s.trim();
        Self {
            instruction: (!trimmed.is_empty()).then(|| trimmed.to_string()),
        }
    }

    pub fn none() -> Self {
        Self { instruction: None }
    }

    pub fn instruction(&self) -> Option<&str> {
        self.instruction.as_deref()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmotionSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    /// Synchronous classification endpoint answering `{"predictions": [...]}`. No default:
    /// batch-job APIs answer an upload with a job id, which would read as neutral forever.
    #[serde(default)]
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SttSettings {
    /// Falls back to `llm.api_key` when unset.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Falls back to `llm.api_url` when unset.
    #[serde(default)]
    pub api_url: Option<String>,
    pub api_model: String,
    /// Whisper model size (tiny, base, small, medium, large-v3, ...). Pinned at startup.
    pub model_size: String,
    /// Directory holding `ggml-{model_size}.bin` for the local engine.
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    pub path: PathBuf,
    /// JSON credential bundle for a remote document log. When set, sled is not used.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    /// Records waiting for the writer. Submits beyond this are dropped and counted.
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WrdoConfig {
    pub bind_addr: String,
    #[serde(default)]
    pub persona: Option<String>,
    pub upstream_timeout_secs: u64,
    pub max_audio_bytes: usize,
    pub llm: LlmSettings,
    #[serde(default)]
    pub emotion: EmotionSettings,
    pub stt: SttSettings,
    pub store: StoreSettings,
}

impl WrdoConfig {
    /// Load from `WRDO_CONFIG` (default `config/wrdo.toml`) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("WRDO_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_with(Path::new(&path), None)
    }

    /// Load with an explicit file and, optionally, an explicit environment map instead of the
    /// process environment.
    pub fn load_with(
        path: &Path,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let lookup_raw = |name: &str| -> Option<String> {
            match &env {
                Some(map) => map.get(name).cloned(),
                None => std::env::var(name).ok(),
            }
        };
        let lookup = |name: &str| -> Option<String> {
            lookup_raw(name)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let builder = config::Config::builder()
            .set_default("bind_addr", "0.0.0.0:5000")?
            .set_default("persona", DEFAULT_PERSONA)?
            .set_default("upstream_timeout_secs", 30_i64)?
            .set_default("max_audio_bytes", 25_i64 * 1024 * 1024)?
            .set_default("llm.api_url", "https://api.openai.com/v1")?
            .set_default("llm.model", "gpt-4")?
            .set_default("stt.api_model", "whisper-1")?
            .set_default("stt.model_size", "base")?
            .set_default("store.path", "./data/crumbs")?
            .set_default("store.queue_capacity", 1024_i64)?;

        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("WRDO")
                    .separator("__")
                    .try_parsing(true)
                    .source(env.clone()),
            )
            .set_override_option("llm.api_key", lookup("OPENAI_API_KEY"))?
            .set_override_option("emotion.api_key", lookup("HUME_API_KEY"))?
            .set_override_option("emotion.api_url", lookup("EMOTION_API_URL"))?
            .set_override_option("stt.api_key", lookup("STT_API_KEY"))?
            .set_override_option("stt.model_size", lookup("WHISPER_MODEL_SIZE"))?
            .set_override_option("stt.model_dir", lookup("WHISPER_MODEL_DIR"))?
            .set_override_option("store.credentials_path", lookup("WRDO_STORE_CREDENTIALS"))?
            .set_override_option("persona", lookup_raw("WRDO_PERSONA"))?
            .build()?;

        Ok(built.try_deserialize()?)
    }

    /// Check that every credential the pipeline needs is present. Call once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        if non_empty(&self.llm.api_key).is_none() {
            return Err(ConfigError::MissingCredential("llm.api_key (OPENAI_API_KEY)"));
        }
        if non_empty(&self.emotion.api_key).is_none() {
            return Err(ConfigError::MissingCredential("emotion.api_key (HUME_API_KEY)"));
        }
        if self.emotion_api_url().is_none() {
            return Err(ConfigError::Invalid {
                key: "emotion.api_url",
                reason: "must be set (EMOTION_API_URL)".to_string(),
            });
        }
        if self.store.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "store.queue_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.stt.model_size.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "stt.model_size",
                reason: "must not be empty".to_string(),
            });
        }
        if self.upstream_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "upstream_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr.parse().map_err(|e| ConfigError::Invalid {
            key: "bind_addr",
            reason: format!("{}", e),
        })
    }

    pub fn persona(&self) -> PersonaConfig {
        self.persona
            .as_deref()
            .map(PersonaConfig::new)
            .unwrap_or_else(PersonaConfig::none)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn llm_api_key(&self) -> Option<&str> {
        non_empty(&self.llm.api_key)
    }

    pub fn emotion_api_key(&self) -> Option<&str> {
        non_empty(&self.emotion.api_key)
    }

    pub fn emotion_api_url(&self) -> Option<&str> {
        non_empty(&self.emotion.api_url)
    }

    pub fn stt_api_key(&self) -> Option<&str> {
        non_empty(&self.stt.api_key).or_else(|| self.llm_api_key())
    }

    pub fn stt_api_url(&self) -> &str {
        self.stt
            .api_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.llm.api_url)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
