//! **Speech-to-Text (STT)** - turn the staged audio file into the transcript for the reply generator.
//!
//! `WhisperApiStt` uploads to any OpenAI-compatible `/audio/transcriptions` endpoint.
//! With `--features whisper`, `LocalWhisperStt` runs a ggml model on-device; the model is loaded
//! once at startup so transcripts are deterministic for a given binary + model file.

use crate::audio::StagedAudio;
use crate::config::WrdoConfig;
use crate::error::{AdapterError, AdapterResult, ConfigError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[async_trait]
pub trait SttBackend: Send + Sync {
    /// Transcribe one staged clip. Empty string when nothing was recognised.
    async fn transcribe(&self, audio: &StagedAudio) -> AdapterResult<String>;
}

/// Remote STT: OpenAI-compatible transcription API (OpenAI Whisper, OpenRouter, local servers).
#[derive(Debug, Clone)]
pub struct WhisperApiStt {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    /// Model: whisper-1, gpt-4o-transcribe, etc.
    pub model: String,
    api_key: String,
    client: reqwest::Client,
}

impl WhisperApiStt {
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
            api_key: api_key.into().trim().to_string(),
            client,
        })
    }
}

#[async_trait]
impl SttBackend for WhisperApiStt {
    async fn transcribe(&self, audio: &StagedAudio) -> AdapterResult<String> {
        if audio.is_empty() {
            return Ok(String::new());
        }
        let bytes = audio.read().await?;
        let url = format!(
            "{}/audio/transcriptions",
            self.base_url.trim_end_matches('/')
        );
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(audio.file_name().to_string())
            .mime_str(audio.mime())
            .map_err(|e| AdapterError::Config(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(AdapterError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let json: serde_json::Value = res.json().await?;
        let text = json
            .get("text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| AdapterError::Malformed("transcription has no `text` field".into()))?
            .trim()
            .to_string();
        Ok(text)
    }
}

// -----------------------------------------------------------------------------
// Local Whisper STT (optional feature). Requires whisper.cpp/ggml.
// -----------------------------------------------------------------------------
#[cfg(feature = "whisper")]
mod whisper_local {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    const SAMPLE_RATE: u32 = 16_000;

    /// On-device Whisper. Audio must be 16 kHz WAV; stereo is averaged down to mono.
    pub struct LocalWhisperStt {
        model_path: PathBuf,
        #[allow(dead_code)]
        context: WhisperContext,
        state: Arc<Mutex<whisper_rs::WhisperState>>,
    }

    impl LocalWhisperStt {
        /// Load `ggml-{size}.bin` from `model_dir`.
        pub fn load(model_dir: &Path, model_size: &str) -> Result<Self, ConfigError> {
            let model_path = model_dir.join(format!("ggml-{}.bin", model_size.trim()));
            let path_str = model_path.to_str().ok_or_else(|| ConfigError::Invalid {
                key: "stt.model_dir",
                reason: "model path is not valid UTF-8".to_string(),
            })?;
            let context =
                WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
                    .map_err(|e| ConfigError::Invalid {
                        key: "stt.model_dir",
                        reason: format!("whisper load failed for {}: {}", model_path.display(), e),
                    })?;
            let state = context.create_state().map_err(|e| ConfigError::Invalid {
                key: "stt.model_dir",
                reason: format!("whisper state init failed: {}", e),
            })?;
            Ok(Self {
                model_path,
                context,
                state: Arc::new(Mutex::new(state)),
            })
        }

        pub fn model_path(&self) -> &Path {
            &self.model_path
        }
    }

    fn read_wav_mono(path: &Path) -> AdapterResult<Vec<f32>> {
        let mut reader = hound::WavReader::open(path)
            .map_err(|e| AdapterError::Malformed(format!("not a readable WAV file: {}", e)))?;
        let spec = reader.spec();
        if spec.sample_rate != SAMPLE_RATE {
            return Err(AdapterError::Malformed(format!(
                "Whisper expects {} Hz; got {} Hz",
                SAMPLE_RATE, spec.sample_rate
            )));
        }
        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| AdapterError::Malformed(e.to_string()))?,
            hound::SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(|e| AdapterError::Malformed(e.to_string()))?
            }
        };
        let channels = spec.channels.max(1) as usize;
        if channels == 1 {
            return Ok(interleaved);
        }
        Ok(interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect())
    }

    #[async_trait]
    impl SttBackend for LocalWhisperStt {
        async fn transcribe(&self, audio: &StagedAudio) -> AdapterResult<String> {
            if audio.is_empty() {
                return Ok(String::new());
            }
            let path = audio.path().to_path_buf();
            let state = Arc::clone(&self.state);
            tokio::task::spawn_blocking(move || {
                let samples = read_wav_mono(&path)?;
                let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
                params.set_print_progress(false);
                params.set_print_realtime(false);
                params.set_no_timestamps(true);

                let mut state = state
                    .lock()
                    .map_err(|e| AdapterError::Unreachable(format!("whisper lock poisoned: {}", e)))?;
                state
                    .full(params, &samples)
                    .map_err(|e| AdapterError::Unreachable(format!("whisper inference failed: {}", e)))?;
                let text = state
                    .as_iter()
                    .filter_map(|seg| seg.to_str().ok().map(str::to_string))
                    .collect::<Vec<_>>()
                    .join(" ")
                    .trim()
                    .to_string();
                Ok(text)
            })
            .await
            .map_err(|e| AdapterError::Unreachable(format!("whisper task failed: {}", e)))?
        }
    }
}

#[cfg(feature = "whisper")]
pub use whisper_local::LocalWhisperStt;

/// Build the configured STT backend: the local model when `stt.model_dir` is set (requires the
/// `whisper` feature), otherwise the remote transcription API.
pub fn from_config(cfg: &WrdoConfig) -> Result<Arc<dyn SttBackend>, ConfigError> {
    if let Some(dir) = cfg.stt.model_dir.as_deref() {
        #[cfg(feature = "whisper")]
        {
            let local = LocalWhisperStt::load(dir, &cfg.stt.model_size)?;
            info!(target: "wrdo::stt", model = %local.model_path().display(), "STT: [Whisper] (local)");
            return Ok(Arc::new(local));
        }
        #[cfg(not(feature = "whisper"))]
        {
            return Err(ConfigError::Invalid {
                key: "stt.model_dir",
                reason: format!(
                    "{} is set but this build lacks the `whisper` feature",
                    dir.display()
                ),
            });
        }
    }

    let key = cfg
        .stt_api_key()
        .ok_or(ConfigError::MissingCredential("stt.api_key (STT_API_KEY or OPENAI_API_KEY)"))?;
    let remote = WhisperApiStt::new(
        cfg.stt_api_url(),
        key,
        cfg.stt.api_model.clone(),
        cfg.upstream_timeout(),
    )?;
    info!(target: "wrdo::stt", model = %remote.model, url = %remote.base_url, "STT: [Whisper API] (remote)");
    Ok(Arc::new(remote))
}
