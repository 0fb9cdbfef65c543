//! Turn Orchestrator - drives one turn from input to reply and queues its crumb.
//!
//! Audio turns stage the clip once, then run transcription and emotion classification
//! concurrently against the same file. Text turns skip both adapters. Either way the reply
//! generator runs last, and a record is queued only after it succeeds.

use crate::audio::StagedAudio;
use crate::config::PersonaConfig;
use crate::emotion::{resolve_emotion, EmotionClassifier};
use crate::error::{Stage, TurnError};
use crate::reply::{ReplyGenerator, ReplyRequest};
use crate::store::{PersistenceSnapshot, TurnWriter};
use crate::stt::SttBackend;
use crate::turn::{AudioClip, EmotionLabel, NewTurnRecord, TurnInput, TurnReply, TurnSource};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Outcome of one turn.
pub type TurnResult = Result<TurnReply, TurnError>;

const TODO_COMMAND: &str = "/todo";
const TODO_REPLY: &str = "Task noted. (To-Do list not yet live.)";

/// Canned reply for a text command, if `text` is one.
pub fn command_reply(text: &str) -> Option<&'static str> {
    let head = text.trim_start().get(..TODO_COMMAND.len())?;
    head.eq_ignore_ascii_case(TODO_COMMAND).then_some(TODO_REPLY)
}

/// The core pipeline. Holds only read-only handles, so one instance serves every request.
pub struct TurnOrchestrator {
    persona: Arc<PersonaConfig>,
    stt: Arc<dyn SttBackend>,
    classifier: Arc<dyn EmotionClassifier>,
    generator: Arc<dyn ReplyGenerator>,
    writer: TurnWriter,
    staging_dir: Option<PathBuf>,
}

impl TurnOrchestrator {
    pub fn new(
        persona: Arc<PersonaConfig>,
        stt: Arc<dyn SttBackend>,
        classifier: Arc<dyn EmotionClassifier>,
        generator: Arc<dyn ReplyGenerator>,
        writer: TurnWriter,
    ) -> Self {
        Self {
            persona,
            stt,
            classifier,
            generator,
            writer,
            staging_dir: None,
        }
    }

    /// Stage audio under `dir` instead of the system temp dir.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Persistence counters for the health endpoint.
    pub fn stats(&self) -> PersistenceSnapshot {
        self.writer.stats().snapshot()
    }

    pub async fn process(&self, input: TurnInput) -> TurnResult {
        self.process_as(None, input).await
    }

    /// Process one turn on behalf of `user_id` (recorded on the crumb when present).
    pub async fn process_as(&self, user_id: Option<String>, input: TurnInput) -> TurnResult {
        let source = input.source();
        let span = info_span!(
            target: "wrdo::turn",
            "turn",
            turn_id = %Uuid::new_v4(),
            source = source.as_str()
        );

        async move {
            let result = self.run(user_id, input).await;
            match &result {
                Ok(reply) => info!(
                    target: "wrdo::turn",
                    emotion = %reply.emotion,
                    chars = reply.wrdo_replied.len(),
                    "Turn complete"
                ),
                Err(e) if e.is_client_error() => {
                    warn!(target: "wrdo::turn", "Turn rejected: {}", e)
                }
                Err(e) => error!(target: "wrdo::turn", "Turn aborted, nothing recorded: {}", e),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, user_id: Option<String>, input: TurnInput) -> TurnResult {
        let source = input.source();
        let (transcript, emotion) = match input {
            TurnInput::Text(text) => (text, EmotionLabel::neutral()),
            TurnInput::Audio(clip) => self.perceive(&clip).await?,
        };

        let command = match source {
            TurnSource::Text => command_reply(&transcript),
            TurnSource::Audio => None,
        };
        let reply = match command {
            Some(canned) => {
                debug!(target: "wrdo::turn", "Text command handled without the generator");
                canned.to_string()
            }
            None => {
                let request = ReplyRequest {
                    persona: self.persona.instruction(),
                    transcript: &transcript,
                    emotion: &emotion,
                };
                self.generator
                    .generate(request)
                    .await
                    .map_err(TurnError::upstream(Stage::Reply))?
            }
        };

        // A full or closed writer is logged and counted inside `submit`; the reply still stands.
        let _ = self.writer.submit(NewTurnRecord {
            text: transcript.clone(),
            emotion: emotion.clone(),
            reply: reply.clone(),
            source,
            user_id,
        });

        Ok(TurnReply {
            you_said: transcript,
            emotion,
            wrdo_replied: reply,
        })
    }

    /// Stage the clip, then transcribe and classify it concurrently. The staged file is gone
    /// when this returns, whichever way it returns.
    async fn perceive(&self, clip: &AudioClip) -> Result<(String, EmotionLabel), TurnError> {
        if clip.bytes.is_empty() {
            return Err(TurnError::ClientInput("audio upload is empty".to_string()));
        }
        let staged = match &self.staging_dir {
            Some(dir) => StagedAudio::stage_in(clip, dir).await?,
            None => StagedAudio::stage(clip).await?,
        };
        debug!(target: "wrdo::turn", staged = ?staged, "Audio staged");

        let outcome = tokio::try_join!(
            async {
                self.stt
                    .transcribe(&staged)
                    .await
                    .map_err(TurnError::upstream(Stage::Transcription))
            },
            async {
                self.classifier
                    .classify(&staged)
                    .await
                    .map_err(TurnError::upstream(Stage::Emotion))
            },
        );

        if let Err(e) = staged.close() {
            warn!(target: "wrdo::turn", "Staged audio cleanup failed: {}", e);
        }

        let (transcript, prediction) = outcome?;
        let emotion = resolve_emotion(&prediction);
        debug!(
            target: "wrdo::turn",
            emotion = %emotion,
            transcript_chars = transcript.len(),
            "Audio perceived"
        );
        Ok((transcript, emotion))
    }
}
