//! # WRDO Core - the conversational turn pipeline
//!
//! One turn in, one emotionally-aware reply out, one crumb on the log.
//! Each turn is independent: there is no session state between turns.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      Turn Orchestrator                        │
//! │                                                               │
//! │   audio ─→ StagedAudio ─┬─→ SttBackend ──────────┐            │
//! │           (temp file)   └─→ EmotionClassifier ─┐ │            │
//! │                               resolve_emotion ←┘ ↓            │
//! │   text ──────────────────────────→ (transcript, emotion)      │
//! │                                            ↓                  │
//! │                      PersonaConfig → ReplyGenerator           │
//! │                                            ↓                  │
//! │   TurnReply ←──────────────────────────── reply               │
//! │                                            ↓                  │
//! │                  TurnWriter ─(mpsc)→ writer task → TurnStore  │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod emotion;
pub mod error;
pub mod orchestrator;
pub mod reply;
pub mod store;
pub mod stt;
pub mod turn;

pub use audio::StagedAudio;
pub use config::{PersonaConfig, WrdoConfig, DEFAULT_PERSONA};
pub use emotion::{resolve_emotion, EmotionClassifier, HumeClassifier};
pub use error::{AdapterError, AdapterResult, ConfigError, Stage, StoreError, StoreResult, TurnError};
pub use orchestrator::{command_reply, TurnOrchestrator, TurnResult};
pub use reply::{ChatCompletionGenerator, ChatMessage, ReplyGenerator, ReplyRequest};
pub use store::{
    spawn_turn_writer, DocumentLogStore, PersistenceSnapshot, PersistenceStats, SledTurnStore,
    StoreCredentials, TurnStore, TurnWriter,
};
#[cfg(feature = "whisper")]
pub use stt::LocalWhisperStt;
pub use stt::{SttBackend, WhisperApiStt};
pub use turn::{
    AudioClip, EmotionLabel, NewTurnRecord, TurnInput, TurnRecord, TurnReply, TurnSource, NEUTRAL,
};
