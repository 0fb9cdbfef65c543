//! Integration tests for the turn pipeline, driven through hand-written adapter doubles.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use wrdo_core::{
    spawn_turn_writer, AdapterError, AdapterResult, AudioClip, EmotionClassifier, EmotionLabel,
    NewTurnRecord, PersistenceSnapshot, PersonaConfig, ReplyGenerator, ReplyRequest, Stage,
    StagedAudio, StoreError, StoreResult, SttBackend, TurnError, TurnInput, TurnOrchestrator,
    TurnRecord, TurnSource, TurnStore, DEFAULT_PERSONA,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// -----------------------------------------------------------------------------
// Doubles
// -----------------------------------------------------------------------------

#[derive(Default)]
struct FakeStt {
    transcript: String,
    fail: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<PathBuf>>,
}

impl FakeStt {
    fn saying(transcript: &str) -> Arc<Self> {
        Arc::new(Self {
            transcript: transcript.to_string(),
            ..Default::default()
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }
}

#[async_trait]
impl SttBackend for FakeStt {
    async fn transcribe(&self, audio: &StagedAudio) -> AdapterResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(audio.path().to_path_buf());
        assert!(audio.path().exists(), "staged file must exist while adapters run");
        if self.fail {
            return Err(AdapterError::Unreachable("stt offline".into()));
        }
        Ok(self.transcript.clone())
    }
}

enum Classification {
    Payload(Value),
    Timeout,
}

struct FakeClassifier {
    outcome: Classification,
    calls: AtomicUsize,
    seen: Mutex<Vec<PathBuf>>,
}

impl FakeClassifier {
    fn returning(payload: Value) -> Arc<Self> {
        Arc::new(Self {
            outcome: Classification::Payload(payload),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn timing_out() -> Arc<Self> {
        Arc::new(Self {
            outcome: Classification::Timeout,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl EmotionClassifier for FakeClassifier {
    async fn classify(&self, audio: &StagedAudio) -> AdapterResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(audio.path().to_path_buf());
        let bytes = audio.read().await?;
        assert!(!bytes.is_empty());
        match &self.outcome {
            Classification::Payload(v) => Ok(v.clone()),
            Classification::Timeout => Err(AdapterError::Timeout("emotion service: 30s".into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SeenRequest {
    persona: Option<String>,
    transcript: String,
    emotion: String,
}

#[derive(Default)]
struct FakeGenerator {
    fail: bool,
    requests: Mutex<Vec<SeenRequest>>,
}

impl FakeGenerator {
    fn ok() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    fn requests(&self) -> Vec<SeenRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplyGenerator for FakeGenerator {
    async fn generate(&self, request: ReplyRequest<'_>) -> AdapterResult<String> {
        self.requests.lock().unwrap().push(SeenRequest {
            persona: request.persona.map(str::to_string),
            transcript: request.transcript.to_string(),
            emotion: request.emotion.to_string(),
        });
        if self.fail {
            return Err(AdapterError::Status {
                status: 503,
                body: "overloaded".into(),
            });
        }
        Ok(format!("I hear you ({}).", request.emotion))
    }
}

#[derive(Default)]
struct MemoryStore {
    fail: bool,
    records: Mutex<Vec<TurnRecord>>,
}

impl MemoryStore {
    fn records(&self) -> Vec<TurnRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl TurnStore for MemoryStore {
    async fn append(&self, record: NewTurnRecord) -> StoreResult<TurnRecord> {
        if self.fail {
            return Err(StoreError::Status {
                status: 500,
                body: "disk full".into(),
            });
        }
        let stored = record.stamp(chrono::Utc::now());
        self.records.lock().unwrap().push(stored.clone());
        Ok(stored)
    }
}

// -----------------------------------------------------------------------------
// Harness
// -----------------------------------------------------------------------------

struct Harness {
    orchestrator: TurnOrchestrator,
    writer_task: JoinHandle<PersistenceSnapshot>,
    store: Arc<MemoryStore>,
    staging: tempfile::TempDir,
}

impl Harness {
    fn new(
        persona: PersonaConfig,
        stt: Arc<FakeStt>,
        classifier: Arc<FakeClassifier>,
        generator: Arc<FakeGenerator>,
        store: Arc<MemoryStore>,
    ) -> Self {
        init_tracing();
        let staging = tempfile::tempdir().unwrap();
        let (writer, writer_task) = spawn_turn_writer(store.clone(), 64);
        let orchestrator =
            TurnOrchestrator::new(Arc::new(persona), stt, classifier, generator, writer)
                .with_staging_dir(staging.path());
        Self {
            orchestrator,
            writer_task,
            store,
            staging,
        }
    }

    /// Close the writer, wait for the queue to drain, and return what was persisted.
    async fn finish(self) -> (Vec<TurnRecord>, PersistenceSnapshot, tempfile::TempDir) {
        drop(self.orchestrator);
        let snapshot = self.writer_task.await.unwrap();
        (self.store.records(), snapshot, self.staging)
    }
}

fn wav_clip() -> TurnInput {
    TurnInput::Audio(AudioClip::new(
        b"RIFF\x24\x00\x00\x00WAVEfmt ".to_vec(),
        Some("note.wav"),
        Some("audio/wav"),
    ))
}

fn joy() -> Value {
    json!({"predictions": [{"emotions": [{"name": "joy"}]}]})
}

fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[tokio::test]
async fn text_turn_is_neutral_and_never_touches_audio_adapters() {
    let stt = FakeStt::saying("unused");
    let classifier = FakeClassifier::returning(joy());
    let generator = FakeGenerator::ok();
    let h = Harness::new(
        PersonaConfig::new(DEFAULT_PERSONA),
        stt.clone(),
        classifier.clone(),
        generator.clone(),
        Arc::default(),
    );

    let reply = h
        .orchestrator
        .process(TurnInput::Text("I had a rough day".into()))
        .await
        .unwrap();

    assert_eq!(reply.you_said, "I had a rough day");
    assert_eq!(reply.emotion, EmotionLabel::neutral());
    assert!(!reply.wrdo_replied.is_empty());
    assert_eq!(stt.calls.load(Ordering::SeqCst), 0);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        generator.requests(),
        vec![SeenRequest {
            persona: Some(DEFAULT_PERSONA.to_string()),
            transcript: "I had a rough day".into(),
            emotion: "neutral".into(),
        }]
    );

    let (records, snapshot, _) = h.finish().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, TurnSource::Text);
    assert_eq!(records[0].emotion.as_str(), "neutral");
    assert_eq!(snapshot.appended, 1);
}

#[tokio::test]
async fn audio_turn_resolves_joy_and_persists_it() {
    let stt = FakeStt::saying("we won the match");
    let classifier = FakeClassifier::returning(joy());
    let generator = FakeGenerator::ok();
    let h = Harness::new(
        PersonaConfig::none(),
        stt.clone(),
        classifier.clone(),
        generator.clone(),
        Arc::default(),
    );

    let reply = h.orchestrator.process(wav_clip()).await.unwrap();
    assert_eq!(reply.you_said, "we won the match");
    assert_eq!(reply.emotion.as_str(), "joy");
    assert_eq!(generator.requests()[0].emotion, "joy");
    assert_eq!(generator.requests()[0].persona, None);

    // Both adapters read the same staged file, which is gone afterwards.
    let stt_seen = stt.seen.lock().unwrap().clone();
    let emo_seen = classifier.seen.lock().unwrap().clone();
    assert_eq!(stt_seen, emo_seen);
    assert!(!stt_seen[0].exists());
    assert_eq!(stt_seen[0].extension().unwrap(), "wav");

    let (records, _, staging) = h.finish().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].emotion.as_str(), "joy");
    assert_eq!(records[0].source, TurnSource::Audio);
    assert_eq!(records[0].text, "we won the match");
    assert!(is_empty_dir(staging.path()));
}

#[tokio::test]
async fn empty_predictions_resolve_to_neutral() {
    let generator = FakeGenerator::ok();
    let h = Harness::new(
        PersonaConfig::none(),
        FakeStt::saying("hmm"),
        FakeClassifier::returning(json!({"predictions": []})),
        generator.clone(),
        Arc::default(),
    );

    let reply = h.orchestrator.process(wav_clip()).await.unwrap();
    assert_eq!(reply.emotion.as_str(), "neutral");
    assert_eq!(generator.requests()[0].emotion, "neutral");
    let (records, _, _) = h.finish().await;
    assert_eq!(records[0].emotion.as_str(), "neutral");
}

#[tokio::test]
async fn generator_failure_writes_no_record_and_cleans_up() {
    let stt = FakeStt::saying("hello?");
    let h = Harness::new(
        PersonaConfig::none(),
        stt.clone(),
        FakeClassifier::returning(joy()),
        FakeGenerator::failing(),
        Arc::default(),
    );

    let err = h.orchestrator.process(wav_clip()).await.unwrap_err();
    assert!(matches!(
        err,
        TurnError::Upstream {
            stage: Stage::Reply,
            source: AdapterError::Status { status: 503, .. }
        }
    ));
    assert!(!err.is_client_error());
    assert!(!stt.seen.lock().unwrap()[0].exists());

    let (records, snapshot, staging) = h.finish().await;
    assert!(records.is_empty());
    assert_eq!(snapshot, PersistenceSnapshot { appended: 0, failed: 0 });
    assert!(is_empty_dir(staging.path()));
}

#[tokio::test]
async fn emotion_timeout_aborts_the_turn() {
    let stt = FakeStt::saying("are you there");
    let generator = FakeGenerator::ok();
    let h = Harness::new(
        PersonaConfig::none(),
        stt.clone(),
        FakeClassifier::timing_out(),
        generator.clone(),
        Arc::default(),
    );

    let err = h.orchestrator.process(wav_clip()).await.unwrap_err();
    assert!(matches!(
        err,
        TurnError::Upstream {
            stage: Stage::Emotion,
            source: AdapterError::Timeout(_)
        }
    ));
    assert!(generator.requests().is_empty());

    let (records, _, staging) = h.finish().await;
    assert!(records.is_empty());
    assert!(is_empty_dir(staging.path()));
}

#[tokio::test]
async fn transcription_failure_aborts_the_turn() {
    let h = Harness::new(
        PersonaConfig::none(),
        FakeStt::failing(),
        FakeClassifier::returning(joy()),
        FakeGenerator::ok(),
        Arc::default(),
    );

    let err = h.orchestrator.process(wav_clip()).await.unwrap_err();
    assert!(matches!(
        err,
        TurnError::Upstream {
            stage: Stage::Transcription,
            ..
        }
    ));
    let (records, _, staging) = h.finish().await;
    assert!(records.is_empty());
    assert!(is_empty_dir(staging.path()));
}

#[tokio::test]
async fn exactly_one_record_per_successful_turn() {
    let h = Harness::new(
        PersonaConfig::new(DEFAULT_PERSONA),
        FakeStt::saying("again"),
        FakeClassifier::returning(joy()),
        FakeGenerator::ok(),
        Arc::default(),
    );

    for i in 0..3 {
        h.orchestrator
            .process(TurnInput::Text(format!("turn {}", i)))
            .await
            .unwrap();
    }
    h.orchestrator.process(wav_clip()).await.unwrap();

    let (records, snapshot, _) = h.finish().await;
    let texts: Vec<_> = records.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(texts, vec!["turn 0", "turn 1", "turn 2", "again"]);
    assert_eq!(snapshot.appended, 4);
}

#[tokio::test]
async fn empty_audio_is_a_client_error() {
    let stt = FakeStt::saying("x");
    let classifier = FakeClassifier::returning(joy());
    let h = Harness::new(
        PersonaConfig::none(),
        stt.clone(),
        classifier.clone(),
        FakeGenerator::ok(),
        Arc::default(),
    );

    let err = h
        .orchestrator
        .process(TurnInput::Audio(AudioClip::new(Vec::new(), None, None)))
        .await
        .unwrap_err();
    assert!(err.is_client_error());
    assert_eq!(stt.calls.load(Ordering::SeqCst), 0);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    let (records, _, _) = h.finish().await;
    assert!(records.is_empty());
}

#[tokio::test]
async fn empty_text_is_an_accepted_turn() {
    let generator = FakeGenerator::ok();
    let h = Harness::new(
        PersonaConfig::none(),
        FakeStt::saying("x"),
        FakeClassifier::returning(joy()),
        generator.clone(),
        Arc::default(),
    );

    let reply = h
        .orchestrator
        .process(TurnInput::Text(String::new()))
        .await
        .unwrap();
    assert_eq!(reply.you_said, "");
    assert_eq!(generator.requests()[0].transcript, "");
    let (records, _, _) = h.finish().await;
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn todo_command_skips_the_generator_but_is_recorded() {
    let generator = FakeGenerator::ok();
    let h = Harness::new(
        PersonaConfig::new(DEFAULT_PERSONA),
        FakeStt::saying("x"),
        FakeClassifier::returning(joy()),
        generator.clone(),
        Arc::default(),
    );

    let reply = h
        .orchestrator
        .process(TurnInput::Text("/TODO water the plants".into()))
        .await
        .unwrap();
    assert_eq!(reply.wrdo_replied, "Task noted. (To-Do list not yet live.)");
    assert_eq!(reply.emotion.as_str(), "neutral");
    assert!(generator.requests().is_empty());

    let (records, _, _) = h.finish().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reply, "Task noted. (To-Do list not yet live.)");
}

#[tokio::test]
async fn user_id_is_recorded_when_present() {
    let h = Harness::new(
        PersonaConfig::none(),
        FakeStt::saying("x"),
        FakeClassifier::returning(joy()),
        FakeGenerator::ok(),
        Arc::default(),
    );

    h.orchestrator
        .process_as(Some("user-42".into()), TurnInput::Text("hi".into()))
        .await
        .unwrap();
    h.orchestrator
        .process(TurnInput::Text("anon".into()))
        .await
        .unwrap();

    let (records, _, _) = h.finish().await;
    assert_eq!(records[0].user_id.as_deref(), Some("user-42"));
    assert_eq!(records[1].user_id, None);
}

#[tokio::test]
async fn store_failure_does_not_abort_the_turn() {
    let store = Arc::new(MemoryStore {
        fail: true,
        ..Default::default()
    });
    let h = Harness::new(
        PersonaConfig::none(),
        FakeStt::saying("x"),
        FakeClassifier::returning(joy()),
        FakeGenerator::ok(),
        store,
    );

    let reply = h
        .orchestrator
        .process(TurnInput::Text("still answer me".into()))
        .await
        .unwrap();
    assert_eq!(reply.you_said, "still answer me");

    let (records, snapshot, _) = h.finish().await;
    assert!(records.is_empty());
    assert_eq!(snapshot, PersistenceSnapshot { appended: 0, failed: 1 });
}
