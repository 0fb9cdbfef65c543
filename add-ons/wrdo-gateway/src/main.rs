//! WRDO Gateway - HTTP front door for the turn pipeline.
//!
//! `POST /chat` takes multipart audio or a JSON text message and returns
//! `{you_said, emotion, wrdo_replied}`. `GET /` and `GET /health` are for operators.

mod chat;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use chat::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wrdo_core::{
    spawn_turn_writer, store, stt, ChatCompletionGenerator, ConfigError, HumeClassifier,
    TurnOrchestrator, WrdoConfig,
};

const DRAIN_GRACE: Duration = Duration::from_secs(5);

pub(crate) fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(chat::index))
        .route("/health", get(chat::health))
        .route("/chat", post(chat::chat))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(target: "wrdo::gateway", "Could not listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!(target: "wrdo::gateway", "Shutdown requested; draining in-flight turns");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = WrdoConfig::load()?;
    cfg.validate()?;
    let timeout = cfg.upstream_timeout();

    let stt = stt::from_config(&cfg)?;
    let classifier = Arc::new(HumeClassifier::new(
        cfg.emotion_api_url().ok_or(ConfigError::Invalid {
            key: "emotion.api_url",
            reason: "must be set (EMOTION_API_URL)".to_string(),
        })?,
        cfg.emotion_api_key()
            .ok_or(ConfigError::MissingCredential("emotion.api_key (HUME_API_KEY)"))?,
        timeout,
    )?);
    let mut generator = ChatCompletionGenerator::new(
        cfg.llm.api_url.clone(),
        cfg.llm_api_key()
            .ok_or(ConfigError::MissingCredential("llm.api_key (OPENAI_API_KEY)"))?,
        cfg.llm.model.clone(),
        timeout,
    )?;
    if let Some(temperature) = cfg.llm.temperature {
        generator = generator.with_temperature(temperature);
    }
    let generator = Arc::new(generator);
    let (writer, writer_task) =
        spawn_turn_writer(store::from_config(&cfg)?, cfg.store.queue_capacity);

    let persona = Arc::new(cfg.persona());
    info!(
        target: "wrdo::gateway",
        persona = persona.instruction().is_some(),
        model = %cfg.llm.model,
        timeout_secs = cfg.upstream_timeout_secs,
        "Turn pipeline ready"
    );
    let orchestrator = TurnOrchestrator::new(persona, stt, classifier, generator, writer);
    let app = router(
        AppState {
            orchestrator: Arc::new(orchestrator),
        },
        cfg.max_audio_bytes,
    );

    let addr = cfg.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(target: "wrdo::gateway", "WRDO Brain listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router (and with it the last TurnWriter) is gone; wait for queued crumbs, but not
    // longer than one upstream timeout plus a grace period.
    let drain_limit = timeout + DRAIN_GRACE;
    match tokio::time::timeout(drain_limit, writer_task).await {
        Ok(Ok(stats)) => info!(
            target: "wrdo::gateway",
            persisted = stats.appended,
            failed = stats.failed,
            "Crumb log flushed"
        ),
        Ok(Err(e)) => error!(target: "wrdo::gateway", "Turn writer task failed: {}", e),
        Err(_) => error!(
            target: "wrdo::gateway",
            limit_secs = drain_limit.as_secs(),
            "Crumb log did not drain in time; queued crumbs are lost"
        ),
    }
    Ok(())
}
