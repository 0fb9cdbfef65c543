//! POST /chat: request extraction, the handler, and error-to-status mapping.

use axum::{
    async_trait,
    extract::{FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;
use wrdo_core::{AudioClip, TurnError, TurnInput, TurnOrchestrator, TurnReply};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TurnOrchestrator>,
}

/// `{"error": "..."}` with a 4xx for caller mistakes and a 500 for everything else.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Body extraction failures: oversized bodies keep their 413, anything else is the caller's 400.
    fn rejected(status: StatusCode, message: String) -> Self {
        let status = if status == StatusCode::PAYLOAD_TOO_LARGE {
            status
        } else {
            StatusCode::BAD_REQUEST
        };
        Self { status, message }
    }
}

impl From<TurnError> for ApiError {
    fn from(err: TurnError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Deserialize)]
struct ChatBody {
    #[serde(default, alias = "message")]
    text: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

/// A `/chat` body: multipart (`audio`, `text`, `user_id`) or JSON (`text`/`message`, `user_id`).
#[derive(Debug)]
pub struct ChatRequest {
    pub input: TurnInput,
    pub user_id: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

const MISSING_INPUT: &str = "provide either an `audio` file or a `text` message";

#[async_trait]
impl<S> FromRequest<S> for ChatRequest
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"))
            .unwrap_or(false);

        if !is_multipart {
            let Json(body) = Json::<ChatBody>::from_request(req, state)
                .await
                .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
            let text = body.text.ok_or_else(|| ApiError::bad_request(MISSING_INPUT))?;
            return Ok(Self {
                input: TurnInput::Text(text),
                user_id: non_blank(body.user_id),
            });
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;

        let mut audio = None;
        let mut text = None;
        let mut user_id = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "audio" => {
                    let file_name = field.file_name().map(str::to_string);
                    let mime = field.content_type().map(str::to_string);
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
                    debug!(target: "wrdo::gateway", bytes = bytes.len(), "Audio field received");
                    audio = Some(AudioClip::new(
                        bytes.to_vec(),
                        file_name.as_deref(),
                        mime.as_deref(),
                    ));
                }
                "text" | "message" => {
                    text = Some(
                        field
                            .text()
                            .await
                            .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?,
                    );
                }
                "user_id" => {
                    user_id = Some(
                        field
                            .text()
                            .await
                            .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?,
                    );
                }
                _ => {}
            }
        }

        let input = match (audio, text) {
            (Some(clip), _) => TurnInput::Audio(clip),
            (None, Some(text)) => TurnInput::Text(text),
            (None, None) => return Err(ApiError::bad_request(MISSING_INPUT)),
        };
        Ok(Self {
            input,
            user_id: non_blank(user_id),
        })
    }
}

pub async fn chat(
    State(state): State<AppState>,
    request: ChatRequest,
) -> Result<Json<TurnReply>, ApiError> {
    let reply = state
        .orchestrator
        .process_as(request.user_id, request.input)
        .await?;
    Ok(Json(reply))
}

pub async fn index() -> &'static str {
    "WRDO Brain is running."
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.orchestrator.stats();
    Json(json!({
        "status": "ok",
        "turns_persisted": stats.appended,
        "persistence_failures": stats.failed,
    }))
}
