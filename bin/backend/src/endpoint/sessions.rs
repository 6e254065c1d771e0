//! Session CRUD Surface (F, §4.6): unary HTTP operations sharing only the Session
//! Store with the duplex handler.

use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use gateway_backend::session::Session;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    pub message_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactivity_threshold_secs: Option<u64>,
}

impl SessionResponse {
    fn from_session(session: Session) -> Self {
        Self {
            id: session.id,
            created_at: session.created_at,
            last_message_at: session.last_message_at,
            message_count: session.message_count,
            inactivity_threshold_secs: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

pub async fn create_session(
    State(state): State<AppState>,
) -> (StatusCode, Json<SessionResponse>) {
    let session = Session::new();
    state
        .store
        .create(session.clone())
        .expect("fresh uuid v4 collision is not a real possibility");

    let mut body = SessionResponse::from_session(session);
    body.inactivity_threshold_secs = Some(state.store.inactivity_threshold().as_secs());

    (StatusCode::CREATED, Json(body))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, (StatusCode, Json<ErrorResponse>)> {
    state
        .store
        .find(id)
        .map(|session| Json(SessionResponse::from_session(session)))
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    code: "invalid_session",
                    message: "no such session".to_string(),
                }),
            )
        })
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionResponse>> {
    let sessions = state
        .store
        .list()
        .into_iter()
        .map(SessionResponse::from_session)
        .collect();
    Json(sessions)
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}
