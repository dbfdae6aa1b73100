//! Handlers for `/sessions` endpoints.
//!
//! A session captures the effective runtime once, at creation, in the same
//! transaction as the session row. Everything the session does afterwards
//! consults that snapshot, so a mid-session profile switch or flag flip can
//! never change scoring behaviour for attempts already in flight.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use sage_core::{
  snapshot::{Session, SessionRuntimeSnapshot},
  store::RuntimeStore,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
  pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
  pub session:  Session,
  pub snapshot: SessionRuntimeSnapshot,
}

/// `POST /sessions` — returns 201 + the session and its frozen snapshot.
pub async fn create<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<CreateSessionBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: RuntimeStore,
{
  let runtime = state.resolver.resolve(true).await.map_err(ApiError::store)?;
  let (session, snapshot) = state
    .store
    .create_session(body.user_id, runtime)
    .await
    .map_err(ApiError::store)?;

  tracing::debug!(
    session_id = %session.session_id,
    profile = %snapshot.profile,
    "session created"
  );
  Ok((StatusCode::CREATED, Json(CreateSessionResponse { session, snapshot })))
}

/// `GET /sessions/:id/runtime` — the frozen snapshot for one session.
pub async fn runtime<S>(
  State(state): State<AppState<S>>,
  Path(session_id): Path<Uuid>,
) -> Result<Json<SessionRuntimeSnapshot>, ApiError>
where
  S: RuntimeStore,
{
  let snapshot = state
    .store
    .get_snapshot(session_id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("session {session_id} not found")))?;
  Ok(Json(snapshot))
}
