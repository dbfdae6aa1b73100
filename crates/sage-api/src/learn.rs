//! Handlers for `/learn` endpoints.
//!
//! Learning traffic never sees control-plane error kinds: routing failures
//! degrade to a generic 500 with the detail logged server-side, and kill
//! switches surface as `frozen: true` on an otherwise successful response.

use axum::{
  Json,
  extract::{Path, Query, State},
};
use sage_core::{
  module::{ModuleKey, VersionTag},
  router::{Attempt, DispatchError},
  state::UserThemeState,
  store::RuntimeStore,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, error::ApiError};

fn parse_module(raw: &str) -> Result<ModuleKey, ApiError> {
  raw
    .parse::<ModuleKey>()
    .map_err(|_| ApiError::NotFound(format!("unknown module {raw:?}")))
}

/// Collapse router errors into a response safe for learner-facing clients.
fn degrade<E>(error: DispatchError<E>) -> ApiError
where
  E: std::error::Error + Send + Sync + 'static,
{
  tracing::warn!(%error, "learning dispatch degraded");
  ApiError::Store("learning temporarily unavailable".to_owned().into())
}

// ─── Attempt ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AttemptBody {
  pub user_id:    Uuid,
  pub theme_id:   Uuid,
  pub correct:    bool,
  /// Pins resolution to the session's snapshot when given.
  pub session_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct AttemptResponse {
  pub module:  ModuleKey,
  pub version: VersionTag,
  /// A kill switch suppressed the mutation; `state` is last-known-good.
  pub frozen:  bool,
  pub state:   UserThemeState,
}

/// `POST /learn/:module/attempt`
pub async fn attempt<S>(
  State(state): State<AppState<S>>,
  Path(module): Path<String>,
  Json(body): Json<AttemptBody>,
) -> Result<Json<AttemptResponse>, ApiError>
where
  S: RuntimeStore,
{
  let module = parse_module(&module)?;
  let attempt = Attempt {
    user_id:  body.user_id,
    theme_id: body.theme_id,
    correct:  body.correct,
  };

  let result = state
    .router
    .dispatch_attempt(module, attempt, body.session_id)
    .await
    .map_err(degrade)?;

  Ok(Json(AttemptResponse {
    module,
    version: result.version,
    frozen: result.frozen,
    state: result.state,
  }))
}

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StateParams {
  pub user_id:    Uuid,
  pub session_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
  pub module:  ModuleKey,
  pub version: VersionTag,
  pub states:  Vec<UserThemeState>,
}

/// `GET /learn/:module/state?user_id=<id>[&session_id=<id>]`
///
/// Read-only; serves last-known-good even under `FREEZE_UPDATES`.
pub async fn state<S>(
  State(state): State<AppState<S>>,
  Path(module): Path<String>,
  Query(params): Query<StateParams>,
) -> Result<Json<StateResponse>, ApiError>
where
  S: RuntimeStore,
{
  let module = parse_module(&module)?;

  let runtime = state
    .router
    .effective_runtime(params.session_id)
    .await
    .map_err(degrade)?;
  let version = runtime.version_for(module).map_err(ApiError::from_core)?;

  let states = state
    .router
    .read_state(params.user_id)
    .await
    .map_err(degrade)?;

  Ok(Json(StateResponse { module, version, states }))
}
