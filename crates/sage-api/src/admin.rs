//! Handlers for the `/admin/runtime` control plane.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/admin/runtime/status` | Flags, profiles, overrides, cache diagnostics |
//! | `POST` | `/admin/runtime/flags` | Governed: flip a kill switch |
//! | `POST` | `/admin/runtime/profile` | Governed: switch the active profile |
//! | `POST` | `/admin/runtime/override` | Governed: pin a module version |
//! | `POST` | `/admin/runtime/override/clear` | Governed: remove a pin |
//! | `POST` | `/admin/runtime/freeze` | Governed: freeze/thaw the control plane |
//! | `GET`  | `/admin/runtime/audit` | `?limit=` newest-first audit records |
//! | `POST` | `/admin/runtime/bridge` | Batch state bridge for listed users |
//! | `POST` | `/admin/runtime/bridge/requeue` | Governed: requeue a stuck bridge |
//!
//! Every governed handler follows the same shape: authorise against the
//! governor (auditing rejected phrases best-effort), run the audited store
//! mutation, then invalidate the resolver cache before responding.

use axum::{
  Json,
  extract::{Query, State},
  http::HeaderMap,
};
use sage_core::{
  audit::{AuditAction, AuditRecord, NewAuditRecord},
  bridge::{BridgeOutcome, CURRENT_POLICY_VERSION},
  flag::{AdminFreeze, FlagKey, SystemFlag},
  governor::GovernedAction,
  module::{ModuleKey, VersionTag},
  profile::{ModuleOverride, ProfileName, RuntimeProfile},
  snapshot::ResolvedRuntime,
  store::{BridgeKey, RuntimeStore},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

/// Actor identity for audit attribution, taken from the `X-Actor` header.
fn actor(headers: &HeaderMap) -> String {
  headers
    .get("x-actor")
    .and_then(|v| v.to_str().ok())
    .unwrap_or("unknown")
    .to_owned()
}

/// Authorise a governed action, auditing a mismatched phrase best-effort.
async fn authorize<S>(
  state: &AppState<S>,
  action: &GovernedAction,
  phrase: &str,
  reason: &str,
  actor: &str,
) -> Result<String, ApiError>
where
  S: RuntimeStore,
{
  let freeze = state.store.admin_freeze().await.map_err(ApiError::store)?;

  match state.governor.authorize(action, phrase, reason, freeze.as_ref()) {
    Ok(reason) => Ok(reason),
    Err(error) => {
      if matches!(error, sage_core::Error::ConfirmationMismatch { .. }) {
        let rejection = NewAuditRecord {
          actor:  actor.to_owned(),
          action: AuditAction::ConfirmationRejected,
          before: json!({ "action": action.label() }),
          after:  json!({ "accepted": false }),
          reason: reason.to_owned(),
        };
        if let Err(audit_error) = state.store.append_audit(rejection).await {
          tracing::warn!(%audit_error, "failed to audit rejected confirmation");
        }
      }
      Err(ApiError::from_core(error))
    }
  }
}

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
  pub flags:            Vec<SystemFlag>,
  pub profiles:         Vec<RuntimeProfile>,
  pub overrides:        Vec<ModuleOverride>,
  pub admin_freeze:     Option<AdminFreeze>,
  pub last_audit_at:    Option<chrono::DateTime<chrono::Utc>>,
  pub cache_generation: u64,
  /// The resolution the cache would serve right now.
  pub cached:           ResolvedRuntime,
  /// A forced fresh resolution; differing from `cached` indicates skew.
  pub fresh:            ResolvedRuntime,
}

/// `GET /admin/runtime/status`
pub async fn status<S>(
  State(state): State<AppState<S>>,
) -> Result<Json<StatusResponse>, ApiError>
where
  S: RuntimeStore,
{
  let flags = state.store.flags().await.map_err(ApiError::store)?;
  let profiles = state.store.list_profiles().await.map_err(ApiError::store)?;
  let overrides = state.store.list_overrides().await.map_err(ApiError::store)?;
  let admin_freeze = state.store.admin_freeze().await.map_err(ApiError::store)?;
  let last_audit_at = state
    .store
    .recent_audit(1)
    .await
    .map_err(ApiError::store)?
    .first()
    .map(|record| record.created_at);

  let cached = state.resolver.resolve(true).await.map_err(ApiError::store)?;
  let fresh = state.resolver.resolve(false).await.map_err(ApiError::store)?;

  Ok(Json(StatusResponse {
    flags,
    profiles,
    overrides,
    admin_freeze,
    last_audit_at,
    cache_generation: state.resolver.generation(),
    cached,
    fresh,
  }))
}

// ─── Flags ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SetFlagBody {
  pub key:                 FlagKey,
  pub value:               bool,
  pub confirmation_phrase: String,
  pub reason:              String,
}

/// `POST /admin/runtime/flags`
pub async fn set_flag<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Json(body): Json<SetFlagBody>,
) -> Result<Json<SystemFlag>, ApiError>
where
  S: RuntimeStore,
{
  let actor = actor(&headers);
  let action = GovernedAction::SetFlag { key: body.key, value: body.value };
  let reason =
    authorize(&state, &action, &body.confirmation_phrase, &body.reason, &actor).await?;

  let flag = state
    .store
    .set_flag(body.key, body.value, actor, reason)
    .await
    .map_err(ApiError::store)?;
  state.resolver.invalidate();

  tracing::info!(key = %body.key, value = body.value, "kill switch updated");
  Ok(Json(flag))
}

// ─── Profile switch ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SwitchProfileBody {
  pub profile_name:        ProfileName,
  pub confirmation_phrase: String,
  pub reason:              String,
}

/// `POST /admin/runtime/profile`
pub async fn switch_profile<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Json(body): Json<SwitchProfileBody>,
) -> Result<Json<RuntimeProfile>, ApiError>
where
  S: RuntimeStore,
{
  let actor = actor(&headers);
  let action = GovernedAction::SetActiveProfile { name: body.profile_name };
  let reason =
    authorize(&state, &action, &body.confirmation_phrase, &body.reason, &actor).await?;

  let profile = state
    .store
    .set_active_profile(body.profile_name, actor, reason)
    .await
    .map_err(ApiError::store)?;
  state.resolver.invalidate();

  tracing::info!(profile = %body.profile_name, "runtime profile switched");
  Ok(Json(profile))
}

// ─── Module overrides ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SetOverrideBody {
  pub module_key:          ModuleKey,
  pub version_key:         VersionTag,
  #[serde(default = "default_enabled")]
  pub is_enabled:          bool,
  pub confirmation_phrase: String,
  pub reason:              String,
}

fn default_enabled() -> bool {
  true
}

/// `POST /admin/runtime/override`
pub async fn set_override<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Json(body): Json<SetOverrideBody>,
) -> Result<Json<ModuleOverride>, ApiError>
where
  S: RuntimeStore,
{
  let actor = actor(&headers);
  let action =
    GovernedAction::SetOverride { module: body.module_key, version: body.version_key };
  let reason =
    authorize(&state, &action, &body.confirmation_phrase, &body.reason, &actor).await?;

  let pin = state
    .store
    .set_override(body.module_key, body.version_key, body.is_enabled, actor, reason)
    .await
    .map_err(ApiError::store)?;
  state.resolver.invalidate();

  tracing::info!(module = %body.module_key, version = %body.version_key, "module pinned");
  Ok(Json(pin))
}

#[derive(Debug, Deserialize)]
pub struct ClearOverrideBody {
  pub module_key:          ModuleKey,
  pub confirmation_phrase: String,
  pub reason:              String,
}

/// `POST /admin/runtime/override/clear`
pub async fn clear_override<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Json(body): Json<ClearOverrideBody>,
) -> Result<Json<serde_json::Value>, ApiError>
where
  S: RuntimeStore,
{
  let actor = actor(&headers);
  let action = GovernedAction::ClearOverride { module: body.module_key };
  let reason =
    authorize(&state, &action, &body.confirmation_phrase, &body.reason, &actor).await?;

  let cleared = state
    .store
    .clear_override(body.module_key, actor, reason)
    .await
    .map_err(ApiError::store)?;
  state.resolver.invalidate();

  Ok(Json(json!({ "module": body.module_key, "cleared": cleared })))
}

// ─── Admin freeze ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SetFreezeBody {
  pub frozen:              bool,
  pub confirmation_phrase: String,
  pub reason:              String,
}

/// `POST /admin/runtime/freeze`
pub async fn set_freeze<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Json(body): Json<SetFreezeBody>,
) -> Result<Json<serde_json::Value>, ApiError>
where
  S: RuntimeStore,
{
  let actor = actor(&headers);
  let action = if body.frozen {
    GovernedAction::SetAdminFreeze
  } else {
    GovernedAction::ClearAdminFreeze
  };
  let reason =
    authorize(&state, &action, &body.confirmation_phrase, &body.reason, &actor).await?;

  let freeze = state
    .store
    .set_admin_freeze(body.frozen, actor, reason)
    .await
    .map_err(ApiError::store)?;
  state.resolver.invalidate();

  tracing::info!(frozen = body.frozen, "admin freeze updated");
  Ok(Json(json!({ "frozen": body.frozen, "freeze": freeze })))
}

// ─── Audit ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuditParams {
  #[serde(default = "default_audit_limit")]
  pub limit: usize,
}

fn default_audit_limit() -> usize {
  50
}

/// `GET /admin/runtime/audit?limit=50`
pub async fn audit<S>(
  State(state): State<AppState<S>>,
  Query(params): Query<AuditParams>,
) -> Result<Json<Vec<AuditRecord>>, ApiError>
where
  S: RuntimeStore,
{
  let records = state
    .store
    .recent_audit(params.limit)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(records))
}

// ─── Bridge operations ───────────────────────────────────────────────────────

fn outcome_label(outcome: &BridgeOutcome) -> &'static str {
  match outcome {
    BridgeOutcome::Converted => "converted",
    BridgeOutcome::AlreadyDone => "already_done",
    BridgeOutcome::InProgress => "in_progress",
    BridgeOutcome::Skipped => "skipped",
    BridgeOutcome::Failed(_) => "failed",
  }
}

#[derive(Debug, Deserialize)]
pub struct BridgeBatchBody {
  pub user_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct BridgeBatchEntry {
  pub user_id: Uuid,
  pub outcome: &'static str,
}

/// `POST /admin/runtime/bridge` — eager bridging for a batch of users,
/// sharing the idempotent per-user function with the lazy path.
pub async fn bridge_batch<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<BridgeBatchBody>,
) -> Result<Json<Vec<BridgeBatchEntry>>, ApiError>
where
  S: RuntimeStore,
{
  let mut entries = Vec::with_capacity(body.user_ids.len());
  for user_id in body.user_ids {
    let outcome = state
      .router
      .bridge_user(user_id)
      .await
      .map_err(|e| ApiError::store(sage_core::Error::BridgeFailed(e.to_string())))?;
    entries.push(BridgeBatchEntry {
      user_id,
      outcome: match &outcome {
        Some(outcome) => outcome_label(outcome),
        None => "no_previous_profile",
      },
    });
  }
  Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct RequeueBridgeBody {
  pub user_id:             Uuid,
  pub from_profile:        ProfileName,
  pub to_profile:          ProfileName,
  #[serde(default = "default_policy_version")]
  pub policy_version:      u32,
  pub confirmation_phrase: String,
  pub reason:              String,
}

fn default_policy_version() -> u32 {
  CURRENT_POLICY_VERSION
}

/// `POST /admin/runtime/bridge/requeue` — governed escape hatch for a
/// bridge row stuck in `running`.
pub async fn requeue_bridge<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Json(body): Json<RequeueBridgeBody>,
) -> Result<Json<serde_json::Value>, ApiError>
where
  S: RuntimeStore,
{
  let actor = actor(&headers);
  let action = GovernedAction::RequeueBridge { user_id: body.user_id };
  let reason =
    authorize(&state, &action, &body.confirmation_phrase, &body.reason, &actor).await?;

  let key = BridgeKey {
    user_id:        body.user_id,
    from_profile:   body.from_profile,
    to_profile:     body.to_profile,
    policy_version: body.policy_version,
  };
  let requeued = state
    .store
    .requeue_bridge(key, actor, reason)
    .await
    .map_err(ApiError::store)?;

  if !requeued {
    return Err(ApiError::NotFound(format!(
      "no running bridge for user {}",
      body.user_id
    )));
  }
  Ok(Json(json!({ "requeued": true })))
}
