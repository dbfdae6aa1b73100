//! The `RuntimeStore` trait and supporting types.
//!
//! The trait is implemented by storage backends (e.g. `sage-store-sqlite`).
//! Higher layers (`sage-api`, the resolver, the bridge engine) depend on
//! this abstraction, not on any concrete backend.
//!
//! Every governed mutation takes the already-authorised actor and reason and
//! writes its audit record in the same transaction as the state change, so
//! an audit row and the change it describes either both exist or neither
//! does.

use std::future::Future;
use std::time::Duration;

use uuid::Uuid;

use crate::{
  audit::{AuditRecord, NewAuditRecord},
  flag::{AdminFreeze, FlagKey, SystemFlag},
  module::{ModuleKey, VersionTag},
  profile::{ModuleOverride, ProfileName, RuntimeProfile},
  snapshot::{ResolvedRuntime, Session, SessionRuntimeSnapshot},
  state::UserThemeState,
};

// ─── Bridge bookkeeping types ────────────────────────────────────────────────

/// Identity of one state-bridge job. A new policy version creates a fresh
/// row rather than reusing an old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BridgeKey {
  pub user_id:        Uuid,
  pub from_profile:   ProfileName,
  pub to_profile:     ProfileName,
  pub policy_version: u32,
}

/// Lifecycle status of a bridge job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeStatus {
  Queued,
  Running,
  Done,
  Failed,
}

impl BridgeStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Queued => "queued",
      Self::Running => "running",
      Self::Done => "done",
      Self::Failed => "failed",
    }
  }
}

/// A persisted bridge job row.
#[derive(Debug, Clone)]
pub struct AlgoStateBridge {
  pub key:         BridgeKey,
  pub status:      BridgeStatus,
  pub started_at:  Option<chrono::DateTime<chrono::Utc>>,
  pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
  pub details:     serde_json::Value,
}

/// Outcome of a claim attempt on a bridge row.
///
/// The claim is the only suspension point in the subsystem: it serialises
/// writers for the same key inside one short store-level transaction and
/// never blocks readers or other keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeClaim {
  /// This caller owns the conversion; the row is now `running`.
  Claimed,
  /// A terminal `done` row already exists; nothing to do.
  AlreadyDone,
  /// Another worker is converting right now; proceed without waiting.
  InProgress,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Sage runtime-control store backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait RuntimeStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Flags ─────────────────────────────────────────────────────────────

  /// Read both kill-switch rows.
  fn flags(
    &self,
  ) -> impl Future<Output = Result<Vec<SystemFlag>, Self::Error>> + Send + '_;

  /// Update one flag and write its audit record, atomically.
  fn set_flag(
    &self,
    key: FlagKey,
    value: bool,
    actor: String,
    reason: String,
  ) -> impl Future<Output = Result<SystemFlag, Self::Error>> + Send + '_;

  // ── Admin freeze ──────────────────────────────────────────────────────

  /// The active control-plane freeze, if any.
  fn admin_freeze(
    &self,
  ) -> impl Future<Output = Result<Option<AdminFreeze>, Self::Error>> + Send + '_;

  /// Set or clear the control-plane freeze, audited atomically.
  fn set_admin_freeze(
    &self,
    frozen: bool,
    actor: String,
    reason: String,
  ) -> impl Future<Output = Result<Option<AdminFreeze>, Self::Error>> + Send + '_;

  // ── Profiles ──────────────────────────────────────────────────────────

  /// All profiles, seeded at bootstrap.
  fn list_profiles(
    &self,
  ) -> impl Future<Output = Result<Vec<RuntimeProfile>, Self::Error>> + Send + '_;

  /// The single active profile.
  fn active_profile(
    &self,
  ) -> impl Future<Output = Result<RuntimeProfile, Self::Error>> + Send + '_;

  /// The most recently deactivated profile, if any switch ever happened.
  /// This is the `from` side of a lazy bridge.
  fn previous_active_profile(
    &self,
  ) -> impl Future<Output = Result<Option<ProfileName>, Self::Error>> + Send + '_;

  /// Activate `name`, deactivating the current profile in the same
  /// transaction (the single-active invariant holds at every commit
  /// boundary), and write the audit record.
  fn set_active_profile(
    &self,
    name: ProfileName,
    actor: String,
    reason: String,
  ) -> impl Future<Output = Result<RuntimeProfile, Self::Error>> + Send + '_;

  // ── Module overrides ──────────────────────────────────────────────────

  fn list_overrides(
    &self,
  ) -> impl Future<Output = Result<Vec<ModuleOverride>, Self::Error>> + Send + '_;

  /// Create or update the pin for `module`, audited atomically.
  fn set_override(
    &self,
    module: ModuleKey,
    version: VersionTag,
    is_enabled: bool,
    actor: String,
    reason: String,
  ) -> impl Future<Output = Result<ModuleOverride, Self::Error>> + Send + '_;

  /// Remove the pin for `module`. Returns `false` (and writes no audit row)
  /// if no pin existed.
  fn clear_override(
    &self,
    module: ModuleKey,
    actor: String,
    reason: String,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Audit ─────────────────────────────────────────────────────────────

  /// Append a standalone audit record (used for rejected-confirmation
  /// auditing; governed mutations write theirs transactionally).
  fn append_audit(
    &self,
    record: NewAuditRecord,
  ) -> impl Future<Output = Result<AuditRecord, Self::Error>> + Send + '_;

  /// The newest `limit` audit records, newest first.
  fn recent_audit(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<AuditRecord>, Self::Error>> + Send + '_;

  // ── Sessions & snapshots ──────────────────────────────────────────────

  /// Insert the session row and its 1:1 runtime snapshot in one
  /// transaction. The snapshot is immutable afterwards.
  fn create_session(
    &self,
    user_id: Uuid,
    runtime: ResolvedRuntime,
  ) -> impl Future<Output = Result<(Session, SessionRuntimeSnapshot), Self::Error>> + Send + '_;

  fn get_session(
    &self,
    session_id: Uuid,
  ) -> impl Future<Output = Result<Option<Session>, Self::Error>> + Send + '_;

  fn get_snapshot(
    &self,
    session_id: Uuid,
  ) -> impl Future<Output = Result<Option<SessionRuntimeSnapshot>, Self::Error>> + Send + '_;

  // ── State bridge jobs ─────────────────────────────────────────────────

  /// Claim the bridge row for `key`, creating it `queued` if absent, inside
  /// one write transaction. A `running` row older than `stale_after` is
  /// treated as abandoned and re-claimed.
  fn claim_bridge(
    &self,
    key: BridgeKey,
    stale_after: Duration,
  ) -> impl Future<Output = Result<BridgeClaim, Self::Error>> + Send + '_;

  /// Commit a successful conversion in one transaction: merge every
  /// converted aggregate into its live row and move the bridge row to
  /// `done` if it is still `running`. The merge seeds representation
  /// fields only where the live row is still empty and never touches the
  /// canonical counters, so an attempt persisted between claim and commit
  /// survives. A failed bridge leaves aggregates exactly as they were.
  fn complete_bridge(
    &self,
    key: BridgeKey,
    states: Vec<UserThemeState>,
    details: serde_json::Value,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Move a `running` row to `failed` (or back to `queued`) with error
  /// details, without touching aggregates.
  fn finish_bridge(
    &self,
    key: BridgeKey,
    status: BridgeStatus,
    details: serde_json::Value,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_bridge(
    &self,
    key: BridgeKey,
  ) -> impl Future<Output = Result<Option<AlgoStateBridge>, Self::Error>> + Send + '_;

  /// Operator force-requeue of a stuck `running` row, audited. Returns
  /// `false` if the row was not `running`.
  fn requeue_bridge(
    &self,
    key: BridgeKey,
    actor: String,
    reason: String,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Canonical aggregates ──────────────────────────────────────────────

  /// All theme aggregates for a user.
  fn theme_states(
    &self,
    user_id: Uuid,
  ) -> impl Future<Output = Result<Vec<UserThemeState>, Self::Error>> + Send + '_;

  fn get_theme_state(
    &self,
    user_id: Uuid,
    theme_id: Uuid,
  ) -> impl Future<Output = Result<Option<UserThemeState>, Self::Error>> + Send + '_;

  /// Insert or replace one aggregate row.
  fn upsert_theme_state(
    &self,
    state: UserThemeState,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
