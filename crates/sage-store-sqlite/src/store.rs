//! [`SqliteStore`] — the SQLite implementation of [`RuntimeStore`].

use std::{path::Path, time::Duration};

use chrono::Utc;
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use uuid::Uuid;

use sage_core::{
  audit::{AuditAction, AuditRecord, NewAuditRecord},
  flag::{AdminFreeze, FlagKey, SystemFlag},
  module::{ModuleKey, VersionTag},
  profile::{ModuleOverride, ProfileName, RuntimeProfile},
  snapshot::{ResolvedRuntime, Session, SessionRuntimeSnapshot},
  state::UserThemeState,
  store::{
    AlgoStateBridge, BridgeClaim, BridgeKey, BridgeStatus, RuntimeStore,
  },
};

use crate::{
  Error, Result,
  encode::{
    RawAudit, RawBridge, RawFlag, RawOverride, RawProfile, RawSnapshot,
    RawThemeState, encode_dt, encode_flag_state, encode_module_map, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Sage runtime-control store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path`, run schema initialisation and seed
  /// the bootstrap rows (both flags off, the three profiles with `primary`
  /// active).
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    let seeded_profiles: Vec<(String, bool, String, Option<String>, String)> =
      RuntimeProfile::default_set()
        .into_iter()
        .map(|p| {
          Ok((
            p.name.as_str().to_owned(),
            p.is_active,
            encode_module_map(&p.config)?,
            p.activated_at.map(encode_dt),
            encode_dt(p.updated_at),
          ))
        })
        .collect::<Result<_>>()?;

    self
      .conn
      .call(move |conn| {
        conn.execute_batch(SCHEMA)?;

        let now = encode_dt(Utc::now());
        for key in FlagKey::ALL {
          conn.execute(
            "INSERT OR IGNORE INTO system_flags (key, value, updated_at)
             VALUES (?1, 0, ?2)",
            rusqlite::params![key.as_str(), now],
          )?;
        }
        for (name, is_active, config, activated_at, updated_at) in seeded_profiles {
          conn.execute(
            "INSERT OR IGNORE INTO runtime_profiles
               (name, is_active, config_json, activated_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![name, is_active, config, activated_at, updated_at],
          )?;
        }
        Ok(())
      })
      .await?;
    Ok(())
  }
}

/// Insert one audit row inside an open transaction.
fn insert_audit_tx(
  tx: &rusqlite::Transaction<'_>,
  actor: &str,
  action: AuditAction,
  before: &serde_json::Value,
  after: &serde_json::Value,
  reason: &str,
) -> rusqlite::Result<()> {
  tx.execute(
    "INSERT INTO switch_audit_log
       (audit_id, actor, action_type, before_json, after_json, reason, created_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    rusqlite::params![
      encode_uuid(Uuid::new_v4()),
      actor,
      action.as_str(),
      before.to_string(),
      after.to_string(),
      reason,
      encode_dt(Utc::now()),
    ],
  )?;
  Ok(())
}

/// Merge one converted aggregate into its live row for the bridge commit.
///
/// The live row may have moved on since the conversion was computed (an
/// attempt can land between claim and commit), so this seeds representation
/// fields only where the row is still NULL, retags the model columns, and
/// leaves the canonical counters and `due_at` untouched.
fn seed_theme_state(
  conn: &rusqlite::Connection,
  row: &RawThemeState,
) -> rusqlite::Result<()> {
  conn.execute(
    "UPDATE user_theme_state SET
       mastery_model    = ?3,
       revision_model   = ?4,
       v0_mastery_score = COALESCE(v0_mastery_score, ?5),
       v0_leitner_stage = COALESCE(v0_leitner_stage, ?6),
       v0_interval_days = COALESCE(v0_interval_days, ?7),
       bkt_p_mastery    = COALESCE(bkt_p_mastery, ?8),
       bkt_prior_seen   = COALESCE(bkt_prior_seen, ?9),
       fsrs_stability   = COALESCE(fsrs_stability, ?10),
       fsrs_difficulty  = COALESCE(fsrs_difficulty, ?11),
       bandit_alpha     = COALESCE(bandit_alpha, ?12),
       bandit_beta      = COALESCE(bandit_beta, ?13),
       updated_at       = ?14
     WHERE user_id = ?1 AND theme_id = ?2",
    rusqlite::params![
      row.user_id,
      row.theme_id,
      row.mastery_model,
      row.revision_model,
      row.v0_mastery_score,
      row.v0_leitner_stage,
      row.v0_interval_days,
      row.bkt_p_mastery,
      row.bkt_prior_seen,
      row.fsrs_stability,
      row.fsrs_difficulty,
      row.bandit_alpha,
      row.bandit_beta,
      row.updated_at,
    ],
  )?;
  Ok(())
}

/// Insert-or-replace one aggregate row for `upsert_theme_state`.
fn write_theme_state(
  conn: &rusqlite::Connection,
  row: &RawThemeState,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT OR REPLACE INTO user_theme_state
       (user_id, theme_id, attempts_total, correct_total,
        mastery_model, revision_model,
        v0_mastery_score, v0_leitner_stage, v0_interval_days,
        bkt_p_mastery, bkt_prior_seen,
        fsrs_stability, fsrs_difficulty, due_at,
        bandit_alpha, bandit_beta, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
             ?15, ?16, ?17)",
    rusqlite::params![
      row.user_id,
      row.theme_id,
      row.attempts_total,
      row.correct_total,
      row.mastery_model,
      row.revision_model,
      row.v0_mastery_score,
      row.v0_leitner_stage,
      row.v0_interval_days,
      row.bkt_p_mastery,
      row.bkt_prior_seen,
      row.fsrs_stability,
      row.fsrs_difficulty,
      row.due_at,
      row.bandit_alpha,
      row.bandit_beta,
      row.updated_at,
    ],
  )?;
  Ok(())
}

/// Read one aggregate row by the row-mapping closure shared across queries.
fn theme_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawThemeState> {
  Ok(RawThemeState {
    user_id:          row.get(0)?,
    theme_id:         row.get(1)?,
    attempts_total:   row.get(2)?,
    correct_total:    row.get(3)?,
    mastery_model:    row.get(4)?,
    revision_model:   row.get(5)?,
    v0_mastery_score: row.get(6)?,
    v0_leitner_stage: row.get(7)?,
    v0_interval_days: row.get(8)?,
    bkt_p_mastery:    row.get(9)?,
    bkt_prior_seen:   row.get(10)?,
    fsrs_stability:   row.get(11)?,
    fsrs_difficulty:  row.get(12)?,
    due_at:           row.get(13)?,
    bandit_alpha:     row.get(14)?,
    bandit_beta:      row.get(15)?,
    updated_at:       row.get(16)?,
  })
}

const THEME_COLUMNS: &str = "user_id, theme_id, attempts_total, correct_total, \
   mastery_model, revision_model, v0_mastery_score, v0_leitner_stage, \
   v0_interval_days, bkt_p_mastery, bkt_prior_seen, fsrs_stability, \
   fsrs_difficulty, due_at, bandit_alpha, bandit_beta, updated_at";

// ─── RuntimeStore impl ───────────────────────────────────────────────────────

impl RuntimeStore for SqliteStore {
  type Error = Error;

  // ── Flags ─────────────────────────────────────────────────────────────

  async fn flags(&self) -> Result<Vec<SystemFlag>> {
    let raws: Vec<RawFlag> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT key, value, reason, updated_by, updated_at
           FROM system_flags ORDER BY key",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawFlag {
              key:        row.get(0)?,
              value:      row.get(1)?,
              reason:     row.get(2)?,
              updated_by: row.get(3)?,
              updated_at: row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawFlag::into_flag).collect()
  }

  async fn set_flag(
    &self,
    key: FlagKey,
    value: bool,
    actor: String,
    reason: String,
  ) -> Result<SystemFlag> {
    let key_str = key.as_str().to_owned();
    let now_str = encode_dt(Utc::now());

    let updated: bool = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let old_value: Option<bool> = tx
          .query_row(
            "SELECT value FROM system_flags WHERE key = ?1",
            rusqlite::params![key_str],
            |row| row.get(0),
          )
          .optional()?;
        let Some(old_value) = old_value else {
          return Ok(false);
        };

        tx.execute(
          "UPDATE system_flags
           SET value = ?2, reason = ?3, updated_by = ?4, updated_at = ?5
           WHERE key = ?1",
          rusqlite::params![key_str, value, reason, actor, now_str],
        )?;

        insert_audit_tx(
          &tx,
          &actor,
          AuditAction::SetFlag,
          &serde_json::json!({ "key": key_str, "value": old_value }),
          &serde_json::json!({ "key": key_str, "value": value }),
          &reason,
        )?;

        tx.commit()?;
        Ok(true)
      })
      .await?;

    if !updated {
      return Err(Error::FlagNotSeeded(key.as_str().to_owned()));
    }

    let flags = self.flags().await?;
    flags
      .into_iter()
      .find(|f| f.key == key)
      .ok_or_else(|| Error::FlagNotSeeded(key.as_str().to_owned()))
  }

  // ── Admin freeze ──────────────────────────────────────────────────────

  async fn admin_freeze(&self) -> Result<Option<AdminFreeze>> {
    let raw: Option<(String, String, String)> = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row(
              "SELECT reason, frozen_by, frozen_at FROM admin_freeze WHERE id = 1",
              [],
              |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?,
        )
      })
      .await?;

    raw
      .map(|(reason, frozen_by, frozen_at)| {
        Ok(AdminFreeze {
          reason,
          frozen_by,
          frozen_at: crate::encode::decode_dt(&frozen_at)?,
        })
      })
      .transpose()
  }

  async fn set_admin_freeze(
    &self,
    frozen: bool,
    actor: String,
    reason: String,
  ) -> Result<Option<AdminFreeze>> {
    let now = Utc::now();
    let now_str = encode_dt(now);
    let freeze = frozen.then(|| AdminFreeze {
      reason:    reason.clone(),
      frozen_by: actor.clone(),
      frozen_at: now,
    });

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let was_frozen: bool = tx
          .query_row("SELECT 1 FROM admin_freeze WHERE id = 1", [], |_| Ok(true))
          .optional()?
          .unwrap_or(false);

        let action = if frozen {
          tx.execute(
            "INSERT OR REPLACE INTO admin_freeze (id, reason, frozen_by, frozen_at)
             VALUES (1, ?1, ?2, ?3)",
            rusqlite::params![reason, actor, now_str],
          )?;
          AuditAction::SetAdminFreeze
        } else {
          tx.execute("DELETE FROM admin_freeze WHERE id = 1", [])?;
          AuditAction::ClearAdminFreeze
        };

        insert_audit_tx(
          &tx,
          &actor,
          action,
          &serde_json::json!({ "frozen": was_frozen }),
          &serde_json::json!({ "frozen": frozen }),
          &reason,
        )?;

        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(freeze)
  }

  // ── Profiles ──────────────────────────────────────────────────────────

  async fn list_profiles(&self) -> Result<Vec<RuntimeProfile>> {
    let raws: Vec<RawProfile> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT name, is_active, config_json, activated_at, updated_at
           FROM runtime_profiles ORDER BY name",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawProfile {
              name:         row.get(0)?,
              is_active:    row.get(1)?,
              config_json:  row.get(2)?,
              activated_at: row.get(3)?,
              updated_at:   row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawProfile::into_profile).collect()
  }

  async fn active_profile(&self) -> Result<RuntimeProfile> {
    let raw: Option<RawProfile> = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row(
              "SELECT name, is_active, config_json, activated_at, updated_at
               FROM runtime_profiles WHERE is_active = 1",
              [],
              |row| {
                Ok(RawProfile {
                  name:         row.get(0)?,
                  is_active:    row.get(1)?,
                  config_json:  row.get(2)?,
                  activated_at: row.get(3)?,
                  updated_at:   row.get(4)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.ok_or(Error::NoActiveProfile)?.into_profile()
  }

  async fn previous_active_profile(&self) -> Result<Option<ProfileName>> {
    let name: Option<String> = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row(
              "SELECT name FROM runtime_profiles
               WHERE is_active = 0 AND activated_at IS NOT NULL
               ORDER BY activated_at DESC LIMIT 1",
              [],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await?;

    name
      .map(|n| n.parse::<ProfileName>().map_err(Error::Core))
      .transpose()
  }

  async fn set_active_profile(
    &self,
    name: ProfileName,
    actor: String,
    reason: String,
  ) -> Result<RuntimeProfile> {
    let name_str = name.as_str().to_owned();
    let now_str = encode_dt(Utc::now());

    let raw: Option<RawProfile> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let exists: bool = tx
          .query_row(
            "SELECT 1 FROM runtime_profiles WHERE name = ?1",
            rusqlite::params![name_str],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if !exists {
          return Ok(None);
        }

        let old_name: Option<String> = tx
          .query_row(
            "SELECT name FROM runtime_profiles WHERE is_active = 1",
            [],
            |row| row.get(0),
          )
          .optional()?;

        // Deactivate-then-activate inside one transaction, so the
        // single-active invariant holds at every commit boundary.
        tx.execute(
          "UPDATE runtime_profiles SET is_active = 0, updated_at = ?1
           WHERE is_active = 1",
          rusqlite::params![now_str],
        )?;
        tx.execute(
          "UPDATE runtime_profiles
           SET is_active = 1, activated_at = ?2, updated_at = ?2
           WHERE name = ?1",
          rusqlite::params![name_str, now_str],
        )?;

        insert_audit_tx(
          &tx,
          &actor,
          AuditAction::SetActiveProfile,
          &serde_json::json!({ "active_profile": old_name }),
          &serde_json::json!({ "active_profile": name_str }),
          &reason,
        )?;

        let raw = tx.query_row(
          "SELECT name, is_active, config_json, activated_at, updated_at
           FROM runtime_profiles WHERE name = ?1",
          rusqlite::params![name_str],
          |row| {
            Ok(RawProfile {
              name:         row.get(0)?,
              is_active:    row.get(1)?,
              config_json:  row.get(2)?,
              activated_at: row.get(3)?,
              updated_at:   row.get(4)?,
            })
          },
        )?;

        tx.commit()?;
        Ok(Some(raw))
      })
      .await?;

    raw
      .ok_or_else(|| Error::ProfileNotFound(name.as_str().to_owned()))?
      .into_profile()
  }

  // ── Module overrides ──────────────────────────────────────────────────

  async fn list_overrides(&self) -> Result<Vec<ModuleOverride>> {
    let raws: Vec<RawOverride> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT module_key, version_key, is_enabled, reason, updated_by, updated_at
           FROM module_overrides ORDER BY module_key",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawOverride {
              module_key:  row.get(0)?,
              version_key: row.get(1)?,
              is_enabled:  row.get(2)?,
              reason:      row.get(3)?,
              updated_by:  row.get(4)?,
              updated_at:  row.get(5)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawOverride::into_override).collect()
  }

  async fn set_override(
    &self,
    module: ModuleKey,
    version: VersionTag,
    is_enabled: bool,
    actor: String,
    reason: String,
  ) -> Result<ModuleOverride> {
    let module_str = module.as_str().to_owned();
    let version_str = version.as_str().to_owned();
    let now = Utc::now();
    let now_str = encode_dt(now);

    let pin = ModuleOverride {
      module,
      version,
      is_enabled,
      reason: reason.clone(),
      updated_by: actor.clone(),
      updated_at: now,
    };

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let old: Option<(String, bool)> = tx
          .query_row(
            "SELECT version_key, is_enabled FROM module_overrides
             WHERE module_key = ?1",
            rusqlite::params![module_str],
            |row| Ok((row.get(0)?, row.get(1)?)),
          )
          .optional()?;

        tx.execute(
          "INSERT INTO module_overrides
             (module_key, version_key, is_enabled, reason, updated_by, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)
           ON CONFLICT(module_key) DO UPDATE SET
             version_key = excluded.version_key,
             is_enabled  = excluded.is_enabled,
             reason      = excluded.reason,
             updated_by  = excluded.updated_by,
             updated_at  = excluded.updated_at",
          rusqlite::params![
            module_str, version_str, is_enabled, reason, actor, now_str
          ],
        )?;

        let before = match old {
          Some((v, enabled)) => serde_json::json!({
            "module": module_str, "version": v, "is_enabled": enabled
          }),
          None => serde_json::json!({ "module": module_str, "version": null }),
        };
        insert_audit_tx(
          &tx,
          &actor,
          AuditAction::SetOverride,
          &before,
          &serde_json::json!({
            "module": module_str, "version": version_str, "is_enabled": is_enabled
          }),
          &reason,
        )?;

        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(pin)
  }

  async fn clear_override(
    &self,
    module: ModuleKey,
    actor: String,
    reason: String,
  ) -> Result<bool> {
    let module_str = module.as_str().to_owned();

    let cleared: bool = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let old: Option<String> = tx
          .query_row(
            "SELECT version_key FROM module_overrides WHERE module_key = ?1",
            rusqlite::params![module_str],
            |row| row.get(0),
          )
          .optional()?;
        let Some(old_version) = old else {
          return Ok(false);
        };

        tx.execute(
          "DELETE FROM module_overrides WHERE module_key = ?1",
          rusqlite::params![module_str],
        )?;

        insert_audit_tx(
          &tx,
          &actor,
          AuditAction::ClearOverride,
          &serde_json::json!({ "module": module_str, "version": old_version }),
          &serde_json::json!({ "module": module_str, "version": null }),
          &reason,
        )?;

        tx.commit()?;
        Ok(true)
      })
      .await?;

    Ok(cleared)
  }

  // ── Audit ─────────────────────────────────────────────────────────────

  async fn append_audit(&self, record: NewAuditRecord) -> Result<AuditRecord> {
    let record = AuditRecord {
      audit_id:   Uuid::new_v4(),
      actor:      record.actor,
      action:     record.action,
      before:     record.before,
      after:      record.after,
      reason:     record.reason,
      created_at: Utc::now(),
    };

    let id_str = encode_uuid(record.audit_id);
    let actor = record.actor.clone();
    let action = record.action.as_str().to_owned();
    let before = record.before.to_string();
    let after = record.after.to_string();
    let reason = record.reason.clone();
    let at_str = encode_dt(record.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO switch_audit_log
             (audit_id, actor, action_type, before_json, after_json, reason, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![id_str, actor, action, before, after, reason, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(record)
  }

  async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditRecord>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawAudit> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT audit_id, actor, action_type, before_json, after_json,
                  reason, created_at
           FROM switch_audit_log
           ORDER BY created_at DESC, audit_id DESC
           LIMIT ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![limit], |row| {
            Ok(RawAudit {
              audit_id:    row.get(0)?,
              actor:       row.get(1)?,
              action_type: row.get(2)?,
              before_json: row.get(3)?,
              after_json:  row.get(4)?,
              reason:      row.get(5)?,
              created_at:  row.get(6)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAudit::into_record).collect()
  }

  // ── Sessions & snapshots ──────────────────────────────────────────────

  async fn create_session(
    &self,
    user_id: Uuid,
    runtime: ResolvedRuntime,
  ) -> Result<(Session, SessionRuntimeSnapshot)> {
    let now = Utc::now();
    let session = Session {
      session_id: Uuid::new_v4(),
      user_id,
      created_at: now,
    };
    let snapshot = SessionRuntimeSnapshot {
      session_id: session.session_id,
      profile:    runtime.profile,
      modules:    runtime.modules,
      flags:      runtime.flags,
      created_at: now,
    };

    let session_id_str = encode_uuid(session.session_id);
    let user_id_str = encode_uuid(user_id);
    let profile_str = snapshot.profile.as_str().to_owned();
    let modules_str = encode_module_map(&snapshot.modules)?;
    let flags_str = encode_flag_state(snapshot.flags)?;
    let at_str = encode_dt(now);

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO sessions (session_id, user_id, created_at)
           VALUES (?1, ?2, ?3)",
          rusqlite::params![session_id_str, user_id_str, at_str],
        )?;
        tx.execute(
          "INSERT INTO session_runtime_snapshots
             (session_id, profile_name, modules_json, flags_json, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![session_id_str, profile_str, modules_str, flags_str, at_str],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok((session, snapshot))
  }

  async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>> {
    let id_str = encode_uuid(session_id);

    let raw: Option<(String, String, String)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT session_id, user_id, created_at FROM sessions
               WHERE session_id = ?1",
              rusqlite::params![id_str],
              |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?,
        )
      })
      .await?;

    raw
      .map(|(session_id, user_id, created_at)| {
        Ok(Session {
          session_id: crate::encode::decode_uuid(&session_id)?,
          user_id:    crate::encode::decode_uuid(&user_id)?,
          created_at: crate::encode::decode_dt(&created_at)?,
        })
      })
      .transpose()
  }

  async fn get_snapshot(
    &self,
    session_id: Uuid,
  ) -> Result<Option<SessionRuntimeSnapshot>> {
    let id_str = encode_uuid(session_id);

    let raw: Option<RawSnapshot> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT session_id, profile_name, modules_json, flags_json, created_at
               FROM session_runtime_snapshots WHERE session_id = ?1",
              rusqlite::params![id_str],
              |row| {
                Ok(RawSnapshot {
                  session_id:   row.get(0)?,
                  profile_name: row.get(1)?,
                  modules_json: row.get(2)?,
                  flags_json:   row.get(3)?,
                  created_at:   row.get(4)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSnapshot::into_snapshot).transpose()
  }

  // ── State bridge jobs ─────────────────────────────────────────────────

  async fn claim_bridge(
    &self,
    key: BridgeKey,
    stale_after: Duration,
  ) -> Result<BridgeClaim> {
    let user_str = encode_uuid(key.user_id);
    let from_str = key.from_profile.as_str().to_owned();
    let to_str = key.to_profile.as_str().to_owned();
    let policy = key.policy_version;
    let now = Utc::now();
    let now_str = encode_dt(now);
    // RFC 3339 strings we write sort chronologically, so the staleness
    // check is a plain string comparison.
    let stale_cutoff = encode_dt(
      now - chrono::TimeDelta::from_std(stale_after).unwrap_or_default(),
    );

    let claim: u8 = self
      .conn
      .call(move |conn| {
        // An immediate transaction takes the write lock up front — the
        // SQLite equivalent of SELECT … FOR UPDATE on the bridge row.
        let tx =
          conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
          "INSERT OR IGNORE INTO algo_state_bridges
             (user_id, from_profile, to_profile, policy_version, status)
           VALUES (?1, ?2, ?3, ?4, 'queued')",
          rusqlite::params![user_str, from_str, to_str, policy],
        )?;

        let (status, started_at): (String, Option<String>) = tx.query_row(
          "SELECT status, started_at FROM algo_state_bridges
           WHERE user_id = ?1 AND from_profile = ?2 AND to_profile = ?3
             AND policy_version = ?4",
          rusqlite::params![user_str, from_str, to_str, policy],
          |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let claim = match status.as_str() {
          "done" => 1,
          "running" => {
            let abandoned =
              started_at.as_deref().is_none_or(|at| at < stale_cutoff.as_str());
            if abandoned { 0 } else { 2 }
          }
          // queued or failed: claimable.
          _ => 0,
        };

        if claim == 0 {
          tx.execute(
            "UPDATE algo_state_bridges
             SET status = 'running', started_at = ?5, finished_at = NULL
             WHERE user_id = ?1 AND from_profile = ?2 AND to_profile = ?3
               AND policy_version = ?4",
            rusqlite::params![user_str, from_str, to_str, policy, now_str],
          )?;
        }

        tx.commit()?;
        Ok(claim)
      })
      .await?;

    Ok(match claim {
      0 => BridgeClaim::Claimed,
      1 => BridgeClaim::AlreadyDone,
      _ => BridgeClaim::InProgress,
    })
  }

  async fn complete_bridge(
    &self,
    key: BridgeKey,
    states: Vec<UserThemeState>,
    details: serde_json::Value,
  ) -> Result<()> {
    let user_str = encode_uuid(key.user_id);
    let from_str = key.from_profile.as_str().to_owned();
    let to_str = key.to_profile.as_str().to_owned();
    let policy = key.policy_version;
    let details_str = details.to_string();
    let now_str = encode_dt(Utc::now());
    let rows: Vec<RawThemeState> =
      states.iter().map(RawThemeState::from_state).collect();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for row in &rows {
          seed_theme_state(&tx, row)?;
        }
        // Only a still-running row turns done; a concurrent operator
        // requeue keeps its queued status and the next claim redoes the
        // (idempotent) conversion.
        tx.execute(
          "UPDATE algo_state_bridges
           SET status = 'done', finished_at = ?5, details_json = ?6
           WHERE user_id = ?1 AND from_profile = ?2 AND to_profile = ?3
             AND policy_version = ?4 AND status = 'running'",
          rusqlite::params![user_str, from_str, to_str, policy, now_str, details_str],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn finish_bridge(
    &self,
    key: BridgeKey,
    status: BridgeStatus,
    details: serde_json::Value,
  ) -> Result<()> {
    let user_str = encode_uuid(key.user_id);
    let from_str = key.from_profile.as_str().to_owned();
    let to_str = key.to_profile.as_str().to_owned();
    let policy = key.policy_version;
    let status_str = status.as_str().to_owned();
    let details_str = details.to_string();
    let now_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE algo_state_bridges
           SET status = ?5, finished_at = ?6, details_json = ?7
           WHERE user_id = ?1 AND from_profile = ?2 AND to_profile = ?3
             AND policy_version = ?4",
          rusqlite::params![
            user_str, from_str, to_str, policy, status_str, now_str, details_str
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_bridge(&self, key: BridgeKey) -> Result<Option<AlgoStateBridge>> {
    let user_str = encode_uuid(key.user_id);
    let from_str = key.from_profile.as_str().to_owned();
    let to_str = key.to_profile.as_str().to_owned();
    let policy = key.policy_version;

    let raw: Option<RawBridge> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT user_id, from_profile, to_profile, policy_version,
                      status, started_at, finished_at, details_json
               FROM algo_state_bridges
               WHERE user_id = ?1 AND from_profile = ?2 AND to_profile = ?3
                 AND policy_version = ?4",
              rusqlite::params![user_str, from_str, to_str, policy],
              |row| {
                Ok(RawBridge {
                  user_id:        row.get(0)?,
                  from_profile:   row.get(1)?,
                  to_profile:     row.get(2)?,
                  policy_version: row.get(3)?,
                  status:         row.get(4)?,
                  started_at:     row.get(5)?,
                  finished_at:    row.get(6)?,
                  details_json:   row.get(7)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawBridge::into_bridge).transpose()
  }

  async fn requeue_bridge(
    &self,
    key: BridgeKey,
    actor: String,
    reason: String,
  ) -> Result<bool> {
    let user_str = encode_uuid(key.user_id);
    let from_str = key.from_profile.as_str().to_owned();
    let to_str = key.to_profile.as_str().to_owned();
    let policy = key.policy_version;

    let requeued: bool = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let changed = tx.execute(
          "UPDATE algo_state_bridges
           SET status = 'queued', started_at = NULL, finished_at = NULL
           WHERE user_id = ?1 AND from_profile = ?2 AND to_profile = ?3
             AND policy_version = ?4 AND status = 'running'",
          rusqlite::params![user_str, from_str, to_str, policy],
        )?;
        if changed == 0 {
          return Ok(false);
        }

        insert_audit_tx(
          &tx,
          &actor,
          AuditAction::RequeueBridge,
          &serde_json::json!({
            "user_id": user_str, "from": from_str, "to": to_str,
            "policy_version": policy, "status": "running"
          }),
          &serde_json::json!({
            "user_id": user_str, "from": from_str, "to": to_str,
            "policy_version": policy, "status": "queued"
          }),
          &reason,
        )?;

        tx.commit()?;
        Ok(true)
      })
      .await?;

    Ok(requeued)
  }

  // ── Canonical aggregates ──────────────────────────────────────────────

  async fn theme_states(&self, user_id: Uuid) -> Result<Vec<UserThemeState>> {
    let user_str = encode_uuid(user_id);

    let raws: Vec<RawThemeState> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {THEME_COLUMNS} FROM user_theme_state
           WHERE user_id = ?1 ORDER BY theme_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![user_str], theme_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawThemeState::into_state).collect()
  }

  async fn get_theme_state(
    &self,
    user_id: Uuid,
    theme_id: Uuid,
  ) -> Result<Option<UserThemeState>> {
    let user_str = encode_uuid(user_id);
    let theme_str = encode_uuid(theme_id);

    let raw: Option<RawThemeState> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {THEME_COLUMNS} FROM user_theme_state
                 WHERE user_id = ?1 AND theme_id = ?2"
              ),
              rusqlite::params![user_str, theme_str],
              theme_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawThemeState::into_state).transpose()
  }

  async fn upsert_theme_state(&self, state: UserThemeState) -> Result<()> {
    let row = RawThemeState::from_state(&state);

    self
      .conn
      .call(move |conn| {
        write_theme_state(conn, &row)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
