//! Encoding and decoding helpers between Rust domain types and the
//! plain-text representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. Module maps, flag states
//! and audit payloads are stored as compact JSON. UUIDs are stored as
//! hyphenated lowercase strings.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sage_core::{
  audit::{AuditAction, AuditRecord},
  flag::{FlagState, SystemFlag},
  module::{ModuleKey, VersionTag},
  profile::{ModuleOverride, ProfileName, RuntimeProfile},
  snapshot::SessionRuntimeSnapshot,
  state::{BanditState, MasteryState, RevisionState, ThemeStats, UserThemeState},
  store::{AlgoStateBridge, BridgeKey, BridgeStatus},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String {
  id.hyphenated().to_string()
}

pub fn decode_uuid(s: &str) -> Result<Uuid> {
  Ok(Uuid::parse_str(s)?)
}

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339()
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Module maps ─────────────────────────────────────────────────────────────

pub fn encode_module_map(map: &BTreeMap<ModuleKey, VersionTag>) -> Result<String> {
  Ok(serde_json::to_string(map)?)
}

pub fn decode_module_map(s: &str) -> Result<BTreeMap<ModuleKey, VersionTag>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Flag state ──────────────────────────────────────────────────────────────

pub fn encode_flag_state(flags: FlagState) -> Result<String> {
  Ok(serde_json::to_string(&flags)?)
}

pub fn decode_flag_state(s: &str) -> Result<FlagState> {
  Ok(serde_json::from_str(s)?)
}

// ─── Bridge status ───────────────────────────────────────────────────────────

pub fn decode_bridge_status(s: &str) -> Result<BridgeStatus> {
  match s {
    "queued" => Ok(BridgeStatus::Queued),
    "running" => Ok(BridgeStatus::Running),
    "done" => Ok(BridgeStatus::Done),
    "failed" => Ok(BridgeStatus::Failed),
    other => Err(Error::InvalidStatus(other.to_owned())),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `system_flags` row.
pub struct RawFlag {
  pub key:        String,
  pub value:      bool,
  pub reason:     Option<String>,
  pub updated_by: Option<String>,
  pub updated_at: String,
}

impl RawFlag {
  pub fn into_flag(self) -> Result<SystemFlag> {
    Ok(SystemFlag {
      key:        self.key.parse()?,
      value:      self.value,
      reason:     self.reason,
      updated_by: self.updated_by,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw strings read directly from a `runtime_profiles` row.
pub struct RawProfile {
  pub name:         String,
  pub is_active:    bool,
  pub config_json:  String,
  pub activated_at: Option<String>,
  pub updated_at:   String,
}

impl RawProfile {
  pub fn into_profile(self) -> Result<RuntimeProfile> {
    Ok(RuntimeProfile {
      name:         self.name.parse::<ProfileName>()?,
      is_active:    self.is_active,
      config:       decode_module_map(&self.config_json)?,
      activated_at: self.activated_at.as_deref().map(decode_dt).transpose()?,
      updated_at:   decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw strings read directly from a `module_overrides` row.
pub struct RawOverride {
  pub module_key:  String,
  pub version_key: String,
  pub is_enabled:  bool,
  pub reason:      String,
  pub updated_by:  String,
  pub updated_at:  String,
}

impl RawOverride {
  pub fn into_override(self) -> Result<ModuleOverride> {
    Ok(ModuleOverride {
      module:     self.module_key.parse::<ModuleKey>()?,
      version:    self.version_key.parse::<VersionTag>()?,
      is_enabled: self.is_enabled,
      reason:     self.reason,
      updated_by: self.updated_by,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw strings read directly from a `switch_audit_log` row.
pub struct RawAudit {
  pub audit_id:    String,
  pub actor:       String,
  pub action_type: String,
  pub before_json: String,
  pub after_json:  String,
  pub reason:      String,
  pub created_at:  String,
}

impl RawAudit {
  pub fn into_record(self) -> Result<AuditRecord> {
    Ok(AuditRecord {
      audit_id:   decode_uuid(&self.audit_id)?,
      actor:      self.actor,
      action:     AuditAction::parse(&self.action_type)?,
      before:     serde_json::from_str(&self.before_json)?,
      after:      serde_json::from_str(&self.after_json)?,
      reason:     self.reason,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `session_runtime_snapshots` row.
pub struct RawSnapshot {
  pub session_id:   String,
  pub profile_name: String,
  pub modules_json: String,
  pub flags_json:   String,
  pub created_at:   String,
}

impl RawSnapshot {
  pub fn into_snapshot(self) -> Result<SessionRuntimeSnapshot> {
    Ok(SessionRuntimeSnapshot {
      session_id: decode_uuid(&self.session_id)?,
      profile:    self.profile_name.parse::<ProfileName>()?,
      modules:    decode_module_map(&self.modules_json)?,
      flags:      decode_flag_state(&self.flags_json)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from an `algo_state_bridges` row.
pub struct RawBridge {
  pub user_id:        String,
  pub from_profile:   String,
  pub to_profile:     String,
  pub policy_version: u32,
  pub status:         String,
  pub started_at:     Option<String>,
  pub finished_at:    Option<String>,
  pub details_json:   String,
}

impl RawBridge {
  pub fn into_bridge(self) -> Result<AlgoStateBridge> {
    Ok(AlgoStateBridge {
      key:         BridgeKey {
        user_id:        decode_uuid(&self.user_id)?,
        from_profile:   self.from_profile.parse::<ProfileName>()?,
        to_profile:     self.to_profile.parse::<ProfileName>()?,
        policy_version: self.policy_version,
      },
      status:      decode_bridge_status(&self.status)?,
      started_at:  self.started_at.as_deref().map(decode_dt).transpose()?,
      finished_at: self.finished_at.as_deref().map(decode_dt).transpose()?,
      details:     serde_json::from_str(&self.details_json)?,
    })
  }
}

/// Raw values read directly from a `user_theme_state` row.
pub struct RawThemeState {
  pub user_id:          String,
  pub theme_id:         String,
  pub attempts_total:   u32,
  pub correct_total:    u32,
  pub mastery_model:    String,
  pub revision_model:   String,
  pub v0_mastery_score: Option<f64>,
  pub v0_leitner_stage: Option<u8>,
  pub v0_interval_days: Option<u32>,
  pub bkt_p_mastery:    Option<f64>,
  pub bkt_prior_seen:   Option<u32>,
  pub fsrs_stability:   Option<f64>,
  pub fsrs_difficulty:  Option<f64>,
  pub due_at:           Option<String>,
  pub bandit_alpha:     Option<f64>,
  pub bandit_beta:      Option<f64>,
  pub updated_at:       String,
}

impl RawThemeState {
  pub fn from_state(state: &UserThemeState) -> Self {
    Self {
      user_id:          encode_uuid(state.user_id),
      theme_id:         encode_uuid(state.theme_id),
      attempts_total:   state.stats.attempts_total,
      correct_total:    state.stats.correct_total,
      mastery_model:    state.mastery.model.as_str().to_owned(),
      revision_model:   state.revision.model.as_str().to_owned(),
      v0_mastery_score: state.mastery.v0_score,
      v0_leitner_stage: state.revision.leitner_stage,
      v0_interval_days: state.revision.interval_days,
      bkt_p_mastery:    state.mastery.bkt_p_mastery,
      bkt_prior_seen:   state.mastery.bkt_prior_seen,
      fsrs_stability:   state.revision.stability,
      fsrs_difficulty:  state.revision.difficulty,
      due_at:           state.revision.due_at.map(encode_dt),
      bandit_alpha:     state.bandit.alpha,
      bandit_beta:      state.bandit.beta,
      updated_at:       encode_dt(state.updated_at),
    }
  }

  pub fn into_state(self) -> Result<UserThemeState> {
    Ok(UserThemeState {
      user_id:    decode_uuid(&self.user_id)?,
      theme_id:   decode_uuid(&self.theme_id)?,
      stats:      ThemeStats {
        attempts_total: self.attempts_total,
        correct_total:  self.correct_total,
      },
      mastery:    MasteryState {
        model:          self.mastery_model.parse::<VersionTag>()?,
        v0_score:       self.v0_mastery_score,
        bkt_p_mastery:  self.bkt_p_mastery,
        bkt_prior_seen: self.bkt_prior_seen,
      },
      revision:   RevisionState {
        model:         self.revision_model.parse::<VersionTag>()?,
        leitner_stage: self.v0_leitner_stage,
        interval_days: self.v0_interval_days,
        stability:     self.fsrs_stability,
        difficulty:    self.fsrs_difficulty,
        due_at:        self.due_at.as_deref().map(decode_dt).transpose()?,
      },
      bandit:     BanditState { alpha: self.bandit_alpha, beta: self.bandit_beta },
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}
