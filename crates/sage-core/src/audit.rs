//! Append-only audit records for control-plane mutations.
//!
//! Audit rows are created, never updated or deleted. A successful mutation
//! and its audit row are written in the same transaction, so either both
//! exist or neither does. Rejected confirmation attempts are audited too,
//! best-effort, under a distinct action type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// What kind of control-plane event an audit row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
  SetFlag,
  SetActiveProfile,
  SetOverride,
  ClearOverride,
  SetAdminFreeze,
  ClearAdminFreeze,
  RequeueBridge,
  /// A governed mutation was rejected because the confirmation phrase did
  /// not match. Recorded for brute-force monitoring; no state changed.
  ConfirmationRejected,
}

impl AuditAction {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::SetFlag => "set_flag",
      Self::SetActiveProfile => "set_active_profile",
      Self::SetOverride => "set_override",
      Self::ClearOverride => "clear_override",
      Self::SetAdminFreeze => "set_admin_freeze",
      Self::ClearAdminFreeze => "clear_admin_freeze",
      Self::RequeueBridge => "requeue_bridge",
      Self::ConfirmationRejected => "confirmation_rejected",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "set_flag" => Ok(Self::SetFlag),
      "set_active_profile" => Ok(Self::SetActiveProfile),
      "set_override" => Ok(Self::SetOverride),
      "clear_override" => Ok(Self::ClearOverride),
      "set_admin_freeze" => Ok(Self::SetAdminFreeze),
      "clear_admin_freeze" => Ok(Self::ClearAdminFreeze),
      "requeue_bridge" => Ok(Self::RequeueBridge),
      "confirmation_rejected" => Ok(Self::ConfirmationRejected),
      other => Err(Error::UnknownAuditAction(other.to_owned())),
    }
  }
}

/// An immutable audit record. Ordering by `created_at` is the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
  pub audit_id:   Uuid,
  pub actor:      String,
  pub action:     AuditAction,
  pub before:     serde_json::Value,
  pub after:      serde_json::Value,
  pub reason:     String,
  pub created_at: DateTime<Utc>,
}

/// Input for appending an audit record; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewAuditRecord {
  pub actor:  String,
  pub action: AuditAction,
  pub before: serde_json::Value,
  pub after:  serde_json::Value,
  pub reason: String,
}
