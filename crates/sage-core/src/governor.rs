//! The switch governor — confirmation-phrase and reason discipline for
//! every control-plane mutation.
//!
//! Each (action, target value) pair maps deterministically to exactly one
//! literal phrase; the caller must reproduce it verbatim. The governor
//! performs no persistence: it validates and hands the reason back for the
//! caller to attach to the audited mutation.

use uuid::Uuid;

use crate::{
  Error, Result,
  audit::AuditAction,
  flag::{AdminFreeze, FlagKey},
  module::{ModuleKey, VersionTag},
  profile::ProfileName,
};

/// A control-plane mutation subject to governor discipline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernedAction {
  SetFlag { key: FlagKey, value: bool },
  SetActiveProfile { name: ProfileName },
  SetOverride { module: ModuleKey, version: VersionTag },
  ClearOverride { module: ModuleKey },
  SetAdminFreeze,
  ClearAdminFreeze,
  RequeueBridge { user_id: Uuid },
}

impl GovernedAction {
  /// The one literal phrase that authorises this action.
  pub fn expected_phrase(&self) -> String {
    match self {
      Self::SetFlag { key, value } => format!(
        "confirm {} {}",
        key.as_str().to_ascii_lowercase(),
        if *value { "on" } else { "off" }
      ),
      Self::SetActiveProfile { name } => {
        format!("switch runtime profile to {name}")
      }
      Self::SetOverride { module, version } => format!("pin {module} to {version}"),
      Self::ClearOverride { module } => format!("unpin {module}"),
      Self::SetAdminFreeze => "freeze control plane".to_owned(),
      Self::ClearAdminFreeze => "thaw control plane".to_owned(),
      Self::RequeueBridge { user_id } => format!("requeue bridge for {user_id}"),
    }
  }

  /// The audit action a successful mutation is recorded under.
  pub fn audit_action(&self) -> AuditAction {
    match self {
      Self::SetFlag { .. } => AuditAction::SetFlag,
      Self::SetActiveProfile { .. } => AuditAction::SetActiveProfile,
      Self::SetOverride { .. } => AuditAction::SetOverride,
      Self::ClearOverride { .. } => AuditAction::ClearOverride,
      Self::SetAdminFreeze => AuditAction::SetAdminFreeze,
      Self::ClearAdminFreeze => AuditAction::ClearAdminFreeze,
      Self::RequeueBridge { .. } => AuditAction::RequeueBridge,
    }
  }

  /// Lifting the freeze must itself bypass the freeze short-circuit,
  /// otherwise a frozen control plane could never be thawed.
  fn exempt_from_freeze(&self) -> bool {
    matches!(self, Self::ClearAdminFreeze)
  }

  /// Short label used in rejection errors and rejection audits.
  pub fn label(&self) -> String {
    match self {
      Self::SetFlag { key, value } => format!("set_flag {key}={value}"),
      Self::SetActiveProfile { name } => format!("set_active_profile {name}"),
      Self::SetOverride { module, version } => {
        format!("set_override {module}={version}")
      }
      Self::ClearOverride { module } => format!("clear_override {module}"),
      Self::SetAdminFreeze => "set_admin_freeze".to_owned(),
      Self::ClearAdminFreeze => "clear_admin_freeze".to_owned(),
      Self::RequeueBridge { user_id } => format!("requeue_bridge {user_id}"),
    }
  }
}

/// Validates governed mutations. Stateless apart from the reason policy.
#[derive(Debug, Clone)]
pub struct SwitchGovernor {
  min_reason_len: usize,
}

impl Default for SwitchGovernor {
  fn default() -> Self {
    Self { min_reason_len: 10 }
  }
}

impl SwitchGovernor {
  pub fn new(min_reason_len: usize) -> Self {
    Self { min_reason_len }
  }

  /// Authorise `action`, returning the trimmed reason on success.
  ///
  /// Order of checks is load-bearing: the admin freeze pre-empts everything
  /// (except thawing), then the reason policy, then phrase exactness.
  pub fn authorize(
    &self,
    action: &GovernedAction,
    supplied_phrase: &str,
    reason: &str,
    freeze: Option<&AdminFreeze>,
  ) -> Result<String> {
    if let Some(freeze) = freeze
      && !action.exempt_from_freeze()
    {
      return Err(Error::AdminFrozen { reason: freeze.reason.clone() });
    }

    let reason = reason.trim();
    if reason.len() < self.min_reason_len {
      return Err(Error::ReasonRequired { min: self.min_reason_len });
    }

    if supplied_phrase != action.expected_phrase() {
      return Err(Error::ConfirmationMismatch { action: action.label() });
    }

    Ok(reason.to_owned())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn governor() -> SwitchGovernor {
    SwitchGovernor::default()
  }

  const REASON: &str = "rolling back after incident 4821";

  #[test]
  fn exact_phrase_is_accepted() {
    let action = GovernedAction::SetActiveProfile { name: ProfileName::Fallback };
    let reason = governor()
      .authorize(&action, "switch runtime profile to fallback", REASON, None)
      .unwrap();
    assert_eq!(reason, REASON);
  }

  #[test]
  fn one_character_deviation_is_rejected() {
    let action = GovernedAction::SetActiveProfile { name: ProfileName::Fallback };
    let expected = action.expected_phrase();

    // Flip each character in turn; every variant must be rejected.
    for i in 0..expected.len() {
      let mut bytes = expected.clone().into_bytes();
      bytes[i] = bytes[i].wrapping_add(1);
      let Ok(mutated) = String::from_utf8(bytes) else { continue };
      let result = governor().authorize(&action, &mutated, REASON, None);
      assert!(
        matches!(result, Err(Error::ConfirmationMismatch { .. })),
        "phrase {mutated:?} was not rejected"
      );
    }
  }

  #[test]
  fn flag_phrases_encode_key_and_value() {
    let on = GovernedAction::SetFlag { key: FlagKey::FreezeUpdates, value: true };
    let off = GovernedAction::SetFlag { key: FlagKey::FreezeUpdates, value: false };
    assert_eq!(on.expected_phrase(), "confirm freeze_updates on");
    assert_eq!(off.expected_phrase(), "confirm freeze_updates off");
    assert_ne!(on.expected_phrase(), off.expected_phrase());
  }

  #[test]
  fn short_reason_is_rejected() {
    let action = GovernedAction::SetActiveProfile { name: ProfileName::Fallback };
    let result =
      governor().authorize(&action, &action.expected_phrase(), "ok", None);
    assert!(matches!(result, Err(Error::ReasonRequired { min: 10 })));
  }

  #[test]
  fn whitespace_reason_is_rejected() {
    let action = GovernedAction::SetAdminFreeze;
    let result =
      governor().authorize(&action, &action.expected_phrase(), "    \t  ", None);
    assert!(matches!(result, Err(Error::ReasonRequired { .. })));
  }

  #[test]
  fn admin_freeze_preempts_phrase_check() {
    let freeze = AdminFreeze {
      reason:    "migration window".to_owned(),
      frozen_by: "ops".to_owned(),
      frozen_at: chrono::Utc::now(),
    };
    let action = GovernedAction::SetActiveProfile { name: ProfileName::Primary };

    // Even a correct phrase and reason are pre-empted by the freeze.
    let result = governor().authorize(
      &action,
      &action.expected_phrase(),
      REASON,
      Some(&freeze),
    );
    match result {
      Err(Error::AdminFrozen { reason }) => assert_eq!(reason, "migration window"),
      other => panic!("expected AdminFrozen, got {other:?}"),
    }
  }

  #[test]
  fn thaw_is_exempt_from_freeze() {
    let freeze = AdminFreeze {
      reason:    "migration window".to_owned(),
      frozen_by: "ops".to_owned(),
      frozen_at: chrono::Utc::now(),
    };
    let action = GovernedAction::ClearAdminFreeze;
    governor()
      .authorize(&action, "thaw control plane", REASON, Some(&freeze))
      .unwrap();
  }
}
