//! Global kill switches and the control-plane freeze.
//!
//! `EXAM_MODE` and `FREEZE_UPDATES` gate *learning-state* behaviour
//! platform-wide. The admin freeze is a separate switch that blocks
//! *control-plane* mutation; the two are independent by design.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Key of a global boolean kill switch. One persisted row per key.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagKey {
  /// Exam sessions are in progress; adaptive reshuffling is suspended.
  ExamMode,
  /// All learning-state mutation is suspended; reads serve last-known-good.
  FreezeUpdates,
}

impl FlagKey {
  pub const ALL: [Self; 2] = [Self::ExamMode, Self::FreezeUpdates];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::ExamMode => "EXAM_MODE",
      Self::FreezeUpdates => "FREEZE_UPDATES",
    }
  }
}

impl fmt::Display for FlagKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for FlagKey {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "EXAM_MODE" => Ok(Self::ExamMode),
      "FREEZE_UPDATES" => Ok(Self::FreezeUpdates),
      other => Err(Error::UnknownFlag(other.to_owned())),
    }
  }
}

/// A persisted kill switch with last-writer metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemFlag {
  pub key:        FlagKey,
  pub value:      bool,
  pub reason:     Option<String>,
  pub updated_by: Option<String>,
  pub updated_at: DateTime<Utc>,
}

/// The flag values folded into a resolved runtime or session snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagState {
  pub exam_mode:      bool,
  pub freeze_updates: bool,
}

impl FlagState {
  pub fn from_flags(flags: &[SystemFlag]) -> Self {
    let mut state = Self::default();
    for flag in flags {
      match flag.key {
        FlagKey::ExamMode => state.exam_mode = flag.value,
        FlagKey::FreezeUpdates => state.freeze_updates = flag.value,
      }
    }
    state
  }
}

/// The active control-plane freeze, if any. Cleared = absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminFreeze {
  pub reason:    String,
  pub frozen_by: String,
  pub frozen_at: DateTime<Utc>,
}
