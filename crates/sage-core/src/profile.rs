//! Runtime profiles and per-module overrides.
//!
//! A profile is a named bundle mapping every module to a version tag.
//! Exactly one profile is active at any time; an override pins a single
//! module to a version regardless of what the active profile says.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  module::{ModuleKey, VersionTag},
};

/// Name of a runtime profile. The set is closed: three named bundles seeded
/// at bootstrap, mutated only through the switch governor.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ProfileName {
  /// The probabilistic generation (all modules on v1).
  Primary,
  /// The heuristic generation (all modules on v0).
  Fallback,
  /// A mixed bundle used for staged rollout.
  Shadow,
}

impl ProfileName {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Primary => "primary",
      Self::Fallback => "fallback",
      Self::Shadow => "shadow",
    }
  }
}

impl fmt::Display for ProfileName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ProfileName {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "primary" => Ok(Self::Primary),
      "fallback" => Ok(Self::Fallback),
      "shadow" => Ok(Self::Shadow),
      other => Err(Error::UnknownProfile(other.to_owned())),
    }
  }
}

/// A named bundle of module→version choices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeProfile {
  pub name:         ProfileName,
  pub is_active:    bool,
  pub config:       BTreeMap<ModuleKey, VersionTag>,
  /// When this profile last became active; `None` if it never was.
  pub activated_at: Option<DateTime<Utc>>,
  pub updated_at:   DateTime<Utc>,
}

impl RuntimeProfile {
  /// The three seeded profiles created once at bootstrap, with `primary`
  /// active.
  pub fn default_set() -> Vec<Self> {
    let now = Utc::now();
    let uniform = |version: VersionTag| -> BTreeMap<ModuleKey, VersionTag> {
      ModuleKey::ALL.iter().map(|&m| (m, version)).collect()
    };

    // Shadow runs the probabilistic mastery/revision stack but keeps the
    // heuristic adaptive selector, matching the staged-rollout plan.
    let mut shadow = uniform(VersionTag::V1);
    shadow.insert(ModuleKey::Adaptive, VersionTag::V0);
    shadow.insert(ModuleKey::Difficulty, VersionTag::V0);

    vec![
      Self {
        name:         ProfileName::Primary,
        is_active:    true,
        config:       uniform(VersionTag::V1),
        activated_at: Some(now),
        updated_at:   now,
      },
      Self {
        name:         ProfileName::Fallback,
        is_active:    false,
        config:       uniform(VersionTag::V0),
        activated_at: None,
        updated_at:   now,
      },
      Self {
        name:         ProfileName::Shadow,
        is_active:    false,
        config:       shadow,
        activated_at: None,
        updated_at:   now,
      },
    ]
  }
}

/// A per-module pin that supersedes the active profile for that module.
/// At most one row exists per module key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleOverride {
  pub module:     ModuleKey,
  pub version:    VersionTag,
  pub is_enabled: bool,
  pub reason:     String,
  pub updated_by: String,
  pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_set_has_exactly_one_active_profile() {
    let profiles = RuntimeProfile::default_set();
    assert_eq!(profiles.iter().filter(|p| p.is_active).count(), 1);
    assert!(profiles.iter().find(|p| p.name == ProfileName::Primary).unwrap().is_active);
  }

  #[test]
  fn default_profiles_cover_every_module() {
    for profile in RuntimeProfile::default_set() {
      for module in ModuleKey::ALL {
        assert!(
          profile.config.contains_key(&module),
          "{} missing {module}",
          profile.name
        );
      }
    }
  }
}
