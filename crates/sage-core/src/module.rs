//! Module keys and version tags — the two axes of every runtime decision.
//!
//! A module is a pluggable algorithmic capability; a version tag selects one
//! of its interchangeable implementations. Both are closed enums so dispatch
//! is a static lookup, never a string match against arbitrary input.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A pluggable algorithmic capability of the learning platform.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKey {
  Mastery,
  Revision,
  Adaptive,
  Difficulty,
  Mistakes,
  Search,
  Graph,
  Warehouse,
  Irt,
}

impl ModuleKey {
  /// All module keys, in the order they appear in profile configs.
  pub const ALL: [Self; 9] = [
    Self::Mastery,
    Self::Revision,
    Self::Adaptive,
    Self::Difficulty,
    Self::Mistakes,
    Self::Search,
    Self::Graph,
    Self::Warehouse,
    Self::Irt,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Mastery => "mastery",
      Self::Revision => "revision",
      Self::Adaptive => "adaptive",
      Self::Difficulty => "difficulty",
      Self::Mistakes => "mistakes",
      Self::Search => "search",
      Self::Graph => "graph",
      Self::Warehouse => "warehouse",
      Self::Irt => "irt",
    }
  }
}

impl fmt::Display for ModuleKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ModuleKey {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "mastery" => Ok(Self::Mastery),
      "revision" => Ok(Self::Revision),
      "adaptive" => Ok(Self::Adaptive),
      "difficulty" => Ok(Self::Difficulty),
      "mistakes" => Ok(Self::Mistakes),
      "search" => Ok(Self::Search),
      "graph" => Ok(Self::Graph),
      "warehouse" => Ok(Self::Warehouse),
      "irt" => Ok(Self::Irt),
      other => Err(Error::UnknownModule(other.to_owned())),
    }
  }
}

/// One generation of a module implementation.
///
/// `V0` is the heuristic generation; `V1` is the probabilistic generation
/// (BKT mastery, FSRS revision, bandit-based adaptive selection).
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum VersionTag {
  V0,
  V1,
}

impl VersionTag {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::V0 => "v0",
      Self::V1 => "v1",
    }
  }
}

impl fmt::Display for VersionTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for VersionTag {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "v0" => Ok(Self::V0),
      "v1" => Ok(Self::V1),
      other => Err(Error::UnknownVersion(other.to_owned())),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn module_key_round_trips_through_str() {
    for key in ModuleKey::ALL {
      assert_eq!(key.as_str().parse::<ModuleKey>().unwrap(), key);
    }
  }

  #[test]
  fn unknown_module_key_is_rejected() {
    assert!(matches!(
      "telemetry".parse::<ModuleKey>(),
      Err(Error::UnknownModule(_))
    ));
  }

  #[test]
  fn version_tag_serde_uses_lowercase() {
    assert_eq!(serde_json::to_string(&VersionTag::V1).unwrap(), "\"v1\"");
  }
}
