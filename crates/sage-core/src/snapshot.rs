//! Resolved runtimes and per-session snapshots.
//!
//! A `ResolvedRuntime` is the single effective decision produced by the
//! resolver: active profile ⊕ module overrides ⊕ flags. A session captures
//! one at creation time and consults it — never the live resolver — for its
//! entire lifetime, so a profile switch can never change scoring mid-attempt.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  flag::FlagState,
  module::{ModuleKey, VersionTag},
  profile::ProfileName,
};

/// Where a resolved runtime came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
  /// Read fresh from the store.
  Live,
  /// Served from the resolver's generation-counter cache.
  Cache,
  /// Pinned by a session snapshot.
  Snapshot,
}

/// The effective runtime decision: which version every module runs, and the
/// flag values in force when it was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRuntime {
  pub profile: ProfileName,
  pub modules: BTreeMap<ModuleKey, VersionTag>,
  pub flags:   FlagState,
  pub source:  ResolutionSource,
}

impl ResolvedRuntime {
  /// The version a module runs under this resolution.
  ///
  /// Every profile is seeded with a complete module map, so a missing key
  /// means the resolution itself is corrupt.
  pub fn version_for(&self, module: ModuleKey) -> Result<VersionTag> {
    self.modules.get(&module).copied().ok_or_else(|| {
      Error::ResolutionStale(format!("module {module} missing from resolved runtime"))
    })
  }
}

/// A session owning a 1:1 runtime snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
  pub session_id: Uuid,
  pub user_id:    Uuid,
  pub created_at: DateTime<Utc>,
}

/// The frozen runtime decision for one session.
///
/// Written exactly once, in the same transaction as the session row; never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRuntimeSnapshot {
  pub session_id: Uuid,
  pub profile:    ProfileName,
  pub modules:    BTreeMap<ModuleKey, VersionTag>,
  pub flags:      FlagState,
  pub created_at: DateTime<Utc>,
}

impl SessionRuntimeSnapshot {
  /// Materialise the frozen decision as a [`ResolvedRuntime`].
  pub fn runtime(&self) -> ResolvedRuntime {
    ResolvedRuntime {
      profile: self.profile,
      modules: self.modules.clone(),
      flags:   self.flags,
      source:  ResolutionSource::Snapshot,
    }
  }
}
