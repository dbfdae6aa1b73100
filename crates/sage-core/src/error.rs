//! Error types for `sage-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The supplied confirmation phrase does not match the expected literal
  /// for this action/value pair. The expected phrase is never echoed back.
  #[error("confirmation phrase does not match for action {action:?}")]
  ConfirmationMismatch { action: String },

  #[error("a reason of at least {min} characters is required")]
  ReasonRequired { min: usize },

  /// The control plane is frozen; all governed mutation is blocked.
  #[error("control plane is frozen: {reason}")]
  AdminFrozen { reason: String },

  #[error("runtime profile not found: {0:?}")]
  ProfileNotFound(String),

  /// A bridge conversion raised. Never surfaced to end users; the request
  /// proceeds against whatever state exists.
  #[error("state bridge failed: {0}")]
  BridgeFailed(String),

  /// Defensive: a resolved runtime was internally inconsistent. Treated as
  /// a cache bug if ever observed.
  #[error("stale runtime resolution: {0}")]
  ResolutionStale(String),

  #[error("unknown module key: {0:?}")]
  UnknownModule(String),

  #[error("unknown version tag: {0:?}")]
  UnknownVersion(String),

  #[error("unknown flag key: {0:?}")]
  UnknownFlag(String),

  #[error("unknown profile name: {0:?}")]
  UnknownProfile(String),

  #[error("unknown audit action: {0:?}")]
  UnknownAuditAction(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
