//! Error type for `sage-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] sage_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown bridge status: {0:?}")]
  InvalidStatus(String),

  #[error("runtime profile not found: {0:?}")]
  ProfileNotFound(String),

  /// A flag row expected to be seeded at bootstrap was missing.
  #[error("flag row not seeded: {0}")]
  FlagNotSeeded(String),

  /// The single-active-profile invariant was violated on read.
  #[error("no active runtime profile")]
  NoActiveProfile,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
