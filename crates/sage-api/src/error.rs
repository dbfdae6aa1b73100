//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Governor rejections map onto distinct status codes so operators can tell
//! a wrong phrase (403) from a thin reason (422) from a frozen control
//! plane (423) without parsing bodies.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  /// Confirmation phrase did not match the governed action.
  #[error("confirmation rejected: {0}")]
  Forbidden(String),

  /// Reason policy violation.
  #[error("unprocessable: {0}")]
  Unprocessable(String),

  /// The control plane is administratively frozen.
  #[error("control plane frozen: {0}")]
  Locked(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  /// Wrap a backend error without leaking its concrete type.
  pub fn store<E>(error: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(error))
  }

  /// Map a core control-plane error onto its HTTP shape.
  pub fn from_core(error: sage_core::Error) -> Self {
    use sage_core::Error as E;
    match error {
      E::ConfirmationMismatch { action } => {
        Self::Forbidden(format!("confirmation phrase does not match for {action}"))
      }
      E::ReasonRequired { min } => {
        Self::Unprocessable(format!("a reason of at least {min} characters is required"))
      }
      E::AdminFrozen { reason } => Self::Locked(reason),
      E::ProfileNotFound(name) | E::UnknownProfile(name) => {
        Self::NotFound(format!("runtime profile {name:?} not found"))
      }
      E::UnknownModule(name) => Self::NotFound(format!("unknown module {name:?}")),
      E::UnknownVersion(name) => Self::NotFound(format!("unknown version {name:?}")),
      other => Self::Store(Box::new(other)),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
      ApiError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
      ApiError::Locked(m) => (StatusCode::LOCKED, m.clone()),
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
