//! JSON REST API for Sage's runtime control plane and learning endpoints.
//!
//! Exposes an axum [`Router`] backed by any [`sage_core::store::RuntimeStore`].
//! Auth, TLS, and transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", sage_api::api_router(state))
//! ```

pub mod admin;
pub mod error;
pub mod learn;
pub mod sessions;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use sage_core::{
  governor::SwitchGovernor,
  resolver::RuntimeResolver,
  router::AlgorithmRouter,
  store::RuntimeStore,
};

pub use error::ApiError;

/// Shared handler state: the store plus the control-plane machinery built
/// over it at startup.
pub struct AppState<S> {
  pub store:    Arc<S>,
  pub resolver: Arc<RuntimeResolver<S>>,
  pub governor: Arc<SwitchGovernor>,
  pub router:   Arc<AlgorithmRouter<S>>,
}

// Manual impl: `#[derive(Clone)]` would demand `S: Clone`.
impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      store:    Arc::clone(&self.store),
      resolver: Arc::clone(&self.resolver),
      governor: Arc::clone(&self.governor),
      router:   Arc::clone(&self.router),
    }
  }
}

/// Build a fully-materialised API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(state: AppState<S>) -> Router<()>
where
  S: RuntimeStore + 'static,
{
  Router::new()
    // Control plane
    .route("/admin/runtime/status", get(admin::status::<S>))
    .route("/admin/runtime/flags", post(admin::set_flag::<S>))
    .route("/admin/runtime/profile", post(admin::switch_profile::<S>))
    .route("/admin/runtime/override", post(admin::set_override::<S>))
    .route("/admin/runtime/override/clear", post(admin::clear_override::<S>))
    .route("/admin/runtime/freeze", post(admin::set_freeze::<S>))
    .route("/admin/runtime/audit", get(admin::audit::<S>))
    .route("/admin/runtime/bridge", post(admin::bridge_batch::<S>))
    .route("/admin/runtime/bridge/requeue", post(admin::requeue_bridge::<S>))
    // Sessions
    .route("/sessions", post(sessions::create::<S>))
    .route("/sessions/{id}/runtime", get(sessions::runtime::<S>))
    // Learning
    .route("/learn/{module}/attempt", post(learn::attempt::<S>))
    .route("/learn/{module}/state", get(learn::state::<S>))
    .with_state(state)
}
