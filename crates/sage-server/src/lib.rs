//! Server assembly for Sage.
//!
//! Wires the SQLite store, resolver, governor and algorithm router into a
//! single [`AppState`] and mounts the JSON API under `/api` with request
//! tracing.

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::Router;
use sage_algos::default_registry;
use sage_api::{AppState, api_router};
use sage_core::{
  bridge::BridgeEngine,
  governor::SwitchGovernor,
  resolver::RuntimeResolver,
  router::AlgorithmRouter,
};
use sage_store_sqlite::SqliteStore;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml`.
///
/// Every field has a default so the server runs without a config file;
/// `SAGE_`-prefixed environment variables override file values.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                    String,
  pub port:                    u16,
  pub store_path:              PathBuf,
  /// A `running` bridge row older than this many seconds is treated as
  /// abandoned and becomes claimable again.
  pub bridge_stale_after_secs: u64,
  /// Minimum length for control-plane mutation reasons.
  pub min_reason_len:          usize,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                    "127.0.0.1".to_owned(),
      port:                    8080,
      store_path:              PathBuf::from("sage.db"),
      bridge_stale_after_secs: 600,
      min_reason_len:          10,
    }
  }
}

// ─── Assembly ────────────────────────────────────────────────────────────────

/// Build the shared application state over an opened store.
pub fn app_state(store: SqliteStore, config: &ServerConfig) -> AppState<SqliteStore> {
  let store = Arc::new(store);
  let resolver = Arc::new(RuntimeResolver::new(Arc::clone(&store)));
  let engine =
    BridgeEngine::new(Duration::from_secs(config.bridge_stale_after_secs));
  let router = Arc::new(AlgorithmRouter::new(
    Arc::clone(&store),
    Arc::clone(&resolver),
    default_registry(),
    engine,
  ));

  AppState {
    store,
    resolver,
    governor: Arc::new(SwitchGovernor::new(config.min_reason_len)),
    router,
  }
}

/// The full HTTP application: the JSON API under `/api`, traced.
pub fn app(state: AppState<SqliteStore>) -> Router {
  Router::new()
    .nest("/api", api_router(state))
    .layer(TraceLayer::new_for_http())
}
