//! The algorithm router — version-resolved dispatch to module
//! implementations.
//!
//! The router holds no algorithmic logic. It resolves the effective version
//! for a module (session snapshot first, live resolver otherwise), enforces
//! the kill switches, runs the lazy state bridge best-effort, and hands the
//! aggregate to the implementation registered for (module, version).

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::{
  bridge::{BridgeEngine, BridgeOutcome, CURRENT_POLICY_VERSION},
  module::{ModuleKey, VersionTag},
  resolver::RuntimeResolver,
  snapshot::ResolvedRuntime,
  state::UserThemeState,
  store::{BridgeKey, RuntimeStore},
};

// ─── Module implementations ──────────────────────────────────────────────────

/// One learning attempt to apply to a user's aggregate.
#[derive(Debug, Clone, Copy)]
pub struct Attempt {
  pub user_id:  Uuid,
  pub theme_id: Uuid,
  pub correct:  bool,
}

/// A pluggable module implementation, registered under exactly one
/// (module, version) pair.
///
/// Implementations are pure state transforms; the router owns persistence.
pub trait ModuleAlgorithm: Send + Sync {
  fn module(&self) -> ModuleKey;
  fn version(&self) -> VersionTag;

  /// Apply one attempt to the aggregate in place.
  fn apply(
    &self,
    state: &mut UserThemeState,
    attempt: &Attempt,
    now: DateTime<Utc>,
  ) -> crate::Result<()>;
}

/// Static registry mapping (module, version) to an implementation.
///
/// Keys are closed enums, so this is a fixed table built at startup — no
/// reflection, no string-based dispatch.
#[derive(Default)]
pub struct AlgorithmRegistry {
  entries: HashMap<(ModuleKey, VersionTag), Arc<dyn ModuleAlgorithm>>,
}

impl AlgorithmRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `algo` under its own (module, version) pair, replacing any
  /// previous registration.
  pub fn register(&mut self, algo: Arc<dyn ModuleAlgorithm>) -> &mut Self {
    self.entries.insert((algo.module(), algo.version()), algo);
    self
  }

  pub fn get(
    &self,
    module: ModuleKey,
    version: VersionTag,
  ) -> Option<&Arc<dyn ModuleAlgorithm>> {
    self.entries.get(&(module, version))
  }
}

// ─── Dispatch results ────────────────────────────────────────────────────────

/// The end-user-visible result of one routed attempt.
#[derive(Debug, Clone)]
pub struct DispatchResult {
  /// The version that served the request.
  pub version: VersionTag,
  /// `true` if a kill switch suppressed the learning-state mutation and the
  /// last persisted aggregate was returned verbatim.
  pub frozen:  bool,
  /// Whether the lazy bridge ran, and how it went.
  pub bridge:  Option<BridgeOutcome>,
  pub state:   UserThemeState,
}

/// Errors produced by the router. Learning endpoints map every variant to a
/// degraded response rather than exposing control-plane kinds.
#[derive(Debug, Error)]
pub enum DispatchError<E> {
  #[error("store error: {0}")]
  Store(#[source] E),

  #[error("no implementation registered for {module}/{version}")]
  Unregistered { module: ModuleKey, version: VersionTag },

  #[error(transparent)]
  Core(#[from] crate::Error),
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Routes learning requests to the implementation chosen by the effective
/// runtime.
pub struct AlgorithmRouter<S> {
  store:    Arc<S>,
  resolver: Arc<RuntimeResolver<S>>,
  registry: AlgorithmRegistry,
  engine:   BridgeEngine,
}

impl<S: RuntimeStore> AlgorithmRouter<S> {
  pub fn new(
    store: Arc<S>,
    resolver: Arc<RuntimeResolver<S>>,
    registry: AlgorithmRegistry,
    engine: BridgeEngine,
  ) -> Self {
    Self { store, resolver, registry, engine }
  }

  pub fn bridge_engine(&self) -> &BridgeEngine {
    &self.engine
  }

  /// The runtime governing this request: the session's frozen snapshot when
  /// a session is given, the live resolver otherwise.
  ///
  /// A session id without a persisted snapshot falls back to the live
  /// resolver — degraded, logged, never a hard failure.
  pub async fn effective_runtime(
    &self,
    session_id: Option<Uuid>,
  ) -> Result<ResolvedRuntime, DispatchError<S::Error>> {
    if let Some(session_id) = session_id {
      match self.store.get_snapshot(session_id).await {
        Ok(Some(snapshot)) => return Ok(snapshot.runtime()),
        Ok(None) => {
          tracing::warn!(%session_id, "session has no runtime snapshot; using live resolver");
        }
        Err(error) => {
          tracing::warn!(%session_id, %error, "snapshot read failed; using live resolver");
        }
      }
    }
    self.resolver.resolve(true).await.map_err(DispatchError::Store)
  }

  /// Route one attempt through the resolved module implementation.
  pub async fn dispatch_attempt(
    &self,
    module: ModuleKey,
    attempt: Attempt,
    session_id: Option<Uuid>,
  ) -> Result<DispatchResult, DispatchError<S::Error>> {
    let runtime = self.effective_runtime(session_id).await?;
    let version = runtime.version_for(module)?;

    // Kill switches: FREEZE_UPDATES stops all learning-state mutation;
    // EXAM_MODE additionally suspends the modules that would reshuffle an
    // exam in progress. Reads still serve last-known-good.
    let frozen = runtime.flags.freeze_updates
      || (runtime.flags.exam_mode
        && matches!(module, ModuleKey::Adaptive | ModuleKey::Revision));

    if frozen {
      let state = self
        .load_or_init(attempt.user_id, attempt.theme_id, version)
        .await?;
      return Ok(DispatchResult { version, frozen: true, bridge: None, state });
    }

    let bridge = self.bridge_best_effort(attempt.user_id, &runtime).await;

    let algo = self
      .registry
      .get(module, version)
      .ok_or(DispatchError::Unregistered { module, version })?;

    let mut state = self
      .load_or_init(attempt.user_id, attempt.theme_id, version)
      .await?;
    algo.apply(&mut state, &attempt, Utc::now())?;
    state.updated_at = Utc::now();

    self
      .store
      .upsert_theme_state(state.clone())
      .await
      .map_err(DispatchError::Store)?;

    Ok(DispatchResult { version, frozen: false, bridge, state })
  }

  /// Read-only state fetch; works unchanged under freeze.
  pub async fn read_state(
    &self,
    user_id: Uuid,
  ) -> Result<Vec<UserThemeState>, DispatchError<S::Error>> {
    self.store.theme_states(user_id).await.map_err(DispatchError::Store)
  }

  /// Run `ensure_bridged` for an explicit user against the current live
  /// runtime — the operator-triggered batch entry point. Reuses the same
  /// idempotent function as the lazy path.
  pub async fn bridge_user(
    &self,
    user_id: Uuid,
  ) -> Result<Option<BridgeOutcome>, DispatchError<S::Error>> {
    let runtime = self.resolver.resolve(true).await.map_err(DispatchError::Store)?;
    let Some(from_profile) = self
      .store
      .previous_active_profile()
      .await
      .map_err(DispatchError::Store)?
    else {
      return Ok(None);
    };

    let key = BridgeKey {
      user_id,
      from_profile,
      to_profile: runtime.profile,
      policy_version: CURRENT_POLICY_VERSION,
    };
    let outcome = self
      .engine
      .ensure_bridged(self.store.as_ref(), key, &runtime.modules)
      .await
      .map_err(DispatchError::Store)?;
    Ok(Some(outcome))
  }

  /// Lazy bridge on the request path: never blocks the request on failure.
  async fn bridge_best_effort(
    &self,
    user_id: Uuid,
    runtime: &ResolvedRuntime,
  ) -> Option<BridgeOutcome> {
    let from_profile = match self.store.previous_active_profile().await {
      Ok(Some(name)) => name,
      // No switch has ever happened; there is nothing to bridge from.
      Ok(None) => return None,
      Err(error) => {
        tracing::warn!(%user_id, %error, "previous-profile lookup failed; skipping bridge");
        return None;
      }
    };

    let key = BridgeKey {
      user_id,
      from_profile,
      to_profile: runtime.profile,
      policy_version: CURRENT_POLICY_VERSION,
    };

    match self
      .engine
      .ensure_bridged(self.store.as_ref(), key, &runtime.modules)
      .await
    {
      Ok(outcome) => Some(outcome),
      Err(error) => {
        tracing::warn!(%user_id, %error, "lazy bridge errored; request proceeds un-bridged");
        None
      }
    }
  }

  async fn load_or_init(
    &self,
    user_id: Uuid,
    theme_id: Uuid,
    version: VersionTag,
  ) -> Result<UserThemeState, DispatchError<S::Error>> {
    Ok(
      self
        .store
        .get_theme_state(user_id, theme_id)
        .await
        .map_err(DispatchError::Store)?
        .unwrap_or_else(|| UserThemeState::new(user_id, theme_id, version)),
    )
  }
}
