//! The runtime resolver — one effective decision out of profile, overrides
//! and flags, behind an explicitly invalidated cache.
//!
//! The cache is keyed by a monotonic generation counter. Every successful
//! governed mutation must call [`RuntimeResolver::invalidate`] before its
//! response is returned, so the very next resolved request observes the new
//! state. The generation is sampled *before* the store reads when filling
//! the cache; a racing invalidation therefore always wins.

use std::sync::{
  Arc, Mutex,
  atomic::{AtomicU64, Ordering},
};

use crate::{
  flag::FlagState,
  snapshot::{ResolutionSource, ResolvedRuntime},
  store::RuntimeStore,
};

/// One cached resolution tagged with the generation it was built at.
#[derive(Debug, Clone)]
struct CacheEntry {
  generation: u64,
  runtime:    ResolvedRuntime,
}

/// Combines the flag store, active profile and module overrides into one
/// effective decision, with an in-process cache.
pub struct RuntimeResolver<S> {
  store:      Arc<S>,
  generation: AtomicU64,
  cache:      Mutex<Option<CacheEntry>>,
}

impl<S: RuntimeStore> RuntimeResolver<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      generation: AtomicU64::new(0),
      cache: Mutex::new(None),
    }
  }

  /// Bump the generation so the next `resolve(true)` re-reads the store.
  ///
  /// Called synchronously after every successful governed mutation, after
  /// its transaction commits and before the admin response is returned.
  pub fn invalidate(&self) {
    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    tracing::debug!(generation, "runtime cache invalidated");
  }

  /// The current cache generation; exposed for diagnostics.
  pub fn generation(&self) -> u64 {
    self.generation.load(Ordering::SeqCst)
  }

  /// Resolve the effective runtime.
  ///
  /// `use_cache = false` forces a fresh read; diagnostics endpoints use it
  /// to detect cache skew.
  pub async fn resolve(&self, use_cache: bool) -> Result<ResolvedRuntime, S::Error> {
    let generation = self.generation.load(Ordering::SeqCst);

    if use_cache
      && let Some(entry) = self.cached_entry()
      && entry.generation == generation
    {
      let mut runtime = entry.runtime;
      runtime.source = ResolutionSource::Cache;
      return Ok(runtime);
    }

    let runtime = self.resolve_fresh().await?;

    // Only publish the entry if no invalidation raced the store reads.
    if self.generation.load(Ordering::SeqCst) == generation
      && let Ok(mut cache) = self.cache.lock()
    {
      *cache = Some(CacheEntry { generation, runtime: runtime.clone() });
    }

    Ok(runtime)
  }

  fn cached_entry(&self) -> Option<CacheEntry> {
    self.cache.lock().ok().and_then(|cache| cache.clone())
  }

  /// Uncached resolution: active profile config, overwritten by enabled
  /// overrides, plus both flags.
  async fn resolve_fresh(&self) -> Result<ResolvedRuntime, S::Error> {
    let profile = self.store.active_profile().await?;
    let overrides = self.store.list_overrides().await?;
    let flags = self.store.flags().await?;

    let mut modules = profile.config.clone();
    for pin in overrides.iter().filter(|o| o.is_enabled) {
      modules.insert(pin.module, pin.version);
    }

    Ok(ResolvedRuntime {
      profile: profile.name,
      modules,
      flags: FlagState::from_flags(&flags),
      source: ResolutionSource::Live,
    })
  }
}
