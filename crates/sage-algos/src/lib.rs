//! Reference module implementations for the Sage algorithm router.
//!
//! These are the collaborators the router dispatches to by (module, version)
//! tag: the v0 heuristic generation and the v1 probabilistic generation
//! (BKT mastery, FSRS-style revision, Thompson-sampling bandit priors).
//! The router owns resolution, kill switches, bridging and persistence;
//! everything here is a pure transform of one aggregate.

mod v0;
mod v1;

use std::sync::Arc;

use sage_core::router::AlgorithmRegistry;

pub use v0::{AccuracyAdaptive, HeuristicMastery, LeitnerRevision};
pub use v1::{BanditAdaptive, BktMastery, FsrsRevision};

/// The full registry of shipped implementations.
pub fn default_registry() -> AlgorithmRegistry {
  let mut registry = AlgorithmRegistry::new();
  registry
    .register(Arc::new(HeuristicMastery))
    .register(Arc::new(LeitnerRevision))
    .register(Arc::new(AccuracyAdaptive))
    .register(Arc::new(BktMastery::default()))
    .register(Arc::new(FsrsRevision))
    .register(Arc::new(BanditAdaptive));
  registry
}
