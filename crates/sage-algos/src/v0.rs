//! The v0 heuristic generation.

use chrono::{DateTime, TimeDelta, Utc};
use sage_core::{
  module::{ModuleKey, VersionTag},
  router::{Attempt, ModuleAlgorithm},
  state::UserThemeState,
};

/// Review interval per Leitner stage, in days.
const LEITNER_INTERVALS: [u32; 8] = [1, 2, 4, 8, 16, 32, 64, 128];

/// Exponentially-weighted heuristic mastery score.
///
/// Mastery is the attempt-recording module: it also advances the canonical
/// counters, which every other module reads but never writes.
pub struct HeuristicMastery;

impl ModuleAlgorithm for HeuristicMastery {
  fn module(&self) -> ModuleKey {
    ModuleKey::Mastery
  }

  fn version(&self) -> VersionTag {
    VersionTag::V0
  }

  fn apply(
    &self,
    state: &mut UserThemeState,
    attempt: &Attempt,
    _now: DateTime<Utc>,
  ) -> sage_core::Result<()> {
    state.stats.attempts_total += 1;
    if attempt.correct {
      state.stats.correct_total += 1;
    }

    let outcome = if attempt.correct { 1.0 } else { 0.0 };
    state.mastery.v0_score = Some(match state.mastery.v0_score {
      Some(score) => 0.85 * score + 0.15 * outcome,
      None if attempt.correct => 0.6,
      None => 0.2,
    });
    state.mastery.model = VersionTag::V0;
    Ok(())
  }
}

/// Classic Leitner-box scheduling: promote on success, demote on failure.
pub struct LeitnerRevision;

impl ModuleAlgorithm for LeitnerRevision {
  fn module(&self) -> ModuleKey {
    ModuleKey::Revision
  }

  fn version(&self) -> VersionTag {
    VersionTag::V0
  }

  fn apply(
    &self,
    state: &mut UserThemeState,
    attempt: &Attempt,
    now: DateTime<Utc>,
  ) -> sage_core::Result<()> {
    let stage = state.revision.leitner_stage.unwrap_or(0);
    let stage = if attempt.correct {
      (stage + 1).min(7)
    } else {
      stage.saturating_sub(1)
    };

    let interval = LEITNER_INTERVALS[usize::from(stage)];
    state.revision.leitner_stage = Some(stage);
    state.revision.interval_days = Some(interval);
    state.revision.due_at = Some(now + TimeDelta::days(i64::from(interval)));
    state.revision.model = VersionTag::V0;
    Ok(())
  }
}

/// The heuristic adaptive selector keeps no per-theme state beyond the
/// canonical counters; selection is accuracy-greedy at query time.
pub struct AccuracyAdaptive;

impl ModuleAlgorithm for AccuracyAdaptive {
  fn module(&self) -> ModuleKey {
    ModuleKey::Adaptive
  }

  fn version(&self) -> VersionTag {
    VersionTag::V0
  }

  fn apply(
    &self,
    _state: &mut UserThemeState,
    _attempt: &Attempt,
    _now: DateTime<Utc>,
  ) -> sage_core::Result<()> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use uuid::Uuid;

  use super::*;

  fn attempt(correct: bool) -> Attempt {
    Attempt { user_id: Uuid::new_v4(), theme_id: Uuid::new_v4(), correct }
  }

  fn fresh() -> UserThemeState {
    UserThemeState::new(Uuid::new_v4(), Uuid::new_v4(), VersionTag::V0)
  }

  #[test]
  fn mastery_counts_every_attempt() {
    let mut state = fresh();
    HeuristicMastery.apply(&mut state, &attempt(true), Utc::now()).unwrap();
    HeuristicMastery.apply(&mut state, &attempt(false), Utc::now()).unwrap();
    assert_eq!(state.stats.attempts_total, 2);
    assert_eq!(state.stats.correct_total, 1);
  }

  #[test]
  fn mastery_score_moves_toward_outcome() {
    let mut state = fresh();
    state.mastery.v0_score = Some(0.5);
    HeuristicMastery.apply(&mut state, &attempt(true), Utc::now()).unwrap();
    let score = state.mastery.v0_score.unwrap();
    assert!(score > 0.5 && score < 1.0);
  }

  #[test]
  fn leitner_promotes_and_demotes() {
    let now = Utc::now();
    let mut state = fresh();
    state.revision.leitner_stage = Some(3);

    LeitnerRevision.apply(&mut state, &attempt(true), now).unwrap();
    assert_eq!(state.revision.leitner_stage, Some(4));
    assert_eq!(state.revision.interval_days, Some(16));

    LeitnerRevision.apply(&mut state, &attempt(false), now).unwrap();
    assert_eq!(state.revision.leitner_stage, Some(3));
  }

  #[test]
  fn leitner_caps_at_top_stage() {
    let mut state = fresh();
    state.revision.leitner_stage = Some(7);
    LeitnerRevision.apply(&mut state, &attempt(true), Utc::now()).unwrap();
    assert_eq!(state.revision.leitner_stage, Some(7));
  }
}
