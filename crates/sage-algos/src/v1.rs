//! The v1 probabilistic generation.

use chrono::{DateTime, TimeDelta, Utc};
use sage_core::{
  module::{ModuleKey, VersionTag},
  router::{Attempt, ModuleAlgorithm},
  state::UserThemeState,
};

/// Bayesian Knowledge Tracing mastery updates.
pub struct BktMastery {
  /// P(T): probability of learning on each opportunity.
  pub p_learn: f64,
  /// P(S): probability of slipping despite mastery.
  pub p_slip:  f64,
  /// P(G): probability of guessing without mastery.
  pub p_guess: f64,
}

impl Default for BktMastery {
  fn default() -> Self {
    Self { p_learn: 0.2, p_slip: 0.1, p_guess: 0.2 }
  }
}

impl ModuleAlgorithm for BktMastery {
  fn module(&self) -> ModuleKey {
    ModuleKey::Mastery
  }

  fn version(&self) -> VersionTag {
    VersionTag::V1
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

    let prior = state.mastery.bkt_p_mastery.unwrap_or(0.3);

    // Posterior given the observation, then the learning transition.
    let posterior = if attempt.correct {
      let evidence = prior * (1.0 - self.p_slip) + (1.0 - prior) * self.p_guess;
      prior * (1.0 - self.p_slip) / evidence
    } else {
      let evidence = prior * self.p_slip + (1.0 - prior) * (1.0 - self.p_guess);
      prior * self.p_slip / evidence
    };
    let updated = posterior + (1.0 - posterior) * self.p_learn;

    state.mastery.bkt_p_mastery = Some(updated.clamp(0.0, 1.0));
    state.mastery.model = VersionTag::V1;
    Ok(())
  }
}

/// FSRS-style spaced repetition over continuous stability and difficulty.
pub struct FsrsRevision;

impl ModuleAlgorithm for FsrsRevision {
  fn module(&self) -> ModuleKey {
    ModuleKey::Revision
  }

  fn version(&self) -> VersionTag {
    VersionTag::V1
  }

  fn apply(
    &self,
    state: &mut UserThemeState,
    attempt: &Attempt,
    now: DateTime<Utc>,
  ) -> sage_core::Result<()> {
    let stability = state.revision.stability.unwrap_or(1.0);
    let difficulty = state.revision.difficulty.unwrap_or(5.0);

    let (stability, difficulty) = if attempt.correct {
      // Growth scales inversely with difficulty.
      (stability * (1.0 + (11.0 - difficulty) * 0.1), (difficulty - 0.3).max(1.0))
    } else {
      ((stability * 0.3).max(0.5), (difficulty + 0.7).min(10.0))
    };

    state.revision.stability = Some(stability);
    state.revision.difficulty = Some(difficulty);
    // Stability is the interval at 90% recall; schedule the next review
    // a whole number of days out.
    let interval_days = stability.round().max(1.0);
    state.revision.due_at = Some(now + TimeDelta::days(interval_days as i64));
    state.revision.model = VersionTag::V1;
    Ok(())
  }
}

/// Thompson-sampling bandit state: one Beta(α, β) arm per theme.
pub struct BanditAdaptive;

impl ModuleAlgorithm for BanditAdaptive {
  fn module(&self) -> ModuleKey {
    ModuleKey::Adaptive
  }

  fn version(&self) -> VersionTag {
    VersionTag::V1
  }

  fn apply(
    &self,
    state: &mut UserThemeState,
    attempt: &Attempt,
    _now: DateTime<Utc>,
  ) -> sage_core::Result<()> {
    let alpha = state.bandit.alpha.unwrap_or(1.0);
    let beta = state.bandit.beta.unwrap_or(1.0);
    if attempt.correct {
      state.bandit.alpha = Some(alpha + 1.0);
      state.bandit.beta = Some(beta);
    } else {
      state.bandit.alpha = Some(alpha);
      state.bandit.beta = Some(beta + 1.0);
    }
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
    UserThemeState::new(Uuid::new_v4(), Uuid::new_v4(), VersionTag::V1)
  }

  #[test]
  fn bkt_mastery_rises_on_correct_answers() {
    let bkt = BktMastery::default();
    let mut state = fresh();
    state.mastery.bkt_p_mastery = Some(0.3);

    bkt.apply(&mut state, &attempt(true), Utc::now()).unwrap();
    let after = state.mastery.bkt_p_mastery.unwrap();
    assert!(after > 0.3, "mastery should rise, got {after}");
  }

  #[test]
  fn bkt_mastery_falls_on_wrong_answers_before_learning() {
    let bkt = BktMastery { p_learn: 0.0, ..BktMastery::default() };
    let mut state = fresh();
    state.mastery.bkt_p_mastery = Some(0.5);

    bkt.apply(&mut state, &attempt(false), Utc::now()).unwrap();
    assert!(state.mastery.bkt_p_mastery.unwrap() < 0.5);
  }

  #[test]
  fn fsrs_success_grows_stability_and_pushes_due_date() {
    let now = Utc::now();
    let mut state = fresh();
    state.revision.stability = Some(10.0);
    state.revision.difficulty = Some(5.0);

    FsrsRevision.apply(&mut state, &attempt(true), now).unwrap();
    assert!(state.revision.stability.unwrap() > 10.0);
    assert!(state.revision.due_at.unwrap() > now);
  }

  #[test]
  fn fsrs_lapse_collapses_stability() {
    let mut state = fresh();
    state.revision.stability = Some(40.0);

    FsrsRevision.apply(&mut state, &attempt(false), Utc::now()).unwrap();
    assert!(state.revision.stability.unwrap() <= 12.0);
    assert!(state.revision.difficulty.unwrap() > 5.0);
  }

  #[test]
  fn bandit_counts_successes_and_failures() {
    let mut state = fresh();
    BanditAdaptive.apply(&mut state, &attempt(true), Utc::now()).unwrap();
    BanditAdaptive.apply(&mut state, &attempt(false), Utc::now()).unwrap();
    assert_eq!(state.bandit.alpha, Some(2.0));
    assert_eq!(state.bandit.beta, Some(2.0));
  }
}
