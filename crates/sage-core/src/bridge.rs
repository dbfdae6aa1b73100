//! The state bridge engine — idempotent per-user conversion of canonical
//! aggregates between the v0 and v1 representations.
//!
//! Conversions only ever fill in *missing* target-representation fields;
//! fields that already hold a value are never overwritten, and the canonical
//! counters are never touched. Running the same bridge twice is therefore a
//! no-op, and any sequence of bridges preserves `attempts_total` and
//! `correct_total` exactly.

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::{
  module::{ModuleKey, VersionTag},
  state::UserThemeState,
  store::{BridgeClaim, BridgeKey, BridgeStatus, RuntimeStore},
};

/// Bumped whenever the conversion rules below change; a new policy version
/// gets a fresh bridge row per user rather than reusing an old one.
pub const CURRENT_POLICY_VERSION: u32 = 1;

/// BKT priors seeded from a heuristic score are clamped into this interval
/// so no theme starts certain-mastered or certain-unmastered.
pub const BKT_PRIOR_FLOOR: f64 = 0.1;
pub const BKT_PRIOR_CEIL: f64 = 0.9;

/// The Leitner interval ladder, in days, indexed by stage.
const LEITNER_INTERVALS: [u32; 8] = [1, 2, 4, 8, 16, 32, 64, 128];

/// Pseudo-count cap when warming bandit priors from historical volume.
const BANDIT_PRIOR_WEIGHT_CAP: f64 = 20.0;

// ─── Closed-form conversions ─────────────────────────────────────────────────

/// v1→v0 mastery: prefer the BKT estimate, fall back to empirical accuracy.
pub fn v0_mastery_from_v1(state: &UserThemeState) -> Option<f64> {
  state.mastery.bkt_p_mastery.or_else(|| state.stats.accuracy())
}

/// v0→v1 mastery: clamp the heuristic score (or empirical accuracy) into
/// [`BKT_PRIOR_FLOOR`, `BKT_PRIOR_CEIL`] as the BKT prior.
pub fn bkt_prior_from_v0(state: &UserThemeState) -> Option<f64> {
  state
    .mastery
    .v0_score
    .or_else(|| state.stats.accuracy())
    .map(|score| score.clamp(BKT_PRIOR_FLOOR, BKT_PRIOR_CEIL))
}

/// v1→v0 revision: discretise the continuous due timestamp into a review
/// interval and the matching Leitner stage.
pub fn leitner_from_due(due_at: DateTime<Utc>, now: DateTime<Utc>) -> (u8, u32) {
  let days_until_due = (due_at - now).num_days().max(0);
  let interval = u32::try_from(days_until_due)
    .unwrap_or(u32::MAX)
    .clamp(1, LEITNER_INTERVALS[LEITNER_INTERVALS.len() - 1]);

  let stage = LEITNER_INTERVALS
    .iter()
    .rposition(|&ladder| ladder <= interval)
    .unwrap_or(0);

  // The ladder has 8 rungs, so the index always fits.
  (u8::try_from(stage).unwrap_or(0), interval)
}

/// v0→v1 revision: an FSRS-style stability equal to the discrete interval
/// (stability is the interval at 90% recall).
pub fn stability_from_interval(interval_days: u32) -> f64 {
  f64::from(interval_days).max(0.5)
}

/// v0→v1 revision: map historical accuracy onto the FSRS difficulty scale,
/// where 1 is easiest and 10 hardest.
pub fn difficulty_from_accuracy(accuracy: f64) -> f64 {
  (1.0 + 9.0 * (1.0 - accuracy)).clamp(1.0, 10.0)
}

/// v0→v1 bandit: Beta(α, β) priors seeded from the mastery estimate and
/// historical volume, so warm themes do not start from a flat prior.
pub fn bandit_priors(mastery: f64, attempts: u32) -> (f64, f64) {
  let weight = f64::from(attempts).min(BANDIT_PRIOR_WEIGHT_CAP);
  let alpha = 1.0 + mastery * weight;
  let beta = 1.0 + (1.0 - mastery) * weight;
  (alpha, beta)
}

// ─── Per-theme conversion ────────────────────────────────────────────────────

/// Per-field counts recorded in the bridge row's `details` column.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BridgeReport {
  pub themes_seen:     u32,
  pub mastery_seeded:  u32,
  pub revision_seeded: u32,
  pub bandit_seeded:   u32,
  pub retagged:        u32,
}

/// Fill the missing target-representation fields of one aggregate.
///
/// Returns `true` if the row changed and must be persisted.
pub fn convert_theme(
  state: &mut UserThemeState,
  target: &BTreeMap<ModuleKey, VersionTag>,
  now: DateTime<Utc>,
  report: &mut BridgeReport,
) -> bool {
  let mut changed = false;

  if let Some(&version) = target.get(&ModuleKey::Mastery) {
    match version {
      VersionTag::V0 => {
        if state.mastery.v0_score.is_none()
          && let Some(score) = v0_mastery_from_v1(state)
        {
          state.mastery.v0_score = Some(score);
          report.mastery_seeded += 1;
          changed = true;
        }
      }
      VersionTag::V1 => {
        if state.mastery.bkt_p_mastery.is_none()
          && let Some(prior) = bkt_prior_from_v0(state)
        {
          state.mastery.bkt_p_mastery = Some(prior);
          state.mastery.bkt_prior_seen = Some(state.stats.attempts_total);
          report.mastery_seeded += 1;
          changed = true;
        }
      }
    }
    if state.mastery.model != version {
      state.mastery.model = version;
      report.retagged += 1;
      changed = true;
    }
  }

  if let Some(&version) = target.get(&ModuleKey::Revision) {
    match version {
      VersionTag::V0 => {
        if state.revision.leitner_stage.is_none()
          && let Some(due_at) = state.revision.due_at
        {
          let (stage, interval) = leitner_from_due(due_at, now);
          state.revision.leitner_stage = Some(stage);
          state.revision.interval_days = Some(interval);
          report.revision_seeded += 1;
          changed = true;
        }
      }
      VersionTag::V1 => {
        let mut seeded = false;
        if state.revision.stability.is_none()
          && let Some(interval) = state.revision.interval_days
        {
          state.revision.stability = Some(stability_from_interval(interval));
          seeded = true;
        }
        if state.revision.difficulty.is_none()
          && let Some(accuracy) = state.stats.accuracy()
        {
          state.revision.difficulty = Some(difficulty_from_accuracy(accuracy));
          seeded = true;
        }
        if seeded {
          report.revision_seeded += 1;
          changed = true;
        }
      }
    }
    if state.revision.model != version {
      state.revision.model = version;
      report.retagged += 1;
      changed = true;
    }
  }

  if target.get(&ModuleKey::Adaptive) == Some(&VersionTag::V1)
    && state.bandit.alpha.is_none()
  {
    let mastery_estimate = state
      .mastery
      .bkt_p_mastery
      .or(state.mastery.v0_score)
      .or_else(|| state.stats.accuracy());
    if let Some(mastery) = mastery_estimate {
      let (alpha, beta) = bandit_priors(mastery, state.stats.attempts_total);
      state.bandit.alpha = Some(alpha);
      state.bandit.beta = Some(beta);
      report.bandit_seeded += 1;
      changed = true;
    }
  }

  if changed {
    state.updated_at = now;
  }
  changed
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// What `ensure_bridged` did for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutcome {
  /// This caller performed the conversion.
  Converted,
  /// A terminal `done` row already existed.
  AlreadyDone,
  /// Another worker holds the claim; the caller proceeds un-bridged.
  InProgress,
  /// `from == to`; nothing to bridge.
  Skipped,
  /// Conversion raised; recorded on the row, not surfaced to end users.
  Failed(String),
}

/// Drives idempotent, claim-serialised state bridging over any store.
#[derive(Debug, Clone)]
pub struct BridgeEngine {
  /// A `running` row older than this is treated as abandoned by a crashed
  /// worker and becomes claimable again.
  pub stale_after: Duration,
}

impl Default for BridgeEngine {
  fn default() -> Self {
    Self { stale_after: Duration::from_secs(600) }
  }
}

impl BridgeEngine {
  pub fn new(stale_after: Duration) -> Self {
    Self { stale_after }
  }

  /// Ensure `key.user_id`'s aggregates carry the representation required by
  /// `target` (the destination profile's module map).
  ///
  /// Safe under concurrent invocation: the store-level claim serialises
  /// writers for the same key, and losers return immediately without
  /// blocking. Errors after a claim mark the row `failed` and are reported
  /// in the outcome, never re-raised past the store boundary.
  pub async fn ensure_bridged<S: RuntimeStore>(
    &self,
    store: &S,
    key: BridgeKey,
    target: &BTreeMap<ModuleKey, VersionTag>,
  ) -> Result<BridgeOutcome, S::Error> {
    if key.from_profile == key.to_profile {
      return Ok(BridgeOutcome::Skipped);
    }

    match store.claim_bridge(key, self.stale_after).await? {
      BridgeClaim::AlreadyDone => return Ok(BridgeOutcome::AlreadyDone),
      BridgeClaim::InProgress => return Ok(BridgeOutcome::InProgress),
      BridgeClaim::Claimed => {}
    }

    let states = match store.theme_states(key.user_id).await {
      Ok(states) => states,
      Err(error) => {
        let detail = error.to_string();
        tracing::warn!(user_id = %key.user_id, error = %detail, "bridge load failed");
        // Best-effort: the row stays claimable via the staleness timeout
        // even if this mark also fails.
        let _ = store
          .finish_bridge(key, BridgeStatus::Failed, json!({ "error": detail }))
          .await;
        return Ok(BridgeOutcome::Failed(detail));
      }
    };

    let now = Utc::now();
    let mut report = BridgeReport::default();
    let mut converted = Vec::new();

    for mut state in states {
      report.themes_seen += 1;
      if convert_theme(&mut state, target, now, &mut report) {
        converted.push(state);
      }
    }

    let details = serde_json::to_value(report).unwrap_or_else(|_| json!({}));

    match store.complete_bridge(key, converted, details).await {
      Ok(()) => {
        tracing::info!(
          user_id = %key.user_id,
          from = %key.from_profile,
          to = %key.to_profile,
          mastery = report.mastery_seeded,
          revision = report.revision_seeded,
          bandit = report.bandit_seeded,
          "state bridge completed"
        );
        Ok(BridgeOutcome::Converted)
      }
      Err(error) => {
        let detail = error.to_string();
        tracing::warn!(user_id = %key.user_id, error = %detail, "bridge commit failed");
        let _ = store
          .finish_bridge(key, BridgeStatus::Failed, json!({ "error": detail }))
          .await;
        Ok(BridgeOutcome::Failed(detail))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeDelta;
  use uuid::Uuid;

  use super::*;
  use crate::{profile::RuntimeProfile, state::UserThemeState};

  fn v0_state(attempts: u32, correct: u32, score: Option<f64>) -> UserThemeState {
    let mut state =
      UserThemeState::new(Uuid::new_v4(), Uuid::new_v4(), VersionTag::V0);
    state.stats.attempts_total = attempts;
    state.stats.correct_total = correct;
    state.mastery.v0_score = score;
    state.revision.leitner_stage = Some(3);
    state.revision.interval_days = Some(8);
    state
  }

  fn v1_target() -> BTreeMap<ModuleKey, VersionTag> {
    ModuleKey::ALL.iter().map(|&m| (m, VersionTag::V1)).collect()
  }

  fn v0_target() -> BTreeMap<ModuleKey, VersionTag> {
    ModuleKey::ALL.iter().map(|&m| (m, VersionTag::V0)).collect()
  }

  #[test]
  fn bkt_prior_is_clamped() {
    let low = v0_state(10, 0, Some(0.0));
    let high = v0_state(10, 10, Some(1.0));
    assert_eq!(bkt_prior_from_v0(&low), Some(BKT_PRIOR_FLOOR));
    assert_eq!(bkt_prior_from_v0(&high), Some(BKT_PRIOR_CEIL));
  }

  #[test]
  fn bkt_prior_falls_back_to_accuracy() {
    let state = v0_state(10, 6, None);
    let prior = bkt_prior_from_v0(&state).unwrap();
    assert!((prior - 0.6).abs() < 1e-9);
  }

  #[test]
  fn v0_mastery_falls_back_to_accuracy_when_bkt_absent() {
    let mut state = v0_state(8, 2, None);
    state.mastery.bkt_p_mastery = None;
    let score = v0_mastery_from_v1(&state).unwrap();
    assert!((score - 0.25).abs() < 1e-9);
  }

  #[test]
  fn leitner_stage_follows_interval_ladder() {
    let now = Utc::now();
    assert_eq!(leitner_from_due(now, now), (0, 1));
    assert_eq!(leitner_from_due(now + TimeDelta::days(4), now), (2, 4));
    // Intervals between rungs round down to the lower stage.
    assert_eq!(leitner_from_due(now + TimeDelta::days(6), now), (2, 6));
    // Far-future due dates cap at the top stage.
    assert_eq!(leitner_from_due(now + TimeDelta::days(4000), now), (7, 128));
  }

  #[test]
  fn difficulty_scale_is_bounded() {
    assert!((difficulty_from_accuracy(1.0) - 1.0).abs() < 1e-9);
    assert!((difficulty_from_accuracy(0.0) - 10.0).abs() < 1e-9);
  }

  #[test]
  fn bandit_priors_warm_with_volume() {
    let (alpha, beta) = bandit_priors(0.75, 100);
    // Weight caps at 20 pseudo-counts.
    assert!((alpha - 16.0).abs() < 1e-9);
    assert!((beta - 6.0).abs() < 1e-9);

    let (cold_alpha, cold_beta) = bandit_priors(0.75, 0);
    assert!((cold_alpha - 1.0).abs() < 1e-9);
    assert!((cold_beta - 1.0).abs() < 1e-9);
  }

  #[test]
  fn convert_fills_only_missing_fields() {
    let mut state = v0_state(10, 6, Some(0.85));
    state.mastery.bkt_p_mastery = Some(0.42); // already seeded — must survive

    let mut report = BridgeReport::default();
    convert_theme(&mut state, &v1_target(), Utc::now(), &mut report);

    assert_eq!(state.mastery.bkt_p_mastery, Some(0.42));
    assert_eq!(report.mastery_seeded, 0);
    // Revision fields were missing and get seeded.
    assert_eq!(state.revision.stability, Some(8.0));
    assert_eq!(report.revision_seeded, 1);
  }

  #[test]
  fn convert_twice_is_idempotent() {
    let mut state = v0_state(12, 9, Some(0.7));
    let target = v1_target();
    let now = Utc::now();

    let mut first = BridgeReport::default();
    assert!(convert_theme(&mut state, &target, now, &mut first));

    let mut second = BridgeReport::default();
    assert!(!convert_theme(&mut state, &target, now, &mut second));
    assert_eq!(second.mastery_seeded, 0);
    assert_eq!(second.revision_seeded, 0);
    assert_eq!(second.bandit_seeded, 0);
    assert_eq!(second.retagged, 0);
  }

  #[test]
  fn round_trip_preserves_canonical_counters() {
    let mut state = v0_state(37, 21, Some(0.66));
    let now = Utc::now();
    let mut report = BridgeReport::default();

    convert_theme(&mut state, &v1_target(), now, &mut report);
    convert_theme(&mut state, &v0_target(), now, &mut report);
    convert_theme(&mut state, &v1_target(), now, &mut report);

    assert_eq!(state.stats.attempts_total, 37);
    assert_eq!(state.stats.correct_total, 21);
  }

  #[test]
  fn default_profiles_drive_full_conversion() {
    // A v0 user bridged into the seeded primary profile gets every v1
    // representation filled.
    let primary = RuntimeProfile::default_set()
      .into_iter()
      .find(|p| p.is_active)
      .unwrap();

    let mut state = v0_state(20, 15, Some(0.75));
    let mut report = BridgeReport::default();
    convert_theme(&mut state, &primary.config, Utc::now(), &mut report);

    assert!(state.mastery.bkt_p_mastery.is_some());
    assert!(state.revision.stability.is_some());
    assert!(state.revision.difficulty.is_some());
    assert!(state.bandit.alpha.is_some());
    assert_eq!(state.mastery.model, VersionTag::V1);
  }
}
