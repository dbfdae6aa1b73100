//! Canonical per-user learning aggregates.
//!
//! One row per (user, theme). The canonical counters (`attempts_total`,
//! `correct_total`) are version-agnostic and never deleted. The v0 and v1
//! representation fields coexist on the same row so a profile switch never
//! discards history; the `*_model` tags record which representation is
//! authoritative right now.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::module::VersionTag;

/// Version-agnostic attempt counters — the source of truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeStats {
  pub attempts_total: u32,
  pub correct_total:  u32,
}

impl ThemeStats {
  /// Empirical accuracy, or `None` before the first attempt.
  pub fn accuracy(&self) -> Option<f64> {
    (self.attempts_total > 0)
      .then(|| f64::from(self.correct_total) / f64::from(self.attempts_total))
  }
}

/// Mastery fields for both generations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MasteryState {
  /// Which representation is authoritative right now.
  pub model:          VersionTag,
  /// v0 heuristic mastery score in [0, 1].
  pub v0_score:       Option<f64>,
  /// v1 BKT probability of mastery.
  pub bkt_p_mastery:  Option<f64>,
  /// Attempt count at the moment the BKT prior was seeded.
  pub bkt_prior_seen: Option<u32>,
}

/// Revision-scheduling fields for both generations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RevisionState {
  pub model:         VersionTag,
  /// v0 Leitner box, 0..=7.
  pub leitner_stage: Option<u8>,
  /// v0 discrete review interval.
  pub interval_days: Option<u32>,
  /// v1 FSRS memory stability in days.
  pub stability:     Option<f64>,
  /// v1 FSRS difficulty in [1, 10].
  pub difficulty:    Option<f64>,
  /// Next review due time; continuous under v1, derived from the interval
  /// under v0.
  pub due_at:        Option<DateTime<Utc>>,
}

/// Beta-distribution priors for the v1 bandit selector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BanditState {
  pub alpha: Option<f64>,
  pub beta:  Option<f64>,
}

/// The full canonical aggregate for one (user, theme) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserThemeState {
  pub user_id:    Uuid,
  pub theme_id:   Uuid,
  pub stats:      ThemeStats,
  pub mastery:    MasteryState,
  pub revision:   RevisionState,
  pub bandit:     BanditState,
  pub updated_at: DateTime<Utc>,
}

impl UserThemeState {
  /// A fresh aggregate created on a user's first attempt at a theme.
  pub fn new(user_id: Uuid, theme_id: Uuid, model: VersionTag) -> Self {
    Self {
      user_id,
      theme_id,
      stats: ThemeStats::default(),
      mastery: MasteryState {
        model,
        v0_score: None,
        bkt_p_mastery: None,
        bkt_prior_seen: None,
      },
      revision: RevisionState {
        model,
        leitner_stage: None,
        interval_days: None,
        stability: None,
        difficulty: None,
        due_at: None,
      },
      bandit: BanditState { alpha: None, beta: None },
      updated_at: Utc::now(),
    }
  }
}
