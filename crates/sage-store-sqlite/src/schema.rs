//! SQL schema for the Sage SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- One row per kill switch; update is the only mutation, always audited.
CREATE TABLE IF NOT EXISTS system_flags (
    key         TEXT PRIMARY KEY,    -- 'EXAM_MODE' | 'FREEZE_UPDATES'
    value       INTEGER NOT NULL DEFAULT 0,
    reason      TEXT,
    updated_by  TEXT,
    updated_at  TEXT NOT NULL
);

-- Exactly one row has is_active = 1 at all times.
CREATE TABLE IF NOT EXISTS runtime_profiles (
    name         TEXT PRIMARY KEY,   -- 'primary' | 'fallback' | 'shadow'
    is_active    INTEGER NOT NULL DEFAULT 0,
    config_json  TEXT NOT NULL,      -- module -> version map
    activated_at TEXT,               -- last time this profile became active
    updated_at   TEXT NOT NULL
);

-- At most one pin per module; presence supersedes the active profile.
CREATE TABLE IF NOT EXISTS module_overrides (
    module_key  TEXT PRIMARY KEY,
    version_key TEXT NOT NULL,
    is_enabled  INTEGER NOT NULL DEFAULT 1,
    reason      TEXT NOT NULL,
    updated_by  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

-- Strictly append-only. No UPDATE or DELETE is ever issued.
CREATE TABLE IF NOT EXISTS switch_audit_log (
    audit_id    TEXT PRIMARY KEY,
    actor       TEXT NOT NULL,
    action_type TEXT NOT NULL,
    before_json TEXT NOT NULL,
    after_json  TEXT NOT NULL,
    reason      TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

-- Singleton: a row present means the control plane is frozen.
CREATE TABLE IF NOT EXISTS admin_freeze (
    id        INTEGER PRIMARY KEY CHECK (id = 1),
    reason    TEXT NOT NULL,
    frozen_by TEXT NOT NULL,
    frozen_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Written once, in the same transaction as the session row; never mutated.
CREATE TABLE IF NOT EXISTS session_runtime_snapshots (
    session_id   TEXT PRIMARY KEY
                 REFERENCES sessions(session_id) ON DELETE CASCADE,
    profile_name TEXT NOT NULL,
    modules_json TEXT NOT NULL,
    flags_json   TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

-- One job per (user, from, to, policy); status transitions in place.
CREATE TABLE IF NOT EXISTS algo_state_bridges (
    user_id        TEXT NOT NULL,
    from_profile   TEXT NOT NULL,
    to_profile     TEXT NOT NULL,
    policy_version INTEGER NOT NULL,
    status         TEXT NOT NULL DEFAULT 'queued',
    started_at     TEXT,
    finished_at    TEXT,
    details_json   TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (user_id, from_profile, to_profile, policy_version)
);

-- Canonical per-(user, theme) aggregate. Counters are version-agnostic;
-- v0 and v1 representation fields coexist so a switch never loses history.
CREATE TABLE IF NOT EXISTS user_theme_state (
    user_id          TEXT NOT NULL,
    theme_id         TEXT NOT NULL,
    attempts_total   INTEGER NOT NULL DEFAULT 0,
    correct_total    INTEGER NOT NULL DEFAULT 0,
    mastery_model    TEXT NOT NULL DEFAULT 'v0',
    revision_model   TEXT NOT NULL DEFAULT 'v0',
    v0_mastery_score REAL,
    v0_leitner_stage INTEGER,
    v0_interval_days INTEGER,
    bkt_p_mastery    REAL,
    bkt_prior_seen   INTEGER,
    fsrs_stability   REAL,
    fsrs_difficulty  REAL,
    due_at           TEXT,
    bandit_alpha     REAL,
    bandit_beta      REAL,
    updated_at       TEXT NOT NULL,
    PRIMARY KEY (user_id, theme_id)
);

CREATE INDEX IF NOT EXISTS audit_created_idx   ON switch_audit_log(created_at);
CREATE INDEX IF NOT EXISTS bridges_status_idx  ON algo_state_bridges(status);
CREATE INDEX IF NOT EXISTS sessions_user_idx   ON sessions(user_id);
CREATE INDEX IF NOT EXISTS theme_due_idx       ON user_theme_state(due_at);

PRAGMA user_version = 1;
";
