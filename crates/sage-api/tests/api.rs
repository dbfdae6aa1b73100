//! End-to-end tests of the JSON API over an in-memory store.

use std::sync::Arc;

use axum::{
  Router,
  body::Body,
  http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use sage_algos::default_registry;
use sage_api::{AppState, api_router};
use sage_core::{
  bridge::BridgeEngine,
  governor::SwitchGovernor,
  resolver::RuntimeResolver,
  router::AlgorithmRouter,
};
use sage_store_sqlite::SqliteStore;

async fn app() -> Router {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let resolver = Arc::new(RuntimeResolver::new(Arc::clone(&store)));
  let router = Arc::new(AlgorithmRouter::new(
    Arc::clone(&store),
    Arc::clone(&resolver),
    default_registry(),
    BridgeEngine::default(),
  ));
  api_router(AppState {
    store,
    resolver,
    governor: Arc::new(SwitchGovernor::default()),
    router,
  })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
  let response = app.clone().oneshot(request).await.unwrap();
  let status = response.status();
  let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  let body = if bytes.is_empty() {
    Value::Null
  } else {
    serde_json::from_slice(&bytes).unwrap()
  };
  (status, body)
}

fn post(path: &str, body: Value) -> Request<Body> {
  Request::builder()
    .method("POST")
    .uri(path)
    .header(header::CONTENT_TYPE, "application/json")
    .header("x-actor", "ops")
    .body(Body::from(body.to_string()))
    .unwrap()
}

fn get(path: &str) -> Request<Body> {
  Request::builder().uri(path).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn governed_flag_flip_round_trips() {
  let app = app().await;

  let (status, flag) = send(
    &app,
    post(
      "/admin/runtime/flags",
      json!({
        "key": "EXAM_MODE",
        "value": true,
        "confirmation_phrase": "confirm exam_mode on",
        "reason": "midterm exam window today"
      }),
    ),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(flag["value"], json!(true));
  assert_eq!(flag["updated_by"], json!("ops"));

  let (status, body) = send(&app, get("/admin/runtime/status")).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["fresh"]["flags"]["exam_mode"], json!(true));
}

#[tokio::test]
async fn wrong_phrase_is_forbidden_and_audited() {
  let app = app().await;

  let (status, body) = send(
    &app,
    post(
      "/admin/runtime/profile",
      json!({
        "profile_name": "fallback",
        "confirmation_phrase": "switch profile to fallback",
        "reason": "rolling back after regression"
      }),
    ),
  )
  .await;
  assert_eq!(status, StatusCode::FORBIDDEN);
  assert!(body["error"].as_str().unwrap().contains("confirmation"));

  // Nothing switched.
  let (_, status_body) = send(&app, get("/admin/runtime/status")).await;
  assert_eq!(status_body["fresh"]["profile"], json!("primary"));

  // The rejection itself is on the audit trail.
  let (_, audit) = send(&app, get("/admin/runtime/audit?limit=5")).await;
  assert_eq!(audit[0]["action"], json!("confirmation_rejected"));
  assert_eq!(audit[0]["actor"], json!("ops"));
}

#[tokio::test]
async fn thin_reason_is_unprocessable() {
  let app = app().await;

  let (status, _) = send(
    &app,
    post(
      "/admin/runtime/profile",
      json!({
        "profile_name": "fallback",
        "confirmation_phrase": "switch runtime profile to fallback",
        "reason": "ok"
      }),
    ),
  )
  .await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

  // Nothing switched and nothing was audited.
  let (_, body) = send(&app, get("/admin/runtime/status")).await;
  assert_eq!(body["fresh"]["profile"], json!("primary"));
  assert_eq!(body["last_audit_at"], Value::Null);
}

#[tokio::test]
async fn frozen_control_plane_locks_mutations_until_thawed() {
  let app = app().await;

  let (status, _) = send(
    &app,
    post(
      "/admin/runtime/freeze",
      json!({
        "frozen": true,
        "confirmation_phrase": "freeze control plane",
        "reason": "database migration window"
      }),
    ),
  )
  .await;
  assert_eq!(status, StatusCode::OK);

  let (status, body) = send(
    &app,
    post(
      "/admin/runtime/flags",
      json!({
        "key": "EXAM_MODE",
        "value": true,
        "confirmation_phrase": "confirm exam_mode on",
        "reason": "midterm exam window today"
      }),
    ),
  )
  .await;
  assert_eq!(status, StatusCode::LOCKED);
  assert_eq!(body["error"], json!("database migration window"));

  // Thawing is exempt from the freeze.
  let (status, _) = send(
    &app,
    post(
      "/admin/runtime/freeze",
      json!({
        "frozen": false,
        "confirmation_phrase": "thaw control plane",
        "reason": "migration finished cleanly"
      }),
    ),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn governed_profile_switch_updates_resolution() {
  let app = app().await;

  let (status, profile) = send(
    &app,
    post(
      "/admin/runtime/profile",
      json!({
        "profile_name": "fallback",
        "confirmation_phrase": "switch runtime profile to fallback",
        "reason": "rolling back after regression"
      }),
    ),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(profile["is_active"], json!(true));

  // The cache was invalidated, so even the cached view moves.
  let (_, body) = send(&app, get("/admin/runtime/status")).await;
  assert_eq!(body["cached"]["profile"], json!("fallback"));
  assert_eq!(body["cached"]["modules"]["mastery"], json!("v0"));
}

#[tokio::test]
async fn override_pin_and_clear() {
  let app = app().await;

  let (status, pin) = send(
    &app,
    post(
      "/admin/runtime/override",
      json!({
        "module_key": "mastery",
        "version_key": "v0",
        "confirmation_phrase": "pin mastery to v0",
        "reason": "bkt scores drifting, pin old model"
      }),
    ),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(pin["module"], json!("mastery"));

  let (_, body) = send(&app, get("/admin/runtime/status")).await;
  assert_eq!(body["fresh"]["modules"]["mastery"], json!("v0"));

  let (status, cleared) = send(
    &app,
    post(
      "/admin/runtime/override/clear",
      json!({
        "module_key": "mastery",
        "confirmation_phrase": "unpin mastery",
        "reason": "bkt fix deployed, unpinning"
      }),
    ),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(cleared["cleared"], json!(true));
}

#[tokio::test]
async fn session_snapshot_pins_the_learn_path() {
  let app = app().await;
  let user_id = Uuid::new_v4();

  let (status, created) =
    send(&app, post("/sessions", json!({ "user_id": user_id }))).await;
  assert_eq!(status, StatusCode::CREATED);
  let session_id = created["session"]["session_id"].as_str().unwrap().to_owned();
  assert_eq!(created["snapshot"]["profile"], json!("primary"));

  // Switch mid-session.
  send(
    &app,
    post(
      "/admin/runtime/profile",
      json!({
        "profile_name": "fallback",
        "confirmation_phrase": "switch runtime profile to fallback",
        "reason": "rolling back after regression"
      }),
    ),
  )
  .await;

  let (status, snapshot) =
    send(&app, get(&format!("/sessions/{session_id}/runtime"))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(snapshot["profile"], json!("primary"));

  // Attempts pinned to the session still score on the snapshot's versions.
  let (status, attempt) = send(
    &app,
    post(
      "/learn/mastery/attempt",
      json!({
        "user_id": user_id,
        "theme_id": Uuid::new_v4(),
        "correct": true,
        "session_id": session_id
      }),
    ),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(attempt["version"], json!("v1"));
}

#[tokio::test]
async fn unknown_session_runtime_is_not_found() {
  let app = app().await;
  let (status, _) =
    send(&app, get(&format!("/sessions/{}/runtime", Uuid::new_v4()))).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_module_is_not_found() {
  let app = app().await;
  let (status, _) = send(
    &app,
    post(
      "/learn/astrology/attempt",
      json!({
        "user_id": Uuid::new_v4(),
        "theme_id": Uuid::new_v4(),
        "correct": true
      }),
    ),
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn attempt_and_state_round_trip() {
  let app = app().await;
  let user_id = Uuid::new_v4();
  let theme_id = Uuid::new_v4();

  let (status, attempt) = send(
    &app,
    post(
      "/learn/mastery/attempt",
      json!({ "user_id": user_id, "theme_id": theme_id, "correct": true }),
    ),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(attempt["frozen"], json!(false));
  assert_eq!(attempt["state"]["stats"]["attempts_total"], json!(1));

  let (status, state) =
    send(&app, get(&format!("/learn/mastery/state?user_id={user_id}"))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(state["version"], json!("v1"));
  assert_eq!(state["states"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn freeze_updates_surfaces_as_frozen_attempts() {
  let app = app().await;

  send(
    &app,
    post(
      "/admin/runtime/flags",
      json!({
        "key": "FREEZE_UPDATES",
        "value": true,
        "confirmation_phrase": "confirm freeze_updates on",
        "reason": "emergency stop during incident 4821"
      }),
    ),
  )
  .await;

  let (status, attempt) = send(
    &app,
    post(
      "/learn/mastery/attempt",
      json!({
        "user_id": Uuid::new_v4(),
        "theme_id": Uuid::new_v4(),
        "correct": true
      }),
    ),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(attempt["frozen"], json!(true));
  assert_eq!(attempt["state"]["stats"]["attempts_total"], json!(0));
}

#[tokio::test]
async fn requeue_without_running_bridge_is_not_found() {
  let app = app().await;
  let user_id = Uuid::new_v4();

  let (status, _) = send(
    &app,
    post(
      "/admin/runtime/bridge/requeue",
      json!({
        "user_id": user_id,
        "from_profile": "primary",
        "to_profile": "fallback",
        "confirmation_phrase": format!("requeue bridge for {user_id}"),
        "reason": "stuck worker cleanup"
      }),
    ),
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bridge_batch_reports_per_user_outcomes() {
  let app = app().await;

  // No switch yet: nothing to bridge from.
  let user_id = Uuid::new_v4();
  let (status, entries) = send(
    &app,
    post("/admin/runtime/bridge", json!({ "user_ids": [user_id] })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(entries[0]["outcome"], json!("no_previous_profile"));

  send(
    &app,
    post(
      "/admin/runtime/profile",
      json!({
        "profile_name": "shadow",
        "confirmation_phrase": "switch runtime profile to shadow",
        "reason": "canary for the new stack"
      }),
    ),
  )
  .await;

  let (status, entries) = send(
    &app,
    post("/admin/runtime/bridge", json!({ "user_ids": [user_id] })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  // No aggregates exist for the user; the bridge still completes terminally.
  assert_eq!(entries[0]["outcome"], json!("converted"));
}
