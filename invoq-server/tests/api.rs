//! Wire-level tests: the full router driven through tower's oneshot

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use invoq::config::Config;
use invoq_server::{build_state, router, AppState};
use lopdf::{Dictionary, Document, Object, Stream};
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

const BOUNDARY: &str = "invoq-test-boundary";

fn sample_pdf(page_count: usize) -> Vec<u8> {
  let mut doc = Document::with_version("1.5");
  let pages_id = doc.new_object_id();
  let mut kids = Vec::new();
  for index in 0..page_count {
    let content = format!("0 0 150 200 re S % page {index}\n");
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
    let mut page = Dictionary::new();
    page.set("Type", Object::Name(b"Page".to_vec()));
    page.set("Parent", Object::Reference(pages_id));
    page.set(
      "MediaBox",
      Object::Array(vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Integer(300),
        Object::Integer(400),
      ]),
    );
    page.set("Contents", Object::Reference(content_id));
    kids.push(Object::Reference(doc.add_object(page)));
  }
  let mut pages = Dictionary::new();
  pages.set("Type", Object::Name(b"Pages".to_vec()));
  pages.set("Count", Object::Integer(page_count as i64));
  pages.set("Kids", Object::Array(kids));
  doc.objects.insert(pages_id, Object::Dictionary(pages));
  let mut catalog = Dictionary::new();
  catalog.set("Type", Object::Name(b"Catalog".to_vec()));
  catalog.set("Pages", Object::Reference(pages_id));
  let catalog_id = doc.add_object(catalog);
  doc.trailer.set("Root", Object::Reference(catalog_id));
  let mut buffer = Vec::new();
  doc.save_to(&mut buffer).unwrap();
  buffer
}

fn multipart_body(files: &[(&str, &[u8])]) -> Vec<u8> {
  let mut body = Vec::new();
  for (name, data) in files {
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
      format!("Content-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");
  }
  body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
  body
}

async fn test_app(mutate: impl FnOnce(&mut Config)) -> (AppState, Router, tempfile::TempDir) {
  let dir = tempfile::tempdir().unwrap();
  let mut config = Config {
    storage_root: dir.path().to_path_buf(),
    max_concurrent_tasks: 2,
    ..Config::default()
  };
  mutate(&mut config);
  let state = build_state(config).await.unwrap();
  let app = router(state.clone());
  (state, app, dir)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
  let response = app.clone().oneshot(request).await.unwrap();
  let status = response.status();
  let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  let json = if bytes.is_empty() {
    Value::Null
  } else {
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
  };
  (status, json)
}

fn get(uri: &str, session: Option<&str>) -> Request<Body> {
  let mut builder = Request::builder().method("GET").uri(uri);
  if let Some(session) = session {
    builder = builder.header("X-Session-ID", session);
  }
  builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, session: Option<&str>) -> Request<Body> {
  let mut builder = Request::builder().method("POST").uri(uri);
  if let Some(session) = session {
    builder = builder.header("X-Session-ID", session);
  }
  builder.body(Body::empty()).unwrap()
}

fn upload_request(session: &str, files: &[(&str, &[u8])]) -> Request<Body> {
  Request::builder()
    .method("POST")
    .uri("/api/upload/")
    .header("X-Session-ID", session)
    .header(
      header::CONTENT_TYPE,
      format!("multipart/form-data; boundary={BOUNDARY}"),
    )
    .body(Body::from(multipart_body(files)))
    .unwrap()
}

async fn wait_for_wire_status(app: &Router, session: &str, task_id: &str, wanted: &str) -> Value {
  for _ in 0..200 {
    let (status, body) = send(app, get(&format!("/api/task/{task_id}/status"), Some(session))).await;
    assert_eq!(status, StatusCode::OK);
    if body["status"] == wanted {
      return body;
    }
    tokio::time::sleep(Duration::from_millis(25)).await;
  }
  panic!("task {task_id} never reached {wanted}");
}

const SESSION_A: &str = "6e1f8a34-6c54-4f84-9d6c-3f0a8f1c2a01";
const SESSION_B: &str = "0b7a2a00-9a1f-4c7d-8f2e-5d4b3c2a1b02";

#[tokio::test]
async fn session_bootstrap_generates_id() {
  let (_state, app, _dir) = test_app(|_| {}).await;
  let (status, body) = send(&app, post("/api/session", None)).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["session_id"].as_str().unwrap().len(), 36);
  assert_eq!(body["expires_in_hours"], 72);
}

#[tokio::test]
async fn missing_session_is_unauthorized() {
  let (_state, app, _dir) = test_app(|_| {}).await;
  let (status, body) = send(&app, get("/api/task/", None)).await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);
  assert_eq!(body["error"], true);
  assert_eq!(body["code"], "MISSING_SESSION");
}

#[tokio::test]
async fn upload_process_download_roundtrip() {
  let (state, app, _dir) = test_app(|_| {}).await;
  state.scheduler.start();

  let pdf = sample_pdf(3);
  let (status, body) = send(&app, upload_request(SESSION_A, &[("invoice.pdf", &pdf)])).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "queued");
  assert_eq!(body["fileCount"], 1);
  let task_id = body["taskId"].as_str().unwrap().to_string();

  let done = wait_for_wire_status(&app, SESSION_A, &task_id, "completed").await;
  assert_eq!(done["progress"], 100);
  let url = done["downloadUrls"][0].as_str().unwrap().to_string();

  let (status, _) = send(&app, get(&url, Some(SESSION_A))).await;
  assert_eq!(status, StatusCode::OK);

  // The inline variant authenticates through the query parameter
  let inline_url = format!("{url}?inline=true&session={SESSION_A}");
  let response = app
    .clone()
    .oneshot(get(&inline_url, None))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(
    response.headers()[header::CONTENT_TYPE],
    "application/pdf"
  );
  assert!(response.headers()[header::CONTENT_DISPOSITION]
    .to_str()
    .unwrap()
    .starts_with("inline"));
  assert!(response.headers()[header::CACHE_CONTROL]
    .to_str()
    .unwrap()
    .contains("no-store"));

  state.scheduler.shutdown().await;
}

#[tokio::test]
async fn cross_session_access_is_not_found() {
  let (state, app, _dir) = test_app(|_| {}).await;
  state.scheduler.start();

  let pdf = sample_pdf(1);
  let (_, body) = send(&app, upload_request(SESSION_A, &[("a.pdf", &pdf)])).await;
  let task_id = body["taskId"].as_str().unwrap().to_string();

  let (status, body) = send(
    &app,
    get(&format!("/api/task/{task_id}/status"), Some(SESSION_B)),
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["code"], "NOT_FOUND");

  state.scheduler.shutdown().await;
}

#[tokio::test]
async fn upload_rejects_wrong_magic_bytes() {
  let (_state, app, _dir) = test_app(|_| {}).await;
  let (status, body) = send(
    &app,
    upload_request(SESSION_A, &[("fake.pdf", b"<html>not a pdf</html>")]),
  )
  .await;
  assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
  assert_eq!(body["code"], "UNSUPPORTED_MEDIA_TYPE");
}

#[tokio::test]
async fn upload_rejects_empty_batch() {
  let (_state, app, _dir) = test_app(|_| {}).await;
  let (status, body) = send(&app, upload_request(SESSION_A, &[])).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn backpressure_returns_429_and_keeps_nothing() {
  // Capacity one and no workers: the queue stays occupied
  let (state, app, _dir) = test_app(|config| {
    config.queue_capacity = 1;
  })
  .await;

  let pdf = sample_pdf(1);
  let (status, _) = send(&app, upload_request(SESSION_A, &[("a.pdf", &pdf)])).await;
  assert_eq!(status, StatusCode::OK);

  let (status, body) = send(&app, upload_request(SESSION_A, &[("b.pdf", &pdf)])).await;
  assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
  assert_eq!(body["code"], "BACKPRESSURE");

  // Exactly one task's upload directory exists
  let uploads = state.storage.root().join("uploads").join(SESSION_A);
  let dirs = std::fs::read_dir(&uploads).unwrap().count();
  assert_eq!(dirs, 1);
}

#[tokio::test]
async fn expired_download_reports_files_expired() {
  let (state, app, _dir) = test_app(|config| {
    config.retention = Duration::ZERO;
  })
  .await;
  state.scheduler.start();

  let pdf = sample_pdf(1);
  let (_, body) = send(&app, upload_request(SESSION_A, &[("a.pdf", &pdf)])).await;
  let task_id = body["taskId"].as_str().unwrap().to_string();
  let done = wait_for_wire_status(&app, SESSION_A, &task_id, "completed").await;
  let url = done["downloadUrls"][0].as_str().unwrap().to_string();

  tokio::time::sleep(Duration::from_millis(50)).await;
  let (status, sweep) = send(&app, post("/api/cleanup/files", Some(SESSION_A))).await;
  assert_eq!(status, StatusCode::OK);
  assert!(sweep["files_removed"].as_u64().unwrap() >= 1);

  let (status, body) = send(&app, get(&url, Some(SESSION_A))).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["code"], "FILES_EXPIRED");

  state.scheduler.shutdown().await;
}

#[tokio::test]
async fn cancel_and_retry_lifecycle() {
  let (_state, app, _dir) = test_app(|_| {}).await;
  // No workers: tasks stay queued so the cancel path is deterministic
  let pdf = sample_pdf(1);
  let (_, body) = send(&app, upload_request(SESSION_A, &[("a.pdf", &pdf)])).await;
  let task_id = body["taskId"].as_str().unwrap().to_string();

  let (status, body) = send(
    &app,
    post(&format!("/api/task/{task_id}/cancel"), Some(SESSION_A)),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "cancelled");

  // Cancelling again is a reported no-op
  let (status, body) = send(
    &app,
    post(&format!("/api/task/{task_id}/cancel"), Some(SESSION_A)),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["no_op"], true);

  // Retry of a cancelled task is refused
  let (status, _) = send(
    &app,
    post(&format!("/api/task/{task_id}/retry"), Some(SESSION_A)),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_and_statistics_reflect_tasks() {
  let (state, app, _dir) = test_app(|_| {}).await;
  state.scheduler.start();

  let pdf = sample_pdf(1);
  let (_, body) = send(&app, upload_request(SESSION_A, &[("a.pdf", &pdf)])).await;
  let task_id = body["taskId"].as_str().unwrap().to_string();
  wait_for_wire_status(&app, SESSION_A, &task_id, "completed").await;

  let (status, body) = send(&app, get("/api/task/", Some(SESSION_A))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["total_count"], 1);
  assert_eq!(body["tasks"][0]["taskId"], task_id.as_str());

  let (status, body) = send(&app, get("/api/task/?status=failed", Some(SESSION_A))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["total_count"], 0);

  let (status, body) = send(&app, get("/api/task/statistics", Some(SESSION_A))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["completed"], 1);

  let (status, body) = send(&app, get("/api/task/queue/stats", Some(SESSION_A))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["workers"], 2);

  state.scheduler.shutdown().await;
}

#[tokio::test]
async fn delete_purges_record_and_files() {
  let (state, app, _dir) = test_app(|_| {}).await;
  state.scheduler.start();

  let pdf = sample_pdf(1);
  let (_, body) = send(&app, upload_request(SESSION_A, &[("a.pdf", &pdf)])).await;
  let task_id = body["taskId"].as_str().unwrap().to_string();
  wait_for_wire_status(&app, SESSION_A, &task_id, "completed").await;

  let request = Request::builder()
    .method("DELETE")
    .uri(format!("/api/task/{task_id}"))
    .header("X-Session-ID", SESSION_A)
    .body(Body::empty())
    .unwrap();
  let (status, body) = send(&app, request).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["files_cleaned"], true);

  let (status, _) = send(
    &app,
    get(&format!("/api/task/{task_id}/status"), Some(SESSION_A)),
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  let task_dir = state.storage.root().join("outputs").join(SESSION_A).join(&task_id);
  assert!(!task_dir.exists());

  state.scheduler.shutdown().await;
}

#[tokio::test]
async fn health_reports_services() {
  let (state, app, _dir) = test_app(|_| {}).await;
  state.scheduler.start();
  let (status, body) = send(&app, get("/api/health", None)).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "healthy");
  assert_eq!(body["services"]["registry"], true);
  assert_eq!(body["services"]["storage"], true);
  state.scheduler.shutdown().await;
}

#[tokio::test]
async fn upload_limits_discovery() {
  let (_state, app, _dir) = test_app(|_| {}).await;
  let (status, body) = send(&app, get("/api/upload/limits", None)).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["max_file_size"], 50 * 1024 * 1024);
  assert!(body["allowed_extensions"]
    .as_array()
    .unwrap()
    .iter()
    .any(|v| v == ".pdf"));
}
