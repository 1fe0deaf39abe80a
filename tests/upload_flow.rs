//! End-to-end tests of the upload client against the real relay and against
//! scripted backends that misbehave in controlled ways.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{MethodRouter, post},
};
use chunk_relay::{
    client::{ClientConfig, UploadClient, UploadEvent, UploadStage},
    models::wire::{
        CompleteRequest, CompleteResponse, PartQuery, PartResponse, StartRequest, StartResponse,
    },
    services::storage_service::StorageService,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;

/// Spin up the real relay on an ephemeral port backed by a temp directory.
async fn spawn_relay() -> (String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("meta.db");
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
            .await
            .unwrap(),
    );
    chunk_relay::db::apply_migrations(&db).await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let storage = StorageService::new(db, dir.path().join("store"), base_url.clone());
    let app = chunk_relay::routes::routes::routes().with_state(storage);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (base_url, dir)
}

/// Shared counters for the scripted backends.
#[derive(Clone, Default)]
struct MockState {
    part_calls: Arc<Mutex<HashMap<i64, u32>>>,
    part_filenames: Arc<Mutex<Vec<String>>>,
    complete_calls: Arc<AtomicUsize>,
    completed_parts: Arc<Mutex<Vec<(i64, String)>>>,
}

impl MockState {
    fn bump(&self, query: &PartQuery) -> u32 {
        self.part_filenames
            .lock()
            .unwrap()
            .push(query.filename.clone());
        let mut calls = self.part_calls.lock().unwrap();
        let count = calls.entry(query.part_number).or_insert(0);
        *count += 1;
        *count
    }

    fn calls_for(&self, part: i64) -> u32 {
        self.part_calls.lock().unwrap().get(&part).copied().unwrap_or(0)
    }
}

async fn mock_start(Json(req): Json<StartRequest>) -> Json<StartResponse> {
    assert!(!req.filename.is_empty());
    Json(StartResponse {
        upload_id: "mock-upload".into(),
        // Deliberately different from the requested filename: the client
        // must switch to this key for every later call.
        key: "mock-key".into(),
    })
}

async fn mock_complete(
    State(state): State<MockState>,
    Json(req): Json<CompleteRequest>,
) -> Json<CompleteResponse> {
    state.complete_calls.fetch_add(1, Ordering::SeqCst);
    *state.completed_parts.lock().unwrap() = req
        .parts
        .iter()
        .map(|p| (p.part_number, p.etag.clone()))
        .collect();
    Json(CompleteResponse {
        public_url: "http://cdn.test/mock-key".into(),
    })
}

/// Returns 503 for the first two calls on part 2, then succeeds everywhere.
async fn flaky_part(
    State(state): State<MockState>,
    Query(query): Query<PartQuery>,
) -> axum::response::Response {
    let count = state.bump(&query);
    if query.part_number == 2 && count <= 2 {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "try later"})),
        )
            .into_response()
    } else {
        // Etag quoted on purpose; the client must strip it.
        Json(PartResponse {
            etag: format!("\"etag-{}\"", query.part_number),
        })
        .into_response()
    }
}

/// Always rejects with a client error.
async fn forbidden_part(
    State(state): State<MockState>,
    Query(query): Query<PartQuery>,
) -> impl IntoResponse {
    state.bump(&query);
    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({"error": "denied"})),
    )
}

/// Never answers within the client's attempt timeout.
async fn stalled_part(
    State(state): State<MockState>,
    Query(query): Query<PartQuery>,
) -> Json<PartResponse> {
    state.bump(&query);
    tokio::time::sleep(Duration::from_secs(30)).await;
    Json(PartResponse { etag: "late".into() })
}

async fn spawn_mock(state: MockState, part_route: MethodRouter<MockState>) -> String {
    let app = Router::new()
        .route("/upload-start", post(mock_start))
        .route("/upload-part", part_route)
        .route("/upload-complete", post(mock_complete))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base_url
}

async fn write_source(dir: &tempfile::TempDir, len: usize) -> (PathBuf, Vec<u8>) {
    let path = dir.path().join("source.bin");
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    tokio::fs::write(&path, &data).await.unwrap();
    (path, data)
}

fn fast_config(base_url: &str) -> ClientConfig {
    ClientConfig::new(base_url)
        .chunk_size(4)
        .warning_pending(Duration::from_millis(200))
        .chunk_timeout(Duration::from_secs(2))
        .backoff_cap(Duration::ZERO)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<UploadEvent>) -> Vec<UploadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Scenario: 3-part file against the real relay, everything first-try.
#[tokio::test]
async fn full_upload_round_trips_through_the_relay() {
    let (base_url, _relay_dir) = spawn_relay().await;
    let src_dir = tempfile::tempdir().unwrap();
    let (path, data) = write_source(&src_dir, 2560).await;

    let client = UploadClient::new(ClientConfig::new(&base_url).chunk_size(1024));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let url = client
        .upload_file(&path, "videos/clip.bin", "application/octet-stream", tx)
        .await
        .unwrap();
    assert_eq!(url, format!("{}/videos/clip.bin", base_url));

    let progress: Vec<u8> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            UploadEvent::Progress(pct) => Some(pct),
            UploadEvent::Retrying(_) => None,
        })
        .collect();
    assert_eq!(progress, vec![1, 33, 67, 100]);

    // Assembly is fire-and-forget; poll the predicted URL until it lands.
    let http = reqwest::Client::new();
    let mut body = None;
    for _ in 0..500 {
        let resp = http.get(&url).send().await.unwrap();
        if resp.status().is_success() {
            body = Some(resp.bytes().await.unwrap());
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(body.expect("object never appeared").as_ref(), &data[..]);
}

/// Scenario: part 2 of 3 fails with 503 twice, then succeeds. Retries must
/// be invisible to the outcome.
#[tokio::test]
async fn transient_503_is_retried_and_invisible_to_the_outcome() {
    let state = MockState::default();
    let base_url = spawn_mock(state.clone(), post(flaky_part)).await;
    let src_dir = tempfile::tempdir().unwrap();
    let (path, _) = write_source(&src_dir, 12).await;

    let client = UploadClient::new(fast_config(&base_url));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let url = client
        .upload_file(&path, "entry.bin", "application/octet-stream", tx)
        .await
        .unwrap();
    assert_eq!(url, "http://cdn.test/mock-key");

    assert_eq!(state.calls_for(1), 1);
    assert_eq!(state.calls_for(2), 3);
    assert_eq!(state.calls_for(3), 1);
    assert_eq!(state.complete_calls.load(Ordering::SeqCst), 1);

    // The client must use the server-confirmed key, not the requested name.
    assert!(
        state
            .part_filenames
            .lock()
            .unwrap()
            .iter()
            .all(|name| name == "mock-key")
    );

    // Complete received a sorted, unquoted part list.
    let parts = state.completed_parts.lock().unwrap().clone();
    assert_eq!(
        parts,
        vec![
            (1, "etag-1".to_string()),
            (2, "etag-2".to_string()),
            (3, "etag-3".to_string()),
        ]
    );

    // The instability banner went up during the retries and came back down.
    let events = drain(&mut rx);
    assert!(events.contains(&UploadEvent::Retrying(true)));
    let last_retry_state = events
        .iter()
        .rev()
        .find_map(|event| match event {
            UploadEvent::Retrying(on) => Some(*on),
            UploadEvent::Progress(_) => None,
        })
        .unwrap();
    assert!(!last_retry_state);
}

/// Scenario: a 4xx on the first part aborts the session immediately.
#[tokio::test]
async fn client_error_is_fatal_and_short_circuits() {
    let state = MockState::default();
    let base_url = spawn_mock(state.clone(), post(forbidden_part)).await;
    let src_dir = tempfile::tempdir().unwrap();
    let (path, _) = write_source(&src_dir, 3).await;

    let client = UploadClient::new(fast_config(&base_url));
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = client
        .upload_file(&path, "entry.bin", "application/octet-stream", tx)
        .await
        .unwrap_err();

    assert!(err.fatal);
    assert_eq!(err.stage, UploadStage::Part);
    assert_eq!(state.calls_for(1), 1);
    assert_eq!(state.complete_calls.load(Ordering::SeqCst), 0);
}

/// Scenario: every attempt on part 1 exceeds the abort timeout; the session
/// fails with a retry-exhausted error after exactly the attempt cap.
#[tokio::test]
async fn timeouts_exhaust_the_retry_budget() {
    let state = MockState::default();
    let base_url = spawn_mock(state.clone(), post(stalled_part)).await;
    let src_dir = tempfile::tempdir().unwrap();
    let (path, _) = write_source(&src_dir, 3).await;

    let config = ClientConfig::new(&base_url)
        .chunk_size(4)
        .warning_pending(Duration::from_millis(5))
        .chunk_timeout(Duration::from_millis(25))
        .backoff_cap(Duration::ZERO);
    let client = UploadClient::new(config);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let err = client
        .upload_file(&path, "entry.bin", "application/octet-stream", tx)
        .await
        .unwrap_err();

    assert!(!err.fatal);
    assert_eq!(err.stage, UploadStage::Part);
    assert!(err.log.contains("after 10 attempts"));
    assert_eq!(state.calls_for(1), 10);
    assert_eq!(state.complete_calls.load(Ordering::SeqCst), 0);

    let events = drain(&mut rx);
    assert!(events.contains(&UploadEvent::Retrying(true)));
}

/// An unsafe key is rejected at the start phase by the real relay.
#[tokio::test]
async fn traversal_key_is_rejected_at_start() {
    let (base_url, _relay_dir) = spawn_relay().await;
    let src_dir = tempfile::tempdir().unwrap();
    let (path, _) = write_source(&src_dir, 3).await;

    let client = UploadClient::new(ClientConfig::new(&base_url).chunk_size(4));
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = client
        .upload_file(&path, "../escape.bin", "application/octet-stream", tx)
        .await
        .unwrap_err();

    assert_eq!(err.stage, UploadStage::Start);
    assert!(err.log.contains("400"));
}
