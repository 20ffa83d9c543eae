//! # Test Fixtures
//!
//! [`RecordingStore`] wraps the in-memory backend and records every session
//! operation so tests can assert what the transaction scope did to the
//! store. [`TestApp`] wires the full router over it.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use naevis_gateway::{NaevisConfig, NaevisService, TokenVerifier};
use naevis_store::{
    Documents, MemoryStore, PoolStatus, ProcessStoreClient, Query, Session, StoreBackend,
    StoreError,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// One session operation, tagged with the session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Open(String),
    Start(String),
    Commit(String),
    Abort(String),
    End(String),
}

impl StoreEvent {
    pub fn session(&self) -> &str {
        match self {
            StoreEvent::Open(id)
            | StoreEvent::Start(id)
            | StoreEvent::Commit(id)
            | StoreEvent::Abort(id)
            | StoreEvent::End(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StoreEvent::Open(_) => "open",
            StoreEvent::Start(_) => "start",
            StoreEvent::Commit(_) => "commit",
            StoreEvent::Abort(_) => "abort",
            StoreEvent::End(_) => "end",
        }
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<StoreEvent>>,
    fail_commits: AtomicBool,
    commit_delay_ms: AtomicU64,
}

impl Recorder {
    fn push(&self, event: StoreEvent) {
        self.events.lock().push(event);
    }
}

/// Store double that records session operations and can fail commits.
#[derive(Clone, Default)]
pub struct RecordingStore {
    memory: MemoryStore,
    recorder: Arc<Recorder>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped backend, for seeding and inspection.
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        self.recorder.events.lock().clone()
    }

    /// Event kinds in order, e.g. `["open", "start", "commit", "end"]`.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(StoreEvent::kind).collect()
    }

    pub fn clear(&self) {
        self.recorder.events.lock().clear();
    }

    pub fn fail_commits(&self, fail: bool) {
        self.recorder.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn delay_commits(&self, delay: Duration) {
        self.recorder
            .commit_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of `End` events per opened session, in open order.
    pub fn ends_per_session(&self) -> Vec<(String, usize)> {
        let events = self.events();
        events
            .iter()
            .filter_map(|e| match e {
                StoreEvent::Open(id) => Some(id.clone()),
                _ => None,
            })
            .map(|id| {
                let ends = events
                    .iter()
                    .filter(|e| e.kind() == "end" && e.session() == id)
                    .count();
                (id, ends)
            })
            .collect()
    }
}

#[async_trait]
impl Documents for RecordingStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        self.memory.get(collection, id).await
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.memory.find(collection, query).await
    }

    async fn insert(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError> {
        self.memory.insert(collection, id, doc).await
    }

    async fn replace(&self, collection: &str, id: &str, doc: Value) -> Result<bool, StoreError> {
        self.memory.replace(collection, id, doc).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.memory.delete(collection, id).await
    }
}

#[async_trait]
impl StoreBackend for RecordingStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.memory.ping().await
    }

    async fn open_session(&self) -> Result<Box<dyn Session>, StoreError> {
        let inner = self.memory.open_session().await?;
        self.recorder.push(StoreEvent::Open(inner.id().to_string()));
        Ok(Box::new(RecordingSession {
            inner,
            recorder: Arc::clone(&self.recorder),
        }))
    }

    fn pool_status(&self) -> PoolStatus {
        self.memory.pool_status()
    }

    async fn shutdown(&self) {
        self.memory.shutdown().await
    }
}

struct RecordingSession {
    inner: Box<dyn Session>,
    recorder: Arc<Recorder>,
}

impl RecordingSession {
    fn record(&self, event: fn(String) -> StoreEvent) {
        self.recorder.push(event(self.inner.id().to_string()));
    }
}

#[async_trait]
impl Documents for RecordingSession {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.inner.find(collection, query).await
    }

    async fn insert(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError> {
        self.inner.insert(collection, id, doc).await
    }

    async fn replace(&self, collection: &str, id: &str, doc: Value) -> Result<bool, StoreError> {
        self.inner.replace(collection, id, doc).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.inner.delete(collection, id).await
    }
}

#[async_trait]
impl Session for RecordingSession {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn start_transaction(&self) -> Result<(), StoreError> {
        self.record(StoreEvent::Start);
        self.inner.start_transaction().await
    }

    async fn commit(&self) -> Result<(), StoreError> {
        self.record(StoreEvent::Commit);
        let delay = self.recorder.commit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.recorder.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }
        self.inner.commit().await
    }

    async fn abort(&self) -> Result<(), StoreError> {
        self.record(StoreEvent::Abort);
        self.inner.abort().await
    }

    async fn end(&self) {
        self.record(StoreEvent::End);
        self.inner.end().await
    }
}

/// Configuration with a test secret and budgets large enough not to
/// interfere with multi-request flows.
pub fn test_config() -> NaevisConfig {
    let mut config = NaevisConfig::default();
    config.auth.jwt_secret = "integration-secret".into();
    config.rate_limit.burst_size = 1_000;
    config.rate_limit.write_burst_size = 1_000;
    config.rate_limit.requests_per_second = 100;
    config.rate_limit.writes_per_second = 100;
    config
}

/// The full router over a [`RecordingStore`], driven in-process.
pub struct TestApp {
    pub router: Router,
    pub store: RecordingStore,
    pub client: Arc<ProcessStoreClient>,
    pub verifier: Arc<TokenVerifier>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: NaevisConfig) -> Self {
        let store = RecordingStore::new();
        let service = NaevisService::connect(config, Arc::new(store.clone()))
            .await
            .expect("service connects");
        Self {
            router: service.router(),
            client: service.store(),
            verifier: service.verifier(),
            store,
        }
    }

    pub fn token(&self, user_id: &str, roles: &[&str]) -> String {
        self.verifier
            .issue(user_id, roles, Duration::from_secs(300))
            .expect("token issued")
    }

    /// Seed published songs `ids` by artist `ar1`.
    pub fn seed_songs(&self, ids: &[&str]) {
        let docs = ids
            .iter()
            .map(|id| {
                serde_json::json!({
                    "songid": id,
                    "artistid": "ar1",
                    "title": format!("Song {id}"),
                    "published": true,
                })
            })
            .collect();
        self.store
            .memory()
            .import("songs", "songid", docs)
            .expect("songs seeded");
    }

    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("router is infallible");
        let status = response.status();
        let body = to_bytes(response.into_body(), 1 << 20)
            .await
            .expect("body readable");
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }
}

/// Build a request; `token` adds a bearer credential and `body` is sent as
/// JSON.
pub fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).expect("valid request")
}
