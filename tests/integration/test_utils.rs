//! Shared test utilities for integration tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use stratum::config::ContextConfig;
use stratum::date_format::DateFormat;
use stratum::error::StorageError;
use stratum::store::{ObjectStore, SledObjectStore, StoredRecord, WriteBatch};
use stratum::types::ObjectId;
use stratum::{ContextManager, Schema, StoreCoordinator};

pub const SCHEMA: &str = r#"
[[entities]]
name = "Person"

[[entities.attributes]]
name = "name"
type = "string"
required = true

[[entities.attributes]]
name = "age"
type = "integer"

[[entities.attributes]]
name = "createdAt"
type = "date"
aliases = ["created_at"]

[[entities]]
name = "Note"

[[entities.attributes]]
name = "remoteId"
type = "integer"
aliases = ["id"]

[[entities.attributes]]
name = "body"
type = "string"
"#;

pub fn schema() -> Arc<Schema> {
    Arc::new(Schema::from_toml_str(SCHEMA, &DateFormat::default()).unwrap())
}

/// Manager over an in-memory sled store. Must be called inside a runtime.
pub fn manager() -> ContextManager {
    manager_over(Arc::new(SledObjectStore::temporary().unwrap()))
}

pub fn manager_over(store: Arc<dyn ObjectStore>) -> ContextManager {
    let coordinator = StoreCoordinator::with_store(store, schema()).unwrap();
    ContextManager::initialize(coordinator, &ContextConfig::default()).unwrap()
}

/// Store that counts writes and flushes, and fails them on request.
pub struct FailingStore {
    inner: SledObjectStore,
    failing: AtomicBool,
    failing_flush: AtomicBool,
    writes: AtomicUsize,
    flushes: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SledObjectStore::temporary().unwrap(),
            failing: AtomicBool::new(false),
            failing_flush: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_flush_failing(&self, failing: bool) {
        self.failing_flush.store(failing, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl ObjectStore for FailingStore {
    fn load(&self, entity: &str, id: ObjectId) -> Result<Option<StoredRecord>, StorageError> {
        self.inner.load(entity, id)
    }

    fn scan(&self, entity: &str) -> Result<Vec<StoredRecord>, StorageError> {
        self.inner.scan(entity)
    }

    fn write(&self, batch: &WriteBatch) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("disk full".into()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(batch)
    }

    fn next_id(&self) -> Result<u64, StorageError> {
        self.inner.next_id()
    }

    fn flush(&self) -> Result<(), StorageError> {
        if self.failing_flush.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("fsync failed".into()));
        }
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.inner.flush()
    }
}

/// JSON object literal as a record.
pub fn record(value: serde_json::Value) -> stratum::Record {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}
