//! Object Store
//!
//! Physical persistence of managed objects. The [`ObjectStore`] trait is the
//! seam to the backing file; [`SledObjectStore`] is the production
//! implementation. [`StoreCoordinator`] binds a store to the schema and is the
//! only component that reads or writes it.

pub mod coordinator;
pub mod persistence;

pub use coordinator::{IdAllocator, StoreCoordinator};
pub use persistence::SledObjectStore;

use crate::error::StorageError;
use crate::types::ObjectId;
use crate::value::Attributes;
use serde::{Deserialize, Serialize};

/// A persisted object: identity, entity name and full attribute values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: ObjectId,
    pub entity: String,
    pub attributes: Attributes,
}

/// Property-level update of an existing object.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub id: ObjectId,
    pub entity: String,
    /// Changed attributes only.
    pub changes: Attributes,
}

/// Pending changes pushed from a context into its parent (or into the store).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub inserted: Vec<StoredRecord>,
    pub updated: Vec<RecordUpdate>,
    pub deleted: Vec<(String, ObjectId)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }
}

/// Fully-resolved physical write, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub puts: Vec<StoredRecord>,
    pub removes: Vec<(String, ObjectId)>,
    /// Identifier high-water mark to persist alongside the records.
    pub next_id: u64,
}

/// Backing store interface
pub trait ObjectStore: Send + Sync {
    fn load(&self, entity: &str, id: ObjectId) -> Result<Option<StoredRecord>, StorageError>;

    /// All records of `entity`, in ascending identifier order.
    fn scan(&self, entity: &str) -> Result<Vec<StoredRecord>, StorageError>;

    /// Apply a batch atomically.
    fn write(&self, batch: &WriteBatch) -> Result<(), StorageError>;

    /// Persisted identifier high-water mark (0 for a fresh store).
    fn next_id(&self) -> Result<u64, StorageError>;

    /// Flush pending writes to disk.
    fn flush(&self) -> Result<(), StorageError>;
}
