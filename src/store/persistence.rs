//! Persistence layer for the object store

use crate::error::StorageError;
use crate::store::{ObjectStore, StoredRecord, WriteBatch};
use crate::types::ObjectId;
use std::path::Path;

/// Key of the identifier high-water mark. Entity names never start with 0x01.
const NEXT_ID_KEY: &[u8] = b"\x01meta:next_id";

/// Sled-based implementation of ObjectStore
///
/// Records live in the default tree under `entity ++ 0x00 ++ id_be`, so a
/// prefix scan yields one entity's records in identifier order.
pub struct SledObjectStore {
    db: sled::Db,
}

impl SledObjectStore {
    /// Open (or create) a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref())
            .map_err(backend("Failed to open sled database"))?;
        Ok(Self { db })
    }

    /// Open a throwaway store that is removed when dropped.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(backend("Failed to open temporary sled database"))?;
        Ok(Self { db })
    }

    /// Get the underlying sled database (for advanced operations)
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    fn prefix(entity: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(entity.len() + 1);
        prefix.extend_from_slice(entity.as_bytes());
        prefix.push(0);
        prefix
    }

    fn record_key(entity: &str, id: ObjectId) -> Vec<u8> {
        let mut key = Self::prefix(entity);
        key.extend_from_slice(&id.to_key_bytes());
        key
    }

    fn decode(bytes: &[u8]) -> Result<StoredRecord, StorageError> {
        bincode::deserialize(bytes)
            .map_err(|e| StorageError::Codec(format!("Failed to deserialize record: {}", e)))
    }
}

fn backend(message: &'static str) -> impl Fn(sled::Error) -> StorageError {
    move |e| StorageError::Backend(format!("{}: {}", message, e))
}

impl ObjectStore for SledObjectStore {
    fn load(&self, entity: &str, id: ObjectId) -> Result<Option<StoredRecord>, StorageError> {
        match self
            .db
            .get(Self::record_key(entity, id))
            .map_err(backend("Failed to get record"))?
        {
            Some(value) => Ok(Some(Self::decode(&value)?)),
            None => Ok(None),
        }
    }

    fn scan(&self, entity: &str) -> Result<Vec<StoredRecord>, StorageError> {
        let prefix = Self::prefix(entity);
        let mut records = Vec::new();
        for item in self.db.scan_prefix(&prefix) {
            let (key, value) = item.map_err(backend("Failed to iterate store"))?;
            if ObjectId::from_key_bytes(&key[prefix.len()..]).is_none() {
                return Err(StorageError::CorruptKey(String::from_utf8_lossy(&key).into_owned()));
            }
            records.push(Self::decode(&value)?);
        }
        Ok(records)
    }

    fn write(&self, batch: &WriteBatch) -> Result<(), StorageError> {
        let mut sled_batch = sled::Batch::default();

        for record in &batch.puts {
            let value = bincode::serialize(record)
                .map_err(|e| StorageError::Codec(format!("Failed to serialize record: {}", e)))?;
            sled_batch.insert(Self::record_key(&record.entity, record.id), value);
        }
        for (entity, id) in &batch.removes {
            sled_batch.remove(Self::record_key(entity, *id));
        }
        sled_batch.insert(NEXT_ID_KEY, batch.next_id.to_be_bytes().to_vec());

        self.db
            .apply_batch(sled_batch)
            .map_err(backend("Failed to apply batch"))?;
        Ok(())
    }

    fn next_id(&self) -> Result<u64, StorageError> {
        match self
            .db
            .get(NEXT_ID_KEY)
            .map_err(backend("Failed to read identifier high-water mark"))?
        {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                    StorageError::CorruptKey("identifier high-water mark".to_string())
                })?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(backend("Failed to flush database"))?;
        Ok(())
    }
}
