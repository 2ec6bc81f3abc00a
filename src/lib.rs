use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

pub mod config;
pub mod server;

use crate::config::StoreBackend;
use crate::server::redis::RedisPasteStore;
use crate::server::sqlite::SqlitePasteStore;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionAlgorithm {
    #[default]
    Aes256Gcm,
    #[serde(rename = "chacha20_poly1305")]
    ChaCha20Poly1305,
    #[serde(rename = "xchacha20_poly1305")]
    XChaCha20Poly1305,
}

/// Authenticated ciphertext plus the nonce it was sealed with, both base64.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SealedPayload {
    pub algorithm: EncryptionAlgorithm,
    pub nonce: String,
    pub ciphertext: String,
}

/// A file attached to a paste. The blob itself lives elsewhere; the paste
/// only carries the reference, encrypted alongside the text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// How a paste is gated.
///
/// `Credential` pastes keep only a verifier derived from the creator's
/// password; the content key is re-derived from whatever token a reader
/// presents. `Open` pastes keep the random content key itself and hand it
/// to every reader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PasteAccess {
    Credential { verifier: String },
    Open { key: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PasteRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<SealedPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<SealedPayload>,
    pub access: PasteAccess,
    pub salt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

impl PasteRecord {
    pub fn is_protected(&self) -> bool {
        matches!(self.access, PasteAccess::Credential { .. })
    }

    /// A record is readable up to and including its `expires_at` second.
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("paste id already taken: {0}")]
    Conflict(String),
    #[error("paste not found: {0}")]
    NotFound(String),
    #[error("store write failed for {0}: {1}")]
    Save(String, String),
    #[error("store read failed for {0}: {1}")]
    Load(String, String),
    #[error("expired paste purge failed: {0}")]
    Purge(String),
    #[error("store has been closed")]
    Closed,
    #[error("paste record could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// TTL-aware persistence for paste records.
///
/// `create` is the only uniqueness primitive: it must fail with
/// [`StoreError::Conflict`] when a live record already holds the id, and it
/// must be atomic with respect to concurrent creates of the same id.
/// Liveness of an existing record is judged at the new record's
/// `created_at`; a stale record is replaced in place.
#[async_trait]
pub trait PasteStore: Send + Sync + 'static {
    async fn create(&self, record: PasteRecord) -> Result<(), StoreError>;
    async fn get(&self, id: &str, now: i64) -> Result<PasteRecord, StoreError>;
    async fn exists(&self, id: &str, now: i64) -> Result<bool, StoreError>;
    async fn delete_expired(&self, now: i64) -> Result<usize, StoreError>;
    /// Number of records held, including expired ones not yet purged.
    async fn len(&self) -> Result<usize, StoreError>;
    async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }
    async fn close(&self) -> Result<(), StoreError>;
}

pub type SharedPasteStore = Arc<dyn PasteStore>;

pub struct MemoryPasteStore {
    entries: RwLock<Option<HashMap<String, PasteRecord>>>,
}

impl MemoryPasteStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Some(HashMap::new())),
        }
    }
}

impl Default for MemoryPasteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PasteStore for MemoryPasteStore {
    async fn create(&self, record: PasteRecord) -> Result<(), StoreError> {
        let mut guard = self.entries.write().await;
        let map = guard.as_mut().ok_or(StoreError::Closed)?;
        match map.get(&record.id) {
            Some(existing) if !existing.is_expired(record.created_at) => {
                Err(StoreError::Conflict(record.id))
            }
            _ => {
                map.insert(record.id.clone(), record);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str, now: i64) -> Result<PasteRecord, StoreError> {
        {
            let guard = self.entries.read().await;
            let map = guard.as_ref().ok_or(StoreError::Closed)?;
            match map.get(id) {
                Some(record) if !record.is_expired(now) => return Ok(record.clone()),
                Some(_) => {}
                None => return Err(StoreError::NotFound(id.to_string())),
            }
        }

        // Lazily drop the stale entry; re-check under the write lock since a
        // create may have replaced it in between.
        let mut guard = self.entries.write().await;
        let map = guard.as_mut().ok_or(StoreError::Closed)?;
        match map.get(id) {
            Some(record) if !record.is_expired(now) => Ok(record.clone()),
            Some(_) => {
                map.remove(id);
                Err(StoreError::NotFound(id.to_string()))
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn exists(&self, id: &str, now: i64) -> Result<bool, StoreError> {
        let guard = self.entries.read().await;
        let map = guard.as_ref().ok_or(StoreError::Closed)?;
        Ok(map.get(id).is_some_and(|record| !record.is_expired(now)))
    }

    async fn delete_expired(&self, now: i64) -> Result<usize, StoreError> {
        let mut guard = self.entries.write().await;
        let map = guard.as_mut().ok_or(StoreError::Closed)?;
        let before = map.len();
        map.retain(|_, record| !record.is_expired(now));
        Ok(before - map.len())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let guard = self.entries.read().await;
        guard.as_ref().map(HashMap::len).ok_or(StoreError::Closed)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.entries.write().await.take();
        Ok(())
    }
}

/// Opens the backend named by the configuration.
pub async fn create_paste_store(backend: &StoreBackend) -> Result<SharedPasteStore, StoreError> {
    match backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryPasteStore::new())),
        StoreBackend::Sqlite { path } => {
            let store = SqlitePasteStore::open(path.clone()).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Redis {
            url,
            token,
            key_prefix,
        } => Ok(Arc::new(RedisPasteStore::new(url, token, key_prefix))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, created_at: i64, expires_at: i64) -> PasteRecord {
        PasteRecord {
            id: id.to_string(),
            text: Some(SealedPayload {
                algorithm: EncryptionAlgorithm::Aes256Gcm,
                nonce: "bm9uY2U=".into(),
                ciphertext: "Y2lwaGVy".into(),
            }),
            files: None,
            access: PasteAccess::Open { key: "a2V5".into() },
            salt: "c2FsdA==".into(),
            language: None,
            created_at,
            expires_at,
        }
    }

    #[tokio::test]
    async fn creates_and_reads_record() {
        let store = MemoryPasteStore::default();
        store.create(record("calm-owl-0a0b0c", 100, 200)).await.unwrap();

        let stored = store.get("calm-owl-0a0b0c", 150).await.expect("record should exist");
        assert_eq!(stored.expires_at, 200);
        assert!(store.exists("calm-owl-0a0b0c", 150).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_duplicate_live_id() {
        let store = MemoryPasteStore::default();
        store.create(record("dup", 100, 200)).await.unwrap();

        let err = store.create(record("dup", 150, 300)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(id) if id == "dup"));
    }

    #[tokio::test]
    async fn stale_record_does_not_block_create() {
        let store = MemoryPasteStore::default();
        store.create(record("reuse", 100, 150)).await.unwrap();
        store.create(record("reuse", 200, 400)).await.unwrap();

        let stored = store.get("reuse", 250).await.unwrap();
        assert_eq!(stored.created_at, 200);
    }

    #[tokio::test]
    async fn expired_record_is_removed_on_read() {
        let store = MemoryPasteStore::default();
        store.create(record("stale", 100, 150)).await.unwrap();

        assert!(matches!(
            store.get("stale", 151).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn readable_at_exact_deadline() {
        let store = MemoryPasteStore::default();
        store.create(record("edge", 100, 150)).await.unwrap();
        assert!(store.get("edge", 150).await.is_ok());
    }

    #[tokio::test]
    async fn delete_expired_purges_only_stale_records() {
        let store = MemoryPasteStore::default();
        store.create(record("a", 0, 10)).await.unwrap();
        store.create(record("b", 0, 20)).await.unwrap();
        store.create(record("c", 0, 30)).await.unwrap();

        assert_eq!(store.delete_expired(25).await.unwrap(), 2);
        assert_eq!(store.delete_expired(25).await.unwrap(), 0);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn closed_store_refuses_operations() {
        let store = MemoryPasteStore::default();
        store.close().await.unwrap();

        assert!(matches!(
            store.create(record("x", 0, 10)).await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(store.get("x", 0).await, Err(StoreError::Closed)));
    }

    #[test]
    fn record_serialization_omits_absent_fields() {
        let json = serde_json::to_value(record("r", 1, 2)).unwrap();
        assert!(json.get("files").is_none());
        assert!(json.get("language").is_none());
        assert_eq!(json["access"]["mode"], "open");
    }
}
