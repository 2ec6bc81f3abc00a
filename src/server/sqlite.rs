//! SQLite-backed paste store.
//!
//! One row per paste: the JSON record plus its `expires_at`, indexed so the
//! sweeper's purge is a range delete. rusqlite is synchronous, so every call
//! runs on the blocking pool behind a single mutex-guarded connection.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::{PasteRecord, PasteStore, StoreError};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS pastes (
        id TEXT PRIMARY KEY NOT NULL,
        record TEXT NOT NULL,
        expires_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS pastes_expires_at ON pastes (expires_at);
";

const STORE_NAME: &str = "sqlite";

pub struct SqlitePasteStore {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqlitePasteStore {
    pub async fn open(path: PathBuf) -> Result<Self, StoreError> {
        tokio::task::spawn_blocking(move || Self::open_blocking(&path))
            .await
            .map_err(|e| StoreError::Load(STORE_NAME.into(), e.to_string()))?
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(open_err)?;
        Self::from_connection(conn)
    }

    fn open_blocking(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Load(STORE_NAME.into(), e.to_string()))?;
        }

        let conn = Connection::open(path).map_err(open_err)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(open_err)?;
        log::info!("paste database opened at {} (journal {mode})", path.display());
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(open_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    async fn with_conn<F, T>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Load(STORE_NAME.into(), "connection lock poisoned".into()))?;
            let conn = guard.as_mut().ok_or(StoreError::Closed)?;
            op(conn)
        })
        .await
        .map_err(|e| StoreError::Load(STORE_NAME.into(), e.to_string()))?
    }
}

fn open_err(err: rusqlite::Error) -> StoreError {
    StoreError::Load(STORE_NAME.into(), err.to_string())
}

#[async_trait]
impl PasteStore for SqlitePasteStore {
    async fn create(&self, record: PasteRecord) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(&record)?;
        let PasteRecord {
            id,
            created_at,
            expires_at,
            ..
        } = record;

        self.with_conn(move |conn| {
            let save_err = |e: rusqlite::Error| StoreError::Save(id.clone(), e.to_string());
            let tx = conn.transaction().map_err(save_err)?;
            tx.execute(
                "DELETE FROM pastes WHERE id = ?1 AND expires_at < ?2",
                params![id, created_at],
            )
            .map_err(save_err)?;
            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO pastes (id, record, expires_at) VALUES (?1, ?2, ?3)",
                    params![id, serialized, expires_at],
                )
                .map_err(save_err)?;
            if inserted == 0 {
                return Err(StoreError::Conflict(id.clone()));
            }
            tx.commit().map_err(save_err)
        })
        .await
    }

    async fn get(&self, id: &str, now: i64) -> Result<PasteRecord, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let json: Option<String> = conn
                .query_row(
                    "SELECT record FROM pastes WHERE id = ?1 AND expires_at >= ?2",
                    params![id, now],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::Load(id.clone(), e.to_string()))?;
            match json {
                Some(json) => Ok(serde_json::from_str(&json)?),
                None => Err(StoreError::NotFound(id)),
            }
        })
        .await
    }

    async fn exists(&self, id: &str, now: i64) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM pastes WHERE id = ?1 AND expires_at >= ?2)",
                params![id, now],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::Load(id.clone(), e.to_string()))
        })
        .await
    }

    async fn delete_expired(&self, now: i64) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM pastes WHERE expires_at < ?1", params![now])
                .map_err(|e| StoreError::Purge(e.to_string()))
        })
        .await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM pastes", [], |row| row.get(0))
                .map_err(|e| StoreError::Load(STORE_NAME.into(), e.to_string()))?;
            Ok(count as usize)
        })
        .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Save(STORE_NAME.into(), "connection lock poisoned".into()))?;
            match guard.take() {
                Some(conn) => conn
                    .close()
                    .map_err(|(_, e)| StoreError::Save(STORE_NAME.into(), e.to_string())),
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| StoreError::Save(STORE_NAME.into(), e.to_string()))?
    }
}
