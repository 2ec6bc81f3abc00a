use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::{PasteRecord, PasteStore, StoreError};

/// Paste store on an Upstash-compatible Redis REST endpoint.
///
/// Keys carry a native TTL, so `delete_expired` has nothing to do; `create`
/// is a single `SET .. EX .. NX`, which is the atomic insert-if-absent.
pub struct RedisPasteStore {
    client: Client,
    base_url: String,
    token: String,
    key_prefix: String,
    closed: AtomicBool,
}

#[derive(Deserialize)]
struct RedisResponse {
    #[serde(default)]
    result: Value,
    error: Option<String>,
}

impl RedisPasteStore {
    pub fn new(base_url: &str, token: &str, key_prefix: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            key_prefix: key_prefix.to_string(),
            closed: AtomicBool::new(false),
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    async fn command(&self, args: &[String]) -> Result<Value, String> {
        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(args)
            .send()
            .await
            .map_err(|error| error.to_string())?;

        let status = response.status();
        let body: RedisResponse = response
            .json()
            .await
            .map_err(|error| format!("unreadable Redis response ({status}): {error}"))?;

        if let Some(error) = body.error {
            return Err(format!("Redis command failed: {error}"));
        }
        if !status.is_success() {
            return Err(format!("Redis command failed with status {status}"));
        }
        Ok(body.result)
    }
}

#[async_trait]
impl PasteStore for RedisPasteStore {
    async fn create(&self, record: PasteRecord) -> Result<(), StoreError> {
        self.ensure_open()?;
        let serialized = serde_json::to_string(&record)?;
        // Keep the key through the whole `expires_at` second.
        let ttl = record.expires_at - record.created_at + 1;
        if ttl <= 0 {
            return Err(StoreError::Save(
                record.id,
                "record is already expired".into(),
            ));
        }

        let args = [
            "SET".to_string(),
            self.key(&record.id),
            serialized,
            "EX".to_string(),
            ttl.to_string(),
            "NX".to_string(),
        ];
        match self.command(&args).await {
            Ok(Value::Null) => Err(StoreError::Conflict(record.id)),
            Ok(_) => Ok(()),
            Err(error) => Err(StoreError::Save(record.id, error)),
        }
    }

    async fn get(&self, id: &str, now: i64) -> Result<PasteRecord, StoreError> {
        self.ensure_open()?;
        let result = self
            .command(&["GET".to_string(), self.key(id)])
            .await
            .map_err(|error| StoreError::Load(id.to_string(), error))?;

        match result {
            Value::String(json) => {
                let record: PasteRecord = serde_json::from_str(&json)?;
                if record.is_expired(now) {
                    Err(StoreError::NotFound(id.to_string()))
                } else {
                    Ok(record)
                }
            }
            Value::Null => Err(StoreError::NotFound(id.to_string())),
            other => Err(StoreError::Load(
                id.to_string(),
                format!("unexpected GET result: {other}"),
            )),
        }
    }

    async fn exists(&self, id: &str, _now: i64) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let result = self
            .command(&["EXISTS".to_string(), self.key(id)])
            .await
            .map_err(|error| StoreError::Load(id.to_string(), error))?;
        Ok(result.as_i64().unwrap_or_default() > 0)
    }

    async fn delete_expired(&self, _now: i64) -> Result<usize, StoreError> {
        self.ensure_open()?;
        log::debug!("redis expires paste keys natively, nothing to purge");
        Ok(0)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.ensure_open()?;
        let pattern = format!("{}*", self.key_prefix);
        let result = self
            .command(&["KEYS".to_string(), pattern])
            .await
            .map_err(|error| StoreError::Load(self.key_prefix.clone(), error))?;
        Ok(result.as_array().map(Vec::len).unwrap_or_default())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
