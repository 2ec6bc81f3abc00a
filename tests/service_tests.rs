use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use klistra::config::{Config, MAX_EXPIRY_SECS, MIN_EXPIRY_SECS};
use klistra::server::crypto::KdfParams;
use klistra::server::ids::IdGenerator;
use klistra::server::service::{NewPaste, PasteError, PasteService, ReadOutcome};
use klistra::server::time::ManualClock;
use klistra::server::Sweeper;
use klistra::{MemoryPasteStore, PasteRecord, PasteStore, SharedPasteStore, StoreError};
use regex::Regex;

const START: i64 = 1_700_000_000;

fn config() -> Config {
    Config {
        kdf: KdfParams {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        },
        ..Config::default()
    }
}

fn service_with(store: SharedPasteStore) -> (PasteService, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let service = PasteService::new(store, clock.clone(), &config());
    (service, clock)
}

fn service() -> (PasteService, Arc<ManualClock>) {
    service_with(Arc::new(MemoryPasteStore::new()))
}

fn paste(text: &str, expiry_secs: u64) -> NewPaste {
    NewPaste {
        expiry_secs,
        text: Some(text.into()),
        ..Default::default()
    }
}

fn protected(text: &str, expiry_secs: u64, credential: &str) -> NewPaste {
    NewPaste {
        protected: true,
        credential: Some(credential.into()),
        ..paste(text, expiry_secs)
    }
}

#[tokio::test]
async fn unprotected_paste_reveals_text_then_expires() {
    let (service, clock) = service();
    let created = service.create(paste("hello", 120)).await.unwrap();
    assert_eq!(created.expires_at, START + 120);

    match service.read(&created.id, None).await.unwrap() {
        ReadOutcome::Revealed {
            content,
            key_material,
            metadata,
        } => {
            assert_eq!(content.text.as_deref(), Some("hello"));
            assert!(key_material.is_some_and(|key| !key.is_empty()));
            assert!(!metadata.protected);
        }
        other => panic!("expected revealed paste, got {other:?}"),
    }

    clock.advance(121);
    assert!(matches!(
        service.read(&created.id, None).await,
        Err(PasteError::NotFound(_))
    ));
}

#[tokio::test]
async fn protected_paste_needs_the_right_password() {
    let (service, _clock) = service();
    let created = service
        .create(protected("secret", 3600, "pw1"))
        .await
        .unwrap();
    assert!(created.protected);
    assert!(created.key_material.is_none());

    for token in [None, Some(""), Some("wrong")] {
        match service.read(&created.id, token).await.unwrap() {
            ReadOutcome::MetadataOnly(metadata) => {
                assert!(metadata.protected);
                assert_eq!(metadata.id, created.id);
            }
            other => panic!("token {token:?} must not reveal content: {other:?}"),
        }
    }

    match service.read(&created.id, Some("pw1")).await.unwrap() {
        ReadOutcome::Revealed {
            content,
            key_material,
            ..
        } => {
            assert_eq!(content.text.as_deref(), Some("secret"));
            assert_eq!(key_material, None);
        }
        other => panic!("expected revealed paste, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let (service, _clock) = service();
    assert!(matches!(
        service.read("calm-heron-000000", None).await,
        Err(PasteError::NotFound(_))
    ));
    assert!(matches!(
        service.status("calm-heron-000000").await,
        Err(PasteError::NotFound(_))
    ));
}

#[tokio::test]
async fn status_never_needs_a_password() {
    let (service, _clock) = service();
    let locked = service.create(protected("x", 60, "pw")).await.unwrap();
    let open = service.create(paste("y", 60)).await.unwrap();

    assert!(service.status(&locked.id).await.unwrap().protected);
    assert!(!service.status(&open.id).await.unwrap().protected);
}

#[tokio::test]
async fn expiry_bounds_are_inclusive() {
    let (service, _clock) = service();

    for secs in [MIN_EXPIRY_SECS - 1, MAX_EXPIRY_SECS + 1] {
        assert!(
            matches!(
                service.create(paste("x", secs)).await,
                Err(PasteError::Validation(_))
            ),
            "{secs}s should be rejected"
        );
    }
    for secs in [MIN_EXPIRY_SECS, MAX_EXPIRY_SECS] {
        let created = service.create(paste("x", secs)).await.unwrap();
        assert_eq!(created.expires_at, START + secs as i64);
    }
}

#[tokio::test]
async fn paste_is_readable_through_its_last_second() {
    let (service, clock) = service();
    let created = service.create(paste("edge", 60)).await.unwrap();

    clock.set(created.expires_at);
    assert!(service.read(&created.id, None).await.is_ok());
    clock.advance(1);
    assert!(service.read(&created.id, None).await.is_err());
}

#[tokio::test]
async fn ids_follow_the_word_pattern() {
    let (service, _clock) = service();
    let pattern = Regex::new(r"^[a-z]+-[a-z]+-[0-9a-f]{6}$").unwrap();
    for _ in 0..50 {
        let created = service.create(paste("x", 60)).await.unwrap();
        assert!(pattern.is_match(&created.id), "unexpected id {}", created.id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_creates_never_share_an_id() {
    let (service, _clock) = service();
    let service = Arc::new(service);

    let tasks: Vec<_> = (0..10_000)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.create(paste(&format!("paste {i}"), 600)).await })
        })
        .collect();

    let mut ids = HashSet::new();
    for task in tasks {
        let created = task.await.unwrap().unwrap();
        assert!(ids.insert(created.id), "duplicate id issued");
    }
    assert_eq!(ids.len(), 10_000);
    assert_eq!(service.store().len().await.unwrap(), 10_000);
}

#[tokio::test]
async fn sweeper_purges_expired_pastes_idempotently() {
    let (service, clock) = service();
    for _ in 0..3 {
        service.create(paste("short", 60)).await.unwrap();
    }
    let kept = service.create(paste("long", 3600)).await.unwrap();

    let sweeper = Sweeper::new(
        Arc::clone(service.store()),
        clock.clone(),
        Duration::from_secs(60),
    );
    assert_eq!(sweeper.run_once().await.unwrap(), 0);

    clock.advance(61);
    assert_eq!(sweeper.run_once().await.unwrap(), 3);
    assert_eq!(sweeper.run_once().await.unwrap(), 0);
    assert_eq!(sweeper.run_once().await.unwrap(), 0);
    assert!(service.read(&kept.id, None).await.is_ok());
}

/// Every id looks free, but another writer always wins the insert.
struct RacingStore {
    creates: AtomicUsize,
}

#[async_trait]
impl PasteStore for RacingStore {
    async fn create(&self, record: PasteRecord) -> Result<(), StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Conflict(record.id))
    }
    async fn get(&self, id: &str, _now: i64) -> Result<PasteRecord, StoreError> {
        Err(StoreError::NotFound(id.to_string()))
    }
    async fn exists(&self, _id: &str, _now: i64) -> Result<bool, StoreError> {
        Ok(false)
    }
    async fn delete_expired(&self, _now: i64) -> Result<usize, StoreError> {
        Ok(0)
    }
    async fn len(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[tokio::test]
async fn lost_races_end_in_generation_exhausted() {
    let store = Arc::new(RacingStore {
        creates: AtomicUsize::new(0),
    });
    let (service, _clock) = service_with(store.clone());
    let service = service.with_id_generator(IdGenerator::new(5));

    assert!(matches!(
        service.create(paste("x", 60)).await,
        Err(PasteError::GenerationExhausted)
    ));
    assert_eq!(store.creates.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn store_failures_are_surfaced() {
    let (service, _clock) = service();
    service.store().close().await.unwrap();

    assert!(matches!(
        service.create(paste("x", 60)).await,
        Err(PasteError::Store(StoreError::Closed))
    ));
    assert!(matches!(
        service.read("any", None).await,
        Err(PasteError::Store(StoreError::Closed))
    ));
}
