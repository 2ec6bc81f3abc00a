//! Background purge of expired pastes.
//!
//! Reads already treat expired records as absent; the sweeper only reclaims
//! storage, so a slow or failed sweep never affects correctness.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::time::SharedClock;
use crate::{SharedPasteStore, StoreError};

pub struct Sweeper {
    store: SharedPasteStore,
    clock: SharedClock,
    interval: Duration,
}

impl Sweeper {
    pub fn new(store: SharedPasteStore, clock: SharedClock, interval: Duration) -> Self {
        Self {
            store,
            clock,
            interval,
        }
    }

    /// One purge pass; returns how many records were removed.
    pub async fn run_once(&self) -> Result<usize, StoreError> {
        self.store.delete_expired(self.clock.now()).await
    }

    async fn sweep_and_log(&self) {
        match self.run_once().await {
            Ok(0) => log::debug!("expiration sweep: no expired pastes"),
            Ok(count) => log::info!("expiration sweep: purged {count} expired pastes"),
            Err(err) => log::error!("expiration sweep failed: {err}"),
        }
    }

    /// Spawns the periodic sweep. The first pass runs one interval after
    /// start. Dropping the handle without calling `stop` also ends the task.
    pub fn start(self) -> SweeperHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            log::info!(
                "expiration sweeper started (every {}s)",
                self.interval.as_secs_f64()
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.sweep_and_log().await,
                    _ = shutdown_rx.changed() => break,
                }
            }
            log::info!("expiration sweeper stopped");
        });

        SweeperHandle { shutdown, task }
    }
}

pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the task and waits for an in-flight sweep to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            log::error!("expiration sweeper task join error: {err}");
        }
    }
}
