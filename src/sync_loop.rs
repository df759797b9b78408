//! Background sync loop.
//!
//! Every `interval` the loop checks connectivity and, when online, sweeps the
//! retry queue through the reconciler. Results are fanned out to registered
//! listeners so a status indicator can follow sync completions without
//! polling the store.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sync::{SyncEngine, SyncResult};

/// Reports whether the remote order service is reachable.
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Connectivity for deployments without a probe.
pub struct AlwaysOnline;

#[async_trait]
impl Connectivity for AlwaysOnline {
    async fn is_online(&self) -> bool {
        true
    }
}

pub type SyncListener = Arc<dyn Fn(&[SyncResult]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, SyncListener)>,
}

/// State shared between the handle and the spawned loop task.
struct LoopShared {
    engine: Arc<SyncEngine>,
    connectivity: Arc<dyn Connectivity>,
    listeners: Mutex<Listeners>,
    previous_online: Mutex<Option<bool>>,
}

impl LoopShared {
    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn tick(&self) -> Option<Vec<SyncResult>> {
        let online = self.connectivity.is_online().await;
        let previous = {
            let mut prev = match self.previous_online.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            prev.replace(online)
        };

        if !online {
            if previous != Some(false) {
                info!("Network offline; deferring order sync");
            }
            return None;
        }
        if previous == Some(false) {
            info!("Network restored; resuming order sync");
        }

        let results = self.engine.process_sync_queue().await;
        if results.is_empty() {
            debug!("Sync tick: nothing to do");
        } else {
            let failed = results.iter().filter(|r| !r.success).count();
            info!(
                attempted = results.len(),
                failed,
                "Sync tick complete"
            );
        }

        // Snapshot so listeners run without the registry lock held.
        let listeners: Vec<SyncListener> = self
            .listeners()
            .entries
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(&results);
        }
        Some(results)
    }
}

struct Running {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct SyncLoop {
    shared: Arc<LoopShared>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl SyncLoop {
    pub fn new(
        engine: Arc<SyncEngine>,
        connectivity: Arc<dyn Connectivity>,
        interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(LoopShared {
                engine,
                connectivity,
                listeners: Mutex::new(Listeners::default()),
                previous_online: Mutex::new(None),
            }),
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start the loop. Calling it while running only registers `listener`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, listener: Option<SyncListener>) -> Option<ListenerId> {
        let id = listener.map(|l| self.add_listener(l));

        let mut running = self.running();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("Sync loop already running");
            return id;
        }

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let shared = self.shared.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs_f64(), "Sync loop started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                // A tick always runs to completion; stop takes effect after it.
                shared.tick().await;
            }
            info!("Sync loop stopped");
        });

        *running = Some(Running { shutdown, handle });
        id
    }

    /// Stop the loop and wait for an in-flight tick to finish. No-op when
    /// not running.
    pub async fn stop(&self) {
        let Some(running) = self.running().take() else {
            return;
        };
        running.shutdown.cancel();
        if let Err(e) = running.handle.await {
            warn!(error = %e, "Sync loop task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    pub fn add_listener(&self, listener: SyncListener) -> ListenerId {
        let mut listeners = self.shared.listeners();
        listeners.next_id += 1;
        let id = ListenerId(listeners.next_id);
        listeners.entries.push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners();
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry_id, _)| *entry_id != id);
        listeners.entries.len() != before
    }

    /// Run one tick now. `None` when the device is offline.
    pub async fn run_once(&self) -> Option<Vec<SyncResult>> {
        self.shared.tick().await
    }
}
