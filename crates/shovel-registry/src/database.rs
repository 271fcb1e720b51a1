//! Database registry: a storage registry specialised with a version
//! gate. `get(name)` always returns a handle in state `unopened` — the
//! caller subscribes an `upgradeneeded` listener and calls `open(version)`
//! to run the handle through its migration under an exclusive lock.

use hashbrown::HashMap;
use shovel_common::{Result, ShovelError};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, RwLock};

use crate::storage::{Factory, StorageEntry};

/// Matches `crates/shovel-sw/src/event.rs`'s pending-future bookkeeping:
/// `upgradeneeded` listeners register futures synchronously via
/// `wait_until`, and `open` awaits them all after the listener loop
/// returns.
pub type PendingFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

const MIGRATION_BUDGET: Duration = Duration::from_secs(30);

pub struct UpgradeEvent {
    pub old_version: u64,
    pub new_version: u64,
    pending: SyncMutex<Vec<PendingFuture>>,
    dispatch_phase: AtomicBool,
}

impl UpgradeEvent {
    fn new(old_version: u64, new_version: u64) -> Self {
        Self {
            old_version,
            new_version,
            pending: SyncMutex::new(Vec::new()),
            dispatch_phase: AtomicBool::new(true),
        }
    }

    /// Registers a migration future. Synchronous: called directly from
    /// an `upgradeneeded` listener body.
    pub fn wait_until(&self, fut: PendingFuture) -> Result<()> {
        if !self.dispatch_phase.load(Ordering::SeqCst) {
            return Err(ShovelError::InvalidState(
                "waitUntil called after upgradeneeded dispatch ended".into(),
            ));
        }
        self.pending.lock().unwrap().push(fut);
        Ok(())
    }

    async fn settle(&self, budget: Duration) -> Result<()> {
        self.dispatch_phase.store(false, Ordering::SeqCst);
        let pending: Vec<_> = std::mem::take(&mut *self.pending.lock().unwrap());
        tokio::time::timeout(budget, async {
            for fut in pending {
                fut.await?;
            }
            Ok(())
        })
        .await
        .map_err(|_| ShovelError::LifecycleTimeout(budget))?
    }
}

pub type UpgradeListener = Box<dyn Fn(&UpgradeEvent) + Send + Sync>;

pub struct DatabaseHandle<T> {
    pub name: String,
    adapter: T,
    persisted_version: AsyncMutex<u64>,
    upgrade_listeners: RwLock<Vec<UpgradeListener>>,
}

impl<T> DatabaseHandle<T> {
    pub fn adapter(&self) -> &T {
        &self.adapter
    }

    pub async fn add_upgrade_listener(&self, listener: UpgradeListener) {
        self.upgrade_listeners.write().await.push(listener);
    }

    pub async fn version(&self) -> u64 {
        *self.persisted_version.lock().await
    }

    /// Runs the handle's migration sequence. A no-op once the persisted
    /// version already matches `requested`. Rejects downgrades, since
    /// migrations are forward-only.
    pub async fn open(&self, requested: u64) -> Result<()> {
        let mut persisted = self.persisted_version.lock().await;
        if requested < *persisted {
            return Err(ShovelError::InvalidArgument(format!(
                "database '{}' cannot downgrade from version {} to {}",
                self.name, *persisted, requested
            )));
        }
        if requested == *persisted {
            return Ok(());
        }

        let event = UpgradeEvent::new(*persisted, requested);
        {
            let listeners = self.upgrade_listeners.read().await;
            for listener in listeners.iter() {
                listener(&event);
            }
        }
        event.settle(MIGRATION_BUDGET).await?;
        *persisted = requested;
        Ok(())
    }
}

pub struct DatabaseRegistry<T: StorageEntry> {
    factory: Factory<T>,
    handles: RwLock<HashMap<String, Arc<DatabaseHandle<T>>>>,
}

impl<T: StorageEntry> DatabaseRegistry<T> {
    pub fn new(factory: Factory<T>) -> Self {
        Self {
            factory,
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Always returns a handle in state `unopened`: the adapter may
    /// already have dialed its driver, but the handle's own version gate
    /// has not run until the caller calls `open`.
    pub async fn get(&self, name: &str) -> Result<Arc<DatabaseHandle<T>>> {
        if let Some(existing) = self.handles.read().await.get(name) {
            return Ok(Arc::clone(existing));
        }

        let mut handles = self.handles.write().await;
        if let Some(existing) = handles.get(name) {
            return Ok(Arc::clone(existing));
        }

        let adapter = (self.factory)(name)?;
        let handle = Arc::new(DatabaseHandle {
            name: name.to_string(),
            adapter,
            persisted_version: AsyncMutex::new(0),
            upgrade_listeners: RwLock::new(Vec::new()),
        });
        handles.insert(name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    pub async fn has(&self, name: &str) -> bool {
        self.handles.read().await.contains_key(name)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.handles.read().await.keys().cloned().collect()
    }

    pub async fn close(&self, name: &str) {
        let removed = self.handles.write().await.remove(name);
        if let Some(handle) = removed {
            handle.adapter.release().await;
        }
    }

    pub async fn close_all(&self) {
        let drained: Vec<_> = self.handles.write().await.drain().collect();
        for (_, handle) in drained {
            handle.adapter.release().await;
        }
    }
}
