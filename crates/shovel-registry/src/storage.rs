//! Storage registry: a lazily-populated *name → instance* map built from
//! a single factory. Entries stay alive for the registry's lifetime once
//! created; `close` runs the instance's release hook and drops it.

use async_trait::async_trait;
use hashbrown::HashMap;
use shovel_common::Result;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An entry produced by a storage registry's factory. `release` runs
/// once, right before the entry is dropped from the registry, and never
/// on drop alone (a caller that never calls `close` leaks no I/O, but
/// also never gets a release callback).
#[async_trait]
pub trait StorageEntry: Send + Sync {
    async fn release(&self);
}

/// Lets a registry be instantiated over a type-erased entry, so a
/// caller that only knows entries as trait objects (caches, directories,
/// and databases pulled out of a config reifier, say) can still use
/// `StorageRegistry<BoxedEntry>`/`DatabaseRegistry<BoxedEntry>` directly.
pub type BoxedEntry = Arc<dyn StorageEntry>;

#[async_trait]
impl StorageEntry for BoxedEntry {
    async fn release(&self) {
        self.as_ref().release().await;
    }
}

/// A factory for one named instance. The data model allows the factory
/// to fail; failures are not cached, so the next `get` retries.
pub type Factory<T> = Box<dyn Fn(&str) -> Result<T> + Send + Sync>;

pub struct StorageRegistry<T: StorageEntry> {
    factory: Factory<T>,
    instances: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: StorageEntry> StorageRegistry<T> {
    pub fn new(factory: Factory<T>) -> Self {
        Self {
            factory,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the memoised instance for `name`, constructing it via the
    /// factory on first access. A factory error is propagated and not
    /// remembered: a later `get` with the same name retries.
    pub async fn get(&self, name: &str) -> Result<Arc<T>> {
        if let Some(existing) = self.instances.read().await.get(name) {
            return Ok(Arc::clone(existing));
        }

        let mut instances = self.instances.write().await;
        if let Some(existing) = instances.get(name) {
            return Ok(Arc::clone(existing));
        }

        let instance = Arc::new((self.factory)(name)?);
        instances.insert(name.to_string(), Arc::clone(&instance));
        Ok(instance)
    }

    pub async fn has(&self, name: &str) -> bool {
        self.instances.read().await.contains_key(name)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.instances.read().await.keys().cloned().collect()
    }

    /// Releases and removes a single entry. A no-op if `name` was never
    /// opened.
    pub async fn close(&self, name: &str) {
        let removed = self.instances.write().await.remove(name);
        if let Some(instance) = removed {
            instance.release().await;
        }
    }

    pub async fn close_all(&self) {
        let drained: Vec<_> = self.instances.write().await.drain().collect();
        for (_, instance) in drained {
            instance.release().await;
        }
    }
}
