//! Concurrency-safe keyed store of independently lockable resources
//!
//! The map itself sits behind a reader/writer lock; each resource sits behind
//! its own mutex. Mutation follows a fixed sequence:
//!
//! 1. look the resource up under the shared map lock, then release it
//! 2. lock the resource itself
//! 3. mutate, including slow external calls, holding only the resource lock
//! 4. [`ResourceGuard::publish`] briefly takes the exclusive map lock and
//!    confirms the same resource is still registered under its key
//!
//! A resource deleted or replaced between steps 1 and 4 yields `NotFound` at
//! step 4 and is never put back. The map lock is never held while waiting for
//! a resource lock.
//!
//! Next to each resource the registry keeps its last published
//! [`Resource::Snapshot`]. Readers use [`ResourceRegistry::snapshot`] and
//! [`ResourceRegistry::snapshots`], which never wait for a resource lock, so
//! a long mutation of one resource does not stall readers of any resource.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};

use crate::errors::RegistryError;

/// Anything the registry can store
pub trait Resource: Send + 'static {
    /// Read-only copy handed to readers that must not wait for the resource lock
    type Snapshot: Clone + Send + Sync + 'static;

    /// Canonical key the resource is registered under
    fn key(&self) -> &str;

    fn snapshot(&self) -> Self::Snapshot;
}

/// Handle to a registered resource
pub type Shared<R> = Arc<Mutex<R>>;

type Published<R> = Arc<StdRwLock<<R as Resource>::Snapshot>>;

struct Slot<R: Resource> {
    resource: Shared<R>,
    published: Published<R>,
}

impl<R: Resource> Clone for Slot<R> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            published: self.published.clone(),
        }
    }
}

fn read_published<S: Clone>(cell: &StdRwLock<S>) -> S {
    cell.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write_published<S>(cell: &StdRwLock<S>, value: S) {
    *cell.write().unwrap_or_else(PoisonError::into_inner) = value;
}

pub struct ResourceRegistry<R: Resource> {
    entries: Arc<RwLock<HashMap<String, Slot<R>>>>,
}

impl<R: Resource> Clone for ResourceRegistry<R> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<R: Resource> Default for ResourceRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> ResourceRegistry<R> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert or overwrite by key, returning the new handle
    pub async fn insert(&self, resource: R) -> Shared<R> {
        let key = resource.key().to_string();
        let published = Arc::new(StdRwLock::new(resource.snapshot()));
        let handle = Arc::new(Mutex::new(resource));
        let slot = Slot {
            resource: handle.clone(),
            published,
        };

        let replaced = self
            .entries
            .write()
            .await
            .insert(key.clone(), slot)
            .is_some();
        debug!(
            "{} resource '{}'",
            if replaced { "Replaced" } else { "Registered" },
            key
        );
        handle
    }

    async fn slot(&self, key: &str) -> Result<Slot<R>, RegistryError> {
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                path: key.to_string(),
            })
    }

    pub async fn lookup(&self, key: &str) -> Result<Shared<R>, RegistryError> {
        Ok(self.slot(key).await?.resource)
    }

    /// Last published snapshot of `key`, without touching the resource lock
    pub async fn snapshot(&self, key: &str) -> Result<R::Snapshot, RegistryError> {
        let slot = self.slot(key).await?;
        Ok(read_published(&slot.published))
    }

    /// Published snapshots of every resource, ordered by key
    pub async fn snapshots(&self) -> Vec<R::Snapshot> {
        let entries = self.entries.read().await;
        let mut slots: Vec<(&String, &Slot<R>)> = entries.iter().collect();
        slots.sort_by(|a, b| a.0.cmp(b.0));
        slots
            .into_iter()
            .map(|(_, slot)| read_published(&slot.published))
            .collect()
    }

    /// Remove by key. Returns whether a resource was removed.
    pub async fn delete(&self, key: &str) -> bool {
        let removed = self.entries.write().await.remove(key).is_some();
        if removed {
            debug!("Removed resource '{}'", key);
        }
        removed
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// Snapshot of every handle, ordered by key
    pub async fn list(&self) -> Vec<Shared<R>> {
        let entries = self.entries.read().await;
        let mut slots: Vec<(&String, &Slot<R>)> = entries.iter().collect();
        slots.sort_by(|a, b| a.0.cmp(b.0));
        slots
            .into_iter()
            .map(|(_, slot)| slot.resource.clone())
            .collect()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Look up `key` and lock the resource for mutation
    ///
    /// The map lock is released before the resource lock is awaited.
    pub async fn checkout(&self, key: &str) -> Result<ResourceGuard<R>, RegistryError> {
        let slot = self.slot(key).await?;
        let guard = slot.resource.clone().lock_owned().await;

        Ok(ResourceGuard {
            registry: self.clone(),
            key: key.to_string(),
            slot,
            guard,
        })
    }
}

/// Exclusive access to one resource obtained through [`ResourceRegistry::checkout`]
pub struct ResourceGuard<R: Resource> {
    registry: ResourceRegistry<R>,
    key: String,
    slot: Slot<R>,
    guard: OwnedMutexGuard<R>,
}

impl<R: Resource> ResourceGuard<R> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Expose the current state to readers while keeping the checkout
    pub fn share(&self) {
        write_published(&self.slot.published, self.guard.snapshot());
    }

    /// Confirm the resource is still the one registered under its key and
    /// publish its snapshot
    ///
    /// Fails with `NotFound` when it was deleted or replaced after checkout;
    /// the mutation then stays on the detached object and the map is untouched.
    pub async fn publish(self) -> Result<(), RegistryError> {
        let entries = self.registry.entries.write().await;
        match entries.get(&self.key) {
            Some(current) if Arc::ptr_eq(&current.resource, &self.slot.resource) => {
                write_published(&self.slot.published, self.guard.snapshot());
                Ok(())
            }
            _ => {
                warn!(
                    "Resource '{}' was removed while being modified; discarding changes",
                    self.key
                );
                Err(RegistryError::NotFound {
                    path: self.key.clone(),
                })
            }
        }
    }
}

impl<R: Resource> Deref for ResourceGuard<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.guard
    }
}

impl<R: Resource> DerefMut for ResourceGuard<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.guard
    }
}
