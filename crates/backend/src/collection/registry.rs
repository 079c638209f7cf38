//! CollectionRegistry - collection name to handler, one RW lock per collection.
//!
//! A lookup returns a guard that holds the collection's shared lock for as
//! long as the handler is in use. Registering, replacing or removing a
//! handler takes the exclusive lock, so a reader never sees a handler swapped
//! out from under it.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tracing::info;

use super::CollectionHandler;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
  #[error("Collection not found: {0}")]
  CollectionNotFound(String),
}

/// A collection's slot. Empty until registered and after removal.
pub type CollectionSlot = Arc<RwLock<Option<CollectionHandler>>>;

/// A handler borrowed under its collection's shared lock.
pub type CollectionGuard = OwnedRwLockReadGuard<Option<CollectionHandler>, CollectionHandler>;

#[derive(Default)]
pub struct CollectionRegistry {
  collections: DashMap<String, CollectionSlot>,
}

impl CollectionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// The lock guarding `name`, created empty if it does not exist yet.
  pub fn mutex_for(&self, name: &str) -> CollectionSlot {
    Arc::clone(self.collections.entry(name.to_string()).or_default().value())
  }

  /// Install `handler` under its name, returning the handler it replaced.
  pub async fn register(&self, handler: CollectionHandler) -> Option<CollectionHandler> {
    let name = handler.name().to_string();
    let slot = self.mutex_for(&name);
    let mut guard = slot.write().await;
    let previous = guard.replace(handler);
    if previous.is_some() {
      info!(collection = %name, "Replaced collection handler");
    } else {
      info!(collection = %name, "Registered collection");
    }
    previous
  }

  /// Resolve `name` and hold its shared lock until the guard is dropped.
  pub async fn lookup(&self, name: &str) -> Result<CollectionGuard, RegistryError> {
    let slot = self
      .collections
      .get(name)
      .map(|entry| Arc::clone(entry.value()))
      .ok_or_else(|| RegistryError::CollectionNotFound(name.to_string()))?;

    let guard = slot.read_owned().await;
    OwnedRwLockReadGuard::try_map(guard, |handler| handler.as_ref())
      .map_err(|_| RegistryError::CollectionNotFound(name.to_string()))
  }

  /// Clear the handler for `name`. The lock itself stays so later
  /// registrations reuse it.
  pub async fn remove(&self, name: &str) -> Option<CollectionHandler> {
    let slot = self.collections.get(name).map(|entry| Arc::clone(entry.value()))?;
    let removed = slot.write().await.take();
    if removed.is_some() {
      info!(collection = %name, "Removed collection");
    }
    removed
  }

  /// Names of collections that currently have a handler, sorted.
  pub async fn list(&self) -> Vec<String> {
    let slots: Vec<(String, CollectionSlot)> = self
      .collections
      .iter()
      .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
      .collect();

    let mut names = Vec::with_capacity(slots.len());
    for (name, slot) in slots {
      if slot.read().await.is_some() {
        names.push(name);
      }
    }
    names.sort();
    names
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use pretty_assertions::assert_eq;

  use super::*;
  use crate::collection::__tests__::helpers::handler;

  #[tokio::test]
  async fn test_lookup_missing_collection() {
    let registry = CollectionRegistry::new();
    let err = registry.lookup("books").await.unwrap_err();
    assert_eq!(err, RegistryError::CollectionNotFound("books".into()));
    assert_eq!(err.to_string(), "Collection not found: books");

    // An empty slot is still "not found".
    registry.mutex_for("books");
    assert!(registry.lookup("books").await.is_err());
  }

  #[tokio::test]
  async fn test_register_lookup_remove() {
    let registry = CollectionRegistry::new();
    assert!(registry.register(handler("books")).await.is_none());
    assert!(registry.register(handler("movies")).await.is_none());

    assert_eq!(registry.lookup("books").await.unwrap().name(), "books");
    assert_eq!(registry.list().await, vec!["books".to_string(), "movies".to_string()]);

    assert!(registry.remove("books").await.is_some());
    assert!(registry.lookup("books").await.is_err());
    assert_eq!(registry.list().await, vec!["movies".to_string()]);
    assert!(registry.remove("books").await.is_none());
  }

  #[tokio::test]
  async fn test_register_replaces_existing() {
    let registry = CollectionRegistry::new();
    registry.register(handler("books")).await;
    let previous = registry.register(handler("books")).await;
    assert_eq!(previous.map(|h| h.name().to_string()), Some("books".to_string()));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_replacement_waits_for_readers() {
    let registry = Arc::new(CollectionRegistry::new());
    registry.register(handler("books")).await;

    let reader = registry.lookup("books").await.unwrap();
    let writer = {
      let registry = Arc::clone(&registry);
      tokio::spawn(async move { registry.register(handler("books")).await })
    };

    // The writer cannot finish while the shared lock is held.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!writer.is_finished());
    assert_eq!(reader.name(), "books");

    drop(reader);
    let replaced = tokio::time::timeout(Duration::from_secs(5), writer)
      .await
      .expect("writer finished")
      .expect("writer joined");
    assert!(replaced.is_some());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_lookup_waits_for_writer() {
    let registry = Arc::new(CollectionRegistry::new());
    registry.register(handler("books")).await;

    let slot = registry.mutex_for("books");
    let mut exclusive = slot.write().await;
    let reader = {
      let registry = Arc::clone(&registry);
      tokio::spawn(async move { registry.lookup("books").await.map(|h| h.name().to_string()) })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!reader.is_finished());

    // Swap the handler out while the reader is blocked; it must see the result.
    *exclusive = None;
    drop(exclusive);
    let seen = reader.await.expect("reader joined");
    assert!(seen.is_err());
  }
}
