//! Shared per-collection document store.
//!
//! Holds the latest version of every live document plus the `DOCID` → internal
//! id mapping. Backends read from it; only the task service writes to it.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::{DashMap, mapref::entry::Entry};

use crate::domain::document::{DocId, Document};

#[derive(Debug)]
pub struct DocumentStore {
  documents: DashMap<DocId, Document>,
  keys: DashMap<String, DocId>,
  next_id: AtomicU32,
}

impl Default for DocumentStore {
  fn default() -> Self {
    Self::new()
  }
}

impl DocumentStore {
  pub fn new() -> Self {
    Self {
      documents: DashMap::new(),
      keys: DashMap::new(),
      next_id: AtomicU32::new(1),
    }
  }

  /// Reserve the next internal id.
  pub fn allocate_id(&self) -> DocId {
    DocId(self.next_id.fetch_add(1, Ordering::Relaxed))
  }

  /// Insert `doc` only if its key is not mapped yet. The key is reserved
  /// atomically, so concurrent inserts of one key store exactly one document.
  /// Hands the document back when the key is taken.
  pub fn insert_new(&self, doc: Document) -> Result<(), Document> {
    match self.keys.entry(doc.key.clone()) {
      Entry::Occupied(_) => Err(doc),
      Entry::Vacant(slot) => {
        let id = doc.id;
        self.documents.insert(id, doc);
        slot.insert(id);
        Ok(())
      }
    }
  }

  /// Insert or replace a document, keeping the key mapping in sync.
  pub fn put(&self, doc: Document) {
    if let Some(previous) = self.documents.get(&doc.id)
      && previous.key != doc.key
    {
      self.keys.remove(&previous.key);
    }
    self.keys.insert(doc.key.clone(), doc.id);
    self.documents.insert(doc.id, doc);
  }

  pub fn remove(&self, id: DocId) -> Option<Document> {
    let (_, doc) = self.documents.remove(&id)?;
    self.keys.remove_if(&doc.key, |_, mapped| *mapped == id);
    Some(doc)
  }

  pub fn get(&self, id: DocId) -> Option<Document> {
    self.documents.get(&id).map(|d| d.value().clone())
  }

  pub fn id_for_key(&self, key: &str) -> Option<DocId> {
    self.keys.get(key).map(|id| *id.value())
  }

  pub fn get_by_key(&self, key: &str) -> Option<Document> {
    self.id_for_key(key).and_then(|id| self.get(id))
  }

  /// Documents whose `property` renders to one of `values`, ordered by id.
  pub fn find_by_property(&self, property: &str, values: &[String]) -> Vec<Document> {
    let mut found: Vec<Document> = self
      .documents
      .iter()
      .filter(|entry| {
        entry
          .value()
          .property(property)
          .is_some_and(|v| values.iter().any(|wanted| *wanted == v.to_string()))
      })
      .map(|entry| entry.value().clone())
      .collect();
    found.sort_by_key(|d| d.id);
    found
  }

  /// Ids of every live document, ascending.
  pub fn ids(&self) -> Vec<DocId> {
    let mut ids: Vec<DocId> = self.documents.iter().map(|entry| *entry.key()).collect();
    ids.sort();
    ids
  }

  pub fn len(&self) -> usize {
    self.documents.len()
  }

  pub fn is_empty(&self) -> bool {
    self.documents.is_empty()
  }
}
