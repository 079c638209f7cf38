//! In-memory inverted index over a collection's indexed string properties.
//!
//! A real-time index applies every mutation immediately. A non-real-time
//! index buffers mutations and applies them on `flush`, `finish_index` and
//! `post_process_for_api`, so searches only see flushed state.

use std::{
  collections::{BTreeMap, HashMap},
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{backend::IndexBackend, store::DocumentStore};
use crate::domain::document::{DocId, Document, Timestamp, UpdateType};

/// Split text into lowercase alphanumeric terms.
pub fn tokenize(text: &str) -> Vec<String> {
  text
    .split(|c: char| !c.is_alphanumeric())
    .filter(|word| !word.is_empty())
    .map(|word| word.to_lowercase())
    .collect()
}

/// (property, term)
type PostingKey = (String, String);

enum PendingOp {
  Index(Document),
  Remove(DocId),
}

/// A scored hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TermHit {
  pub id: DocId,
  pub score: f32,
}

pub struct TermIndex {
  name: String,
  properties: Vec<String>,
  real_time: bool,
  store: Arc<DocumentStore>,
  /// (property, term) -> doc -> term frequency
  postings: DashMap<PostingKey, BTreeMap<DocId, u32>>,
  /// doc -> posting keys it contributes to, for removal
  doc_terms: DashMap<DocId, Vec<PostingKey>>,
  pending: Mutex<Vec<PendingOp>>,
  flushes: AtomicU64,
  optimizations: AtomicU64,
  last_build: Mutex<Option<Timestamp>>,
}

impl TermIndex {
  pub fn new(collection: &str, properties: Vec<String>, real_time: bool, store: Arc<DocumentStore>) -> Self {
    Self {
      name: format!("{}-terms", collection),
      properties,
      real_time,
      store,
      postings: DashMap::new(),
      doc_terms: DashMap::new(),
      pending: Mutex::new(Vec::new()),
      flushes: AtomicU64::new(0),
      optimizations: AtomicU64::new(0),
      last_build: Mutex::new(None),
    }
  }

  pub fn properties(&self) -> &[String] {
    &self.properties
  }

  pub fn indexed_count(&self) -> usize {
    self.doc_terms.len()
  }

  /// Distinct (property, term) pairs with at least one posting.
  pub fn term_count(&self) -> usize {
    self.postings.len()
  }

  pub fn pending_count(&self) -> usize {
    self.pending.lock().len()
  }

  pub fn flush_count(&self) -> u64 {
    self.flushes.load(Ordering::Relaxed)
  }

  pub fn optimize_count(&self) -> u64 {
    self.optimizations.load(Ordering::Relaxed)
  }

  pub fn last_build(&self) -> Option<Timestamp> {
    *self.last_build.lock()
  }

  /// Term-frequency scored search. `properties` restricts the searched
  /// properties; empty searches all indexed ones. Hits are ordered by score
  /// descending, then by id.
  pub fn search(&self, query: &str, properties: &[String]) -> Vec<TermHit> {
    let terms = tokenize(query);
    if terms.is_empty() {
      return Vec::new();
    }

    let searched: Vec<&String> = if properties.is_empty() {
      self.properties.iter().collect()
    } else {
      self.properties.iter().filter(|p| properties.contains(*p)).collect()
    };

    let mut scores: HashMap<DocId, f32> = HashMap::new();
    for property in searched {
      for term in &terms {
        let key = (property.clone(), term.clone());
        if let Some(posting) = self.postings.get(&key) {
          for (id, tf) in posting.value() {
            *scores.entry(*id).or_insert(0.0) += *tf as f32;
          }
        }
      }
    }

    let mut hits: Vec<TermHit> = scores.into_iter().map(|(id, score)| TermHit { id, score }).collect();
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
    trace!(index = %self.name, query, hits = hits.len(), "Term search");
    hits
  }

  fn terms_of(&self, doc: &Document) -> HashMap<PostingKey, u32> {
    let mut counts = HashMap::new();
    for property in &self.properties {
      if let Some(text) = doc.property(property).and_then(|v| v.as_text()) {
        for term in tokenize(text) {
          *counts.entry((property.clone(), term)).or_insert(0) += 1;
        }
      }
    }
    counts
  }

  fn index_now(&self, doc: &Document) {
    self.unindex_now(doc.id);
    let counts = self.terms_of(doc);
    let keys: Vec<PostingKey> = counts.keys().cloned().collect();
    for (key, tf) in counts {
      self.postings.entry(key).or_default().insert(doc.id, tf);
    }
    self.doc_terms.insert(doc.id, keys);
  }

  fn unindex_now(&self, id: DocId) {
    if let Some((_, keys)) = self.doc_terms.remove(&id) {
      for key in keys {
        if let Some(mut posting) = self.postings.get_mut(&key) {
          posting.remove(&id);
        }
        self.postings.remove_if(&key, |_, posting| posting.is_empty());
      }
    }
  }

  fn apply(&self, op: PendingOp) {
    if self.real_time {
      self.apply_now(op);
    } else {
      self.pending.lock().push(op);
    }
  }

  fn apply_now(&self, op: PendingOp) {
    match op {
      PendingOp::Index(doc) => self.index_now(&doc),
      PendingOp::Remove(id) => self.unindex_now(id),
    }
  }

  fn drain_pending(&self) {
    let ops = std::mem::take(&mut *self.pending.lock());
    if !ops.is_empty() {
      debug!(index = %self.name, count = ops.len(), "Applying buffered mutations");
    }
    for op in ops {
      self.apply_now(op);
    }
  }

  fn indexed_text_changed(&self, old: &Document, new: &Document) -> bool {
    self.properties.iter().any(|p| old.property(p) != new.property(p))
  }
}

impl IndexBackend for TermIndex {
  fn name(&self) -> &str {
    &self.name
  }

  fn is_real_time(&self) -> bool {
    self.real_time
  }

  fn flush(&self, _force: bool) {
    self.drain_pending();
    self.flushes.fetch_add(1, Ordering::Relaxed);
  }

  fn optimize(&self, _wait: bool) {
    self.postings.retain(|_, posting| !posting.is_empty());
    self.optimizations.fetch_add(1, Ordering::Relaxed);
  }

  fn pre_build_from_scd(&self, total_file_size: u64) {
    debug!(index = %self.name, total_file_size, "Starting SCD build");
  }

  fn post_build_from_scd(&self, timestamp: Timestamp) {
    self.drain_pending();
    *self.last_build.lock() = Some(timestamp);
  }

  fn pre_mining(&self) {}

  fn post_mining(&self) {}

  fn finish_index(&self) {
    self.drain_pending();
  }

  fn finish_rebuild(&self) {
    // Rebuild starts from the store, so reindex every live document.
    self.pending.lock().clear();
    self.postings.clear();
    self.doc_terms.clear();
    for id in self.store.ids() {
      if let Some(doc) = self.store.get(id) {
        self.index_now(&doc);
      }
    }
    debug!(index = %self.name, documents = self.doc_terms.len(), "Rebuilt term index");
  }

  fn pre_process_for_api(&self) {}

  fn post_process_for_api(&self) {
    self.drain_pending();
  }

  fn insert_document(&self, doc: &Document, _timestamp: Timestamp) -> bool {
    if self.doc_terms.contains_key(&doc.id) {
      return false;
    }
    self.apply(PendingOp::Index(doc.clone()));
    true
  }

  fn update_document(
    &self,
    old_doc: &Document,
    _old_rtype_doc: &Document,
    new_doc: &Document,
    update_type: UpdateType,
    _timestamp: Timestamp,
  ) -> bool {
    if update_type != UpdateType::General && !self.indexed_text_changed(old_doc, new_doc) {
      return true;
    }
    self.apply(PendingOp::Index(new_doc.clone()));
    true
  }

  fn remove_document(&self, id: DocId, _timestamp: Timestamp) {
    self.apply(PendingOp::Remove(id));
  }
}
