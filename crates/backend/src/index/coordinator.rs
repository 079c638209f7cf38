//! IncrementalIndexCoordinator - fans lifecycle and mutation calls out to every
//! registered index backend.
//!
//! # Ordering
//!
//! Backends are called synchronously, one after another, in registration
//! order. A later backend may rely on state an earlier one left in the shared
//! [`DocumentStore`].
//!
//! # Partial failure
//!
//! `insert_document` and `update_document` return the logical AND of every
//! backend's result, but every backend is always called. A backend that has
//! already applied the mutation is NOT rolled back when a later one rejects it.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::{
  backend::{IndexBackend, LifecyclePhase},
  store::DocumentStore,
};
use crate::domain::document::{DocId, Document, Mutation, Timestamp, UpdateType};

pub struct IncrementalIndexCoordinator {
  collection: String,
  backends: Vec<Arc<dyn IndexBackend>>,
  store: Arc<DocumentStore>,
  phase: Mutex<LifecyclePhase>,
}

impl IncrementalIndexCoordinator {
  pub fn new(collection: impl Into<String>, store: Arc<DocumentStore>) -> Self {
    Self {
      collection: collection.into(),
      backends: Vec::new(),
      store,
      phase: Mutex::new(LifecyclePhase::Idle),
    }
  }

  /// Register a backend. Only possible before the coordinator is shared.
  pub fn add_index(&mut self, backend: Arc<dyn IndexBackend>) {
    debug!(collection = %self.collection, backend = backend.name(), "Registered index backend");
    self.backends.push(backend);
  }

  pub fn collection(&self) -> &str {
    &self.collection
  }

  pub fn document_store(&self) -> &Arc<DocumentStore> {
    &self.store
  }

  pub fn backend_count(&self) -> usize {
    self.backends.len()
  }

  pub fn phase(&self) -> LifecyclePhase {
    *self.phase.lock()
  }

  /// True when at least one backend is real-time.
  pub fn is_real_time(&self) -> bool {
    self.backends.iter().any(|b| b.is_real_time())
  }

  pub fn flush(&self) {
    for backend in &self.backends {
      backend.flush(true);
    }
  }

  pub fn optimize(&self, wait: bool) {
    for backend in &self.backends {
      backend.optimize(wait);
    }
  }

  // ==========================================================================
  // Lifecycle
  // ==========================================================================

  pub fn pre_build_from_scd(&self, total_file_size: u64) {
    self.transition(&[LifecyclePhase::Idle], LifecyclePhase::BuildingFromSCD);
    for backend in &self.backends {
      backend.pre_build_from_scd(total_file_size);
    }
  }

  pub fn post_build_from_scd(&self, timestamp: Timestamp) {
    for backend in &self.backends {
      backend.post_build_from_scd(timestamp);
    }
    self.transition(&[LifecyclePhase::BuildingFromSCD], LifecyclePhase::Indexing);
  }

  pub fn pre_mining(&self) {
    self.transition(&[LifecyclePhase::Idle, LifecyclePhase::Indexing], LifecyclePhase::Mining);
    for backend in &self.backends {
      backend.pre_mining();
    }
  }

  pub fn post_mining(&self) {
    for backend in &self.backends {
      backend.post_mining();
    }
    self.transition(&[LifecyclePhase::Mining], LifecyclePhase::Idle);
  }

  pub fn finish_index(&self) {
    for backend in &self.backends {
      backend.finish_index();
    }
    self.transition(&[LifecyclePhase::Indexing, LifecyclePhase::Idle], LifecyclePhase::Idle);
  }

  /// Mark the start of a rebuild. No backend hook exists for this step.
  pub fn begin_rebuild(&self) {
    self.transition(&[LifecyclePhase::Idle], LifecyclePhase::Rebuilding);
  }

  pub fn finish_rebuild(&self) {
    for backend in &self.backends {
      backend.finish_rebuild();
    }
    self.transition(&[LifecyclePhase::Rebuilding], LifecyclePhase::Idle);
  }

  pub fn pre_process_for_api(&self) {
    self.transition(&[LifecyclePhase::Idle], LifecyclePhase::ApiProcessing);
    for backend in &self.backends {
      backend.pre_process_for_api();
    }
  }

  pub fn post_process_for_api(&self) {
    for backend in &self.backends {
      backend.post_process_for_api();
    }
    self.transition(&[LifecyclePhase::ApiProcessing], LifecyclePhase::Idle);
  }

  fn transition(&self, expected: &[LifecyclePhase], next: LifecyclePhase) {
    let mut phase = self.phase.lock();
    if !expected.contains(&*phase) {
      warn!(
        collection = %self.collection,
        from = ?*phase,
        to = ?next,
        "Unexpected lifecycle transition"
      );
    }
    if *phase != next {
      info!(collection = %self.collection, from = ?*phase, to = ?next, "Lifecycle phase changed");
    }
    *phase = next;
  }

  // ==========================================================================
  // Mutations
  // ==========================================================================

  pub fn insert_document(&self, doc: &Document, timestamp: Timestamp) -> bool {
    let mut ok = true;
    for (index, backend) in self.backends.iter().enumerate() {
      if !backend.insert_document(doc, timestamp) {
        warn!(
          collection = %self.collection,
          backend = backend.name(),
          index,
          doc_id = %doc.id,
          "Backend rejected insert"
        );
        ok = false;
      }
    }
    ok
  }

  pub fn update_document(
    &self,
    old_doc: &Document,
    old_rtype_doc: &Document,
    new_doc: &Document,
    update_type: UpdateType,
    timestamp: Timestamp,
  ) -> bool {
    let mut ok = true;
    for (index, backend) in self.backends.iter().enumerate() {
      if !backend.update_document(old_doc, old_rtype_doc, new_doc, update_type, timestamp) {
        warn!(
          collection = %self.collection,
          backend = backend.name(),
          index,
          doc_id = %new_doc.id,
          ?update_type,
          "Backend rejected update"
        );
        ok = false;
      }
    }
    ok
  }

  pub fn remove_document(&self, id: DocId, timestamp: Timestamp) {
    for backend in &self.backends {
      backend.remove_document(id, timestamp);
    }
  }

  /// Dispatch a built mutation. Removal always reports success.
  pub fn apply(&self, mutation: &Mutation) -> bool {
    trace!(
      collection = %self.collection,
      doc_id = %mutation.doc_id(),
      timestamp = %mutation.timestamp(),
      "Applying mutation"
    );
    match mutation {
      Mutation::Insert { doc, timestamp } => self.insert_document(doc, *timestamp),
      Mutation::Update {
        old,
        old_rtype,
        new,
        update_type,
        timestamp,
      } => self.update_document(old, old_rtype, new, *update_type, *timestamp),
      Mutation::Remove { id, timestamp } => {
        self.remove_document(*id, *timestamp);
        true
      }
    }
  }
}
