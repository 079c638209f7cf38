//! Test backends that record every call they receive.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
  domain::document::{DocId, Document, Timestamp, UpdateType},
  index::IndexBackend,
};

/// Shared, ordered log of backend calls, formatted as `"{backend}.{call}"`.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
  pub fn push(&self, entry: String) {
    self.0.lock().push(entry);
  }

  pub fn entries(&self) -> Vec<String> {
    self.0.lock().clone()
  }
}

/// Backend that records calls into a [`Journal`] and answers mutations with a fixed result.
pub struct RecordingBackend {
  name: String,
  journal: Journal,
  accept: bool,
  real_time: bool,
  inserted: Mutex<Vec<(DocId, Timestamp)>>,
}

impl RecordingBackend {
  pub fn new(name: &str, journal: &Journal) -> Arc<Self> {
    Arc::new(Self {
      name: name.to_string(),
      journal: journal.clone(),
      accept: true,
      real_time: false,
      inserted: Mutex::new(Vec::new()),
    })
  }

  /// Reject every insert and update.
  pub fn rejecting(self: Arc<Self>) -> Arc<Self> {
    Arc::new(Self {
      name: self.name.clone(),
      journal: self.journal.clone(),
      accept: false,
      real_time: self.real_time,
      inserted: Mutex::new(Vec::new()),
    })
  }

  pub fn real_time(self: Arc<Self>) -> Arc<Self> {
    Arc::new(Self {
      name: self.name.clone(),
      journal: self.journal.clone(),
      accept: self.accept,
      real_time: true,
      inserted: Mutex::new(Vec::new()),
    })
  }

  pub fn inserted(&self) -> Vec<(DocId, Timestamp)> {
    self.inserted.lock().clone()
  }

  fn record(&self, call: impl std::fmt::Display) {
    self.journal.push(format!("{}.{}", self.name, call));
  }
}

impl IndexBackend for RecordingBackend {
  fn name(&self) -> &str {
    &self.name
  }

  fn is_real_time(&self) -> bool {
    self.real_time
  }

  fn flush(&self, force: bool) {
    self.record(format!("flush({})", force));
  }

  fn optimize(&self, wait: bool) {
    self.record(format!("optimize({})", wait));
  }

  fn pre_build_from_scd(&self, total_file_size: u64) {
    self.record(format!("pre_build_from_scd({})", total_file_size));
  }

  fn post_build_from_scd(&self, _timestamp: Timestamp) {
    self.record("post_build_from_scd");
  }

  fn pre_mining(&self) {
    self.record("pre_mining");
  }

  fn post_mining(&self) {
    self.record("post_mining");
  }

  fn finish_index(&self) {
    self.record("finish_index");
  }

  fn finish_rebuild(&self) {
    self.record("finish_rebuild");
  }

  fn pre_process_for_api(&self) {
    self.record("pre_process_for_api");
  }

  fn post_process_for_api(&self) {
    self.record("post_process_for_api");
  }

  fn insert_document(&self, doc: &Document, timestamp: Timestamp) -> bool {
    self.record(format!("insert_document({})", doc.id));
    self.inserted.lock().push((doc.id, timestamp));
    self.accept
  }

  fn update_document(
    &self,
    _old_doc: &Document,
    _old_rtype_doc: &Document,
    new_doc: &Document,
    _update_type: UpdateType,
    _timestamp: Timestamp,
  ) -> bool {
    self.record(format!("update_document({})", new_doc.id));
    self.accept
  }

  fn remove_document(&self, id: DocId, _timestamp: Timestamp) {
    self.record(format!("remove_document({})", id));
  }
}
