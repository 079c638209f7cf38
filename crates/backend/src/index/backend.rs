//! Contract for incremental index backends.
//!
//! A backend is updated while a bulk SCD build is iterated and while insert,
//! update and delete calls arrive from the API. Backends are driven only by the
//! [`IncrementalIndexCoordinator`](super::IncrementalIndexCoordinator), which
//! calls every hook on every registered backend in registration order.
//!
//! All methods take `&self`: backends are shared behind `Arc` and handle their
//! own interior mutability.

use serde::{Deserialize, Serialize};

use crate::domain::document::{DocId, Document, Timestamp, UpdateType};

/// Maximum number of documents indexed per API batch before a flush is forced.
pub const MAX_API_INDEXDOC: usize = 10_000;

/// Stage of the build / mining / API-processing cycle a collection is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LifecyclePhase {
  #[default]
  Idle,
  BuildingFromSCD,
  Mining,
  Indexing,
  Rebuilding,
  ApiProcessing,
}

pub trait IndexBackend: Send + Sync {
  /// Short name used in logs.
  fn name(&self) -> &str;

  fn is_real_time(&self) -> bool;
  fn flush(&self, force: bool);
  fn optimize(&self, wait: bool);

  fn pre_build_from_scd(&self, total_file_size: u64);
  fn post_build_from_scd(&self, timestamp: Timestamp);

  fn pre_mining(&self);
  fn post_mining(&self);

  fn finish_index(&self);
  fn finish_rebuild(&self);

  fn pre_process_for_api(&self);
  fn post_process_for_api(&self);

  fn insert_document(&self, doc: &Document, timestamp: Timestamp) -> bool;
  fn update_document(
    &self,
    old_doc: &Document,
    old_rtype_doc: &Document,
    new_doc: &Document,
    update_type: UpdateType,
    timestamp: Timestamp,
  ) -> bool;
  fn remove_document(&self, id: DocId, timestamp: Timestamp);
}
