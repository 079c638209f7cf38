//! RequestRouter - per-collection write entry point.
//!
//! Under [`RequestOrigin::Direct`] a write runs inline and its result is
//! returned. Under [`RequestOrigin::FromApi`] the write is captured as a
//! [`DeferredTask`] and queued on the scheduler under the collection name;
//! the caller gets `Ok` immediately and the real outcome only shows up in the
//! scheduler's logs.

use std::sync::Arc;

use tracing::debug;

use super::policy::{DistributionPolicy, RequestOrigin};
use crate::{
  scheduler::{SchedulerError, Task, TaskScheduler},
  service::{IndexTaskError, IndexTaskService},
};

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
  #[error(transparent)]
  Task(#[from] IndexTaskError),
  #[error("Failed to defer write: {0}")]
  Scheduler(#[from] SchedulerError),
}

/// A write captured at enqueue time, run later exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredTask {
  Create(serde_json::Value),
  Update(serde_json::Value),
  UpdateInPlace(serde_json::Value),
  Destroy(serde_json::Value),
}

impl DeferredTask {
  pub fn operation(&self) -> &'static str {
    match self {
      Self::Create(_) => "create",
      Self::Update(_) => "update",
      Self::UpdateInPlace(_) => "update_in_place",
      Self::Destroy(_) => "destroy",
    }
  }

  pub fn run(&self, service: &IndexTaskService) -> Result<(), IndexTaskError> {
    match self {
      Self::Create(doc) => service.create_document(doc),
      Self::Update(doc) => service.update_document(doc),
      Self::UpdateInPlace(request) => service.update_document_in_place(request),
      Self::Destroy(doc) => service.destroy_document(doc),
    }
  }
}

pub struct RequestRouter {
  collection: String,
  service: Arc<IndexTaskService>,
  policy: Arc<DistributionPolicy>,
  scheduler: Arc<TaskScheduler>,
}

impl RequestRouter {
  pub fn new(
    collection: impl Into<String>,
    service: Arc<IndexTaskService>,
    policy: Arc<DistributionPolicy>,
    scheduler: Arc<TaskScheduler>,
  ) -> Self {
    Self {
      collection: collection.into(),
      service,
      policy,
      scheduler,
    }
  }

  pub fn create(&self, doc: &serde_json::Value) -> Result<(), RouteError> {
    self.route(DeferredTask::Create(doc.clone()))
  }

  pub fn update(&self, doc: &serde_json::Value) -> Result<(), RouteError> {
    self.route(DeferredTask::Update(doc.clone()))
  }

  pub fn update_in_place(&self, request: &serde_json::Value) -> Result<(), RouteError> {
    self.route(DeferredTask::UpdateInPlace(request.clone()))
  }

  pub fn destroy(&self, doc: &serde_json::Value) -> Result<(), RouteError> {
    self.route(DeferredTask::Destroy(doc.clone()))
  }

  fn route(&self, task: DeferredTask) -> Result<(), RouteError> {
    match self.policy.origin() {
      RequestOrigin::Direct => Ok(task.run(&self.service)?),
      RequestOrigin::FromApi => {
        let label = format!("{}:{}", self.collection, task.operation());
        debug!(collection = %self.collection, operation = task.operation(), "Deferring write");
        let service = Arc::clone(&self.service);
        self
          .scheduler
          .add_task(Task::new(label, move || Ok(task.run(&service)?)), &self.collection)?;
        Ok(())
      }
    }
  }
}
