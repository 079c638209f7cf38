//! Handlers for registry tests.

use std::sync::Arc;

use crate::{
  collection::{CollectionHandler, DistributionPolicy, RequestOrigin},
  domain::config::{CollectionConfig, SearchCacheConfig},
  scheduler::TaskScheduler,
};

/// A schema-less handler named `name`. Needs a running tokio runtime.
pub fn handler(name: &str) -> CollectionHandler {
  CollectionHandler::build(
    CollectionConfig {
      name: name.to_string(),
      realtime: true,
      properties: Vec::new(),
    },
    &SearchCacheConfig::default(),
    Arc::new(DistributionPolicy::new(RequestOrigin::Direct)),
    Arc::new(TaskScheduler::start(1)),
  )
}
