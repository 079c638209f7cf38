//! Collections: the handler bundle, the registry that owns handlers, and the
//! write path (policy + router).

mod policy;
mod registry;
mod router;

#[cfg(test)]
pub(crate) mod __tests__;

use std::sync::Arc;

pub use policy::{DistributionPolicy, RequestOrigin};
pub use registry::{CollectionGuard, CollectionRegistry, CollectionSlot, RegistryError};
pub use router::{DeferredTask, RequestRouter, RouteError};
use tracing::debug;

use crate::{
  domain::{
    action::{GetDocumentsByIdsAction, KeywordSearchAction, KeywordSearchResult, RawTextResult},
    config::{CollectionConfig, SearchCacheConfig},
  },
  index::{DocumentStore, IncrementalIndexCoordinator, IndexBackend, TermIndex},
  scheduler::TaskScheduler,
  service::{IndexSearchService, IndexTaskService, SearchService},
};

/// Everything that serves one collection.
pub struct CollectionHandler {
  schema: CollectionConfig,
  coordinator: Arc<IncrementalIndexCoordinator>,
  task_service: Arc<IndexTaskService>,
  search_service: Arc<dyn SearchService>,
  router: RequestRouter,
}

impl std::fmt::Debug for CollectionHandler {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CollectionHandler")
      .field("schema", &self.schema)
      .finish_non_exhaustive()
  }
}

impl CollectionHandler {
  pub fn new(
    schema: CollectionConfig,
    coordinator: Arc<IncrementalIndexCoordinator>,
    task_service: Arc<IndexTaskService>,
    search_service: Arc<dyn SearchService>,
    router: RequestRouter,
  ) -> Self {
    Self {
      schema,
      coordinator,
      task_service,
      search_service,
      router,
    }
  }

  /// Assemble the standard stack for `schema`: a document store, a term index
  /// over the indexed properties, the coordinator, and both services.
  pub fn build(
    schema: CollectionConfig,
    cache: &SearchCacheConfig,
    policy: Arc<DistributionPolicy>,
    scheduler: Arc<TaskScheduler>,
  ) -> Self {
    let store = Arc::new(DocumentStore::new());
    let terms = Arc::new(TermIndex::new(
      &schema.name,
      schema.indexed_properties(),
      schema.realtime,
      Arc::clone(&store),
    ));

    let mut coordinator = IncrementalIndexCoordinator::new(&schema.name, Arc::clone(&store));
    coordinator.add_index(Arc::clone(&terms) as Arc<dyn IndexBackend>);
    let coordinator = Arc::new(coordinator);

    let task_service = Arc::new(IndexTaskService::new(schema.clone(), Arc::clone(&coordinator)));
    let search_service: Arc<dyn SearchService> =
      Arc::new(IndexSearchService::new(&schema.name, terms, store, cache));
    let router = RequestRouter::new(&schema.name, Arc::clone(&task_service), policy, scheduler);

    debug!(
      collection = %schema.name,
      indexed = ?schema.indexed_properties(),
      realtime = schema.realtime,
      "Built collection handler"
    );
    Self::new(schema, coordinator, task_service, search_service, router)
  }

  pub fn name(&self) -> &str {
    &self.schema.name
  }

  pub fn schema(&self) -> &CollectionConfig {
    &self.schema
  }

  pub fn coordinator(&self) -> &Arc<IncrementalIndexCoordinator> {
    &self.coordinator
  }

  pub fn task_service(&self) -> &Arc<IndexTaskService> {
    &self.task_service
  }

  pub fn search_service(&self) -> &Arc<dyn SearchService> {
    &self.search_service
  }

  pub fn router(&self) -> &RequestRouter {
    &self.router
  }

  pub async fn search(&self, action: &KeywordSearchAction) -> KeywordSearchResult {
    self.search_service.get_search_result(action).await
  }

  pub async fn get(&self, action: &GetDocumentsByIdsAction) -> RawTextResult {
    self.search_service.get_documents_by_ids(action).await
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;
  use crate::domain::{
    action::PageInfo,
    config::{PropertyConfig, PropertyKind},
  };

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_build_wires_write_and_read_paths() {
    let schema = CollectionConfig {
      name: "books".into(),
      realtime: true,
      properties: vec![PropertyConfig {
        name: "title".into(),
        kind: PropertyKind::String,
        indexed: true,
      }],
    };
    let handler = CollectionHandler::build(
      schema,
      &SearchCacheConfig::default(),
      Arc::new(DistributionPolicy::new(RequestOrigin::Direct)),
      Arc::new(TaskScheduler::start(1)),
    );
    assert_eq!(handler.coordinator().backend_count(), 1);
    assert!(handler.coordinator().is_real_time());

    handler.router().create(&json!({"DOCID": "b1", "title": "Dune"})).unwrap();

    let result = handler
      .search(&KeywordSearchAction {
        collection: "books".into(),
        query: "dune".into(),
        search_properties: vec![],
        display_properties: vec![],
        page: PageInfo::default(),
        disable_get_docs: false,
      })
      .await;
    assert_eq!(result.total_count, 1);
    assert_eq!(result.documents[0].key, "b1");

    let fetched = handler
      .get(&GetDocumentsByIdsAction {
        collection: "books".into(),
        doc_id_list: vec!["b1".into()],
        ..Default::default()
      })
      .await;
    assert_eq!(fetched.id_list, result.top_k_docs);
  }
}
