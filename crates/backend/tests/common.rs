//! Shared fixtures for gateway integration tests.
#![allow(dead_code)]

use std::{
  net::SocketAddr,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use async_trait::async_trait;
use searchd::{
  RpcGateway,
  action::{GetDocumentsByIdsAction, KeywordSearchAction, KeywordSearchResult, PageInfo, RawTextResult},
  collection::{CollectionHandler, CollectionRegistry, DistributionPolicy, RequestOrigin, RequestRouter},
  config::{CollectionConfig, GatewayConfig, PropertyConfig, PropertyKind, SearchCacheConfig},
  index::{DocumentStore, IncrementalIndexCoordinator},
  rpc::GatewayClient,
  scheduler::TaskScheduler,
  service::{IndexTaskService, SearchService},
};

pub struct TestGateway {
  pub registry: Arc<CollectionRegistry>,
  pub scheduler: Arc<TaskScheduler>,
  pub gateway: RpcGateway,
  pub addr: SocketAddr,
  pub client: GatewayClient,
}

/// Start a gateway on an ephemeral port with an empty registry.
pub async fn start_gateway() -> TestGateway {
  let registry = Arc::new(CollectionRegistry::new());
  let gateway = RpcGateway::new(
    Arc::clone(&registry),
    GatewayConfig {
      port: 0,
      threads: 4,
      ..Default::default()
    },
  );
  let addr = gateway.start().await.expect("gateway start");
  let client = GatewayClient::connect(addr).await.expect("client connect");

  TestGateway {
    registry,
    scheduler: Arc::new(TaskScheduler::start(2)),
    gateway,
    addr,
    client,
  }
}

pub fn books_schema() -> CollectionConfig {
  CollectionConfig {
    name: "books".into(),
    realtime: true,
    properties: vec![
      PropertyConfig {
        name: "title".into(),
        kind: PropertyKind::String,
        indexed: true,
      },
      PropertyConfig {
        name: "year".into(),
        kind: PropertyKind::Int,
        indexed: false,
      },
    ],
  }
}

pub fn search_action(collection: &str, query: &str) -> KeywordSearchAction {
  KeywordSearchAction {
    collection: collection.into(),
    query: query.into(),
    search_properties: vec![],
    display_properties: vec![],
    page: PageInfo::default(),
    disable_get_docs: false,
  }
}

impl TestGateway {
  /// Register the standard `books` stack.
  pub async fn register_books(&self) {
    let handler = CollectionHandler::build(
      books_schema(),
      &SearchCacheConfig::default(),
      Arc::new(DistributionPolicy::new(RequestOrigin::Direct)),
      Arc::clone(&self.scheduler),
    );
    self.registry.register(handler).await;
  }

  /// Register `name` backed by a custom search service.
  pub async fn register_with_search(&self, name: &str, search: Arc<dyn SearchService>) {
    let schema = CollectionConfig {
      name: name.into(),
      ..books_schema()
    };
    let coordinator = Arc::new(IncrementalIndexCoordinator::new(name, Arc::new(DocumentStore::new())));
    let tasks = Arc::new(IndexTaskService::new(schema.clone(), Arc::clone(&coordinator)));
    let router = RequestRouter::new(
      name,
      Arc::clone(&tasks),
      Arc::new(DistributionPolicy::new(RequestOrigin::Direct)),
      Arc::clone(&self.scheduler),
    );
    self
      .registry
      .register(CollectionHandler::new(schema, coordinator, tasks, search, router))
      .await;
  }
}

/// Search service that counts cache clears and can be told to panic or stall.
#[derive(Default)]
pub struct ScriptedSearch {
  pub clears: AtomicUsize,
  pub panic_on_search: bool,
  pub delay: Option<Duration>,
}

impl ScriptedSearch {
  pub fn panicking() -> Self {
    Self {
      panic_on_search: true,
      ..Default::default()
    }
  }

  pub fn slow(delay: Duration) -> Self {
    Self {
      delay: Some(delay),
      ..Default::default()
    }
  }

  pub fn clears(&self) -> usize {
    self.clears.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl SearchService for ScriptedSearch {
  async fn get_search_result(&self, action: &KeywordSearchAction) -> KeywordSearchResult {
    if self.panic_on_search {
      panic!("search exploded for {}", action.query);
    }
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    KeywordSearchResult {
      error: "index unavailable".into(),
      ..Default::default()
    }
  }

  async fn get_documents_by_ids(&self, _action: &GetDocumentsByIdsAction) -> RawTextResult {
    RawTextResult::default()
  }

  async fn on_update_search_cache(&self) {
    self.clears.fetch_add(1, Ordering::SeqCst);
  }
}
