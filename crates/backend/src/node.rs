//! Node assembly and lifecycle.
//!
//! ```text
//! Node
//!   ├── DistributionPolicy (from topology)
//!   ├── TaskScheduler (deferred writes, keyed by collection)
//!   ├── CollectionRegistry
//!   │     └── CollectionHandler (per configured collection)
//!   │           ├── IncrementalIndexCoordinator -> [TermIndex]
//!   │           ├── IndexTaskService / IndexSearchService
//!   │           └── RequestRouter
//!   └── RpcGateway
//! ```
//!
//! Shutdown order: stop the gateway (in-flight calls answer first), drain
//! deferred writes, stop the scheduler, then flush every coordinator.

use std::{net::SocketAddr, sync::Arc};

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
  collection::{CollectionHandler, CollectionRegistry, DistributionPolicy},
  domain::config::Config,
  rpc::GatewayError,
  scheduler::TaskScheduler,
  server::RpcGateway,
};

pub struct Node {
  config: Config,
  policy: Arc<DistributionPolicy>,
  scheduler: Arc<TaskScheduler>,
  registry: Arc<CollectionRegistry>,
  gateway: RpcGateway,
}

impl Node {
  /// Build every component from `config` and register the configured
  /// collections. Must run inside a tokio runtime.
  pub async fn build(config: Config) -> Self {
    let policy = Arc::new(DistributionPolicy::from_topology(&config.topology));
    let scheduler = Arc::new(TaskScheduler::start(config.scheduler.workers));
    let registry = Arc::new(CollectionRegistry::new());

    for schema in &config.collections {
      let handler = CollectionHandler::build(
        schema.clone(),
        &config.search_cache,
        Arc::clone(&policy),
        Arc::clone(&scheduler),
      );
      if registry.register(handler).await.is_some() {
        warn!(collection = %schema.name, "Collection configured twice, keeping the last definition");
      }
    }

    let gateway = RpcGateway::new(Arc::clone(&registry), config.gateway.clone());
    info!(
      node_id = config.topology.node.node_id,
      replica_id = config.topology.node.replica_id,
      distributed = config.topology.enabled,
      collections = config.collections.len(),
      "Node assembled"
    );

    Self {
      config,
      policy,
      scheduler,
      registry,
      gateway,
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn policy(&self) -> &Arc<DistributionPolicy> {
    &self.policy
  }

  pub fn scheduler(&self) -> &Arc<TaskScheduler> {
    &self.scheduler
  }

  pub fn registry(&self) -> &Arc<CollectionRegistry> {
    &self.registry
  }

  pub fn gateway(&self) -> &RpcGateway {
    &self.gateway
  }

  pub async fn start(&self) -> Result<SocketAddr, GatewayError> {
    self.gateway.start().await
  }

  pub async fn shutdown(&self) {
    info!("Shutting down...");
    self.gateway.stop().await;

    self.scheduler.wait_idle().await;
    self.scheduler.shutdown().await;

    for name in self.registry.list().await {
      if let Ok(handler) = self.registry.lookup(&name).await {
        handler.coordinator().flush();
      }
    }
    info!("Node shutdown complete");
  }

  /// Serve until ctrl-c or `cancel`, then shut down.
  pub async fn run(self, cancel: CancellationToken) -> Result<(), GatewayError> {
    self.start().await?;

    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
      if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        return;
      }
      info!("Received ctrl-c, shutting down...");
      cancel_for_signal.cancel();
    });

    cancel.cancelled().await;
    self.shutdown().await;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;
  use crate::domain::{
    action::{KeywordSearchAction, PageInfo},
    config::{CollectionConfig, GatewayConfig, PropertyConfig, PropertyKind, SchedulerConfig},
  };

  fn config(realtime: bool) -> Config {
    Config {
      gateway: GatewayConfig {
        port: 0,
        ..Default::default()
      },
      scheduler: SchedulerConfig { workers: 2 },
      collections: vec![CollectionConfig {
        name: "books".into(),
        realtime,
        properties: vec![PropertyConfig {
          name: "title".into(),
          kind: PropertyKind::String,
          indexed: true,
        }],
      }],
      ..Default::default()
    }
  }

  fn search(query: &str) -> KeywordSearchAction {
    KeywordSearchAction {
      collection: "books".into(),
      query: query.into(),
      search_properties: vec![],
      display_properties: vec![],
      page: PageInfo::default(),
      disable_get_docs: true,
    }
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_build_registers_collections() {
    let node = Node::build(config(true)).await;
    assert_eq!(node.registry().list().await, vec!["books".to_string()]);
    assert!(!node.policy().should_defer());
    assert_eq!(node.scheduler().workers(), 2);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_shutdown_flushes_buffered_writes() {
    let node = Node::build(config(false)).await;
    node.start().await.unwrap();

    {
      let handler = node.registry().lookup("books").await.unwrap();
      handler.router().create(&json!({"DOCID": "b1", "title": "dune"})).unwrap();
      assert_eq!(handler.search(&search("dune")).await.total_count, 0);
    }

    node.shutdown().await;
    assert!(!node.gateway().is_listening());

    let handler = node.registry().lookup("books").await.unwrap();
    handler.search_service().on_update_search_cache().await;
    assert_eq!(handler.search(&search("dune")).await.total_count, 1);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_run_stops_on_cancel() {
    let node = Node::build(config(true)).await;
    let cancel = CancellationToken::new();
    let running = tokio::spawn(node.run(cancel.clone()));

    cancel.cancel();
    running.await.unwrap().unwrap();
  }
}
