//! Configuration for a searchd node.
//!
//! Config is a single TOML file, read once at startup. Lookup order:
//! explicit path > `$SEARCHD_CONFIG` > `{config_dir}/searchd/config.toml` > defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Errors raised while loading a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub node: NodeConfig,
  pub topology: TopologyConfig,
  pub gateway: GatewayConfig,
  pub scheduler: SchedulerConfig,
  pub search_cache: SearchCacheConfig,
  pub collections: Vec<CollectionConfig>,
}

impl Config {
  /// Load config from an explicit file. A missing file is an error.
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load config using the standard lookup order.
  ///
  /// An explicit path must exist. The implicit locations are optional and
  /// fall back to defaults when absent.
  pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    if let Some(path) = explicit {
      return Self::load_from(path);
    }

    if let Ok(path) = std::env::var("SEARCHD_CONFIG") {
      return Self::load_from(Path::new(&path));
    }

    if let Some(path) = Self::user_config_path()
      && path.exists()
    {
      return Self::load_from(&path);
    }

    Ok(Self::default())
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    Some(crate::dirs::default_config_dir().join("config.toml"))
  }

  pub fn collection(&self, name: &str) -> Option<&CollectionConfig> {
    self.collections.iter().find(|c| c.name == name)
  }
}

// ============================================================================
// Node
// ============================================================================

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
  /// off, error, warn, info, debug, trace
  pub log_level: String,
  /// daily, hourly, never
  pub log_rotation: String,
  /// Where background-mode logs go. Defaults to the platform data dir.
  pub data_dir: Option<PathBuf>,
}

impl Default for NodeConfig {
  fn default() -> Self {
    Self {
      log_level: "info".to_string(),
      log_rotation: "daily".to_string(),
      data_dir: None,
    }
  }
}

impl NodeConfig {
  pub fn data_dir(&self) -> PathBuf {
    self.data_dir.clone().unwrap_or_else(crate::dirs::default_data_dir)
  }
}

// ============================================================================
// Topology
// ============================================================================

/// Cluster topology. Read once, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
  /// Distributed mode. When set, API writes are deferred for replication.
  pub enabled: bool,
  pub cluster_id: String,
  pub node_num: u32,
  pub worker_num: u32,
  pub node: ClusterNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterNode {
  pub node_id: u32,
  pub replica_id: u32,
  pub host: String,
}

impl Default for ClusterNode {
  fn default() -> Self {
    Self {
      node_id: 1,
      replica_id: 1,
      host: "127.0.0.1".to_string(),
    }
  }
}

// ============================================================================
// RPC gateway
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
  pub host: String,
  pub port: u16,
  /// Maximum number of RPC calls dispatched concurrently.
  pub threads: usize,
  pub max_frame_bytes: usize,
}

impl Default for GatewayConfig {
  fn default() -> Self {
    Self {
      host: "127.0.0.1".to_string(),
      port: 18181,
      threads: 30,
      max_frame_bytes: 16 * 1024 * 1024,
    }
  }
}

impl GatewayConfig {
  pub fn bind_addr(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }
}

// ============================================================================
// Task scheduler
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  /// Number of workers draining deferred write queues.
  pub workers: usize,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      workers: num_cpus::get().max(1),
    }
  }
}

// ============================================================================
// Search cache
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchCacheConfig {
  /// Maximum cached results per collection. 0 disables caching.
  pub capacity: u64,
  /// Lifetime of a cached result in seconds. 0 disables expiry.
  pub refresh_secs: u64,
}

impl Default for SearchCacheConfig {
  fn default() -> Self {
    Self {
      capacity: 1000,
      refresh_secs: 3600,
    }
  }
}

// ============================================================================
// Collections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
  #[default]
  String,
  Int,
  Float,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyConfig {
  pub name: String,
  #[serde(default)]
  pub kind: PropertyKind,
  /// Feed this property into the term index (string properties only).
  #[serde(default)]
  pub indexed: bool,
}

/// Per-collection schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
  pub name: String,
  #[serde(default = "default_true")]
  pub realtime: bool,
  #[serde(default)]
  pub properties: Vec<PropertyConfig>,
}

fn default_true() -> bool {
  true
}

impl CollectionConfig {
  pub fn property(&self, name: &str) -> Option<&PropertyConfig> {
    self.properties.iter().find(|p| p.name == name)
  }

  /// Names of the string properties fed into the term index.
  pub fn indexed_properties(&self) -> Vec<String> {
    self
      .properties
      .iter()
      .filter(|p| p.indexed && p.kind == PropertyKind::String)
      .map(|p| p.name.clone())
      .collect()
  }
}
