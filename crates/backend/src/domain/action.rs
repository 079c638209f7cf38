//! Request and result items exchanged between the master RPC gateway and a
//! collection's search service.

use serde::{Deserialize, Serialize};

use super::document::{DocId, Document};

/// Paging window of a keyword search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageInfo {
  pub start: u32,
  pub count: u32,
}

impl Default for PageInfo {
  fn default() -> Self {
    Self { start: 0, count: 10 }
  }
}

/// Keyword search request (`documentSearch`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordSearchAction {
  pub collection: String,
  pub query: String,
  /// Properties to search; empty means every indexed property.
  #[serde(default)]
  pub search_properties: Vec<String>,
  /// Properties to return for each hit; empty means all.
  #[serde(default)]
  pub display_properties: Vec<String>,
  #[serde(default)]
  pub page: PageInfo,
  /// Only return ids and scores, no document bodies.
  #[serde(default)]
  pub disable_get_docs: bool,
}

/// Keyword search result.
///
/// `error` carries an application-level failure; the RPC itself still succeeds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordSearchResult {
  pub total_count: u32,
  pub start: u32,
  pub count: u32,
  pub top_k_docs: Vec<DocId>,
  pub top_k_scores: Vec<f32>,
  #[serde(default)]
  pub documents: Vec<Document>,
  #[serde(default)]
  pub error: String,
}

/// Document retrieval request (`getDocumentsByIds`).
///
/// Documents are selected by internal id, by user `DOCID`, or by matching a
/// property against a list of values, in that order of precedence.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetDocumentsByIdsAction {
  pub collection: String,
  #[serde(default)]
  pub id_list: Vec<DocId>,
  #[serde(default)]
  pub doc_id_list: Vec<String>,
  #[serde(default)]
  pub property_name: Option<String>,
  #[serde(default)]
  pub property_values: Vec<String>,
  #[serde(default)]
  pub display_properties: Vec<String>,
}

/// Document retrieval result. `error` lists ids that could not be resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTextResult {
  pub id_list: Vec<DocId>,
  pub documents: Vec<Document>,
  #[serde(default)]
  pub error: String,
}

/// Sub-method of `notify` that invalidates a collection's search cache.
pub const CLEAR_SEARCH_CACHE: &str = "CLEAR_SEARCH_CACHE";

/// Cluster notification (`notify`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyMessage {
  pub method: String,
  pub collection: String,
}
