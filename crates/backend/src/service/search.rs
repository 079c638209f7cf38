//! Search service: keyword search and document retrieval for one collection.

use std::{
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use async_trait::async_trait;
use moka::future::Cache;
use tracing::{debug, info};

use crate::{
  domain::{
    action::{GetDocumentsByIdsAction, KeywordSearchAction, KeywordSearchResult, PageInfo, RawTextResult},
    config::SearchCacheConfig,
    document::{DocId, Document},
  },
  index::{DocumentStore, TermIndex},
};

/// What the RPC gateway calls on a collection.
///
/// Application-level failures (empty query, unknown ids) are reported in the
/// result's `error` field rather than as an `Err`, so the RPC itself succeeds.
#[async_trait]
pub trait SearchService: Send + Sync {
  async fn get_search_result(&self, action: &KeywordSearchAction) -> KeywordSearchResult;

  async fn get_documents_by_ids(&self, action: &GetDocumentsByIdsAction) -> RawTextResult;

  /// Drop every cached search result.
  async fn on_update_search_cache(&self);
}

/// Cache key: everything that shapes a keyword search result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueryIdentity {
  query: String,
  search_properties: Vec<String>,
  display_properties: Vec<String>,
  page: PageInfo,
  disable_get_docs: bool,
}

impl From<&KeywordSearchAction> for QueryIdentity {
  fn from(action: &KeywordSearchAction) -> Self {
    Self {
      query: action.query.trim().to_lowercase(),
      search_properties: action.search_properties.clone(),
      display_properties: action.display_properties.clone(),
      page: action.page,
      disable_get_docs: action.disable_get_docs,
    }
  }
}

pub struct IndexSearchService {
  collection: String,
  terms: Arc<TermIndex>,
  store: Arc<DocumentStore>,
  cache: Cache<QueryIdentity, Arc<KeywordSearchResult>>,
  cache_clears: AtomicU64,
}

impl IndexSearchService {
  pub fn new(
    collection: impl Into<String>,
    terms: Arc<TermIndex>,
    store: Arc<DocumentStore>,
    cache: &SearchCacheConfig,
  ) -> Self {
    let mut builder = Cache::builder().max_capacity(cache.capacity);
    if cache.refresh_secs > 0 {
      builder = builder.time_to_live(Duration::from_secs(cache.refresh_secs));
    }
    Self {
      collection: collection.into(),
      terms,
      store,
      cache: builder.build(),
      cache_clears: AtomicU64::new(0),
    }
  }

  /// How many times the cache has been invalidated.
  pub fn cache_clears(&self) -> u64 {
    self.cache_clears.load(Ordering::Relaxed)
  }

  fn search_uncached(&self, action: &KeywordSearchAction) -> KeywordSearchResult {
    let mut result = KeywordSearchResult {
      start: action.page.start,
      ..Default::default()
    };

    if action.query.trim().is_empty() {
      result.error = "Empty query".to_string();
      return result;
    }
    if let Some(unknown) = action
      .search_properties
      .iter()
      .find(|p| !self.terms.properties().contains(*p))
    {
      result.error = format!("Property '{}' is not indexed in collection '{}'", unknown, self.collection);
      return result;
    }

    let hits = self.terms.search(&action.query, &action.search_properties);
    result.total_count = hits.len() as u32;

    let page: Vec<_> = hits
      .into_iter()
      .skip(action.page.start as usize)
      .take(action.page.count as usize)
      .collect();
    result.count = page.len() as u32;
    result.top_k_docs = page.iter().map(|h| h.id).collect();
    result.top_k_scores = page.iter().map(|h| h.score).collect();

    if !action.disable_get_docs {
      let (documents, missing) = self.fetch(&result.top_k_docs, &action.display_properties);
      result.documents = documents;
      if !missing.is_empty() {
        result.error = missing_error(&missing);
      }
    }
    result
  }

  /// Resolve ids against the store, projecting each found document.
  fn fetch(&self, ids: &[DocId], display: &[String]) -> (Vec<Document>, Vec<String>) {
    let mut documents = Vec::with_capacity(ids.len());
    let mut missing = Vec::new();
    for id in ids {
      match self.store.get(*id) {
        Some(doc) => documents.push(doc.project(display)),
        None => missing.push(id.to_string()),
      }
    }
    (documents, missing)
  }
}

fn missing_error(missing: &[String]) -> String {
  format!("Documents not found: {}", missing.join(", "))
}

#[async_trait]
impl SearchService for IndexSearchService {
  async fn get_search_result(&self, action: &KeywordSearchAction) -> KeywordSearchResult {
    let key = QueryIdentity::from(action);
    if let Some(cached) = self.cache.get(&key).await {
      debug!(collection = %self.collection, query = %action.query, "Search cache hit");
      return cached.as_ref().clone();
    }

    let result = self.search_uncached(action);
    // Failed searches are not cached so a later fix to the index shows up.
    if result.error.is_empty() {
      self.cache.insert(key, Arc::new(result.clone())).await;
    }
    result
  }

  async fn get_documents_by_ids(&self, action: &GetDocumentsByIdsAction) -> RawTextResult {
    let mut result = RawTextResult::default();

    let (documents, missing) = if !action.id_list.is_empty() {
      self.fetch(&action.id_list, &action.display_properties)
    } else if !action.doc_id_list.is_empty() {
      let mut documents = Vec::new();
      let mut missing = Vec::new();
      for key in &action.doc_id_list {
        match self.store.get_by_key(key) {
          Some(doc) => documents.push(doc.project(&action.display_properties)),
          None => missing.push(key.clone()),
        }
      }
      (documents, missing)
    } else if let Some(property) = &action.property_name {
      let documents = self
        .store
        .find_by_property(property, &action.property_values)
        .iter()
        .map(|doc| doc.project(&action.display_properties))
        .collect();
      (documents, Vec::new())
    } else {
      result.error = "No ids, DOCIDs or property values given".to_string();
      return result;
    };

    result.id_list = documents.iter().map(|d| d.id).collect();
    result.documents = documents;
    if !missing.is_empty() {
      result.error = missing_error(&missing);
    }
    result
  }

  async fn on_update_search_cache(&self) {
    self.cache.invalidate_all();
    self.cache_clears.fetch_add(1, Ordering::Relaxed);
    info!(collection = %self.collection, "Search cache cleared");
  }
}
