//! Client commands against a running node's RPC gateway

use anyhow::{Context, Result};
use searchd::{
  action::{GetDocumentsByIdsAction, KeywordSearchAction, PageInfo},
  document::{DocId, Document},
  rpc::GatewayClient,
};
use tracing::error;

async fn connect(addr: &str) -> Result<GatewayClient> {
  GatewayClient::connect(addr)
    .await
    .with_context(|| format!("Failed to connect to searchd at {}", addr))
}

fn print_document(doc: &Document) {
  let properties: Vec<String> = doc.properties.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
  println!("  [{}] {}  {}", doc.id, doc.key, properties.join("  "));
}

/// Keyword search
#[allow(clippy::too_many_arguments)]
pub async fn cmd_search(
  addr: &str,
  collection: &str,
  query: &str,
  properties: Vec<String>,
  start: u32,
  count: u32,
  ids_only: bool,
  json_output: bool,
) -> Result<()> {
  let client = connect(addr).await?;
  let action = KeywordSearchAction {
    collection: collection.to_string(),
    query: query.to_string(),
    search_properties: properties,
    display_properties: Vec::new(),
    page: PageInfo { start, count },
    disable_get_docs: ids_only,
  };

  let result = client.document_search(&action).await.context("Search failed")?;
  if json_output {
    println!("{}", serde_json::to_string_pretty(&result)?);
    return Ok(());
  }

  if !result.error.is_empty() {
    error!("Search reported an error: {}", result.error);
  }
  if result.top_k_docs.is_empty() {
    println!("No documents found for: {}", query);
    return Ok(());
  }

  println!(
    "Showing {}-{} of {} documents:\n",
    result.start + 1,
    result.start + result.count,
    result.total_count
  );
  if result.documents.is_empty() {
    for (id, score) in result.top_k_docs.iter().zip(&result.top_k_scores) {
      println!("  [{}] score={:.2}", id, score);
    }
  } else {
    for doc in &result.documents {
      print_document(doc);
    }
  }
  Ok(())
}

/// Fetch documents by DOCID, or by internal id with `internal`
pub async fn cmd_get(addr: &str, collection: &str, ids: Vec<String>, internal: bool, json_output: bool) -> Result<()> {
  let client = connect(addr).await?;
  let mut action = GetDocumentsByIdsAction {
    collection: collection.to_string(),
    ..Default::default()
  };
  if internal {
    action.id_list = ids
      .iter()
      .map(|id| id.parse::<u32>().map(DocId).with_context(|| format!("Invalid internal id: {}", id)))
      .collect::<Result<_>>()?;
  } else {
    action.doc_id_list = ids;
  }

  let result = client.get_documents_by_ids(&action).await.context("Get failed")?;
  if json_output {
    println!("{}", serde_json::to_string_pretty(&result)?);
    return Ok(());
  }

  for doc in &result.documents {
    print_document(doc);
  }
  if !result.error.is_empty() {
    println!("\n{}", result.error);
  }
  Ok(())
}

/// Invalidate a collection's search cache
pub async fn cmd_clear_cache(addr: &str, collection: &str) -> Result<()> {
  let client = connect(addr).await?;
  client
    .clear_search_cache(collection)
    .await
    .with_context(|| format!("Failed to clear search cache of {}", collection))?;
  println!("Cleared search cache of {}", collection);
  Ok(())
}
