//! IndexTaskService - turns API documents into mutations on a collection.
//!
//! Documents arrive as JSON objects keyed by property name and must carry a
//! `DOCID`. They are validated against the collection schema, written to the
//! shared document store, then handed to the coordinator.

use std::{
  collections::BTreeMap,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
  domain::{
    config::{CollectionConfig, PropertyKind},
    document::{DOCID_PROPERTY, Document, Mutation, PropertyValue, UpdateType},
  },
  index::{IncrementalIndexCoordinator, MAX_API_INDEXDOC},
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexTaskError {
  #[error("Invalid document: {0}")]
  InvalidDocument(String),
  #[error("Property '{property}': {reason}")]
  SchemaViolation { property: String, reason: String },
  #[error("Document not found: {0}")]
  DocumentNotFound(String),
  #[error("Document already exists: {0}")]
  DuplicateDocument(String),
  #[error("Document {0} rejected by one or more index backends")]
  BackendRejected(String),
}

impl IndexTaskError {
  fn schema(property: &str, reason: impl Into<String>) -> Self {
    Self::SchemaViolation {
      property: property.to_string(),
      reason: reason.into(),
    }
  }
}

/// In-place numeric operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InPlaceOp {
  Add,
  Sub,
  Set,
}

#[derive(Debug, Clone, Deserialize)]
struct InPlaceUpdate {
  property: String,
  op: InPlaceOp,
  value: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct InPlaceRequest {
  #[serde(rename = "DOCID")]
  docid: serde_json::Value,
  update: Vec<InPlaceUpdate>,
}

pub struct IndexTaskService {
  schema: CollectionConfig,
  coordinator: Arc<IncrementalIndexCoordinator>,
  api_docs_since_flush: AtomicUsize,
  /// Held across read-merge-write so concurrent writes to one document
  /// neither duplicate a key nor lose an update.
  writes: Mutex<()>,
}

impl IndexTaskService {
  pub fn new(schema: CollectionConfig, coordinator: Arc<IncrementalIndexCoordinator>) -> Self {
    Self {
      schema,
      coordinator,
      api_docs_since_flush: AtomicUsize::new(0),
      writes: Mutex::new(()),
    }
  }

  pub fn collection(&self) -> &str {
    &self.schema.name
  }

  pub fn coordinator(&self) -> &Arc<IncrementalIndexCoordinator> {
    &self.coordinator
  }

  pub fn create_document(&self, value: &serde_json::Value) -> Result<(), IndexTaskError> {
    let (key, properties) = self.parse(value)?;
    let store = self.coordinator.document_store();
    let _write = self.writes.lock();

    if store.id_for_key(&key).is_some() {
      return Err(IndexTaskError::DuplicateDocument(key));
    }

    let doc = Document {
      id: store.allocate_id(),
      key: key.clone(),
      properties,
    };
    if store.insert_new(doc.clone()).is_err() {
      return Err(IndexTaskError::DuplicateDocument(key));
    }
    debug!(collection = %self.schema.name, doc_id = %doc.id, key = %key, "Inserting document");

    let ok = self.coordinator.apply(&Mutation::Insert {
      doc,
      timestamp: Utc::now(),
    });
    self.count_api_doc();
    if ok { Ok(()) } else { Err(IndexTaskError::BackendRejected(key)) }
  }

  pub fn update_document(&self, value: &serde_json::Value) -> Result<(), IndexTaskError> {
    let (key, properties) = self.parse(value)?;
    let _write = self.writes.lock();
    let old = self
      .coordinator
      .document_store()
      .get_by_key(&key)
      .ok_or_else(|| IndexTaskError::DocumentNotFound(key.clone()))?;

    let mut new = old.clone();
    new.properties.extend(properties);
    let update_type = self.classify(&old, &new);
    self.apply_update(old, new, update_type)
  }

  /// Apply `{DOCID, update: [{property, op, value}]}` to numeric properties.
  pub fn update_document_in_place(&self, request: &serde_json::Value) -> Result<(), IndexTaskError> {
    let request: InPlaceRequest =
      serde_json::from_value(request.clone()).map_err(|e| IndexTaskError::InvalidDocument(e.to_string()))?;
    let key = docid_string(&request.docid)?;
    let _write = self.writes.lock();
    let old = self
      .coordinator
      .document_store()
      .get_by_key(&key)
      .ok_or_else(|| IndexTaskError::DocumentNotFound(key.clone()))?;

    let mut new = old.clone();
    for update in &request.update {
      let kind = self
        .schema
        .property(&update.property)
        .map(|p| p.kind.clone())
        .ok_or_else(|| IndexTaskError::schema(&update.property, "not in schema"))?;
      let operand = match (&kind, &update.value) {
        (PropertyKind::Int, v) => v.as_i64().map(PropertyValue::Int),
        (PropertyKind::Float, v) => v.as_f64().map(PropertyValue::Float),
        (PropertyKind::String, _) => return Err(IndexTaskError::schema(&update.property, "not numeric")),
      }
      .ok_or_else(|| IndexTaskError::schema(&update.property, "operand is not a number"))?;

      let current = new.property(&update.property).cloned();
      let next = apply_in_place(current, update.op, operand)
        .ok_or_else(|| IndexTaskError::schema(&update.property, "numeric overflow"))?;
      new.properties.insert(update.property.clone(), next);
    }

    self.apply_update(old, new, UpdateType::InPlace)
  }

  pub fn destroy_document(&self, value: &serde_json::Value) -> Result<(), IndexTaskError> {
    let key = value
      .get(DOCID_PROPERTY)
      .ok_or_else(|| IndexTaskError::InvalidDocument(format!("missing {}", DOCID_PROPERTY)))
      .and_then(docid_string)?;
    let store = self.coordinator.document_store();
    let _write = self.writes.lock();
    let id = store
      .id_for_key(&key)
      .ok_or_else(|| IndexTaskError::DocumentNotFound(key.clone()))?;

    store.remove(id);
    self.coordinator.apply(&Mutation::Remove {
      id,
      timestamp: Utc::now(),
    });
    self.count_api_doc();
    debug!(collection = %self.schema.name, doc_id = %id, key = %key, "Removed document");
    Ok(())
  }

  fn apply_update(&self, old: Document, new: Document, update_type: UpdateType) -> Result<(), IndexTaskError> {
    let key = new.key.clone();
    self.coordinator.document_store().put(new.clone());
    let ok = self.coordinator.apply(&Mutation::Update {
      old_rtype: self.rtype_view(&old),
      old,
      new,
      update_type,
      timestamp: Utc::now(),
    });
    self.count_api_doc();
    if ok { Ok(()) } else { Err(IndexTaskError::BackendRejected(key)) }
  }

  /// Numeric properties only; what an r-type update may change.
  fn rtype_view(&self, doc: &Document) -> Document {
    Document {
      id: doc.id,
      key: doc.key.clone(),
      properties: doc
        .properties
        .iter()
        .filter(|(_, v)| v.is_numeric())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
    }
  }

  fn classify(&self, old: &Document, new: &Document) -> UpdateType {
    let text_changed = self
      .schema
      .properties
      .iter()
      .filter(|p| p.kind == PropertyKind::String)
      .any(|p| old.property(&p.name) != new.property(&p.name));
    if text_changed { UpdateType::General } else { UpdateType::RType }
  }

  fn count_api_doc(&self) {
    let count = self.api_docs_since_flush.fetch_add(1, Ordering::Relaxed) + 1;
    if count >= MAX_API_INDEXDOC {
      self.api_docs_since_flush.store(0, Ordering::Relaxed);
      info!(collection = %self.schema.name, count, "API document threshold reached, flushing");
      self.coordinator.flush();
    }
  }

  fn parse(&self, value: &serde_json::Value) -> Result<(String, BTreeMap<String, PropertyValue>), IndexTaskError> {
    let object = value
      .as_object()
      .ok_or_else(|| IndexTaskError::InvalidDocument("document must be an object".into()))?;

    let key = object
      .get(DOCID_PROPERTY)
      .ok_or_else(|| IndexTaskError::InvalidDocument(format!("missing {}", DOCID_PROPERTY)))
      .and_then(docid_string)?;

    let mut properties = BTreeMap::new();
    for (name, raw) in object {
      if name == DOCID_PROPERTY {
        continue;
      }
      let config = self
        .schema
        .property(name)
        .ok_or_else(|| IndexTaskError::schema(name, "not in schema"))?;
      let value = PropertyValue::from_json(raw).ok_or_else(|| IndexTaskError::schema(name, "must be a scalar"))?;
      let value = match (&config.kind, value) {
        (PropertyKind::String, v @ PropertyValue::Text(_)) => v,
        (PropertyKind::Int, v @ PropertyValue::Int(_)) => v,
        (PropertyKind::Float, PropertyValue::Int(i)) => PropertyValue::Float(i as f64),
        (PropertyKind::Float, v @ PropertyValue::Float(_)) => v,
        (kind, _) => return Err(IndexTaskError::schema(name, format!("expected {:?}", kind))),
      };
      properties.insert(name.clone(), value);
    }

    Ok((key, properties))
  }
}

fn docid_string(value: &serde_json::Value) -> Result<String, IndexTaskError> {
  match value {
    serde_json::Value::String(s) if !s.is_empty() => Ok(s.clone()),
    serde_json::Value::Number(n) => Ok(n.to_string()),
    _ => Err(IndexTaskError::InvalidDocument(format!(
      "{} must be a non-empty string or number",
      DOCID_PROPERTY
    ))),
  }
}

fn apply_in_place(current: Option<PropertyValue>, op: InPlaceOp, operand: PropertyValue) -> Option<PropertyValue> {
  match (op, current, operand) {
    (InPlaceOp::Set, _, operand) => Some(operand),
    (op, None, operand) => apply_in_place(
      Some(match operand {
        PropertyValue::Float(_) => PropertyValue::Float(0.0),
        _ => PropertyValue::Int(0),
      }),
      op,
      operand,
    ),
    (InPlaceOp::Add, Some(PropertyValue::Int(a)), PropertyValue::Int(b)) => a.checked_add(b).map(PropertyValue::Int),
    (InPlaceOp::Sub, Some(PropertyValue::Int(a)), PropertyValue::Int(b)) => a.checked_sub(b).map(PropertyValue::Int),
    (InPlaceOp::Add, Some(PropertyValue::Float(a)), PropertyValue::Float(b)) => Some(PropertyValue::Float(a + b)),
    (InPlaceOp::Sub, Some(PropertyValue::Float(a)), PropertyValue::Float(b)) => Some(PropertyValue::Float(a - b)),
    _ => None,
  }
}
