//! Document model shared by the index backends, the task service and the RPC surface.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the property carrying the user-facing document key.
pub const DOCID_PROPERTY: &str = "DOCID";

/// Wall-clock time at which a mutation was applied.
pub type Timestamp = DateTime<Utc>;

/// Internal document id, allocated by the [`DocumentStore`](crate::index::DocumentStore).
///
/// Ids start at 1; 0 is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(pub u32);

impl fmt::Display for DocId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<u32> for DocId {
  fn from(id: u32) -> Self {
    Self(id)
  }
}

/// A single property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
  Int(i64),
  Float(f64),
  Text(String),
}

impl PropertyValue {
  pub fn as_text(&self) -> Option<&str> {
    match self {
      Self::Text(s) => Some(s),
      _ => None,
    }
  }

  pub fn is_numeric(&self) -> bool {
    matches!(self, Self::Int(_) | Self::Float(_))
  }

  /// Convert a JSON scalar into a property value. Arrays, objects and null are rejected.
  pub fn from_json(value: &serde_json::Value) -> Option<Self> {
    match value {
      serde_json::Value::String(s) => Some(Self::Text(s.clone())),
      serde_json::Value::Number(n) => n.as_i64().map(Self::Int).or_else(|| n.as_f64().map(Self::Float)),
      serde_json::Value::Bool(b) => Some(Self::Int(i64::from(*b))),
      _ => None,
    }
  }
}

impl fmt::Display for PropertyValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Int(v) => write!(f, "{}", v),
      Self::Float(v) => write!(f, "{}", v),
      Self::Text(v) => f.write_str(v),
    }
  }
}

/// A stored document.
///
/// `key` is the value of the `DOCID` property supplied by the API caller, `id`
/// is the internal id assigned on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
  pub id: DocId,
  pub key: String,
  pub properties: BTreeMap<String, PropertyValue>,
}

impl Document {
  pub fn new(id: DocId, key: impl Into<String>) -> Self {
    Self {
      id,
      key: key.into(),
      properties: BTreeMap::new(),
    }
  }

  pub fn with_property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
    self.properties.insert(name.into(), value);
    self
  }

  pub fn property(&self, name: &str) -> Option<&PropertyValue> {
    self.properties.get(name)
  }

  /// Copy of this document restricted to the given properties (all of them when empty).
  pub fn project(&self, properties: &[String]) -> Document {
    if properties.is_empty() {
      return self.clone();
    }
    Document {
      id: self.id,
      key: self.key.clone(),
      properties: self
        .properties
        .iter()
        .filter(|(name, _)| properties.iter().any(|p| p == *name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect(),
    }
  }
}

/// How an update changed a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
  /// Indexed text changed; backends must reindex the document.
  General,
  /// Only numeric / filter properties changed.
  RType,
  /// Numeric properties adjusted in place (`add`/`sub`/`set`).
  InPlace,
}

/// One write against a collection. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
  Insert {
    doc: Document,
    timestamp: Timestamp,
  },
  Update {
    old: Document,
    old_rtype: Document,
    new: Document,
    update_type: UpdateType,
    timestamp: Timestamp,
  },
  Remove {
    id: DocId,
    timestamp: Timestamp,
  },
}

impl Mutation {
  pub fn timestamp(&self) -> Timestamp {
    match self {
      Self::Insert { timestamp, .. } | Self::Update { timestamp, .. } | Self::Remove { timestamp, .. } => *timestamp,
    }
  }

  pub fn doc_id(&self) -> DocId {
    match self {
      Self::Insert { doc, .. } => doc.id,
      Self::Update { new, .. } => new.id,
      Self::Remove { id, .. } => *id,
    }
  }
}
