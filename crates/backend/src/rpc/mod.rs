//! MessagePack-RPC surface of the gateway: error kinds, methods and wire codec.

use serde::{Deserialize, Serialize};

pub mod client;
pub mod codec;

pub use client::{ClientError, GatewayClient};
pub use codec::{RequestHeader, frame_codec};

use crate::collection::RegistryError;

/// Errors returned to an RPC caller.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
  #[error("No such method: {0}")]
  NoSuchMethod(String),
  #[error("Argument error: {0}")]
  ArgumentError(String),
  #[error("Collection not found: {0}")]
  NotFound(String),
  #[error("Internal error: {0}")]
  Internal(String),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

impl GatewayError {
  /// Stable RPC error code, JSON-RPC style.
  pub fn code(&self) -> i32 {
    match self {
      Self::NoSuchMethod(_) => -32601,
      Self::ArgumentError(_) => -32602,
      Self::NotFound(_) => -32004,
      Self::Internal(_) | Self::Io(_) => -32000,
    }
  }

  pub fn to_body(&self) -> RpcErrorBody {
    RpcErrorBody {
      code: self.code(),
      message: self.to_string(),
    }
  }
}

impl From<RegistryError> for GatewayError {
  fn from(err: RegistryError) -> Self {
    match err {
      RegistryError::CollectionNotFound(name) => Self::NotFound(name),
    }
  }
}

/// Error slot of a response: `{code, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorBody {
  pub code: i32,
  pub message: String,
}

/// The closed set of supported methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
  GetDocumentsByIds,
  DocumentSearch,
  Notify,
}

impl RpcMethod {
  pub const ALL: [RpcMethod; 3] = [Self::GetDocumentsByIds, Self::DocumentSearch, Self::Notify];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::GetDocumentsByIds => "getDocumentsByIds",
      Self::DocumentSearch => "documentSearch",
      Self::Notify => "notify",
    }
  }

  pub fn parse(name: &str) -> Result<Self, GatewayError> {
    Self::ALL
      .into_iter()
      .find(|m| m.as_str() == name)
      .ok_or_else(|| GatewayError::NoSuchMethod(name.to_string()))
  }
}

impl std::fmt::Display for RpcMethod {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}
