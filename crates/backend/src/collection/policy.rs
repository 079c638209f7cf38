//! DistributionPolicy - decides whether a write runs here or is deferred.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::info;

use crate::domain::config::TopologyConfig;

/// Where a write request is considered to come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestOrigin {
  /// Issued on this node; applied immediately.
  Direct = 0,
  /// Public API call under distribution; queued so replication order holds.
  FromApi = 1,
}

impl RequestOrigin {
  fn from_u8(raw: u8) -> Self {
    match raw {
      1 => Self::FromApi,
      _ => Self::Direct,
    }
  }
}

/// Process-wide distribution mode. The only state is the current origin.
#[derive(Debug)]
pub struct DistributionPolicy {
  origin: AtomicU8,
}

impl DistributionPolicy {
  pub fn new(origin: RequestOrigin) -> Self {
    Self {
      origin: AtomicU8::new(origin as u8),
    }
  }

  /// Distributed clusters hook API writes; a standalone node applies them directly.
  pub fn from_topology(topology: &TopologyConfig) -> Self {
    Self::new(if topology.enabled {
      RequestOrigin::FromApi
    } else {
      RequestOrigin::Direct
    })
  }

  pub fn origin(&self) -> RequestOrigin {
    RequestOrigin::from_u8(self.origin.load(Ordering::Acquire))
  }

  pub fn set_origin(&self, origin: RequestOrigin) {
    let previous = RequestOrigin::from_u8(self.origin.swap(origin as u8, Ordering::AcqRel));
    if previous != origin {
      info!(from = ?previous, to = ?origin, "Distribution mode changed");
    }
  }

  pub fn should_defer(&self) -> bool {
    self.origin() == RequestOrigin::FromApi
  }
}
