//! RPC gateway: the cluster-facing MessagePack-RPC server.
//!
//! The gateway accepts TCP connections and reads length-delimited request
//! frames. Each frame is dispatched on its own task, bounded by a fixed-size
//! permit pool (`gateway.threads`), and the response is written back on the
//! same connection tagged with the request's msgid.
//!
//! # Lifecycle
//!
//! `Stopped -> Listening -> Stopped`. [`RpcGateway::start`] binds and begins
//! serving; [`RpcGateway::stop`] stops accepting and reading, waits for every
//! in-flight call to write its response, then drops the listener.
//!
//! # Failure isolation
//!
//! Nothing a caller sends can take the server down: undecodable frames,
//! unknown methods and bad params become error responses, and a panic during
//! dispatch is caught and answered with an internal error.

use std::{any::Any, net::SocketAddr, panic::AssertUnwindSafe, sync::Arc};

use bytes::Bytes;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::{
  net::{TcpListener, TcpStream},
  sync::{Semaphore, mpsc},
};
use tokio_util::{codec::Framed, sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, trace, warn};

use crate::{
  collection::CollectionRegistry,
  domain::{
    action::{CLEAR_SEARCH_CACHE, GetDocumentsByIdsAction, KeywordSearchAction, NotifyMessage},
    config::GatewayConfig,
  },
  rpc::{
    GatewayError, RpcMethod,
    codec::{self, RequestHeader, frame_codec},
  },
};

// ============================================================================
// Gateway
// ============================================================================

enum GatewayState {
  Stopped,
  Listening {
    addr: SocketAddr,
    // Kept here so the port stays bound until in-flight calls drain.
    listener: Arc<TcpListener>,
    cancel: CancellationToken,
    tracker: TaskTracker,
  },
}

pub struct RpcGateway {
  registry: Arc<CollectionRegistry>,
  config: GatewayConfig,
  state: Mutex<GatewayState>,
}

impl RpcGateway {
  pub fn new(registry: Arc<CollectionRegistry>, config: GatewayConfig) -> Self {
    Self {
      registry,
      config,
      state: Mutex::new(GatewayState::Stopped),
    }
  }

  pub fn is_listening(&self) -> bool {
    matches!(*self.state.lock(), GatewayState::Listening { .. })
  }

  pub fn local_addr(&self) -> Option<SocketAddr> {
    match &*self.state.lock() {
      GatewayState::Listening { addr, .. } => Some(*addr),
      GatewayState::Stopped => None,
    }
  }

  /// Bind and start serving. Returns the bound address (useful with port 0).
  /// Starting an already listening gateway returns its current address.
  pub async fn start(&self) -> Result<SocketAddr, GatewayError> {
    if let Some(addr) = self.local_addr() {
      warn!(%addr, "Gateway already listening");
      return Ok(addr);
    }

    let listener = Arc::new(TcpListener::bind(self.config.bind_addr()).await?);
    let addr = listener.local_addr()?;
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();
    let pool = Arc::new(Semaphore::new(self.config.threads.max(1)));

    {
      let mut state = self.state.lock();
      if let GatewayState::Listening { addr, .. } = &*state {
        // Lost a start race; the listener we bound is dropped.
        return Ok(*addr);
      }
      *state = GatewayState::Listening {
        addr,
        listener: Arc::clone(&listener),
        cancel: cancel.clone(),
        tracker: tracker.clone(),
      };
    }

    tracker.spawn(accept_loop(
      listener,
      Arc::clone(&self.registry),
      pool,
      self.config.max_frame_bytes,
      cancel,
      tracker.clone(),
    ));
    tracker.close();

    info!(%addr, threads = self.config.threads, "RPC gateway listening");
    Ok(addr)
  }

  /// Stop accepting, let in-flight calls answer, then unbind.
  pub async fn stop(&self) {
    let previous = std::mem::replace(&mut *self.state.lock(), GatewayState::Stopped);
    let GatewayState::Listening {
      addr,
      listener,
      cancel,
      tracker,
    } = previous
    else {
      debug!("Gateway already stopped");
      return;
    };

    cancel.cancel();
    tracker.wait().await;
    drop(listener);
    info!(%addr, "RPC gateway stopped");
  }
}

// ============================================================================
// Connections
// ============================================================================

async fn accept_loop(
  listener: Arc<TcpListener>,
  registry: Arc<CollectionRegistry>,
  pool: Arc<Semaphore>,
  max_frame_bytes: usize,
  cancel: CancellationToken,
  tracker: TaskTracker,
) {
  loop {
    tokio::select! {
      biased;

      _ = cancel.cancelled() => {
        debug!("Accept loop shutting down");
        break;
      }

      result = listener.accept() => {
        match result {
          Ok((stream, peer)) => {
            trace!(%peer, "Accepted connection");
            tracker.spawn(handle_connection(
              stream,
              peer,
              Arc::clone(&registry),
              Arc::clone(&pool),
              max_frame_bytes,
              cancel.clone(),
              tracker.clone(),
            ));
          }
          Err(e) => {
            error!("Accept error: {}", e);
          }
        }
      }
    }
  }
}

/// Serve one connection.
///
/// Frames are read until the peer disconnects or the gateway stops. Every
/// frame is handled on its own task; responses funnel through a channel into
/// a single writer so they never interleave on the socket.
async fn handle_connection(
  stream: TcpStream,
  peer: SocketAddr,
  registry: Arc<CollectionRegistry>,
  pool: Arc<Semaphore>,
  max_frame_bytes: usize,
  cancel: CancellationToken,
  tracker: TaskTracker,
) {
  let (mut sink, mut frames) = Framed::new(stream, frame_codec(max_frame_bytes)).split();
  let (response_tx, mut response_rx) = mpsc::channel::<Bytes>(64);

  let writer = tokio::spawn(async move {
    while let Some(response) = response_rx.recv().await {
      if let Err(e) = sink.send(response).await {
        debug!(%peer, "Failed to write response: {}", e);
        break;
      }
    }
  });

  loop {
    let frame = tokio::select! {
      biased;
      _ = cancel.cancelled() => break,
      frame = frames.next() => frame,
    };

    let frame = match frame {
      Some(Ok(frame)) => frame.freeze(),
      Some(Err(e)) => {
        // Framing is lost (oversized or truncated length); the stream can't recover.
        warn!(%peer, "Frame error, closing connection: {}", e);
        break;
      }
      None => break,
    };

    let Ok(permit) = Arc::clone(&pool).acquire_owned().await else {
      break;
    };
    let registry = Arc::clone(&registry);
    let response_tx = response_tx.clone();
    tracker.spawn(async move {
      let _permit = permit;
      if let Some(response) = dispatch(&registry, &frame).await
        && response_tx.send(response).await.is_err()
      {
        debug!(%peer, "Connection closed before response was written");
      }
    });
  }

  // The writer exits once every in-flight call has sent its response.
  drop(response_tx);
  let _ = writer.await;
  trace!(%peer, "Connection closed");
}

// ============================================================================
// Dispatch
// ============================================================================

/// Decode, route and answer one request frame. `None` only when even the
/// error response could not be encoded.
pub async fn dispatch(registry: &CollectionRegistry, frame: &[u8]) -> Option<Bytes> {
  let header = match codec::decode_header(frame) {
    Ok(header) => header,
    Err(e) => {
      error!(error = %e, "Undecodable request");
      return encode_error(0, &e);
    }
  };

  let outcome = AssertUnwindSafe(call(registry, &header, frame))
    .catch_unwind()
    .await
    .unwrap_or_else(|panic| Err(GatewayError::Internal(panic_message(panic.as_ref()))));

  match outcome {
    Ok(response) => Some(response),
    Err(e) => {
      match &e {
        GatewayError::NoSuchMethod(_) | GatewayError::NotFound(_) => {
          warn!(method = %header.method, msgid = header.msgid, error = %e, "RPC call rejected")
        }
        _ => error!(method = %header.method, msgid = header.msgid, error = %e, "RPC call failed"),
      }
      encode_error(header.msgid, &e)
    }
  }
}

async fn call(registry: &CollectionRegistry, header: &RequestHeader, frame: &[u8]) -> Result<Bytes, GatewayError> {
  let method = RpcMethod::parse(&header.method)?;
  trace!(%method, msgid = header.msgid, "Dispatching RPC call");

  match method {
    RpcMethod::DocumentSearch => {
      let action: KeywordSearchAction = codec::decode_params(frame)?;
      let handler = registry.lookup(&action.collection).await?;
      let result = handler.search(&action).await;
      if !result.error.is_empty() {
        error!(collection = %action.collection, error = %result.error, "Search service reported an error");
      }
      encode_result(header.msgid, &result)
    }
    RpcMethod::GetDocumentsByIds => {
      let action: GetDocumentsByIdsAction = codec::decode_params(frame)?;
      let handler = registry.lookup(&action.collection).await?;
      let result = handler.get(&action).await;
      if !result.error.is_empty() {
        error!(collection = %action.collection, error = %result.error, "Document retrieval reported an error");
      }
      encode_result(header.msgid, &result)
    }
    RpcMethod::Notify => {
      let message: NotifyMessage = codec::decode_params(frame)?;
      if message.method == CLEAR_SEARCH_CACHE {
        let handler = registry.lookup(&message.collection).await?;
        handler.search_service().on_update_search_cache().await;
      } else {
        warn!(
          notify = %message.method,
          collection = %message.collection,
          "Ignoring unknown notify message"
        );
      }
      encode_result(header.msgid, &true)
    }
  }
}

fn encode_result<R: serde::Serialize>(msgid: u32, result: &R) -> Result<Bytes, GatewayError> {
  codec::encode_result(msgid, result).map_err(|e| GatewayError::Internal(format!("failed to encode result: {}", e)))
}

fn encode_error(msgid: u32, error: &GatewayError) -> Option<Bytes> {
  codec::encode_error(msgid, error)
    .inspect_err(|e| error!(msgid, "Failed to encode error response: {}", e))
    .ok()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = panic.downcast_ref::<String>() {
    message.clone()
  } else {
    "panic during dispatch".to_string()
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::{domain::action::RawTextResult, rpc::codec::decode_response};

  #[test]
  fn test_panic_message() {
    assert_eq!(panic_message(&"boom"), "boom");
    assert_eq!(panic_message(&String::from("bang")), "bang");
    assert_eq!(panic_message(&42u8), "panic during dispatch");
  }

  #[tokio::test]
  async fn test_dispatch_unknown_collection() {
    let registry = CollectionRegistry::new();
    let frame = codec::encode_request(
      9,
      "getDocumentsByIds",
      &GetDocumentsByIdsAction {
        collection: "nope".into(),
        ..Default::default()
      },
    )
    .unwrap();

    let response = dispatch(&registry, &frame).await.unwrap();
    let (msgid, outcome) = decode_response::<RawTextResult>(&response).unwrap();
    assert_eq!(msgid, 9);
    let body = outcome.unwrap_err();
    assert_eq!(body.code, -32004);
    assert!(body.message.contains("nope"));
  }

  #[tokio::test]
  async fn test_dispatch_garbage_frame() {
    let registry = CollectionRegistry::new();
    let response = dispatch(&registry, b"\x93\x01").await.unwrap();
    let (msgid, outcome) = decode_response::<bool>(&response).unwrap();
    assert_eq!(msgid, 0);
    assert_eq!(outcome.unwrap_err().code, -32602);
  }

  #[tokio::test]
  async fn test_unknown_notify_is_acked() {
    let registry = CollectionRegistry::new();
    let frame = codec::encode_request(
      2,
      "notify",
      &NotifyMessage {
        method: "REFRESH".into(),
        collection: "books".into(),
      },
    )
    .unwrap();

    let response = dispatch(&registry, &frame).await.unwrap();
    assert_eq!(decode_response::<bool>(&response).unwrap(), (2, Ok(true)));
  }

  #[tokio::test]
  async fn test_start_and_stop() {
    let gateway = RpcGateway::new(
      Arc::new(CollectionRegistry::new()),
      GatewayConfig {
        port: 0,
        ..Default::default()
      },
    );
    assert!(!gateway.is_listening());

    let addr = gateway.start().await.unwrap();
    assert!(gateway.is_listening());
    assert_eq!(gateway.start().await.unwrap(), addr);

    gateway.stop().await;
    assert!(!gateway.is_listening());
    assert!(gateway.local_addr().is_none());
    gateway.stop().await;
  }
}
