use std::{
  collections::HashMap,
  sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
  },
};

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use serde::{Serialize, de::DeserializeOwned};
use tokio::{
  net::{TcpStream, ToSocketAddrs},
  sync::{mpsc, oneshot},
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, warn};

use super::{
  RpcMethod,
  codec::{self, frame_codec},
};
use crate::domain::{
  action::{
    CLEAR_SEARCH_CACHE, GetDocumentsByIdsAction, KeywordSearchAction, KeywordSearchResult, NotifyMessage,
    RawTextResult,
  },
  config::GatewayConfig,
};

type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
  #[error("RPC error {code}: {message}")]
  Rpc { code: i32, message: String },
  #[error("Codec error: {0}")]
  Codec(String),
  #[error("IO error: {0}")]
  Io(String),
  #[error("Connection error: {0}")]
  Connection(String),
}

impl From<std::io::Error> for ClientError {
  fn from(err: std::io::Error) -> Self {
    ClientError::Io(err.to_string())
  }
}

impl From<rmp_serde::encode::Error> for ClientError {
  fn from(err: rmp_serde::encode::Error) -> Self {
    ClientError::Codec(err.to_string())
  }
}

struct OutboundCall {
  msgid: u32,
  frame: Bytes,
  response_tx: oneshot::Sender<BytesMut>,
}

/// Client for a node's RPC gateway. Cheap to clone; clones share one
/// connection and calls are multiplexed over it by msgid.
#[derive(Clone)]
pub struct GatewayClient {
  call_tx: mpsc::Sender<OutboundCall>,
  counter: Arc<AtomicU32>,
}

impl GatewayClient {
  pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
    Self::connect_with(addr, GatewayConfig::default().max_frame_bytes).await
  }

  pub async fn connect_with(addr: impl ToSocketAddrs, max_frame_bytes: usize) -> Result<Self, ClientError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (sink, read_stream) = Framed::new(stream, frame_codec(max_frame_bytes)).split();

    let (call_tx, call_rx) = mpsc::channel(64);
    tokio::spawn(Self::multiplexer(sink, read_stream, call_rx));

    Ok(Self {
      call_tx,
      counter: Arc::new(AtomicU32::new(1)),
    })
  }

  async fn multiplexer(
    mut sink: futures::stream::SplitSink<FramedStream, Bytes>,
    mut stream: futures::stream::SplitStream<FramedStream>,
    mut call_rx: mpsc::Receiver<OutboundCall>,
  ) {
    let mut pending: HashMap<u32, oneshot::Sender<BytesMut>> = HashMap::new();

    loop {
      tokio::select! {
        outbound = call_rx.recv() => {
          let Some(outbound) = outbound else {
            debug!("all client handles dropped");
            break;
          };
          pending.insert(outbound.msgid, outbound.response_tx);
          if let Err(e) = sink.send(outbound.frame).await {
            error!("failed to send request: {e}");
            // Dropping the sender fails the waiting call.
            pending.remove(&outbound.msgid);
          }
        }

        result = stream.next() => {
          match result {
            Some(Ok(frame)) => {
              match codec::decode_response::<serde::de::IgnoredAny>(&frame) {
                Ok((msgid, _)) => match pending.remove(&msgid) {
                  Some(tx) => {
                    if tx.send(frame).is_err() {
                      debug!("receiver dropped for call {msgid}");
                    }
                  }
                  None => warn!("received response for unknown msgid: {msgid}"),
                },
                Err(e) => error!("failed to parse response: {e}"),
              }
            }
            Some(Err(e)) => {
              error!("connection error: {e}");
              break;
            }
            None => {
              debug!("connection closed");
              break;
            }
          }
        }
      }
    }
  }

  /// Call `method` with `params` and decode the result as `R`.
  pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, ClientError>
  where
    P: Serialize,
    R: DeserializeOwned,
  {
    let msgid = self.counter.fetch_add(1, Ordering::Relaxed);
    let frame = codec::encode_request(msgid, method, params)?;
    let (response_tx, response_rx) = oneshot::channel();

    self
      .call_tx
      .send(OutboundCall {
        msgid,
        frame,
        response_tx,
      })
      .await
      .map_err(|_| ClientError::Connection("client closed".into()))?;

    let frame = response_rx
      .await
      .map_err(|_| ClientError::Connection("connection closed before response".into()))?;

    let (_, outcome) = codec::decode_response::<R>(&frame).map_err(|e| ClientError::Codec(e.to_string()))?;
    outcome.map_err(|body| ClientError::Rpc {
      code: body.code,
      message: body.message,
    })
  }

  pub async fn document_search(&self, action: &KeywordSearchAction) -> Result<KeywordSearchResult, ClientError> {
    self.call(RpcMethod::DocumentSearch.as_str(), action).await
  }

  pub async fn get_documents_by_ids(&self, action: &GetDocumentsByIdsAction) -> Result<RawTextResult, ClientError> {
    self.call(RpcMethod::GetDocumentsByIds.as_str(), action).await
  }

  pub async fn notify(&self, message: &NotifyMessage) -> Result<bool, ClientError> {
    self.call(RpcMethod::Notify.as_str(), message).await
  }

  pub async fn clear_search_cache(&self, collection: &str) -> Result<bool, ClientError> {
    self
      .notify(&NotifyMessage {
        method: CLEAR_SEARCH_CACHE.to_string(),
        collection: collection.to_string(),
      })
      .await
  }
}
