//! Wire format.
//!
//! Every message is one length-delimited frame (4-byte big-endian length)
//! holding a MessagePack array:
//!
//! - request: `[0, msgid, method, params]`, `params` a one-element array
//!   holding the action encoded as a map
//! - response: `[1, msgid, error, result]`, exactly one of `error` /
//!   `result` non-nil
//!
//! Requests are decoded in two steps so that a bad method and bad params can
//! be told apart: [`decode_header`] reads only the envelope, then
//! [`decode_params`] reads the typed params once the method is known.

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned, de::IgnoredAny};
use tokio_util::codec::LengthDelimitedCodec;

use super::{GatewayError, RpcErrorBody};

pub const REQUEST: u8 = 0;
pub const RESPONSE: u8 = 1;

/// Frame codec shared by server and client.
pub fn frame_codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
  LengthDelimitedCodec::builder()
    .length_field_length(4)
    .max_frame_length(max_frame_bytes)
    .new_codec()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
  pub msgid: u32,
  pub method: String,
}

pub fn encode_request<P: Serialize>(msgid: u32, method: &str, params: &P) -> Result<Bytes, rmp_serde::encode::Error> {
  rmp_serde::to_vec_named(&(REQUEST, msgid, method, (params,))).map(Bytes::from)
}

pub fn decode_header(frame: &[u8]) -> Result<RequestHeader, GatewayError> {
  let (kind, msgid, method, _): (u8, u32, String, IgnoredAny) =
    rmp_serde::from_slice(frame).map_err(|e| GatewayError::ArgumentError(format!("malformed request: {}", e)))?;
  if kind != REQUEST {
    return Err(GatewayError::ArgumentError(format!("expected request type {}, got {}", REQUEST, kind)));
  }
  Ok(RequestHeader { msgid, method })
}

pub fn decode_params<P: DeserializeOwned>(frame: &[u8]) -> Result<P, GatewayError> {
  let (_, _, _, (params,)): (IgnoredAny, IgnoredAny, IgnoredAny, (P,)) =
    rmp_serde::from_slice(frame).map_err(|e| GatewayError::ArgumentError(e.to_string()))?;
  Ok(params)
}

pub fn encode_result<R: Serialize>(msgid: u32, result: &R) -> Result<Bytes, rmp_serde::encode::Error> {
  rmp_serde::to_vec_named(&(RESPONSE, msgid, None::<RpcErrorBody>, Some(result))).map(Bytes::from)
}

pub fn encode_error(msgid: u32, error: &GatewayError) -> Result<Bytes, rmp_serde::encode::Error> {
  rmp_serde::to_vec_named(&(RESPONSE, msgid, Some(error.to_body()), None::<()>)).map(Bytes::from)
}

/// A decoded response: the msgid plus either the result or the error slot.
pub type DecodedResponse<R> = (u32, Result<R, RpcErrorBody>);

pub fn decode_response<R: DeserializeOwned>(frame: &[u8]) -> Result<DecodedResponse<R>, rmp_serde::decode::Error> {
  let (kind, msgid, error, result): (u8, u32, Option<RpcErrorBody>, Option<R>) = rmp_serde::from_slice(frame)?;
  if kind != RESPONSE {
    return Err(rmp_serde::decode::Error::Syntax(format!(
      "expected response type {}, got {}",
      RESPONSE, kind
    )));
  }
  let outcome = match (error, result) {
    (Some(error), _) => Err(error),
    (None, Some(result)) => Ok(result),
    (None, None) => Err(RpcErrorBody {
      code: -32000,
      message: "Response carries neither error nor result".to_string(),
    }),
  };
  Ok((msgid, outcome))
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::domain::action::{CLEAR_SEARCH_CACHE, NotifyMessage};

  fn notify() -> NotifyMessage {
    NotifyMessage {
      method: CLEAR_SEARCH_CACHE.into(),
      collection: "books".into(),
    }
  }

  #[test]
  fn test_request_decodes_in_two_steps() {
    let frame = encode_request(7, "notify", &notify()).unwrap();

    let header = decode_header(&frame).unwrap();
    assert_eq!(
      header,
      RequestHeader {
        msgid: 7,
        method: "notify".into()
      }
    );
    assert_eq!(decode_params::<NotifyMessage>(&frame).unwrap(), notify());
  }

  #[test]
  fn test_params_of_wrong_shape_are_argument_errors() {
    let frame = encode_request(1, "notify", &42u32).unwrap();
    assert!(decode_header(&frame).is_ok());
    let err = decode_params::<NotifyMessage>(&frame).unwrap_err();
    assert_eq!(err.code(), -32602);
  }

  #[test]
  fn test_garbage_is_argument_error() {
    let err = decode_header(b"\xc1not msgpack").unwrap_err();
    assert!(matches!(err, GatewayError::ArgumentError(_)));

    // A response is not a request.
    let frame = encode_result(3, &true).unwrap();
    assert!(matches!(decode_header(&frame), Err(GatewayError::ArgumentError(_))));
  }

  #[test]
  fn test_response_slots() {
    let ok = encode_result(5, &true).unwrap();
    assert_eq!(decode_response::<bool>(&ok).unwrap(), (5, Ok(true)));

    let err = encode_error(6, &GatewayError::NotFound("books".into())).unwrap();
    let (msgid, outcome) = decode_response::<bool>(&err).unwrap();
    assert_eq!(msgid, 6);
    assert_eq!(outcome.unwrap_err().code, -32004);
  }
}
