//! Wire messages exchanged over the message bus, and the codec that decodes
//! them.
//!
//! The spider's control topic carries one of two frame shapes: an
//! [`ExitMessage`] requesting shutdown, or a [`Response`] reporting an
//! agent's outcome. The core only requires that frames decode to one of
//! these; the actual byte encoding is pluggable via [`MessageCodec`], the
//! same way the teacher crate's resolver registry treats its HTTP transport
//! as swappable behind a trait rather than hard-wiring one implementation.

use serde::{Deserialize, Serialize};

use crate::response::Response;

/// Control message requesting graceful shutdown of the spider named by `id`.
/// Ids that do not match the running spider are ignored (the bus is shared
/// by multiple spiders).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitMessage {
    /// Identifier of the spider that should shut down.
    pub id: String,
}

/// Wire representation of a [`Response`], independent of the in-process
/// struct's field types so the codec can evolve without touching business
/// logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// See [`Response::request_hash`].
    pub request_hash: String,
    /// See [`Response::status_code`].
    pub status_code: u16,
    /// See [`Response::agent`].
    pub agent: String,
    /// See [`Response::elapsed_milliseconds`].
    pub elapsed_milliseconds: u64,
    /// See [`Response::content`].
    pub content: Vec<u8>,
}

impl From<ResponseFrame> for Response {
    fn from(frame: ResponseFrame) -> Self {
        Self {
            request_hash: frame.request_hash,
            status_code: frame.status_code,
            agent: frame.agent,
            elapsed_milliseconds: frame.elapsed_milliseconds,
            content: frame.content,
        }
    }
}

impl From<Response> for ResponseFrame {
    fn from(response: Response) -> Self {
        Self {
            request_hash: response.request_hash,
            status_code: response.status_code,
            agent: response.agent,
            elapsed_milliseconds: response.elapsed_milliseconds,
            content: response.content,
        }
    }
}

/// A decoded inbound frame on the spider's control topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Shutdown request.
    Exit(ExitMessage),
    /// Agent response to a dispatched request.
    Response(ResponseFrame),
}

/// Error returned when a frame cannot be decoded to a known
/// [`InboundMessage`] variant.
#[derive(Debug, thiserror::Error)]
#[error("failed to decode inbound frame: {0}")]
pub struct DecodeError(#[from] pub serde_json::Error);

/// Decodes/encodes the opaque byte frames carried on the message bus.
///
/// The core requires only that frames decode to a known [`InboundMessage`]
/// variant; anything else (including malformed bytes) is the consumer's
/// "unknown message" case, logged and ignored per the response-handler
/// contract.
pub trait MessageCodec: Send + Sync {
    /// Decodes a frame into an [`InboundMessage`].
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if `payload` is not a recognized frame.
    fn decode(&self, payload: &[u8]) -> Result<InboundMessage, DecodeError>;

    /// Encodes a [`crate::request::Request`] for publication to a
    /// downloader/agent topic.
    fn encode_request(&self, request: &crate::request::Request) -> Vec<u8>;

    /// Decodes a [`crate::request::Request`] previously produced by
    /// [`Self::encode_request`] (e.g. a seed request read back from an
    /// external supplier's own storage).
    ///
    /// # Errors
    ///
    /// Returns [`RequestDecodeError::Malformed`] for unparsable bytes, or
    /// [`RequestDecodeError::UnsupportedPolicy`] if the frame's `policy`
    /// tag is not one this build recognizes.
    fn decode_request(&self, payload: &[u8]) -> Result<crate::request::Request, RequestDecodeError>;
}

/// Wire representation of a [`crate::request::Request`] used by
/// [`JsonCodec::encode_request`]/[`JsonCodec::decode_request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub hash: String,
    pub request_uri: String,
    pub owner: String,
    pub downloader_type: String,
    pub agent: String,
    pub policy: String,
    pub proxy: Option<String>,
    pub headers: std::collections::HashMap<String, String>,
    pub requested_times: u32,
    pub depth: u32,
    pub timestamp: i64,
}

impl From<&crate::request::Request> for RequestFrame {
    fn from(r: &crate::request::Request) -> Self {
        Self {
            hash: r.hash.clone(),
            request_uri: r.request_uri.clone(),
            owner: r.owner.clone(),
            downloader_type: r.downloader_type.clone(),
            agent: r.agent.clone(),
            policy: r.policy.as_str().to_string(),
            proxy: r.proxy.clone(),
            headers: r.headers.clone(),
            requested_times: r.requested_times,
            depth: r.depth,
            timestamp: r.timestamp,
        }
    }
}

/// Error decoding a [`RequestFrame`] back into a [`crate::request::Request`].
#[derive(Debug, thiserror::Error)]
pub enum RequestDecodeError {
    /// The payload was not a well-formed [`RequestFrame`].
    #[error("malformed request frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The frame's `policy` tag does not match a recognized [`crate::request::Policy`].
    #[error("unsupported policy {0:?} in request frame")]
    UnsupportedPolicy(String),
}

impl TryFrom<RequestFrame> for crate::request::Request {
    type Error = RequestDecodeError;

    fn try_from(frame: RequestFrame) -> Result<Self, Self::Error> {
        let policy = crate::request::Policy::parse(&frame.policy)
            .map_err(RequestDecodeError::UnsupportedPolicy)?;
        Ok(Self {
            hash: frame.hash,
            request_uri: frame.request_uri,
            owner: frame.owner,
            downloader_type: frame.downloader_type,
            agent: frame.agent,
            policy,
            proxy: frame.proxy,
            headers: frame.headers,
            requested_times: frame.requested_times,
            depth: frame.depth,
            timestamp: frame.timestamp,
        })
    }
}

impl RequestDecodeError {
    /// Converts this decode error into the crate's [`crate::error::CoreError`]
    /// taxonomy, for callers that decode requests as part of a larger
    /// `CoreError`-returning flow (e.g. a supplier loader reading back
    /// previously serialized seeds).
    #[must_use]
    pub fn into_core_error(self, hash_hint: &str) -> crate::error::CoreError {
        match self {
            Self::Malformed(_) => crate::error::CoreError::InvalidRequest {
                uri: hash_hint.to_string(),
            },
            Self::UnsupportedPolicy(policy) => crate::error::CoreError::UnsupportedPolicy {
                hash: hash_hint.to_string(),
                policy,
            },
        }
    }
}

/// Default [`MessageCodec`] implementation: JSON-tagged frames via `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn decode(&self, payload: &[u8]) -> Result<InboundMessage, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }

    fn encode_request(&self, request: &crate::request::Request) -> Vec<u8> {
        let frame = RequestFrame::from(request);
        // A request is always representable as JSON; a failure here would be
        // a bug in `RequestFrame`, not a runtime condition callers can act on.
        serde_json::to_vec(&frame).unwrap_or_default()
    }

    fn decode_request(
        &self,
        payload: &[u8],
    ) -> Result<crate::request::Request, RequestDecodeError> {
        let frame: RequestFrame = serde_json::from_slice(payload)?;
        crate::request::Request::try_from(frame)
    }
}
