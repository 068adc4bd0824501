//! Response descriptors produced by handlers.
//!
//! # Responsibilities
//! - Describe a reply as status, headers and one of three body shapes
//! - Render buffered replies directly and streaming replies through the bridge
//!
//! # Design Decisions
//! - The body variant alone selects the buffered or streaming path
//! - Streaming replies default to `cache-control: no-store`

use std::fmt;

use axum::body::Body;
use axum::http::header::{HeaderName, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::action::HandlerFault;
use crate::streaming::{BoxSource, Bridge, BridgeOptions, Source, SourceExt};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const EVENT_STREAM: &str = "text/event-stream";
const APPLICATION_JSON: &str = "application/json";
const NO_STORE: &str = "no-store";

/// Reply body shape.
pub enum ReplyBody {
    Empty,
    Full(Bytes),
    /// Lazily produced chunks, driven by downstream demand.
    Stream(BoxSource),
}

impl fmt::Debug for ReplyBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyBody::Empty => f.write_str("Empty"),
            ReplyBody::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            ReplyBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// What a handler answers with.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ReplyBody,
}

impl Reply {
    pub fn new(body: ReplyBody) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body,
        }
    }

    pub fn empty() -> Self {
        Self::new(ReplyBody::Empty)
    }

    pub fn bytes(body: impl Into<Bytes>) -> Self {
        Self::new(ReplyBody::Full(body.into()))
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self::bytes(body.into()).content_type(TEXT_PLAIN)
    }

    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, HandlerFault> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::bytes(body).content_type(APPLICATION_JSON))
    }

    /// Stream text chunks from `source`.
    pub fn stream<S>(source: S) -> Self
    where
        S: Source,
        S::Item: Into<Bytes>,
    {
        Self::new(ReplyBody::Stream(source.into_chunks()))
            .content_type(TEXT_PLAIN)
            .header(CACHE_CONTROL, HeaderValue::from_static(NO_STORE))
    }

    /// Stream server-sent events; each chunk should be a full frame (see [`sse_frame`]).
    pub fn event_stream<S>(source: S) -> Self
    where
        S: Source,
        S::Item: Into<Bytes>,
    {
        Self::stream(source).content_type(EVENT_STREAM)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    fn content_type(self, value: &'static str) -> Self {
        self.header(CONTENT_TYPE, HeaderValue::from_static(value))
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ReplyBody::Stream(_))
    }

    /// Detach a buffered reply so it can be shared. Streaming replies are
    /// handed back untouched.
    pub fn into_buffered(self) -> Result<BufferedReply, Reply> {
        let body = match self.body {
            ReplyBody::Empty => None,
            ReplyBody::Full(bytes) => Some(bytes),
            ReplyBody::Stream(source) => {
                return Err(Reply {
                    status: self.status,
                    headers: self.headers,
                    body: ReplyBody::Stream(source),
                })
            }
        };
        Ok(BufferedReply {
            status: self.status,
            headers: self.headers,
            body,
        })
    }

    /// Turn into an HTTP response. Streaming bodies are driven by a
    /// [`Bridge`] that holds `guard` until the stream ends.
    pub(crate) fn render(self, cancel: CancellationToken, options: BridgeOptions, guard: Option<DropGuard>) -> Response {
        let body = match self.body {
            ReplyBody::Empty => Body::empty(),
            ReplyBody::Full(bytes) => Body::from(bytes),
            ReplyBody::Stream(source) => {
                let chunks = Bridge::guarded(source, cancel, options, guard);
                Body::from_stream(futures_util::StreamExt::map(chunks, Ok::<_, std::convert::Infallible>))
            }
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        self.render(CancellationToken::new(), BridgeOptions::default(), None)
    }
}

impl From<HandlerFault> for Reply {
    fn from(fault: HandlerFault) -> Self {
        let message = match &fault {
            HandlerFault::Status { message, .. } => message.clone(),
            HandlerFault::Cancelled => "request cancelled".to_string(),
            HandlerFault::Internal(_) => "internal error".to_string(),
        };
        Reply::text(message).with_status(fault.status_code())
    }
}

/// A reply whose body is fully in memory. Cloneable.
#[derive(Debug, Clone)]
pub struct BufferedReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl From<BufferedReply> for Reply {
    fn from(reply: BufferedReply) -> Self {
        Reply {
            status: reply.status,
            headers: reply.headers,
            body: reply.body.map_or(ReplyBody::Empty, ReplyBody::Full),
        }
    }
}

/// Encode one server-sent event frame.
pub fn sse_frame(event: Option<&str>, data: &str) -> Bytes {
    let mut frame = String::with_capacity(data.len() + 16);
    if let Some(event) = event {
        frame.push_str("event: ");
        frame.push_str(event);
        frame.push('\n');
    }
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    Bytes::from(frame)
}
