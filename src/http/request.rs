//! Per-request context handed to hooks and handlers.
//!
//! # Responsibilities
//! - Carry the connection, the buffered exchange and captured path parameters
//! - Expose the raw query string and parsed query pairs
//! - Carry the request's cancellation token
//! - Accept additive patches from before-hooks
//!
//! # Design Decisions
//! - The body is buffered (bounded by `limits.max_body_size`) before dispatch,
//!   so the context is cheap to clone and hooks can read it freely
//! - Patches only add or overwrite entries, they never remove

use std::collections::HashMap;

use axum::http::{Extensions, HeaderMap, Method, Uri};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::action::HandlerFault;
use crate::net::connection::ConnectionInfo;

/// The inbound half of the HTTP exchange.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Exchange {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Additive change a before-hook asks to merge into the context.
#[derive(Debug, Clone, Default)]
pub struct ContextPatch {
    params: Vec<(String, String)>,
    extensions: Extensions,
}

impl ContextPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite a path parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Attach a typed value later steps can read with [`RequestContext::extension`].
    pub fn extension<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.extensions.insert(value);
        self
    }
}

/// Everything a hook or handler knows about the request it serves.
#[derive(Debug, Clone)]
pub struct RequestContext {
    connection: ConnectionInfo,
    exchange: Exchange,
    params: HashMap<String, String>,
    cancel: CancellationToken,
    request_id: String,
    extensions: Extensions,
}

impl RequestContext {
    pub fn new(
        connection: ConnectionInfo,
        exchange: Exchange,
        params: HashMap<String, String>,
        cancel: CancellationToken,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            exchange,
            params,
            cancel,
            request_id: request_id.into(),
            extensions: Extensions::new(),
        }
    }

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    pub fn method(&self) -> &Method {
        &self.exchange.method
    }

    pub fn path(&self) -> &str {
        self.exchange.uri.path()
    }

    pub fn body(&self) -> &Bytes {
        &self.exchange.body
    }

    /// A captured path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// The raw query string, empty when the URI has none.
    pub fn query(&self) -> &str {
        self.exchange.uri.query().unwrap_or("")
    }

    /// Decoded `key=value` pairs of the query string, in order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(self.query().as_bytes())
            .into_owned()
            .collect()
    }

    /// First decoded value of query parameter `name`.
    pub fn query_param(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query().as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HandlerFault> {
        serde_json::from_slice(&self.exchange.body)
            .map_err(|e| HandlerFault::bad_request(format!("invalid JSON body: {e}")))
    }

    /// Fires on peer disconnect, shutdown or stream deadline.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Swap the token, for work that must outlive this request.
    pub(crate) fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }

    /// Merge a before-hook patch.
    pub fn apply(&mut self, patch: ContextPatch) {
        self.params.extend(patch.params);
        self.extensions.extend(patch.extensions);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::net::connection::ConnectionId;

    pub(crate) fn context(uri: &str) -> RequestContext {
        let exchange = Exchange {
            method: Method::GET,
            uri: uri.parse().unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        let connection = ConnectionInfo {
            id: ConnectionId::new(),
            peer: "127.0.0.1:40000".parse().unwrap(),
        };
        RequestContext::new(connection, exchange, HashMap::new(), CancellationToken::new(), "req-1")
    }

    #[test]
    fn test_query_access() {
        let ctx = context("/search?q=rust+lang&page=2&q=again");
        assert_eq!(ctx.query(), "q=rust+lang&page=2&q=again");
        assert_eq!(ctx.query_param("q").as_deref(), Some("rust lang"));
        assert_eq!(ctx.query_pairs().len(), 3);
        assert_eq!(context("/plain").query(), "");
    }

    #[test]
    fn test_patch_is_additive() {
        #[derive(Clone, Debug, PartialEq)]
        struct User(&'static str);

        let mut ctx = context("/items/1");
        ctx.params.insert("id".into(), "1".into());

        ctx.apply(ContextPatch::new().param("tenant", "acme").extension(User("ada")));

        assert_eq!(ctx.param("id"), Some("1"));
        assert_eq!(ctx.param("tenant"), Some("acme"));
        assert_eq!(ctx.extension::<User>(), Some(&User("ada")));
    }

    #[test]
    fn test_json_body() {
        let mut ctx = context("/items");
        ctx.exchange.body = Bytes::from_static(br#"{"name":"lamp"}"#);
        let value: serde_json::Value = ctx.json().unwrap();
        assert_eq!(value["name"], "lamp");

        ctx.exchange.body = Bytes::from_static(b"not json");
        let err = ctx.json::<serde_json::Value>().unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }
}
