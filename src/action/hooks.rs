//! A single action and its serve-time lifecycle.
//!
//! # Lifecycle
//! ```text
//! before-hooks (registration order)
//!     ├─ Continue      → next hook
//!     ├─ Patch(patch)  → merge into context, next hook
//!     └─ Respond(reply)→ return reply as-is (after-hooks skipped)
//!         ↓
//! callable = wrapper(handler) | handler
//!         ↓
//! after-hooks (registration order), each transforming the reply
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::action::{ActionKey, HandlerFault, SetupError};
use crate::http::{ContextPatch, Reply, RequestContext};

/// Future returned by handlers and wrappers.
pub type HandlerFuture = BoxFuture<'static, Result<Reply, HandlerFault>>;

/// Type-erased handler, as handed to a wrapper.
pub type BoxHandler = Arc<dyn Fn(RequestContext) -> HandlerFuture + Send + Sync>;

type BeforeHook = Arc<dyn Fn(&RequestContext) -> BoxFuture<'static, Result<BeforeOutcome, HandlerFault>> + Send + Sync>;
type AfterHook = Arc<dyn Fn(Reply) -> HandlerFuture + Send + Sync>;
type Wrapper = Arc<dyn Fn(BoxHandler, RequestContext) -> HandlerFuture + Send + Sync>;

/// What a before-hook decided.
#[derive(Debug)]
pub enum BeforeOutcome {
    /// Nothing to add.
    Continue,
    /// Merge into the context seen by later steps.
    Patch(ContextPatch),
    /// Short-circuit with this reply.
    Respond(Reply),
}

/// Registered unit of dispatch.
pub struct Action {
    key: ActionKey,
    before: Vec<BeforeHook>,
    after: Vec<AfterHook>,
    wrapper: Option<Wrapper>,
    handler: Option<BoxHandler>,
    callable: Option<BoxHandler>,
}

impl Action {
    pub(crate) fn new(key: ActionKey) -> Self {
        Self {
            key,
            before: Vec::new(),
            after: Vec::new(),
            wrapper: None,
            handler: None,
            callable: None,
        }
    }

    pub fn key(&self) -> &ActionKey {
        &self.key
    }

    /// Append a before-hook.
    pub fn before<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<BeforeOutcome, HandlerFault>> + Send + 'static,
    {
        self.before.push(Arc::new(
            move |ctx: &RequestContext| -> BoxFuture<'static, Result<BeforeOutcome, HandlerFault>> { Box::pin(hook(ctx)) },
        ));
        self
    }

    /// Append an after-hook.
    pub fn after<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HandlerFault>> + Send + 'static,
    {
        self.after.push(Arc::new(move |reply: Reply| -> HandlerFuture { Box::pin(hook(reply)) }));
        self
    }

    /// Set the wrapper. An action takes at most one.
    pub fn wrap<F, Fut>(&mut self, wrapper: F) -> Result<&mut Self, SetupError>
    where
        F: Fn(BoxHandler, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HandlerFault>> + Send + 'static,
    {
        if self.wrapper.is_some() {
            return Err(SetupError::DuplicateWrapper {
                action: self.key.to_string(),
            });
        }
        self.wrapper = Some(Arc::new(move |inner: BoxHandler, ctx: RequestContext| -> HandlerFuture {
            Box::pin(wrapper(inner, ctx))
        }));
        self.callable = None;
        Ok(self)
    }

    /// Set the handler, replacing any previous one.
    pub fn handle<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HandlerFault>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |ctx: RequestContext| -> HandlerFuture { Box::pin(handler(ctx)) }));
        self.callable = None;
        self
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    pub fn has_wrapper(&self) -> bool {
        self.wrapper.is_some()
    }

    /// Compose `wrapper(handler)` or plain `handler`. No-op without a handler.
    pub(crate) fn resolve(&mut self) {
        self.callable = match (&self.wrapper, &self.handler) {
            (Some(wrapper), Some(handler)) => {
                let wrapper = Arc::clone(wrapper);
                let handler = Arc::clone(handler);
                let callable: BoxHandler =
                    Arc::new(move |ctx: RequestContext| -> HandlerFuture { wrapper(Arc::clone(&handler), ctx) });
                Some(callable)
            }
            (None, Some(handler)) => Some(Arc::clone(handler)),
            (_, None) => None,
        };
    }

    /// Run the full lifecycle against `ctx`.
    pub async fn invoke(&self, mut ctx: RequestContext) -> Result<Reply, HandlerFault> {
        let Some(callable) = self.callable.as_ref() else {
            return Err(HandlerFault::internal(format!("action {} has no resolved handler", self.key)));
        };

        for hook in &self.before {
            match hook(&ctx).await? {
                BeforeOutcome::Continue => {}
                BeforeOutcome::Patch(patch) => ctx.apply(patch),
                BeforeOutcome::Respond(reply) => {
                    tracing::debug!(action = %self.key, status = %reply.status, "before-hook short-circuited");
                    return Ok(reply);
                }
            }
        }

        let mut reply = callable(ctx).await?;

        for hook in &self.after {
            reply = hook(reply).await?;
        }
        Ok(reply)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("key", &self.key)
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("wrapper", &self.wrapper.is_some())
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::tests::context;
    use crate::http::ReplyBody;
    use axum::http::{HeaderValue, StatusCode};
    use std::sync::Mutex;

    struct Items;

    fn body_text(reply: &Reply) -> String {
        match &reply.body {
            ReplyBody::Full(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            other => panic!("unexpected body {other:?}"),
        }
    }

    fn action() -> Action {
        Action::new(ActionKey::of::<Items>("show"))
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut action = action();

        for name in ["b1", "b2"] {
            let log = Arc::clone(&log);
            action.before(move |_| {
                log.lock().unwrap().push(name);
                async { Ok(BeforeOutcome::Continue) }
            });
        }
        for name in ["a1", "a2"] {
            let log = Arc::clone(&log);
            action.after(move |reply| {
                log.lock().unwrap().push(name);
                async move { Ok(reply) }
            });
        }
        let handler_log = Arc::clone(&log);
        action.handle(move |_| {
            handler_log.lock().unwrap().push("handler");
            async { Ok(Reply::text("ok")) }
        });
        action.resolve();

        action.invoke(context("/items/1")).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["b1", "b2", "handler", "a1", "a2"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_handler_and_after_hooks() {
        let mut action = action();
        action
            .before(|_| async { Ok(BeforeOutcome::Respond(Reply::text("denied").with_status(StatusCode::FORBIDDEN))) })
            .after(|_| async { Err(HandlerFault::internal("after-hook must not run")) })
            .handle(|_| async { Err(HandlerFault::internal("handler must not run")) });
        action.resolve();

        let reply = action.invoke(context("/items/1")).await.unwrap();
        assert_eq!(reply.status, StatusCode::FORBIDDEN);
        assert_eq!(body_text(&reply), "denied");
    }

    #[tokio::test]
    async fn test_patch_reaches_handler() {
        let mut action = action();
        action
            .before(|_| async { Ok(BeforeOutcome::Patch(ContextPatch::new().param("user", "ada"))) })
            .handle(|ctx| async move { Ok(Reply::text(ctx.param("user").unwrap_or("anonymous").to_string())) });
        action.resolve();

        let reply = action.invoke(context("/me")).await.unwrap();
        assert_eq!(body_text(&reply), "ada");
    }

    #[tokio::test]
    async fn test_wrapper_substitutes_for_handler() {
        let mut action = action();
        action.handle(|_| async { Ok(Reply::text("inner")) });
        action
            .wrap(|inner: BoxHandler, ctx| async move {
                let reply = inner(ctx).await?;
                Ok(reply.header(
                    axum::http::header::HeaderName::from_static("x-wrapped"),
                    HeaderValue::from_static("1"),
                ))
            })
            .unwrap();
        action.resolve();

        let reply = action.invoke(context("/")).await.unwrap();
        assert_eq!(reply.headers["x-wrapped"], "1");
        assert_eq!(body_text(&reply), "inner");
    }

    #[test]
    fn test_second_wrapper_is_rejected() {
        let mut action = action();
        action.wrap(|inner: BoxHandler, ctx| inner(ctx)).unwrap();

        let err = action.wrap(|inner: BoxHandler, ctx| inner(ctx)).unwrap_err();
        assert!(matches!(err, SetupError::DuplicateWrapper { .. }));
    }

    #[tokio::test]
    async fn test_fault_in_before_hook_propagates() {
        let mut action = action();
        action
            .before(|_| async { Err(HandlerFault::bad_request("missing token")) })
            .handle(|_| async { Ok(Reply::empty()) });
        action.resolve();

        let fault = action.invoke(context("/")).await.unwrap_err();
        assert_eq!(fault.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unresolved_action_faults() {
        let action = action();
        let fault = action.invoke(context("/")).await.unwrap_err();
        assert!(fault.is_internal());
    }
}
