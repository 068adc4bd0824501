//! Process-scoped action registry and route table.
//!
//! # Responsibilities
//! - Hand out one [`Action`] per `(controller type, property)` identity
//! - Bind controller methods as handlers and register their routes
//! - Resolve every action's callable once, at freeze time
//! - Resolve `(method, path)` to an action while serving
//!
//! # Design Decisions
//! - Explicit setup phase: the registry is mutable until [`Registry::freeze`],
//!   then shared read-only behind an `Arc`
//! - Identity is the controller's `TypeId` plus the property name, so hooks
//!   applied before or after mounting land on the same action

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::action::{Action, HandlerFault, SetupError};
use crate::http::{Reply, RequestContext};
use crate::routing::{Method, Router};

/// Identity of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionKey {
    target: TypeId,
    target_name: &'static str,
    property: &'static str,
}

impl ActionKey {
    pub fn of<T: 'static>(property: &'static str) -> Self {
        Self {
            target: TypeId::of::<T>(),
            target_name: type_name::<T>(),
            property,
        }
    }

    pub fn property(&self) -> &'static str {
        self.property
    }

    /// Unqualified controller type name.
    pub fn target_name(&self) -> &'static str {
        self.target_name.rsplit("::").next().unwrap_or(self.target_name)
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target_name(), self.property)
    }
}

/// A resolved route.
pub struct Resolved<'a> {
    pub action: &'a Action,
    pub params: HashMap<String, String>,
    pub pattern: &'a str,
}

/// Outcome of a failed lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    /// No route matches the path.
    NotFound,
    /// The path is routed, but not for this method.
    MethodNotAllowed(Vec<Method>),
}

/// Every action and route of the process.
#[derive(Default)]
pub struct Registry {
    actions: HashMap<ActionKey, Action>,
    router: Router<ActionKey>,
    frozen: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The action for `key`, created on first use.
    pub fn action(&mut self, key: ActionKey) -> &mut Action {
        self.actions.entry(key).or_insert_with(|| Action::new(key))
    }

    /// Shorthand for `action(ActionKey::of::<T>(property))`.
    pub fn action_for<T: 'static>(&mut self, property: &'static str) -> &mut Action {
        self.action(ActionKey::of::<T>(property))
    }

    /// Route `(method, path)` to the action identified by `key`.
    pub fn route(&mut self, method: Method, path: &str, key: ActionKey) -> Result<(), SetupError> {
        self.action(key);
        self.router.add(method, path, key)?;
        tracing::debug!(method = %method, pattern = path, action = %key, "route registered");
        Ok(())
    }

    /// Start binding methods of `target`.
    pub fn mount<T: Send + Sync + 'static>(&mut self, target: Arc<T>) -> Mount<'_, T> {
        Mount {
            registry: self,
            target,
            error: None,
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn route_count(&self) -> usize {
        self.router.len()
    }

    /// Resolve every action and stop accepting registrations.
    pub fn freeze(mut self) -> Result<Arc<Registry>, SetupError> {
        let mut routed: Vec<(Method, String, ActionKey)> = Vec::new();
        self.router.for_each(|method, pattern, key| routed.push((method, pattern.to_string(), *key)));

        for (method, pattern, key) in routed {
            let has_handler = self.actions.get(&key).is_some_and(Action::has_handler);
            if !has_handler {
                return Err(SetupError::MissingHandler {
                    method: method.to_string(),
                    pattern,
                    action: key.to_string(),
                });
            }
        }

        for action in self.actions.values_mut() {
            action.resolve();
        }
        self.frozen = true;

        tracing::info!(
            actions = self.actions.len(),
            routes = self.router.len(),
            "action registry frozen"
        );
        Ok(Arc::new(self))
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Find the action serving `(method, path)`.
    pub fn find(&self, method: Method, path: &str) -> Result<Resolved<'_>, Unresolved> {
        if let Some(found) = self.router.find(method, path) {
            if let Some(action) = self.actions.get(found.action) {
                return Ok(Resolved {
                    action,
                    params: found.params,
                    pattern: found.pattern,
                });
            }
        }

        let allowed = self.router.allowed_methods(path);
        if allowed.is_empty() {
            Err(Unresolved::NotFound)
        } else {
            Err(Unresolved::MethodNotAllowed(allowed))
        }
    }

    /// Drop every action and route.
    pub fn clear(&mut self) {
        self.actions.clear();
        self.router.clear();
        self.frozen = false;
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("actions", &self.actions.len())
            .field("routes", &self.router.len())
            .field("frozen", &self.frozen)
            .finish()
    }
}

/// Binds methods of one controller instance.
///
/// Errors are deferred to [`Mount::finish`] so registrations can be chained.
pub struct Mount<'r, T> {
    registry: &'r mut Registry,
    target: Arc<T>,
    error: Option<SetupError>,
}

impl<T: Send + Sync + 'static> Mount<'_, T> {
    /// Bind `property` as the handler of `(method, path)`.
    pub fn bind<F, Fut>(mut self, method: Method, path: &str, property: &'static str, handler: F) -> Self
    where
        F: Fn(Arc<T>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HandlerFault>> + Send + 'static,
    {
        if self.error.is_some() {
            return self;
        }

        let key = ActionKey::of::<T>(property);
        let target = Arc::clone(&self.target);
        self.registry
            .action(key)
            .handle(move |ctx| handler(Arc::clone(&target), ctx));

        if let Err(err) = self.registry.route(method, path, key) {
            self.error = Some(err);
        }
        self
    }

    pub fn get<F, Fut>(self, path: &str, property: &'static str, handler: F) -> Self
    where
        F: Fn(Arc<T>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HandlerFault>> + Send + 'static,
    {
        self.bind(Method::Get, path, property, handler)
    }

    pub fn post<F, Fut>(self, path: &str, property: &'static str, handler: F) -> Self
    where
        F: Fn(Arc<T>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HandlerFault>> + Send + 'static,
    {
        self.bind(Method::Post, path, property, handler)
    }

    pub fn put<F, Fut>(self, path: &str, property: &'static str, handler: F) -> Self
    where
        F: Fn(Arc<T>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HandlerFault>> + Send + 'static,
    {
        self.bind(Method::Put, path, property, handler)
    }

    pub fn delete<F, Fut>(self, path: &str, property: &'static str, handler: F) -> Self
    where
        F: Fn(Arc<T>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HandlerFault>> + Send + 'static,
    {
        self.bind(Method::Delete, path, property, handler)
    }

    pub fn options<F, Fut>(self, path: &str, property: &'static str, handler: F) -> Self
    where
        F: Fn(Arc<T>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HandlerFault>> + Send + 'static,
    {
        self.bind(Method::Options, path, property, handler)
    }

    /// Surface the first registration error.
    pub fn finish(self) -> Result<(), SetupError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::BeforeOutcome;
    use crate::http::request::tests::context;
    use crate::http::ReplyBody;

    struct Items {
        prefix: &'static str,
    }

    impl Items {
        async fn show(self: Arc<Self>, ctx: RequestContext) -> Result<Reply, HandlerFault> {
            let id = ctx.param("id").unwrap_or_default();
            Ok(Reply::text(format!("{}{}", self.prefix, id)))
        }
    }

    fn text(reply: Reply) -> String {
        match reply.body {
            ReplyBody::Full(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn test_action_identity_is_idempotent() {
        let mut registry = Registry::new();
        registry.action_for::<Items>("show").before(|_| async { Ok(BeforeOutcome::Continue) });
        registry.action_for::<Items>("show").before(|_| async { Ok(BeforeOutcome::Continue) });
        registry.action_for::<Items>("update");

        assert_eq!(registry.len(), 2);
        assert!(format!("{:?}", registry.action_for::<Items>("show")).contains("before: 2"));
        assert_eq!(ActionKey::of::<Items>("show").to_string(), "Items.show");
    }

    #[tokio::test]
    async fn test_mount_and_dispatch() {
        let mut registry = Registry::new();
        registry
            .mount(Arc::new(Items { prefix: "item-" }))
            .get("/items/:id", "show", Items::show)
            .finish()
            .unwrap();
        let registry = registry.freeze().unwrap();

        let resolved = registry.find(Method::Get, "/items/42").unwrap();
        assert_eq!(resolved.pattern, "/items/:id");

        let mut ctx = context("/items/42");
        ctx.apply(crate::http::ContextPatch::new().param("id", resolved.params["id"].clone()));
        let reply = resolved.action.invoke(ctx).await.unwrap();
        assert_eq!(text(reply), "item-42");
    }

    #[tokio::test]
    async fn test_hooks_applied_before_mount_are_kept() {
        let mut registry = Registry::new();
        registry.action_for::<Items>("show").before(|_| async {
            Ok(BeforeOutcome::Respond(Reply::text("from hook")))
        });
        registry
            .mount(Arc::new(Items { prefix: "" }))
            .get("/items/:id", "show", Items::show)
            .finish()
            .unwrap();
        let registry = registry.freeze().unwrap();

        let resolved = registry.find(Method::Get, "/items/1").unwrap();
        let reply = resolved.action.invoke(context("/items/1")).await.unwrap();
        assert_eq!(text(reply), "from hook");
    }

    #[test]
    fn test_identical_route_keeps_one_entry() {
        let mut registry = Registry::new();
        let a = ActionKey::of::<Items>("a");
        let b = ActionKey::of::<Items>("b");
        registry.route(Method::Get, "/same", a).unwrap();
        registry.route(Method::Get, "/same", b).unwrap();

        assert_eq!(registry.route_count(), 1);
        assert_eq!(registry.find(Method::Get, "/same").unwrap().action.key(), &b);
    }

    #[test]
    fn test_unresolved_outcomes() {
        let mut registry = Registry::new();
        registry
            .mount(Arc::new(Items { prefix: "" }))
            .post("/items", "create", |_, _| async { Ok(Reply::empty()) })
            .finish()
            .unwrap();
        let registry = registry.freeze().unwrap();

        assert!(matches!(registry.find(Method::Get, "/missing"), Err(Unresolved::NotFound)));
        assert!(matches!(
            registry.find(Method::Get, "/items"),
            Err(Unresolved::MethodNotAllowed(ref allowed)) if allowed == &vec![Method::Post]
        ));
    }

    #[test]
    fn test_freeze_rejects_routed_action_without_handler() {
        let mut registry = Registry::new();
        registry.route(Method::Get, "/orphan", ActionKey::of::<Items>("orphan")).unwrap();

        let err = registry.freeze().unwrap_err();
        assert!(matches!(err, SetupError::MissingHandler { .. }));
    }

    #[test]
    fn test_mount_surfaces_malformed_route() {
        let mut registry = Registry::new();
        let err = registry
            .mount(Arc::new(Items { prefix: "" }))
            .get("no-slash", "show", Items::show)
            .get("/fine", "other", Items::show)
            .finish()
            .unwrap_err();
        assert!(matches!(err, SetupError::MalformedRoute { .. }));
    }

    #[test]
    fn test_clear() {
        let mut registry = Registry::new();
        registry
            .mount(Arc::new(Items { prefix: "" }))
            .get("/items/:id", "show", Items::show)
            .finish()
            .unwrap();
        registry.clear();

        assert!(registry.is_empty());
        assert_eq!(registry.route_count(), 0);
    }
}
