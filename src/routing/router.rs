//! Segment tree route table.
//!
//! Each node is one path segment. Static children are tried first, then
//! parameter children, then a wildcard endpoint on the node itself; a
//! failed branch backtracks and releases whatever it captured. Lookup cost
//! follows path depth, not the number of routes.

use std::collections::HashMap;

use crate::action::SetupError;
use crate::routing::matcher::{split_path, Pattern, Segment};
use crate::routing::Method;

struct Endpoint<A> {
    action: A,
    pattern: String,
}

struct Wildcard<A> {
    name: String,
    endpoint: Endpoint<A>,
}

struct Node<A> {
    segment: String,
    param_name: Option<String>,
    endpoints: HashMap<Method, Endpoint<A>>,
    wildcards: HashMap<Method, Wildcard<A>>,
    children: Vec<Node<A>>,
    param_children: Vec<Node<A>>,
}

impl<A> Node<A> {
    fn new(segment: &str) -> Self {
        Self {
            segment: segment.to_string(),
            param_name: None,
            endpoints: HashMap::new(),
            wildcards: HashMap::new(),
            children: Vec::new(),
            param_children: Vec::new(),
        }
    }

    fn new_param(name: &str) -> Self {
        let mut node = Self::new("");
        node.param_name = Some(name.to_string());
        node
    }

    /// Insert an endpoint. Returns true when it replaced an existing one.
    fn insert(&mut self, segments: &[Segment], method: Method, endpoint: Endpoint<A>) -> bool {
        let Some((segment, remaining)) = segments.split_first() else {
            return self.endpoints.insert(method, endpoint).is_some();
        };

        match segment {
            Segment::Literal(literal) => {
                let index = match self.children.iter().position(|c| &c.segment == literal) {
                    Some(index) => index,
                    None => {
                        self.children.push(Node::new(literal));
                        self.children.len() - 1
                    }
                };
                self.children[index].insert(remaining, method, endpoint)
            }
            Segment::Param(name) => {
                let index = match self
                    .param_children
                    .iter()
                    .position(|c| c.param_name.as_deref() == Some(name.as_str()))
                {
                    Some(index) => index,
                    None => {
                        self.param_children.push(Node::new_param(name));
                        self.param_children.len() - 1
                    }
                };
                self.param_children[index].insert(remaining, method, endpoint)
            }
            Segment::Wildcard(name) => {
                let wildcard = Wildcard {
                    name: name.clone(),
                    endpoint,
                };
                self.wildcards.insert(method, wildcard).is_some()
            }
        }
    }

    fn search<'a>(
        &'a self,
        segments: &[&str],
        method: Method,
        params: &mut HashMap<String, String>,
    ) -> Option<&'a Endpoint<A>> {
        if let Some((segment, remaining)) = segments.split_first() {
            for child in &self.children {
                if child.segment == *segment {
                    if let Some(found) = child.search(remaining, method, params) {
                        return Some(found);
                    }
                }
            }

            for child in &self.param_children {
                let Some(name) = child.param_name.as_deref() else {
                    continue;
                };
                params.insert(name.to_string(), segment.to_string());
                if let Some(found) = child.search(remaining, method, params) {
                    return Some(found);
                }
                params.remove(name);
            }
        } else if let Some(endpoint) = self.endpoints.get(&method) {
            return Some(endpoint);
        }

        let wildcard = self.wildcards.get(&method)?;
        params.insert(wildcard.name.clone(), segments.join("/"));
        Some(&wildcard.endpoint)
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(Method, &'a str, &'a A)) {
        for (method, endpoint) in &self.endpoints {
            f(*method, &endpoint.pattern, &endpoint.action);
        }
        for (method, wildcard) in &self.wildcards {
            f(*method, &wildcard.endpoint.pattern, &wildcard.endpoint.action);
        }
        for child in self.children.iter().chain(&self.param_children) {
            child.visit(f);
        }
    }

    fn methods_at(&self, segments: &[&str], found: &mut Vec<Method>) {
        if let Some((segment, remaining)) = segments.split_first() {
            for child in self.children.iter().filter(|c| c.segment == *segment) {
                child.methods_at(remaining, found);
            }
            for child in &self.param_children {
                child.methods_at(remaining, found);
            }
        } else {
            found.extend(self.endpoints.keys().copied());
        }
        found.extend(self.wildcards.keys().copied());
    }
}

/// A successful lookup.
#[derive(Debug)]
pub struct Match<'a, A> {
    pub action: &'a A,
    pub params: HashMap<String, String>,
    /// The pattern the route was registered with.
    pub pattern: &'a str,
}

/// Route table from `(Method, pattern)` to an action handle.
pub struct Router<A> {
    root: Node<A>,
    len: usize,
}

impl<A> Router<A> {
    pub fn new() -> Self {
        Self {
            root: Node::new(""),
            len: 0,
        }
    }

    /// Register `action` under `(method, path)`.
    ///
    /// Registering an identical pair again replaces the stored action.
    pub fn add(&mut self, method: Method, path: &str, action: A) -> Result<(), SetupError> {
        let pattern = Pattern::parse(path)?;
        let endpoint = Endpoint {
            action,
            pattern: pattern.as_str().to_string(),
        };

        if self.root.insert(pattern.segments(), method, endpoint) {
            tracing::debug!(method = %method, pattern = %pattern, "route replaced");
        } else {
            self.len += 1;
        }
        Ok(())
    }

    /// Resolve `(method, path)` to an action and its captured parameters.
    pub fn find(&self, method: Method, path: &str) -> Option<Match<'_, A>> {
        let segments: Vec<&str> = split_path(path).collect();
        let mut params = HashMap::new();
        let endpoint = self.root.search(&segments, method, &mut params)?;

        Some(Match {
            action: &endpoint.action,
            params,
            pattern: &endpoint.pattern,
        })
    }

    /// Methods with a route that could match `path`.
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let segments: Vec<&str> = split_path(path).collect();
        let mut found = Vec::new();
        self.root.methods_at(&segments, &mut found);
        found.sort_by_key(|m| Method::ALL.iter().position(|a| a == m));
        found.dedup();
        found
    }

    /// Visit every registered route.
    pub fn for_each<'a>(&'a self, mut f: impl FnMut(Method, &'a str, &'a A)) {
        self.root.visit(&mut f);
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.root = Node::new("");
        self.len = 0;
    }
}

impl<A> Default for Router<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(routes: &[(Method, &str, &'static str)]) -> Router<&'static str> {
        let mut router = Router::new();
        for (method, path, action) in routes {
            router.add(*method, path, *action).unwrap();
        }
        router
    }

    #[test]
    fn test_re_adding_same_route_replaces() {
        let mut router = Router::new();
        router.add(Method::Get, "/items", "a").unwrap();
        router.add(Method::Get, "/items", "b").unwrap();

        assert_eq!(router.len(), 1);
        assert_eq!(*router.find(Method::Get, "/items").unwrap().action, "b");
    }

    #[test]
    fn test_param_captures_any_segment() {
        let router = router(&[(Method::Get, "/x/:id", "show")]);

        for value in ["42", "abc", "with.dots", "%20", "-"] {
            let found = router.find(Method::Get, &format!("/x/{value}")).unwrap();
            assert_eq!(found.params.get("id").map(String::as_str), Some(value));
            assert_eq!(found.pattern, "/x/:id");
        }
        assert!(router.find(Method::Get, "/x/1/2").is_none());
        assert!(router.find(Method::Get, "/x").is_none());
    }

    #[test]
    fn test_static_wins_over_param() {
        let router = router(&[
            (Method::Get, "/items/:id", "show"),
            (Method::Get, "/items/latest", "latest"),
        ]);

        assert_eq!(*router.find(Method::Get, "/items/latest").unwrap().action, "latest");
        assert_eq!(*router.find(Method::Get, "/items/7").unwrap().action, "show");
    }

    #[test]
    fn test_backtracks_out_of_static_branch() {
        let router = router(&[
            (Method::Get, "/items/latest/raw", "raw"),
            (Method::Get, "/items/:id/history", "history"),
        ]);

        let found = router.find(Method::Get, "/items/latest/history").unwrap();
        assert_eq!(*found.action, "history");
        assert_eq!(found.params.get("id").map(String::as_str), Some("latest"));
    }

    #[test]
    fn test_wildcard_tail() {
        let router = router(&[
            (Method::Get, "/files/*path", "files"),
            (Method::Get, "/files/readme", "readme"),
            (Method::Get, "/assets/*", "assets"),
        ]);

        let found = router.find(Method::Get, "/files/a/b/c.txt").unwrap();
        assert_eq!(*found.action, "files");
        assert_eq!(found.params.get("path").map(String::as_str), Some("a/b/c.txt"));

        assert_eq!(*router.find(Method::Get, "/files/readme").unwrap().action, "readme");

        let empty = router.find(Method::Get, "/assets").unwrap();
        assert_eq!(empty.params.get("*").map(String::as_str), Some(""));
    }

    #[test]
    fn test_method_and_empty_segments() {
        let router = router(&[(Method::Post, "/a/b", "create")]);

        assert!(router.find(Method::Get, "/a/b").is_none());
        assert_eq!(*router.find(Method::Post, "//a//b/").unwrap().action, "create");
        assert_eq!(router.allowed_methods("/a/b"), vec![Method::Post]);
        assert!(router.allowed_methods("/nope").is_empty());
    }

    #[test]
    fn test_for_each_visits_every_route() {
        let router = router(&[
            (Method::Get, "/a", "a"),
            (Method::Post, "/a/:id", "b"),
            (Method::Get, "/files/*", "c"),
        ]);

        let mut seen = Vec::new();
        router.for_each(|_, pattern, action| seen.push((pattern.to_string(), *action)));
        seen.sort();
        assert_eq!(
            seen,
            vec![("/a".into(), "a"), ("/a/:id".into(), "b"), ("/files/*".into(), "c")]
        );
    }

    #[test]
    fn test_clear() {
        let mut router = router(&[(Method::Get, "/", "root")]);
        assert_eq!(*router.find(Method::Get, "/").unwrap().action, "root");

        router.clear();
        assert!(router.is_empty());
        assert!(router.find(Method::Get, "/").is_none());
    }
}
