//! Route pattern compilation.
//!
//! # Responsibilities
//! - Split a pattern into literal, parameter and wildcard segments
//! - Reject malformed patterns before serving starts
//!
//! # Syntax
//! - `literal` matches exactly (case-sensitive)
//! - `:name` captures one path segment under `name`
//! - `*` or `*name` (last segment only) captures the remaining tail, zero or
//!   more segments joined with `/`, under `*` or `name`
//!
//! Empty segments are ignored, so `/a//b/` compiles like `/a/b`.

use std::fmt;

use crate::action::SetupError;

/// Capture name used by an anonymous wildcard.
pub const WILDCARD: &str = "*";

/// One compiled pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
    Wildcard(String),
}

/// A compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self, SetupError> {
        let malformed = |reason: &'static str| SetupError::MalformedRoute {
            pattern: raw.to_string(),
            reason,
        };

        if !raw.starts_with('/') {
            return Err(malformed("pattern must start with '/'"));
        }

        let parts: Vec<&str> = split_path(raw).collect();
        let mut segments = Vec::with_capacity(parts.len());
        let mut names: Vec<&str> = Vec::new();

        for (index, part) in parts.iter().enumerate() {
            let segment = if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(malformed("parameter name is empty"));
                }
                if names.contains(&name) {
                    return Err(malformed("duplicate parameter name"));
                }
                names.push(name);
                Segment::Param(name.to_string())
            } else if let Some(name) = part.strip_prefix('*') {
                if index + 1 != parts.len() {
                    return Err(malformed("wildcard must be the last segment"));
                }
                let name = if name.is_empty() { WILDCARD } else { name };
                if names.contains(&name) {
                    return Err(malformed("duplicate parameter name"));
                }
                Segment::Wildcard(name.to_string())
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The pattern as registered.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the pattern captures nothing.
    pub fn is_static(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Non-empty `/`-separated segments of a path.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_segments() {
        let pattern = Pattern::parse("/items/:id/files/*path").unwrap();
        assert_eq!(
            pattern.segments(),
            &[
                Segment::Literal("items".into()),
                Segment::Param("id".into()),
                Segment::Literal("files".into()),
                Segment::Wildcard("path".into()),
            ]
        );
        assert!(!pattern.is_static());
        assert!(Pattern::parse("/health").unwrap().is_static());
    }

    #[test]
    fn test_anonymous_wildcard_and_empty_segments() {
        let pattern = Pattern::parse("//static//*").unwrap();
        assert_eq!(
            pattern.segments(),
            &[Segment::Literal("static".into()), Segment::Wildcard(WILDCARD.into())]
        );
        assert!(Pattern::parse("/").unwrap().segments().is_empty());
    }

    #[test]
    fn test_malformed_patterns() {
        for raw in ["items", "/items/:", "/a/*/b", "/a/:id/:id", "/a/:rest/*rest"] {
            assert!(
                matches!(Pattern::parse(raw), Err(SetupError::MalformedRoute { .. })),
                "{raw} should be rejected"
            );
        }
    }
}
