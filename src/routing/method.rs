//! The HTTP methods actions can be registered under.

use std::fmt;

use thiserror::Error;

/// Routable HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Options,
}

/// A request used a method no route can be registered under.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported method {0}")]
pub struct UnsupportedMethod(pub String);

impl Method {
    pub const ALL: [Method; 5] = [Method::Get, Method::Post, Method::Put, Method::Delete, Method::Options];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&axum::http::Method> for Method {
    type Error = UnsupportedMethod;

    fn try_from(method: &axum::http::Method) -> Result<Self, Self::Error> {
        match method.as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            other => Err(UnsupportedMethod(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_http_method() {
        assert_eq!(Method::try_from(&axum::http::Method::GET), Ok(Method::Get));
        assert_eq!(Method::try_from(&axum::http::Method::OPTIONS), Ok(Method::Options));
        assert_eq!(
            Method::try_from(&axum::http::Method::PATCH),
            Err(UnsupportedMethod("PATCH".into()))
        );
    }
}
