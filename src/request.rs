//! Logical request values dispatched through the failover manager.

use crate::ServiceError;
use serde_json::Value;
use std::fmt;

/// HTTP verbs the adapters accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    /// Parse a verb from its wire spelling. Anything outside the supported
    /// set is rejected up front rather than passed to an upstream.
    pub fn parse(s: &str) -> Result<Self, ServiceError> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(ServiceError::InvalidArgument(format!(
                "unsupported HTTP method: {other}"
            ))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical request: endpoint path, verb, query parameters, JSON body.
///
/// Parameters keep their insertion order so the fingerprint is stable for a
/// given construction sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub endpoint: String,
    pub method: Method,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Request {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), method, params: Vec::new(), body: None }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Get, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Post, endpoint)
    }

    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Put, endpoint)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Delete, endpoint)
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Deterministic cache key: `method:endpoint:params:body`.
    ///
    /// Identical inputs always produce identical keys; the serialized forms
    /// of params and body disambiguate empty from absent.
    pub fn fingerprint(&self) -> String {
        let params = serde_json::to_string(&self.params)
            .expect("params serialization cannot fail");
        let body = match &self.body {
            Some(v) => serde_json::to_string(v).expect("body serialization cannot fail"),
            None => "null".to_string(),
        };
        format!("{}:{}:{}:{}", self.method, self.endpoint, params, body)
    }
}
