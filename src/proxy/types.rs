use std::time::Instant;

use rama::http::{Body, Method, Request};

/// How a request was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    LocalHit,
    NegativeHit,
    Forwarded,
    Failed,
    Rejected,
    Listing,
    NotFound,
}

impl std::fmt::Display for ServeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServeOutcome::LocalHit => write!(f, "local_hit"),
            ServeOutcome::NegativeHit => write!(f, "negative_hit"),
            ServeOutcome::Forwarded => write!(f, "forwarded"),
            ServeOutcome::Failed => write!(f, "failed"),
            ServeOutcome::Rejected => write!(f, "rejected"),
            ServeOutcome::Listing => write!(f, "listing"),
            ServeOutcome::NotFound => write!(f, "not_found"),
        }
    }
}

/// Request context for tracking request lifecycle
pub struct RequestContext {
    pub start: Instant,
    pub method: Method,
    pub path: String,
    pub outcome: ServeOutcome,
}

impl RequestContext {
    pub fn from_request(req: &Request<Body>) -> Self {
        Self {
            start: Instant::now(),
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            outcome: ServeOutcome::NotFound,
        }
    }

    pub fn summary(&self) -> String {
        format!("{} {}", self.method.as_str(), self.path)
    }
}
