//! Route table and dispatch.
//!
//! Routes are registered before the master starts accepting and are
//! immutable afterwards; every worker gets its own copy at fork.
//! Patterns are `/`-delimited sequences of literal segments and `:name`
//! parameters; empty segments are ignored, so `/x/` and `/x` match the
//! same routes.
//!
//! Dispatch scans routes in registration order and the first route whose
//! method and pattern match wins. There is no most-specific-wins logic;
//! registration order is the precedence.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error};

use crate::http::{Request, Response};

/// Captured `:name` path parameters, by name.
pub type RouteParams = HashMap<String, String>;

/// Error type handlers may return; converted into a 500-class response.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// The uniform handler callable: request plus captured parameters in,
/// response (or error) out.
pub type Handler = Arc<dyn Fn(&Request, &RouteParams) -> Result<Response, HandlerError> + Send + Sync>;

/// One pattern segment.
#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Param(String),
}

struct Route {
    method: String,
    pattern: String,
    segments: Vec<Segment>,
    handler: Handler,
}

/// Result of handling one request.
pub struct Outcome {
    /// The response to write back.
    pub response: Response,
    /// Set when a handler failed (error return or panic); the worker
    /// counts these against the slot.
    pub error: Option<String>,
}

/// Registration-ordered route table.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. Order of registration is match precedence.
    pub fn add_route<F>(&mut self, method: &str, pattern: &str, handler: F)
    where
        F: Fn(&Request, &RouteParams) -> Result<Response, HandlerError> + Send + Sync + 'static,
    {
        debug!(method, pattern, "route registered");
        self.routes.push(Route {
            method: method.to_string(),
            pattern: pattern.to_string(),
            segments: parse_pattern(pattern),
            handler: Arc::new(handler),
        });
    }

    /// Find the first matching route for a request.
    ///
    /// Returns the matched pattern and the captured parameters, or `None`
    /// when no route matches.
    pub fn dispatch(&self, request: &Request) -> Option<(&str, RouteParams)> {
        self.match_route(request)
            .map(|(route, params)| (route.pattern.as_str(), params))
    }

    /// Handle a request end to end: dispatch, invoke, translate errors.
    pub fn handle(&self, request: &Request) -> Outcome {
        let Some((route, params)) = self.match_route(request) else {
            return Outcome {
                response: Response::json(
                    404,
                    json!({ "error": "Not Found", "path": request.path }).to_string(),
                ),
                error: None,
            };
        };

        // Contain handler failures: both error returns and panics become a
        // 500-class response; the connection still closes normally.
        let result = panic::catch_unwind(AssertUnwindSafe(|| (route.handler)(request, &params)));
        match result {
            Ok(Ok(response)) => Outcome {
                response,
                error: None,
            },
            Ok(Err(e)) => {
                let message = e.to_string();
                error!(
                    method = %request.method,
                    path = %request.path,
                    "handler error: {message}"
                );
                Outcome {
                    response: Response::json(500, json!({ "error": message }).to_string()),
                    error: Some(message),
                }
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    method = %request.method,
                    path = %request.path,
                    "handler panicked: {message}"
                );
                Outcome {
                    response: Response::json(500, json!({ "error": message }).to_string()),
                    error: Some(message),
                }
            }
        }
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether any routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn match_route(&self, request: &Request) -> Option<(&Route, RouteParams)> {
        let path_segments = split_path(&request.path);
        self.routes
            .iter()
            .filter(|route| route.method == request.method)
            .find_map(|route| {
                match_segments(&route.segments, &path_segments).map(|params| (route, params))
            })
    }
}

/// Split a pattern into literal and `:name` segments.
fn parse_pattern(pattern: &str) -> Vec<Segment> {
    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix(':') {
            Some(name) => Segment::Param(name.to_string()),
            None => Segment::Literal(s.to_string()),
        })
        .collect()
}

/// Split a request path, dropping empty segments.
fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Walk pattern and path segments together, capturing parameters.
fn match_segments(pattern: &[Segment], path: &[&str]) -> Option<RouteParams> {
    if pattern.len() != path.len() {
        return None;
    }
    let mut params = RouteParams::new();
    for (segment, part) in pattern.iter().zip(path) {
        match segment {
            Segment::Literal(lit) if lit == part => {}
            Segment::Literal(_) => return None,
            Segment::Param(name) => {
                params.insert(name.clone(), (*part).to_string());
            }
        }
    }
    Some(params)
}

/// Extract something readable from a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
