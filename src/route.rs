//! HTTP route definition and path matching.
//!
//! A [`Route`] couples a path pattern with a method, a boxed handler, and a
//! route-local middleware chain. Patterns may contain dynamic segments in
//! curly braces (`/api/v1/files/{id}`), captured as string parameters during
//! matching.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, RwLock},
};

use http::Method;

use crate::{
    handler::BoxHandler,
    middleware::Next,
    responder::Responder,
    types::{BoxMiddleware, Request},
};

/// HTTP route with path pattern matching and middleware support.
pub struct Route {
    /// Original path string used to create this route.
    pub path: String,
    /// HTTP method this route responds to.
    pub method: Method,
    /// Handler function to execute when route is matched.
    pub handler: BoxHandler,
    /// Route-specific middleware chain.
    pub middlewares: RwLock<VecDeque<BoxMiddleware>>,
}

impl Route {
    /// Creates a new route with the specified path, method, and handler.
    pub fn new(path: String, method: Method, handler: BoxHandler) -> Self {
        Self {
            path,
            method,
            handler,
            middlewares: RwLock::new(VecDeque::new()),
        }
    }

    /// Adds middleware to this route's execution chain.
    pub fn middleware<F, Fut, R>(&self, f: F) -> &Self
    where
        F: Fn(Request, Next) -> Fut + Clone + Send + Sync + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
        R: Responder + Send + 'static,
    {
        let mw: BoxMiddleware = Arc::new(move |req, next| {
            let fut = f(req, next);

            Box::pin(async move { fut.await.into_response() })
        });

        self.middlewares.write().unwrap().push_back(mw);
        self
    }

    /// Matches a request path against this route's pattern.
    ///
    /// Returns the captured parameters on a match, `None` otherwise. A
    /// `{param}` segment captures exactly one path segment; there is no
    /// wildcard matching.
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let pattern = self.path.trim_matches('/').split('/');
        let mut candidate = path.trim_matches('/').split('/');

        for expected in pattern {
            let Some(actual) = candidate.next() else {
                return None;
            };

            if let Some(name) = expected
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
            {
                if actual.is_empty() {
                    return None;
                }
                params.insert(name.to_string(), actual.to_string());
            } else if expected != actual {
                return None;
            }
        }

        if candidate.next().is_some() {
            return None;
        }

        Some(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::BoxHandler;

    async fn noop(_req: Request) -> &'static str {
        "ok"
    }

    fn route(pattern: &str) -> Route {
        Route::new(pattern.to_string(), Method::GET, BoxHandler::new(noop))
    }

    #[test]
    fn static_paths_match_exactly() {
        let r = route("/api/v1/models");
        assert!(r.match_path("/api/v1/models").is_some());
        assert!(r.match_path("/api/v1/model").is_none());
        assert!(r.match_path("/api/v1/models/extra").is_none());
    }

    #[test]
    fn dynamic_segment_is_captured() {
        let r = route("/api/v1/files/{id}");
        let params = r.match_path("/api/v1/files/f-123").unwrap();
        assert_eq!(params.get("id"), Some(&"f-123".to_string()));
        assert!(r.match_path("/api/v1/files").is_none());
    }

    #[test]
    fn nested_action_segments_match() {
        let r = route("/api/v1/files/{id}/extract");
        let params = r.match_path("/api/v1/files/abc/extract").unwrap();
        assert_eq!(params.get("id"), Some(&"abc".to_string()));
        assert!(r.match_path("/api/v1/files/abc").is_none());
    }
}
