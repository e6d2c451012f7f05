//! HTTP request routing and dispatch.
//!
//! The [`Router`] manages the gateway's route table, the global middleware
//! chain (security filter, rate limiter, access log), and registered plugins.
//! Dispatch matches on method and path, extracts `{param}` segments, and runs
//! the handler through the middleware pipeline. A panic anywhere inside a
//! handler is caught at this boundary and surfaced as an `internal-error`
//! response carrying the request id, keeping the process available.
//!
//! # Examples
//!
//! ```rust
//! use modelgate::{router::Router, responder::Responder, types::Request};
//! use http::Method;
//!
//! async fn health(_req: Request) -> impl Responder {
//!     "{\"status\":\"healthy\"}"
//! }
//!
//! let mut router = Router::new();
//! router.route(Method::GET, "/health", health);
//! router.middleware(|req, next| async move { next.run(req).await });
//! ```

use std::sync::{
    Arc, RwLock,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use futures_util::FutureExt;
use http::Method;

use crate::{
    error::GatewayError,
    extractors::params::PathParams,
    handler::{BoxHandler, Handler},
    middleware::Next,
    plugins::GatePlugin,
    responder::Responder,
    route::Route,
    types::{BoxMiddleware, Request, Response},
};

/// HTTP router for managing routes, middleware, and request dispatching.
pub struct Router {
    /// Map of registered routes keyed by (method, path) pairs.
    routes: DashMap<(Method, String), Arc<Route>>,
    /// Global middleware chain applied to all routes.
    middlewares: RwLock<Vec<BoxMiddleware>>,
    /// Registered plugins for extending functionality.
    plugins: Vec<Box<dyn GatePlugin>>,
    /// Flag to ensure plugins are initialized only once.
    plugins_initialized: AtomicBool,
}

impl Router {
    /// Creates a new, empty router.
    pub fn new() -> Self {
        Self {
            routes: DashMap::default(),
            middlewares: RwLock::new(Vec::new()),
            plugins: Vec::new(),
            plugins_initialized: AtomicBool::new(false),
        }
    }

    /// Registers a new route with the router.
    ///
    /// Associates an HTTP method and path pattern with a handler. The path can
    /// contain dynamic segments using curly braces (e.g., `/api/v1/files/{id}`)
    /// which are extracted as parameters during request processing.
    pub fn route<H, T>(&mut self, method: Method, path: &str, handler: H) -> Arc<Route>
    where
        H: Handler<T> + Clone + 'static,
    {
        let route = Arc::new(Route::new(
            path.to_string(),
            method.clone(),
            BoxHandler::new(handler),
        ));
        self.routes
            .insert((method, path.to_owned()), route.clone());
        route
    }

    /// Dispatches an incoming request to the appropriate route handler.
    ///
    /// Performs route matching, parameter extraction, and middleware chain
    /// execution. Unmatched requests produce the taxonomy's `not-found` error
    /// body rather than an empty 404. Handler panics become `internal-error`.
    pub async fn dispatch(&self, mut req: Request) -> Response {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();

        let mut matched = None;
        for route in self.routes.iter() {
            if route.method != method {
                continue;
            }

            if let Some(params) = route.match_path(&path) {
                matched = Some((route.value().clone(), params));
                break;
            }
        }

        // The context middleware has not run yet at this point; correlate
        // panics with the caller-supplied id when one is present.
        let request_id = req
            .headers()
            .get(crate::context::REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let Some((route, params)) = matched else {
            return GatewayError::NotFound {
                what: format!("{} {}", method, path),
            }
            .into_response();
        };

        if !params.is_empty() {
            req.extensions_mut().insert(PathParams(params));
        }

        let g_mws = self.middlewares.read().unwrap().clone();
        let r_mws = route.middlewares.read().unwrap().clone();
        let mut chain = Vec::new();
        chain.extend(g_mws);
        chain.extend(r_mws);

        let next = Next {
            middlewares: Arc::new(chain),
            endpoint: Arc::new(route.handler.clone()),
        };

        match std::panic::AssertUnwindSafe(next.run(req))
            .catch_unwind()
            .await
        {
            Ok(res) => res,
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::error!(request_id = ?request_id, %detail, "handler panicked");
                GatewayError::Internal {
                    request_id: request_id.unwrap_or_default(),
                }
                .into_response()
            }
        }
    }

    /// Adds global middleware to the router.
    ///
    /// Global middleware runs for all routes in registration order, before any
    /// route-specific middleware.
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

        self.middlewares.write().unwrap().push(mw);
        self
    }

    /// Registers a plugin with the router.
    ///
    /// Plugins are initialized once when the server starts.
    pub fn plugin<P>(&mut self, plugin: P) -> &mut Self
    where
        P: GatePlugin + Clone + Send + Sync + 'static,
    {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// Returns references to all registered plugins.
    pub(crate) fn plugins(&self) -> Vec<&dyn GatePlugin> {
        self.plugins.iter().map(|plugin| plugin.as_ref()).collect()
    }

    /// Initializes all registered plugins exactly once.
    pub(crate) fn setup_plugins_once(&self) {
        if !self.plugins_initialized.swap(true, Ordering::SeqCst) {
            for plugin in self.plugins() {
                if let Err(err) = plugin.setup(self) {
                    tracing::error!(plugin = plugin.name(), %err, "plugin setup failed");
                }
            }
        }
    }

}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
