//! Plugin system for extending the gateway with composable modules.
//!
//! Plugins register middleware and background tasks against the router at
//! startup. The rate limiter is the gateway's one built-in plugin; the trait
//! stays open for deployment-specific additions.
//!
//! # Examples
//!
//! ```rust
//! use modelgate::plugins::GatePlugin;
//! use modelgate::router::Router;
//! use anyhow::Result;
//!
//! #[derive(Clone)]
//! struct BannerPlugin;
//!
//! impl GatePlugin for BannerPlugin {
//!     fn name(&self) -> &'static str {
//!         "banner"
//!     }
//!
//!     fn setup(&self, router: &Router) -> Result<()> {
//!         router.middleware(|req, next| async move { next.run(req).await });
//!         Ok(())
//!     }
//! }
//!
//! let mut router = Router::new();
//! router.plugin(BannerPlugin);
//! ```

use anyhow::Result;

use crate::router::Router;

/// Token-bucket rate limiting keyed by configured rules.
pub mod rate_limiter;

/// Trait for gateway plugins.
pub trait GatePlugin: Send + Sync + 'static {
    /// Returns the unique name identifier for this plugin.
    fn name(&self) -> &'static str;

    /// Configures and initializes the plugin with the given router.
    fn setup(&self, router: &Router) -> Result<()>;
}
