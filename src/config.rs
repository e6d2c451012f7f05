//! Gateway configuration loaded from TOML.
//!
//! Every tunable the spec recognizes lives here with a serde default, so an
//! empty file yields a runnable local configuration. Unknown fields are
//! ignored. Provider API keys are never written in the file itself; each
//! provider names an environment variable (`api_key_env`) resolved at
//! startup.
//!
//! # Examples
//!
//! ```rust
//! use modelgate::config::GatewayConfig;
//!
//! let cfg: GatewayConfig = toml::from_str(r#"
//!     listen_port = 9100
//!
//!     [[providers]]
//!     id = "local"
//!     base_url = "http://127.0.0.1:11434"
//!     adapter = "ollama"
//!
//!     [[providers.models]]
//!     id = "llama3.2"
//!     speed_tier = "fast"
//!     pricing_tier = "local"
//! "#).unwrap();
//! assert_eq!(cfg.listen_port, 9100);
//! assert_eq!(cfg.max_file_bytes, 10 * 1024 * 1024);
//! ```

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::catalog::{Capability, PricingTier, SpeedTier};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind address for the HTTP listener.
    pub listen_address: String,
    /// Bind port for the HTTP listener.
    pub listen_port: u16,
    /// Optional PEM certificate path; together with `tls_key` enables TLS.
    pub tls_cert: Option<String>,
    /// Optional PEM private-key path.
    pub tls_key: Option<String>,

    /// Hard cap on uploaded file size in bytes.
    pub max_file_bytes: u64,
    /// Hard cap on accumulated chat message bytes.
    pub max_message_bytes: usize,
    /// Detected-MIME allow-list for uploads.
    pub allowed_mime_types: Vec<String>,
    /// Root directory of the blob store.
    pub blob_root: PathBuf,

    /// Default whole-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Extraction pipeline options.
    pub extraction: ExtractionConfig,
    /// Rate-limit rules; an empty list falls back to the default rule.
    pub rate_limits: Vec<RateRuleConfig>,
    /// Cache sizing and the optional remote tier.
    pub cache: CacheConfig,
    /// Upstream providers and their model catalogs.
    pub providers: Vec<ProviderConfig>,
    /// Router preferences.
    pub router: RouterConfig,
    /// API-key authentication for inbound requests.
    pub auth: AuthConfig,
    /// Logging and metrics options.
    pub observability: ObservabilityConfig,
    /// CPU-bound worker pool sizing.
    pub worker: WorkerConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".to_string(),
            listen_port: 8080,
            tls_cert: None,
            tls_key: None,
            max_file_bytes: 10 * 1024 * 1024,
            max_message_bytes: 1024 * 1024,
            allowed_mime_types: default_allowed_mime_types(),
            blob_root: PathBuf::from("data/blobs"),
            request_timeout_secs: 600,
            extraction: ExtractionConfig::default(),
            rate_limits: Vec::new(),
            cache: CacheConfig::default(),
            providers: Vec::new(),
            router: RouterConfig::default(),
            auth: AuthConfig::default(),
            observability: ObservabilityConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

fn default_allowed_mime_types() -> Vec<String> {
    [
        "text/plain",
        "text/markdown",
        "text/csv",
        "text/tab-separated-values",
        "application/json",
        "application/pdf",
        "image/png",
        "image/jpeg",
        "image/webp",
        "audio/mpeg",
        "audio/wav",
        "audio/ogg",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

impl GatewayConfig {
    /// Loads configuration from a TOML file, erroring on unreadable or
    /// syntactically invalid input. A missing file is not an error path the
    /// caller should hide, so it propagates too.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {e}", path.display()))?;
        let cfg: GatewayConfig = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("cannot parse config {}: {e}", path.display()))?;
        Ok(cfg)
    }

    /// Default whole-request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Extraction pipeline options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Cap on a single extraction's text, in bytes.
    pub text_cap_bytes: usize,
    /// Blob retention window in seconds.
    pub retention_secs: u64,
    /// Base URL of the external transcription service; absent means audio
    /// uploads degrade to `unsupported` extractions.
    pub transcription_url: Option<String>,
    /// Whether uploads kick off extraction eagerly in the background.
    pub eager: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            text_cap_bytes: 1024 * 1024,
            retention_secs: 24 * 60 * 60,
            transcription_url: None,
            eager: true,
        }
    }
}

/// Which request attribute a rate rule buckets on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleIdentity {
    /// Bucket per source IP.
    Ip,
    /// Bucket per presented API key.
    ApiKey,
}

/// One rate-limit rule.
#[derive(Debug, Clone, Deserialize)]
pub struct RateRuleConfig {
    /// Route glob the rule applies to, e.g. `/api/v1/upload` or `/api/*`.
    pub route_glob: String,
    /// Bucket capacity (requests per window).
    pub capacity: u32,
    /// Window length in seconds.
    pub window_seconds: u64,
    /// Identity attribute the bucket keys on.
    #[serde(default = "default_rule_identity")]
    pub identity: RuleIdentity,
}

fn default_rule_identity() -> RuleIdentity {
    RuleIdentity::Ip
}

impl RateRuleConfig {
    /// The spec's default rule: 100 requests / 60 s per source IP, all routes.
    pub fn default_rule() -> Self {
        Self {
            route_glob: "/*".to_string(),
            capacity: 100,
            window_seconds: 60,
            identity: RuleIdentity::Ip,
        }
    }
}

/// Cache sizing and the optional remote tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte budget of the process-local LRU tier.
    pub local_bytes: u64,
    /// Default TTL in seconds for entries stored without an explicit TTL.
    pub default_ttl_secs: u64,
    /// Optional remote KV base URL; absent means local-only.
    pub remote_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_bytes: 128 * 1024 * 1024,
            default_ttl_secs: 300,
            remote_url: None,
        }
    }
}

/// Wire adapter used to talk to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// OpenAI-compatible `/v1/chat/completions`.
    Openai,
    /// Anthropic messages API.
    Anthropic,
    /// Local Ollama daemon.
    Ollama,
    /// OpenRouter proxy (OpenAI wire plus referer headers).
    Openrouter,
}

/// One upstream provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Stable provider id used in routing and metrics.
    pub id: String,
    /// Base URL, e.g. `https://api.openai.com`.
    pub base_url: String,
    /// Environment variable holding the provider API key.
    pub api_key_env: Option<String>,
    /// Wire adapter.
    pub adapter: AdapterKind,
    /// Models this provider serves.
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    /// Connection pool overrides.
    #[serde(default)]
    pub pool: PoolConfig,
}

/// One model within a provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Model id as the provider knows it.
    pub id: String,
    /// Capabilities the model supports.
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<Capability>,
    /// Cost per 1K input tokens, in dollars.
    #[serde(default)]
    pub cost_per_1k_input: f64,
    /// Cost per 1K output tokens, in dollars.
    #[serde(default)]
    pub cost_per_1k_output: f64,
    /// Context window in tokens.
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    /// Maximum output tokens.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Latency tier.
    pub speed_tier: SpeedTier,
    /// Pricing tier.
    #[serde(default = "default_pricing_tier")]
    pub pricing_tier: PricingTier,
}

fn default_capabilities() -> Vec<Capability> {
    vec![Capability::Text]
}

fn default_context_window() -> u32 {
    128_000
}

fn default_max_output_tokens() -> u32 {
    4_096
}

fn default_pricing_tier() -> PricingTier {
    PricingTier::Standard
}

/// Per-provider connection pool limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent connections to the provider host.
    pub max_connections: usize,
    /// Maximum concurrent streams multiplexed on one HTTP/2 connection.
    pub max_streams_per_connection: usize,
    /// Idle connection lifetime in seconds.
    pub idle_timeout_secs: u64,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Time allowed for the upstream to return response headers, in seconds.
    pub header_timeout_secs: u64,
    /// Time allowed until the first body byte, in seconds.
    pub first_byte_timeout_secs: u64,
    /// Whole-response timeout in seconds.
    pub response_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 32,
            max_streams_per_connection: 100,
            idle_timeout_secs: 90,
            connect_timeout_secs: 5,
            header_timeout_secs: 10,
            first_byte_timeout_secs: 30,
            response_timeout_secs: 600,
        }
    }
}

/// Pricing-tier filter the router honors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierFilter {
    Standard,
    Enterprise,
    Local,
    Auto,
}

/// Router preferences.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Bias toward low-latency models.
    pub prefer_fast: bool,
    /// Bias toward lower-cost models.
    pub prefer_cheap: bool,
    /// Hard cost ceiling per 1K tokens; absent means no ceiling.
    pub max_cost_per_1k_tokens: Option<f64>,
    /// Pricing-tier filter.
    pub pricing_tier: TierFilter,
    /// Explicit model id, or `auto`.
    pub explicit_model_id: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            prefer_fast: false,
            prefer_cheap: false,
            max_cost_per_1k_tokens: None,
            pricing_tier: TierFilter::Auto,
            explicit_model_id: "auto".to_string(),
        }
    }
}

/// API-key authentication for inbound requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Header the key is read from.
    pub header: String,
    /// Environment variable holding the expected key; absent disables auth.
    pub api_key_env: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            header: "x-api-key".to_string(),
            api_key_env: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

/// Logging and metrics options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Structured log format.
    pub log_format: LogFormat,
    /// Log level filter, e.g. `info` or `modelgate=debug`.
    pub log_level: String,
    /// Path the metrics endpoint is served under.
    pub metrics_path: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Text,
            log_level: "info".to_string(),
            metrics_path: "/api/v1/performance/metrics".to_string(),
        }
    }
}

/// CPU-bound worker pool sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Concurrent CPU-bound jobs.
    pub slots: usize,
    /// Queued jobs beyond the running set before `server-busy`.
    pub queue: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { slots: 4, queue: 64 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_yields_defaults() {
        let cfg: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.listen_port, 8080);
        assert_eq!(cfg.max_file_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.extraction.text_cap_bytes, 1024 * 1024);
        assert_eq!(cfg.cache.local_bytes, 128 * 1024 * 1024);
        assert_eq!(cfg.cache.default_ttl_secs, 300);
        assert!(cfg.providers.is_empty());
        assert_eq!(cfg.router.explicit_model_id, "auto");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let cfg: GatewayConfig = toml::from_str(
            r#"
            listen_port = 9000
            some_future_option = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.listen_port, 9000);
    }

    #[test]
    fn providers_and_rules_parse() {
        let cfg: GatewayConfig = toml::from_str(
            r#"
            [[rate_limits]]
            route_glob = "/api/v1/upload"
            capacity = 10
            window_seconds = 60
            identity = "api-key"

            [[providers]]
            id = "openai"
            base_url = "https://api.openai.com"
            api_key_env = "OPENAI_API_KEY"
            adapter = "openai"

            [[providers.models]]
            id = "gpt-4o-mini"
            capabilities = ["text", "vision"]
            cost_per_1k_input = 0.00015
            cost_per_1k_output = 0.0006
            speed_tier = "fast"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.rate_limits.len(), 1);
        assert_eq!(cfg.rate_limits[0].identity, RuleIdentity::ApiKey);
        assert_eq!(cfg.providers.len(), 1);
        let model = &cfg.providers[0].models[0];
        assert_eq!(model.id, "gpt-4o-mini");
        assert_eq!(model.capabilities.len(), 2);
        assert_eq!(model.pricing_tier, PricingTier::Standard);
        assert_eq!(cfg.providers[0].pool.max_connections, 32);
    }
}
