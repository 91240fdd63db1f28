//! Read-only router configuration.
//!
//! Three sections are consulted at dispatch time: CORS preflight policy, API
//! versioning and the bridge for `process()`-style middleware. Every field has a
//! default, so partial JSON documents are accepted.
//!
//! # Examples
//!
//! ```rust
//! use signpost::config::{RouterConfig, VersionStrategy};
//!
//! let cfg = RouterConfig::from_json(r#"{ "versioning": { "strategy": "header" } }"#).unwrap();
//! assert_eq!(cfg.versioning.strategy, VersionStrategy::Header);
//! assert_eq!(cfg.versioning.api_prefix, "/api");
//! ```

use std::{fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};

/// Root configuration consumed by [`crate::router::Router::with_config`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    pub cors: CorsConfig,
    pub versioning: VersioningConfig,
    pub bridge: BridgeConfig,
}

impl RouterConfig {
    /// Parses a JSON configuration document.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Reads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| anyhow::anyhow!("could not open config file {}: {e}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| anyhow::anyhow!("could not parse config file {}: {e}", path.display()))
    }
}

/// CORS policy applied to synthesized preflight responses.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Exact origins; `*` allows any origin.
    pub allowed_origins: Vec<String>,
    /// Regular expressions matched against the full origin.
    pub allowed_origin_patterns: Vec<String>,
    /// Exact origins that are always refused, even when `*` is allowed.
    pub denied_origins: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Preflight cache duration in seconds.
    pub max_age: Option<u32>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_origin_patterns: Vec::new(),
            denied_origins: Vec::new(),
            allowed_headers: vec![
                "Content-Type".to_string(),
                "Authorization".to_string(),
                "X-Requested-With".to_string(),
            ],
            exposed_headers: Vec::new(),
            allow_credentials: false,
            max_age: Some(86400),
        }
    }
}

/// Where the API version of a request is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStrategy {
    /// `/api/v2/users`
    #[default]
    UrlPrefix,
    /// `X-API-Version: 2`
    Header,
    /// `?version=2`
    Query,
    /// `Accept: application/vnd.api.v2+json`
    Accept,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VersioningConfig {
    pub strategy: VersionStrategy,
    /// Base prefix placed before `/v<N>` for the URL strategy.
    pub api_prefix: String,
    pub default_version: Option<String>,
    pub header: String,
    pub query_param: String,
    /// Vendor segment of `application/vnd.<vendor>.v<N>+json`.
    pub vendor: String,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            strategy: VersionStrategy::UrlPrefix,
            api_prefix: "/api".to_string(),
            default_version: None,
            header: "X-API-Version".to_string(),
            query_param: "version".to_string(),
            vendor: "api".to_string(),
        }
    }
}

/// Policy for middleware written against the `process(request, handler)` protocol.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// When disabled no adaptation is attempted at all.
    pub enabled: bool,
    /// Detect `process()` middleware among container-resolved instances.
    pub auto_detect: bool,
    /// Strict mode: unadaptable middleware is an error instead of a pass-through.
    pub throw_on_missing_bridge: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_detect: true,
            throw_on_missing_bridge: true,
        }
    }
}
