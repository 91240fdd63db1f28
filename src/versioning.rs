//! API version resolution.
//!
//! Four independent strategies implement [`VersionResolver`]:
//!
//! - **URL prefix**: `/api/v2/users`
//! - **Header**: `X-API-Version: 2`
//! - **Query parameter**: `/users?version=2`
//! - **Accept header**: `application/vnd.api.v2+json`
//!
//! A [`VersionNegotiator`] runs all of them and keeps the answer of the
//! highest-priority resolver that found one. Resolvers share no state.
//!
//! # Example
//!
//! ```rust
//! use signpost::versioning::{HeaderResolver, UrlPrefixResolver, VersionNegotiator};
//!
//! let negotiator = VersionNegotiator::new()
//!     .with(UrlPrefixResolver::new("/api"))
//!     .with(HeaderResolver::new("X-API-Version"));
//!
//! let req = http::Request::builder()
//!     .uri("/api/v2/users")
//!     .header("X-API-Version", "3")
//!     .body(signpost::body::Body::empty())
//!     .unwrap();
//!
//! // The URL prefix outranks the header.
//! assert_eq!(negotiator.resolve(&req).unwrap().version, "2");
//! ```

use std::sync::Arc;

use http::header::ACCEPT;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    config::{VersionStrategy, VersioningConfig},
    middleware::{BoxMiddleware, Next},
    types::Request,
};

static HEADER_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[vV]?(\d+(?:\.\d+)?)$").expect("header version regex"));

/// Version stored in the request extensions by the negotiation middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiVersion(pub String);

/// One version-resolution strategy.
pub trait VersionResolver: Send + Sync {
    fn resolve(&self, req: &Request) -> Option<String>;

    /// Higher wins when several resolvers answer.
    fn priority(&self) -> i32;

    fn name(&self) -> &'static str;
}

/// `<prefix>/v<N>` at the start of the path.
#[derive(Debug)]
pub struct UrlPrefixResolver {
    pattern: Regex,
}

impl UrlPrefixResolver {
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        let pattern = Regex::new(&format!(r"^{}/[vV](\d+(?:\.\d+)?)(?:/|$)", regex::escape(prefix)))
            .expect("escaped prefix always compiles");
        Self { pattern }
    }
}

impl VersionResolver for UrlPrefixResolver {
    fn resolve(&self, req: &Request) -> Option<String> {
        self.pattern
            .captures(req.uri().path())
            .map(|caps| caps[1].to_string())
    }

    fn priority(&self) -> i32 {
        100
    }

    fn name(&self) -> &'static str {
        "url_prefix"
    }
}

/// Exact header lookup; a leading `v` is tolerated.
#[derive(Debug)]
pub struct HeaderResolver {
    header: String,
}

impl HeaderResolver {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl VersionResolver for HeaderResolver {
    fn resolve(&self, req: &Request) -> Option<String> {
        let raw = req.headers().get(self.header.as_str())?.to_str().ok()?;
        HEADER_VERSION
            .captures(raw.trim())
            .map(|caps| caps[1].to_string())
    }

    fn priority(&self) -> i32 {
        90
    }

    fn name(&self) -> &'static str {
        "header"
    }
}

/// `application/vnd.<vendor>.v<N>+<suffix>` in the Accept header.
#[derive(Debug)]
pub struct AcceptHeaderResolver {
    pattern: Regex,
}

impl AcceptHeaderResolver {
    pub fn new(vendor: &str) -> Self {
        let pattern = Regex::new(&format!(
            r"application/vnd\.{}\.v(\d+(?:\.\d+)?)\+",
            regex::escape(vendor)
        ))
        .expect("escaped vendor always compiles");
        Self { pattern }
    }
}

impl VersionResolver for AcceptHeaderResolver {
    fn resolve(&self, req: &Request) -> Option<String> {
        req.headers()
            .get_all(ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|accept| self.pattern.captures(accept).map(|caps| caps[1].to_string()))
    }

    fn priority(&self) -> i32 {
        80
    }

    fn name(&self) -> &'static str {
        "accept"
    }
}

/// Exact query-key lookup.
#[derive(Debug)]
pub struct QueryResolver {
    param: String,
}

impl QueryResolver {
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }
}

impl VersionResolver for QueryResolver {
    fn resolve(&self, req: &Request) -> Option<String> {
        let query = req.uri().query()?;
        serde_urlencoded::from_str::<Vec<(String, String)>>(query)
            .ok()?
            .into_iter()
            .find(|(k, v)| k == &self.param && !v.is_empty())
            .map(|(_, v)| v.trim_start_matches(['v', 'V']).to_string())
    }

    fn priority(&self) -> i32 {
        70
    }

    fn name(&self) -> &'static str {
        "query"
    }
}

/// Outcome of a negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub version: String,
    pub resolver: &'static str,
}

/// Runs every resolver and keeps the highest-priority answer.
#[derive(Clone, Default)]
pub struct VersionNegotiator {
    resolvers: Vec<Arc<dyn VersionResolver>>,
}

impl VersionNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// All four strategies, configured from `config`.
    pub fn from_config(config: &VersioningConfig) -> Self {
        Self::new()
            .with(UrlPrefixResolver::new(&config.api_prefix))
            .with(HeaderResolver::new(config.header.clone()))
            .with(AcceptHeaderResolver::new(&config.vendor))
            .with(QueryResolver::new(config.query_param.clone()))
    }

    pub fn with<R: VersionResolver + 'static>(mut self, resolver: R) -> Self {
        self.resolvers.push(Arc::new(resolver));
        self
    }

    pub fn resolve(&self, req: &Request) -> Option<ResolvedVersion> {
        self.resolvers
            .iter()
            .filter_map(|r| {
                r.resolve(req).map(|version| {
                    (
                        r.priority(),
                        ResolvedVersion {
                            version,
                            resolver: r.name(),
                        },
                    )
                })
            })
            .max_by_key(|(priority, _)| *priority)
            .map(|(_, resolved)| resolved)
    }
}

/// Middleware stored at the head of every `api_version` group.
///
/// For the URL strategy the group's own version is authoritative; otherwise the
/// request is negotiated and the group version is the fallback. The outcome is
/// stored as [`ApiVersion`] in the request extensions.
pub(crate) fn negotiation_middleware(
    group_version: String,
    config: &VersioningConfig,
) -> BoxMiddleware {
    let negotiator = Arc::new(VersionNegotiator::from_config(config));
    let url_strategy = config.strategy == VersionStrategy::UrlPrefix;

    Arc::new(move |mut req: Request, next: Next| {
        let version = if url_strategy {
            group_version.clone()
        } else {
            negotiator
                .resolve(&req)
                .map(|r| r.version)
                .unwrap_or_else(|| group_version.clone())
        };
        tracing::trace!(version = %version, "api version negotiated");
        req.extensions_mut().insert(ApiVersion(version));
        Box::pin(next.run(req))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;

    fn req(uri: &str, headers: &[(&str, &str)]) -> Request {
        let mut b = http::Request::builder().uri(uri);
        for (k, v) in headers {
            b = b.header(*k, *v);
        }
        b.body(Body::empty()).unwrap()
    }

    #[test]
    fn url_prefix() {
        let r = UrlPrefixResolver::new("/api/");
        assert_eq!(r.resolve(&req("/api/v2/users", &[])), Some("2".into()));
        assert_eq!(r.resolve(&req("/api/v1.1", &[])), Some("1.1".into()));
        assert_eq!(r.resolve(&req("/api/v2x/users", &[])), None);
        assert_eq!(r.resolve(&req("/v2/users", &[])), None);
    }

    #[test]
    fn header() {
        let r = HeaderResolver::new("X-API-Version");
        assert_eq!(r.resolve(&req("/", &[("x-api-version", "v3")])), Some("3".into()));
        assert_eq!(r.resolve(&req("/", &[("x-api-version", "latest")])), None);
        assert_eq!(r.resolve(&req("/", &[])), None);
    }

    #[test]
    fn accept() {
        let r = AcceptHeaderResolver::new("acme");
        assert_eq!(
            r.resolve(&req("/", &[("accept", "text/html, application/vnd.acme.v4+json")])),
            Some("4".into())
        );
        assert_eq!(r.resolve(&req("/", &[("accept", "application/vnd.other.v4+json")])), None);
    }

    #[test]
    fn query() {
        let r = QueryResolver::new("version");
        assert_eq!(r.resolve(&req("/users?page=1&version=v2", &[])), Some("2".into()));
        assert_eq!(r.resolve(&req("/users?version=", &[])), None);
        assert_eq!(r.resolve(&req("/users", &[])), None);
    }

    #[test]
    fn highest_priority_wins() {
        let n = VersionNegotiator::from_config(&VersioningConfig::default());
        let resolved = n
            .resolve(&req("/users?version=1", &[("X-API-Version", "2")]))
            .unwrap();
        assert_eq!(resolved.version, "2");
        assert_eq!(resolved.resolver, "header");
        assert_eq!(n.resolve(&req("/users", &[])), None);
    }
}
