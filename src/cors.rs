//! CORS headers for synthesized preflight responses.
//!
//! [`CorsPolicy`] is built once from [`CorsConfig`] when the router is configured;
//! origin patterns are compiled at that point so an invalid pattern fails at boot.
//!
//! # Example
//!
//! ```rust
//! use signpost::config::CorsConfig;
//! use signpost::cors::CorsPolicy;
//!
//! let policy = CorsPolicy::new(&CorsConfig {
//!     allowed_origins: vec!["https://example.com".into()],
//!     allow_credentials: true,
//!     ..Default::default()
//! })
//! .unwrap();
//!
//! assert_eq!(policy.allow_origin(Some("https://example.com")).as_deref(), Some("https://example.com"));
//! assert_eq!(policy.allow_origin(Some("https://evil.test")), None);
//! ```

use http::{
    HeaderMap, HeaderValue, Method,
    header::{
        ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
        ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
        ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE, VARY,
    },
};
use regex::Regex;

use crate::{config::CorsConfig, error::RouterError};

/// Compiled CORS configuration.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    wildcard: bool,
    origins: Vec<String>,
    patterns: Vec<Regex>,
    denied: Vec<String>,
    allowed_headers: Option<HeaderValue>,
    exposed_headers: Option<HeaderValue>,
    allow_credentials: bool,
    max_age: Option<u32>,
}

impl CorsPolicy {
    pub fn new(cfg: &CorsConfig) -> Result<Self, RouterError> {
        let patterns = cfg
            .allowed_origin_patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("^(?:{p})$")).map_err(|e| RouterError::InvalidConstraint {
                    param: "cors.allowed_origin_patterns".to_string(),
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::with_patterns(cfg, patterns))
    }

    fn with_patterns(cfg: &CorsConfig, patterns: Vec<Regex>) -> Self {
        Self {
            wildcard: cfg.allowed_origins.iter().any(|o| o == "*"),
            origins: cfg
                .allowed_origins
                .iter()
                .filter(|o| o.as_str() != "*")
                .cloned()
                .collect(),
            patterns,
            denied: cfg.denied_origins.clone(),
            allowed_headers: joined(&cfg.allowed_headers),
            exposed_headers: joined(&cfg.exposed_headers),
            allow_credentials: cfg.allow_credentials,
            max_age: cfg.max_age,
        }
    }

    /// Value of `Access-Control-Allow-Origin` for a request origin, `None` when the
    /// origin is refused.
    ///
    /// The wildcard is echoed as the concrete origin when credentials are enabled,
    /// since browsers reject `*` together with credentials.
    pub fn allow_origin(&self, origin: Option<&str>) -> Option<String> {
        let Some(origin) = origin else {
            return (self.wildcard && !self.allow_credentials).then(|| "*".to_string());
        };

        if self.denied.iter().any(|d| d == origin) {
            return None;
        }
        if self.origins.iter().any(|o| o == origin)
            || self.patterns.iter().any(|p| p.is_match(origin))
        {
            return Some(origin.to_string());
        }
        if self.wildcard {
            return Some(if self.allow_credentials {
                origin.to_string()
            } else {
                "*".to_string()
            });
        }
        None
    }

    /// Adds the preflight headers for `origin` and the route's allowed methods.
    ///
    /// Nothing is added when the origin is refused; `Allow` stays the caller's job.
    pub fn apply(&self, headers: &mut HeaderMap, origin: Option<&HeaderValue>, methods: &[Method]) {
        let origin = origin.and_then(|o| o.to_str().ok());
        let Some(allow_origin) = self.allow_origin(origin) else {
            tracing::debug!(origin = ?origin, "cors origin refused");
            return;
        };

        let Ok(value) = HeaderValue::from_str(&allow_origin) else {
            return;
        };
        if allow_origin != "*" {
            headers.append(VARY, HeaderValue::from_static("Origin"));
        }
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);

        if let Some(methods) = joined(methods.iter().map(Method::as_str)) {
            headers.insert(ACCESS_CONTROL_ALLOW_METHODS, methods);
        }
        if let Some(h) = &self.allowed_headers {
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, h.clone());
        }
        if let Some(h) = &self.exposed_headers {
            headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, h.clone());
        }
        if self.allow_credentials {
            headers.insert(
                ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        if let Some(age) = self.max_age {
            headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(age));
        }
    }
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self::with_patterns(&CorsConfig::default(), Vec::new())
    }
}

/// Comma separated header value, `None` for an empty list or invalid characters.
pub(crate) fn joined<I, S>(items: I) -> Option<HeaderValue>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let parts: Vec<String> = items.into_iter().map(|s| s.as_ref().to_string()).collect();
    if parts.is_empty() {
        return None;
    }
    HeaderValue::from_str(&parts.join(", ")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(cfg: CorsConfig) -> CorsPolicy {
        CorsPolicy::new(&cfg).unwrap()
    }

    #[test]
    fn wildcard_without_credentials() {
        let p = policy(CorsConfig::default());
        let mut headers = HeaderMap::new();
        let origin = HeaderValue::from_static("https://a.test");
        p.apply(&mut headers, Some(&origin), &[Method::GET, Method::HEAD]);

        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], "GET, HEAD");
        assert_eq!(headers[ACCESS_CONTROL_MAX_AGE], "86400");
        assert!(headers.get(VARY).is_none());
        assert!(headers.get(ACCESS_CONTROL_ALLOW_CREDENTIALS).is_none());
    }

    #[test]
    fn echoed_origin_varies() {
        let p = policy(CorsConfig {
            allowed_origins: vec![],
            allowed_origin_patterns: vec![r"https://[a-z]+\.example\.com".into()],
            allow_credentials: true,
            exposed_headers: vec!["X-Total".into()],
            ..Default::default()
        });
        let mut headers = HeaderMap::new();
        let origin = HeaderValue::from_static("https://app.example.com");
        p.apply(&mut headers, Some(&origin), &[Method::POST]);

        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example.com");
        assert_eq!(headers[VARY], "Origin");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[ACCESS_CONTROL_EXPOSE_HEADERS], "X-Total");
    }

    #[test]
    fn denied_beats_wildcard() {
        let p = policy(CorsConfig {
            denied_origins: vec!["https://evil.test".into()],
            ..Default::default()
        });
        assert_eq!(p.allow_origin(Some("https://evil.test")), None);
        assert_eq!(p.allow_origin(Some("https://ok.test")).as_deref(), Some("*"));
    }

    #[test]
    fn invalid_pattern_fails_early() {
        let err = CorsPolicy::new(&CorsConfig {
            allowed_origin_patterns: vec!["(".into()],
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, RouterError::InvalidConstraint { .. }));
    }
}
