use std::time::Instant;

use rama::http::{Body, Method, Request};

/// Cache status for request tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Request never consulted the cache (redirects, validation halts, non-GET)
    Pass,
    Hit,
    Miss,
    /// Caching disabled for this execution environment
    Bypass,
    Error,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStatus::Pass => write!(f, "pass"),
            CacheStatus::Hit => write!(f, "hit"),
            CacheStatus::Miss => write!(f, "miss"),
            CacheStatus::Bypass => write!(f, "bypass"),
            CacheStatus::Error => write!(f, "error"),
        }
    }
}

/// Request context for tracking request lifecycle.
///
/// The browse/meta/module flags are derived from the URL once, at
/// construction, and never change afterwards; they are scoped to a single
/// request and never shared across requests.
pub struct RequestContext {
    pub start: Instant,
    pub start_epoch_ms: i64,
    pub method: Method,
    pub path: String,
    pub cache: CacheStatus,
    pub browse: bool,
    pub meta: bool,
    pub module: bool,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            start: Instant::now(),
            start_epoch_ms: chrono::Utc::now().timestamp_millis(),
            method: Method::GET,
            path: String::new(),
            cache: CacheStatus::Pass,
            browse: false,
            meta: false,
            module: false,
        }
    }
}

impl RequestContext {
    pub fn from_request(req: &Request<Body>) -> Self {
        let path = req.uri().path().to_string();
        let (meta, module) = query_flags(req.uri().query());
        Self {
            start: Instant::now(),
            start_epoch_ms: chrono::Utc::now().timestamp_millis(),
            method: req.method().clone(),
            path: path.clone(),
            cache: CacheStatus::Pass,
            browse: path == "/browse" || path.starts_with("/browse/"),
            meta,
            module,
        }
    }

    /// The pathname the package validators operate on: for browse routes
    /// the `/browse` prefix is not part of the package pathname.
    pub fn package_path(&self) -> &str {
        if self.browse {
            self.path.strip_prefix("/browse").unwrap_or(&self.path)
        } else {
            &self.path
        }
    }
}

/// Presence checks for the mode-selecting query parameters. A bare `?meta`
/// and `?meta=1` both count as present.
pub fn query_flags(query: Option<&str>) -> (bool, bool) {
    let mut meta = false;
    let mut module = false;
    if let Some(query) = query {
        for (key, _) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "meta" => meta = true,
                "module" => module = true,
                _ => {}
            }
        }
    }
    (meta, module)
}

/// A package pathname parsed from `/{pkg}[@{version}]{/filename}`.
///
/// `filename` keeps its leading slash (or is empty when the URL stops at
/// the package spec), so directory requests stay distinguishable by their
/// trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagePathname {
    pub name: String,
    pub version: String,
    pub filename: String,
}

impl PackagePathname {
    /// The `{name}@{version}` form used when rebuilding URLs.
    pub fn spec(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn flags_default_to_absent() {
        let ctx = RequestContext::from_request(&req("/lodash@4.17.21/package.json"));
        assert!(!ctx.browse);
        assert!(!ctx.meta);
        assert!(!ctx.module);
    }

    #[test]
    fn meta_flag_detected_without_value() {
        let ctx = RequestContext::from_request(&req("/lodash@4.17.21/package.json?meta"));
        assert!(ctx.meta);
        assert!(!ctx.module);
    }

    #[test]
    fn module_flag_detected_with_value() {
        let ctx = RequestContext::from_request(&req("/lodash@4.17.21/index.js?module=1"));
        assert!(ctx.module);
    }

    #[test]
    fn both_flags_can_be_present() {
        let ctx = RequestContext::from_request(&req("/pkg/file.js?meta&module"));
        assert!(ctx.meta);
        assert!(ctx.module);
    }

    #[test]
    fn browse_prefix_sets_browse_and_strips_package_path() {
        let ctx = RequestContext::from_request(&req("/browse/lodash@4.17.21/"));
        assert!(ctx.browse);
        assert_eq!(ctx.package_path(), "/lodash@4.17.21/");
    }

    #[test]
    fn generic_package_path_is_the_request_path() {
        let ctx = RequestContext::from_request(&req("/lodash@4.17.21/package.json"));
        assert_eq!(ctx.package_path(), "/lodash@4.17.21/package.json");
    }

    #[test]
    fn unrelated_query_parameters_set_no_flags() {
        let (meta, module) = query_flags(Some("download&callback=x"));
        assert!(!meta);
        assert!(!module);
    }

    #[test]
    fn cache_status_display_forms() {
        assert_eq!(CacheStatus::Hit.to_string(), "hit");
        assert_eq!(CacheStatus::Miss.to_string(), "miss");
        assert_eq!(CacheStatus::Bypass.to_string(), "bypass");
        assert_eq!(CacheStatus::Pass.to_string(), "pass");
        assert_eq!(CacheStatus::Error.to_string(), "error");
    }

    #[test]
    fn package_spec_joins_name_and_version() {
        let pkg = PackagePathname {
            name: "@scope/pkg".to_string(),
            version: "1.2.3".to_string(),
            filename: "/index.js".to_string(),
        };
        assert_eq!(pkg.spec(), "@scope/pkg@1.2.3");
    }
}
