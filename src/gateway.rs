pub mod cache;
pub mod classify;
pub mod enrich;
pub mod legacy;
pub mod response;
pub mod tee;
pub mod types;
pub mod validate;

use std::sync::Arc;

use anyhow::Result;
use lode_adapter::CacheStore;
use rama::{
    Service,
    error::BoxError,
    http::{Body, Method, Request, Response, StatusCode, Uri},
};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::content::ContentSource;

use cache::ReadThroughCache;
use classify::{Dispatch, RouteMode};
use types::{CacheStatus, PackagePathname, RequestContext};
use validate::StageOutcome;

/// The edge request gateway: per request it classifies the route mode,
/// runs the validation chain, and serves the result through the
/// read-through response cache. Content itself comes from the attached
/// [`ContentSource`] collaborator.
#[derive(Clone)]
pub struct LodeGateway {
    config: Arc<Config>,
    cache: ReadThroughCache,
    content: Arc<dyn ContentSource>,
}

impl LodeGateway {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn CacheStore>,
        content: Arc<dyn ContentSource>,
    ) -> Self {
        let cache = ReadThroughCache::new(
            store,
            config.cache.ttl(),
            config.edge.service_version.as_deref(),
        );
        Self {
            config,
            cache,
            content,
        }
    }

    async fn handle(&self, req: Request<Body>, ctx: &mut RequestContext) -> Result<Response<Body>> {
        if req.method() != Method::GET {
            return response::respond_text(StatusCode::NOT_FOUND, "Not Found");
        }

        let uri = req.uri().clone();
        let dispatch = classify::classify(uri.path(), ctx.meta, ctx.module);

        // The static routes sit in front of the legacy rewrites.
        match &dispatch {
            Dispatch::Mode(RouteMode::MainPage) => {
                let (resp, status) = self
                    .cache
                    .handle(&uri, || self.content.main_page())
                    .await?;
                ctx.cache = status;
                return Ok(resp);
            }
            Dispatch::Mode(RouteMode::Favicon) => {
                let (resp, status) = self
                    .cache
                    .handle(&uri, || async { response::respond_favicon() })
                    .await?;
                ctx.cache = status;
                return Ok(resp);
            }
            _ => {}
        }

        if let Some(resp) = legacy::check_legacy(&uri)? {
            return Ok(resp);
        }

        let mode = match dispatch {
            Dispatch::RedirectToBrowse(location) => {
                return response::redirect(&location, StatusCode::FOUND);
            }
            Dispatch::Mode(mode) => mode,
        };

        let stages = if ctx.browse {
            validate::BROWSE_STAGES
        } else {
            validate::GENERIC_STAGES
        };
        let pkg = match validate::run_chain(ctx.package_path(), stages)? {
            StageOutcome::Continue(pkg) => pkg,
            StageOutcome::Halt(resp) => return Ok(resp),
        };

        let (resp, status) = self
            .cache
            .handle(&uri, || self.serve_mode(mode, &pkg, &uri))
            .await?;
        ctx.cache = status;
        Ok(resp)
    }

    async fn serve_mode(
        &self,
        mode: RouteMode,
        pkg: &PackagePathname,
        uri: &Uri,
    ) -> Result<Response<Body>> {
        match mode {
            RouteMode::MainPage => self.content.main_page().await,
            RouteMode::Favicon => response::respond_favicon(),
            RouteMode::BrowseDirectory => self.content.directory_browser(pkg, uri).await,
            RouteMode::BrowseFile => self.content.file_browser(pkg, uri).await,
            RouteMode::MetaDirectory => self.content.directory_metadata(pkg, uri).await,
            RouteMode::MetaFile => self.content.file_metadata(pkg, uri).await,
            RouteMode::Module => self.content.module(pkg, uri).await,
            RouteMode::File => self.content.file(pkg, uri).await,
        }
    }

    fn request_summary(&self, ctx: &RequestContext) -> String {
        format!("{} {}", ctx.method.as_str(), ctx.path)
    }
}

impl Service<Request<Body>> for LodeGateway {
    type Output = Response<Body>;
    type Error = BoxError;

    async fn serve(&self, req: Request<Body>) -> Result<Self::Output, Self::Error> {
        let mut ctx = RequestContext::from_request(&req);

        let result = self.handle(req, &mut ctx).await;

        let mut resp = match result {
            Ok(resp) => resp,
            Err(err) => {
                // Outermost boundary: whatever escaped the pipeline becomes
                // a fixed 500; the cause stays in the logs.
                ctx.cache = CacheStatus::Error;
                error!(
                    summary = %self.request_summary(&ctx),
                    error = %err,
                    "request failed"
                );
                response::respond_text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                    .map_err(BoxError::from)?
            }
        };

        if let Err(err) = enrich::append_diagnostics(resp.headers_mut(), &ctx, &self.config.edge) {
            warn!(error = %err, "failed to append response diagnostics");
        }

        let response_code = resp.status().as_u16();
        let duration_ms = ctx.start.elapsed().as_millis();
        info!(
            summary = %self.request_summary(&ctx),
            response_code,
            duration_ms,
            cache_status = %ctx.cache,
            "request handled"
        );

        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lode_adapter::MemoryStore;
    use rama::http::body::util::BodyExt;
    use rama::http::header;
    use std::sync::Mutex;

    struct StubContent {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl StubContent {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn record(&self, mode: &str) -> Result<Response<Body>> {
            self.calls.lock().unwrap().push(mode.to_string());
            if self.fail {
                return Err(anyhow::anyhow!("collaborator exploded"));
            }
            response::respond_text(StatusCode::OK, &format!("{mode} body"))
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContentSource for StubContent {
        async fn main_page(&self) -> Result<Response<Body>> {
            self.record("main-page")
        }
        async fn file(&self, _: &PackagePathname, _: &Uri) -> Result<Response<Body>> {
            self.record("file")
        }
        async fn module(&self, _: &PackagePathname, _: &Uri) -> Result<Response<Body>> {
            self.record("module")
        }
        async fn file_metadata(&self, _: &PackagePathname, _: &Uri) -> Result<Response<Body>> {
            self.record("meta-file")
        }
        async fn directory_metadata(
            &self,
            _: &PackagePathname,
            _: &Uri,
        ) -> Result<Response<Body>> {
            self.record("meta-directory")
        }
        async fn file_browser(&self, _: &PackagePathname, _: &Uri) -> Result<Response<Body>> {
            self.record("browse-file")
        }
        async fn directory_browser(
            &self,
            _: &PackagePathname,
            _: &Uri,
        ) -> Result<Response<Body>> {
            self.record("browse-directory")
        }
    }

    fn deployed_config() -> Arc<Config> {
        let mut config = Config::default();
        config.edge.service_version = Some("7".to_string());
        Arc::new(config)
    }

    fn local_config() -> Arc<Config> {
        Arc::new(Config::default())
    }

    fn gateway_with(config: Arc<Config>, content: Arc<StubContent>) -> LodeGateway {
        LodeGateway::new(config, Arc::new(MemoryStore::new()), content)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_string(resp: Response<Body>) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn plain_file_request_dispatches_to_file() {
        let content = Arc::new(StubContent::new());
        let gw = gateway_with(local_config(), content.clone());
        let resp = gw.serve(get("/lodash@4.17.21/package.json")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(content.calls(), vec!["file"]);
    }

    #[tokio::test]
    async fn meta_request_dispatches_to_file_metadata() {
        let content = Arc::new(StubContent::new());
        let gw = gateway_with(local_config(), content.clone());
        gw.serve(get("/lodash@4.17.21/package.json?meta")).await.unwrap();
        assert_eq!(content.calls(), vec!["meta-file"]);
    }

    #[tokio::test]
    async fn meta_directory_request_dispatches_accordingly() {
        let content = Arc::new(StubContent::new());
        let gw = gateway_with(local_config(), content.clone());
        gw.serve(get("/lodash@4.17.21/?meta")).await.unwrap();
        assert_eq!(content.calls(), vec!["meta-directory"]);
    }

    #[tokio::test]
    async fn module_request_dispatches_to_module() {
        let content = Arc::new(StubContent::new());
        let gw = gateway_with(local_config(), content.clone());
        gw.serve(get("/lodash@4.17.21/index.js?module")).await.unwrap();
        assert_eq!(content.calls(), vec!["module"]);
    }

    #[tokio::test]
    async fn browse_requests_split_on_trailing_slash() {
        let content = Arc::new(StubContent::new());
        let gw = gateway_with(local_config(), content.clone());
        gw.serve(get("/browse/lodash@4.17.21/")).await.unwrap();
        gw.serve(get("/browse/lodash@4.17.21/README.md")).await.unwrap();
        assert_eq!(content.calls(), vec!["browse-directory", "browse-file"]);
    }

    #[tokio::test]
    async fn flagless_directory_redirects_to_browse() {
        let content = Arc::new(StubContent::new());
        let gw = gateway_with(local_config(), content.clone());
        let resp = gw.serve(get("/lodash@4.17.21/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "/browse/lodash@4.17.21/"
        );
        assert!(content.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_package_name_halts_before_content() {
        let content = Arc::new(StubContent::new());
        let gw = gateway_with(local_config(), content.clone());
        let resp = gw.serve(get("/LoDash@4.17.21/package.json")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(content.calls().is_empty());
    }

    #[tokio::test]
    async fn unnormalized_filename_halts_before_cache_or_content() {
        let content = Arc::new(StubContent::new());
        let gw = gateway_with(deployed_config(), content.clone());
        let resp = gw.serve(get("/invalid///name")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(content.calls().is_empty());
        // a halted request leaves no cache-state marker behind
        assert!(
            !resp
                .headers()
                .get_all(cache::SERVER_TIMING)
                .iter()
                .any(|v| v.to_str().unwrap().contains("hit-state"))
        );
    }

    #[tokio::test]
    async fn malformed_pathname_halts_with_client_error() {
        let content = Arc::new(StubContent::new());
        let gw = gateway_with(local_config(), content.clone());
        let resp = gw.serve(get("/@invalid")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(content.calls().is_empty());
    }

    #[tokio::test]
    async fn main_page_served_on_root() {
        let content = Arc::new(StubContent::new());
        let gw = gateway_with(local_config(), content.clone());
        let resp = gw.serve(get("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(content.calls(), vec!["main-page"]);
    }

    #[tokio::test]
    async fn favicon_served_without_content_source() {
        let content = Arc::new(StubContent::new());
        let gw = gateway_with(local_config(), content.clone());
        let resp = gw.serve(get("/favicon.svg")).await.unwrap();
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/svg+xml"
        );
        assert!(content.calls().is_empty());
    }

    #[tokio::test]
    async fn legacy_meta_prefix_redirects() {
        let content = Arc::new(StubContent::new());
        let gw = gateway_with(local_config(), content.clone());
        let resp = gw.serve(get("/_meta/lodash@4.17.21/a.js")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
        assert!(content.calls().is_empty());
    }

    #[tokio::test]
    async fn collaborator_error_becomes_plain_500() {
        let content = Arc::new(StubContent::failing());
        let gw = gateway_with(local_config(), content.clone());
        let resp = gw.serve(get("/lodash@4.17.21/package.json")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(resp).await, "Internal Server Error");
    }

    #[tokio::test]
    async fn non_get_methods_are_not_routed() {
        let content = Arc::new(StubContent::new());
        let gw = gateway_with(local_config(), content.clone());
        let req = Request::builder()
            .method(Method::POST)
            .uri("/lodash@4.17.21/package.json")
            .body(Body::empty())
            .unwrap();
        let resp = gw.serve(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(content.calls().is_empty());
    }

    #[tokio::test]
    async fn every_response_carries_diagnostics() {
        let content = Arc::new(StubContent::new());
        let gw = gateway_with(local_config(), content);
        let resp = gw.serve(get("/lodash@4.17.21/package.json")).await.unwrap();
        assert_eq!(resp.headers().get("x-compress-hint").unwrap(), "on");
        assert_eq!(
            resp.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
        assert!(resp.headers().get(cache::SERVER_TIMING).is_some());
    }

    #[tokio::test]
    async fn deployed_gateway_serves_second_request_from_cache() {
        let content = Arc::new(StubContent::new());
        let gw = gateway_with(deployed_config(), content.clone());

        let first = gw.serve(get("/lodash@4.17.21/package.json")).await.unwrap();
        let first_body = body_string(first).await;
        // let the background cache writes drain
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let second = gw.serve(get("/lodash@4.17.21/package.json")).await.unwrap();
        let hit_marker = second
            .headers()
            .get_all(cache::SERVER_TIMING)
            .iter()
            .any(|v| v.to_str().unwrap().contains("hit-state;desc=hit"));
        assert!(hit_marker);
        assert_eq!(body_string(second).await, first_body);
        assert_eq!(content.calls(), vec!["file"]);
    }

    #[tokio::test]
    async fn local_gateway_never_caches() {
        let content = Arc::new(StubContent::new());
        let gw = gateway_with(local_config(), content.clone());

        for _ in 0..2 {
            let resp = gw.serve(get("/lodash@4.17.21/package.json")).await.unwrap();
            let has_hit_state = resp
                .headers()
                .get_all(cache::SERVER_TIMING)
                .iter()
                .any(|v| v.to_str().unwrap().contains("hit-state"));
            assert!(!has_hit_state);
        }
        assert_eq!(content.calls(), vec!["file", "file"]);
    }
}
