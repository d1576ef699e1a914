//! Origin-backed content source
//!
//! Production deployments put this gateway at the edge in front of an
//! origin application that resolves package files, renders metadata
//! documents, module rewrites, and the browse UI. Every content call here
//! forwards the validated request to that origin and passes its response
//! through untouched, tagged with the classified route mode so the origin
//! can skip its own classification.

use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use async_trait::async_trait;
use rama::http::{
    Body, Response, StatusCode, Uri,
    body::util::BodyExt,
    header::{self, HeaderMap, HeaderValue},
};
use tracing::{debug, warn};

use crate::config::Config;
use crate::content::ContentSource;
use crate::gateway::classify::RouteMode;
use crate::gateway::response::respond_html;
use crate::gateway::types::PackagePathname;
use crate::upstream::{OriginClient, OriginTarget};

pub struct OriginContentSource {
    config: Arc<Config>,
    client: OriginClient,
    origins: Vec<OriginTarget>,
}

impl OriginContentSource {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let mut origins = vec![OriginTarget::from_url(&config.origin.url)?];
        for url in &config.origin.fallback_urls {
            origins.push(OriginTarget::from_url(url)?);
        }
        let client = OriginClient::new(&config.origin).context("building origin client")?;
        Ok(Self {
            config,
            client,
            origins,
        })
    }

    async fn forward(
        &self,
        pkg: &PackagePathname,
        uri: &Uri,
        mode: RouteMode,
    ) -> Result<Response<Body>> {
        debug!(package = %pkg.spec(), mode = %mode, "forwarding to content origin");

        let mut headers = HeaderMap::new();
        headers.insert("x-route-mode", HeaderValue::from_str(&mode.to_string())?);

        let mut last_err: Option<anyhow::Error> = None;
        for origin in &self.origins {
            let target = origin
                .join(uri)
                .with_context(|| format!("constructing origin url for {}", origin.base))?;

            match self.client.get_with_headers(target.clone(), &headers).await {
                Ok(resp) if resp.status().is_server_error() => {
                    warn!(origin = %target, status = %resp.status(), "origin returned error status");
                    last_err = Some(anyhow!("{target} returned {}", resp.status()));
                    continue;
                }
                Ok(resp) => return forward_response(resp).await,
                Err(err) => {
                    last_err = Some(anyhow!("{target} failed: {err}"));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("no content origin configured")))
    }
}

#[async_trait]
impl ContentSource for OriginContentSource {
    async fn main_page(&self) -> Result<Response<Body>> {
        let body = render_main_page(&self.config);
        respond_html(StatusCode::OK, body)
    }

    async fn file(&self, pkg: &PackagePathname, uri: &Uri) -> Result<Response<Body>> {
        self.forward(pkg, uri, RouteMode::File).await
    }

    async fn module(&self, pkg: &PackagePathname, uri: &Uri) -> Result<Response<Body>> {
        self.forward(pkg, uri, RouteMode::Module).await
    }

    async fn file_metadata(&self, pkg: &PackagePathname, uri: &Uri) -> Result<Response<Body>> {
        self.forward(pkg, uri, RouteMode::MetaFile).await
    }

    async fn directory_metadata(
        &self,
        pkg: &PackagePathname,
        uri: &Uri,
    ) -> Result<Response<Body>> {
        self.forward(pkg, uri, RouteMode::MetaDirectory).await
    }

    async fn file_browser(&self, pkg: &PackagePathname, uri: &Uri) -> Result<Response<Body>> {
        self.forward(pkg, uri, RouteMode::BrowseFile).await
    }

    async fn directory_browser(
        &self,
        pkg: &PackagePathname,
        uri: &Uri,
    ) -> Result<Response<Body>> {
        self.forward(pkg, uri, RouteMode::BrowseDirectory).await
    }
}

/// Rebuild an origin response around a fully buffered body, dropping the
/// hop-by-hop transfer-encoding header.
async fn forward_response(response: Response<Body>) -> Result<Response<Body>> {
    let status = response.status();
    let mut builder = Response::builder().status(status);
    {
        let headers = builder
            .headers_mut()
            .ok_or_else(|| anyhow!("failed to get headers for response build"))?;
        for (name, value) in response.headers().iter() {
            if name == header::TRANSFER_ENCODING {
                continue;
            }
            headers.insert(name, value.clone());
        }
    }

    let body = Body::from(
        response
            .into_body()
            .collect()
            .await
            .context("reading forwarded origin body")?
            .to_bytes(),
    );
    builder.body(body).context("building forwarded response")
}

fn render_main_page(config: &Config) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>lode</title>
    <style>
      :root {{
        color-scheme: light dark;
        --bg: #0f1117;
        --fg: #f4f6ff;
        --accent: #3f8cff;
      }}
      @media (prefers-color-scheme: light) {{
        :root {{
          --bg: #f9fbff;
          --fg: #1b2130;
          --accent: #2563eb;
        }}
      }}
      body {{
        margin: 0;
        min-height: 100vh;
        display: flex;
        align-items: center;
        justify-content: center;
        background: var(--bg);
        color: var(--fg);
        font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", sans-serif;
      }}
      main {{
        max-width: 640px;
        padding: 3rem;
      }}
      h1 {{
        font-size: 2.25rem;
        margin: 0 0 1rem;
      }}
      code {{
        display: inline-block;
        padding: 0.2rem 0.45rem;
        border-radius: 8px;
        background: color-mix(in srgb, var(--bg) 70%, var(--fg) 30%);
        font-size: 0.95rem;
      }}
      a {{
        color: var(--accent);
        text-decoration: none;
        font-weight: 600;
      }}
    </style>
  </head>
  <body>
    <main>
      <h1>lode</h1>
      <p>
        Fast, global content delivery for everything on the npm registry,
        served from <code>http://{host}:{port}</code>.
      </p>
      <p>Fetch any file from any package:</p>
      <p><code>/:package@:version/:file</code></p>
      <p>
        Append <code>?meta</code> for file metadata, <code>?module</code>
        for a bare-import rewrite, or start at
        <a href="/browse/">/browse/</a> to explore packages interactively.
      </p>
    </main>
  </body>
</html>
"#,
        host = config.server.host,
        port = config.server.port
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rama::http::header;

    #[tokio::test]
    async fn forward_response_strips_transfer_encoding() {
        let origin_resp = Response::builder()
            .status(StatusCode::OK)
            .header(header::TRANSFER_ENCODING, "chunked")
            .header(header::CONTENT_TYPE, "application/javascript")
            .body(Body::from("module.exports = 1;"))
            .unwrap();

        let forwarded = forward_response(origin_resp).await.unwrap();
        assert!(forwarded.headers().get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(
            forwarded.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/javascript"
        );
    }

    #[test]
    fn main_page_mentions_the_bind_address() {
        let config = Config::default();
        let body = render_main_page(&config);
        assert!(body.contains(&config.server.host));
        assert!(body.contains("?meta"));
    }
}
