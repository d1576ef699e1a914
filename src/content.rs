//! Content collaborators
//!
//! The gateway core decides *what* to produce but never produces content
//! itself: each terminal route mode maps to one call on [`ContentSource`].
//! The core passes the validated request through, does not retry, and does
//! not inspect what comes back.

mod origin;

use anyhow::Result;
use async_trait::async_trait;
use rama::http::{Body, Response, Uri};

use crate::gateway::types::PackagePathname;

pub use origin::OriginContentSource;

/// One method per terminal route mode. Implementations return a complete
/// response, or an error the dispatcher converts at its outer boundary.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn main_page(&self) -> Result<Response<Body>>;

    async fn file(&self, pkg: &PackagePathname, uri: &Uri) -> Result<Response<Body>>;

    async fn module(&self, pkg: &PackagePathname, uri: &Uri) -> Result<Response<Body>>;

    async fn file_metadata(&self, pkg: &PackagePathname, uri: &Uri) -> Result<Response<Body>>;

    async fn directory_metadata(&self, pkg: &PackagePathname, uri: &Uri)
    -> Result<Response<Body>>;

    async fn file_browser(&self, pkg: &PackagePathname, uri: &Uri) -> Result<Response<Body>>;

    async fn directory_browser(&self, pkg: &PackagePathname, uri: &Uri)
    -> Result<Response<Body>>;
}
