//! Response enrichment
//!
//! Every response leaving the gateway gets trailing diagnostics appended:
//! timing, execution-location identity, a compression hint, the h3
//! advertisement, and the CORS grant. These are appended, never inserted,
//! so markers set by inner stages (the cache hit/miss state in
//! particular) survive.

use anyhow::Result;
use rama::http::{HeaderValue, header::HeaderMap};

use crate::config::EdgeConfig;

use super::cache::SERVER_TIMING;
use super::types::RequestContext;

const ALT_SVC: &str = "h3=\":443\";ma=86400,h3-29=\":443\";ma=86400,h3-27=\":443\";ma=86400";

pub fn append_diagnostics(
    headers: &mut HeaderMap,
    ctx: &RequestContext,
    edge: &EdgeConfig,
) -> Result<()> {
    headers.append(
        SERVER_TIMING,
        HeaderValue::from_str(&format!("time-start-msec;dur={}", ctx.start_epoch_ms))?,
    );
    headers.append(
        SERVER_TIMING,
        HeaderValue::from_str(&format!(
            "time-elapsed;dur={}",
            ctx.start.elapsed().as_millis()
        ))?,
    );
    headers.append(
        SERVER_TIMING,
        HeaderValue::from_str(&format!(
            "edge-pop;desc={}",
            edge.pop.as_deref().unwrap_or("local")
        ))?,
    );
    if let Some(version) = edge.service_version.as_deref().filter(|v| !v.is_empty()) {
        headers.append("x-service-version", HeaderValue::from_str(version)?);
    }
    headers.append("x-compress-hint", HeaderValue::from_static("on"));
    headers.append(
        "x-trailer-server-timing",
        HeaderValue::from_static("rtt,timestamp,retrans"),
    );
    headers.append("alt-svc", HeaderValue::from_static(ALT_SVC));
    headers.append(
        "access-control-allow-origin",
        HeaderValue::from_static("*"),
    );
    Ok(())
}
