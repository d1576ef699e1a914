//! Legacy URL redirects
//!
//! Old URL shapes still arrive from long-lived embeds and bookmarks; they
//! get permanent redirects to their current form before any other routing
//! happens.

use anyhow::Result;
use rama::http::{Body, Response, StatusCode, Uri};

use super::response::redirect;

/// Redirect legacy URL shapes to their modern equivalents. Returns
/// `None` for URLs that need no rewriting.
///
/// Rules carried over from earlier releases:
/// - `/_meta/{rest}` -> `/{rest}?meta`
/// - a `json` query parameter is the old spelling of `meta`
pub fn check_legacy(uri: &Uri) -> Result<Option<Response<Body>>> {
    let path = uri.path();

    if let Some(rest) = path.strip_prefix("/_meta/") {
        return redirect(&format!("/{rest}?meta"), StatusCode::MOVED_PERMANENTLY).map(Some);
    }

    if let Some(query) = uri.query() {
        let mut saw_json = false;
        let rewritten: Vec<String> = query
            .split('&')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let key = part.split('=').next().unwrap_or(part);
                if key == "json" {
                    saw_json = true;
                    "meta".to_string()
                } else {
                    part.to_string()
                }
            })
            .collect();
        if saw_json {
            let location = format!("{}?{}", path, rewritten.join("&"));
            return redirect(&location, StatusCode::MOVED_PERMANENTLY).map(Some);
        }
    }

    Ok(None)
}
