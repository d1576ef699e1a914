use anyhow::Result;
use rama::http::{Body, Response, StatusCode, header};

/// Responds with plain text
pub fn respond_text(status: StatusCode, body: &str) -> Result<Response<Body>> {
    Response::builder()
        .status(status)
        .header(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        )
        .body(Body::from(body.to_owned()))
        .map_err(Into::into)
}

/// Responds with JSON content
pub fn respond_json(status: StatusCode, body: &str) -> Result<Response<Body>> {
    let mut builder = Response::builder().status(status);
    {
        let headers = builder
            .headers_mut()
            .expect("headers available while building response");
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json; charset=utf-8"),
        );
        headers.insert(
            header::CONTENT_LENGTH,
            header::HeaderValue::from_str(&body.len().to_string())?,
        );
    }
    builder
        .body(Body::from(body.to_owned()))
        .map_err(Into::into)
}

/// Responds with HTML content
pub fn respond_html(status: StatusCode, body: String) -> Result<Response<Body>> {
    Response::builder()
        .status(status)
        .header(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/html; charset=utf-8"),
        )
        .body(Body::from(body))
        .map_err(Into::into)
}

/// Responds with an empty-bodied redirect to `location`
pub fn redirect(location: &str, status: StatusCode) -> Result<Response<Body>> {
    Response::builder()
        .status(status)
        .header(header::LOCATION, header::HeaderValue::from_str(location)?)
        .body(Body::empty())
        .map_err(Into::into)
}

const FAVICON_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 32 32">
  <rect x="4" y="8" width="24" height="18" rx="3" fill="#3f8cff"/>
  <path d="M4 13h24" stroke="#0f1117" stroke-width="2"/>
  <path d="M12 8l4-4 4 4" fill="none" stroke="#3f8cff" stroke-width="2.5" stroke-linecap="round"/>
</svg>
"##;

/// Responds with the embedded favicon, cacheable for a year
pub fn respond_favicon() -> Result<Response<Body>> {
    let mut builder = Response::builder().status(StatusCode::OK);
    {
        let headers = builder
            .headers_mut()
            .expect("headers available while building response");
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("image/svg+xml"),
        );
        headers.insert(
            header::CACHE_CONTROL,
            header::HeaderValue::from_static("public, max-age=31536000"),
        );
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            header::HeaderValue::from_static("max-age=31536000; includeSubDomains; preload"),
        );
        headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            header::HeaderValue::from_static("nosniff"),
        );
    }
    builder
        .body(Body::from(FAVICON_SVG))
        .map_err(Into::into)
}
