use anyhow::{Result, anyhow};
use breaker_machines::CircuitBreaker;
use chrono_machines::{BackoffPolicy, ConstantBackoff, ExponentialBackoff, FibonacciBackoff};
use parking_lot::Mutex;
use rama::{
    Service,
    http::{
        Body, Method, Request, Response, Uri,
        body::util::BodyExt as _,
        client::EasyHttpWebClient,
        header::{HeaderMap, HeaderValue, USER_AGENT},
        layer::trace::TraceLayer,
    },
    layer::Layer,
};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{BackoffStrategy as ConfigBackoffStrategy, OriginConfig};

const UA: &str = concat!("lode/", env!("CARGO_PKG_VERSION"));

/// Rama-based origin HTTP client with retry, circuit breaker, and tracing.
#[derive(Clone)]
pub struct OriginClient {
    pub backoff: BackoffPolicy,
    pub breaker: Arc<Mutex<CircuitBreaker>>,
}

impl OriginClient {
    pub fn new(config: &OriginConfig) -> Result<Self> {
        // Open circuit after 5 server errors in 60s window, reset after 30s
        let breaker = CircuitBreaker::builder("content_origin")
            .failure_threshold(5)
            .failure_window_secs(60.0)
            .half_open_timeout_secs(30.0)
            .success_threshold(2)
            .jitter_factor(0.1)
            .on_open(|name| {
                warn!(circuit = %name, "Circuit breaker opened - origin is failing");
            })
            .on_close(|name| {
                info!(circuit = %name, "Circuit breaker closed - origin recovered");
            })
            .on_half_open(|name| {
                info!(circuit = %name, "Circuit breaker half-open - testing origin");
            })
            .build();

        let retry = &config.reliability.retry;
        let max_delay_ms = retry.max_backoff_secs * 1000;
        let jitter = retry.jitter_factor;
        let max_attempts = retry.max_attempts as u8;

        let backoff: BackoffPolicy = match retry.backoff_strategy {
            ConfigBackoffStrategy::Exponential => ExponentialBackoff::new()
                .base_delay_ms(retry.initial_backoff_ms)
                .max_delay_ms(max_delay_ms)
                .max_attempts(max_attempts)
                .jitter_factor(jitter)
                .into(),
            ConfigBackoffStrategy::Fibonacci => FibonacciBackoff::new()
                .base_delay_ms(retry.initial_backoff_ms)
                .max_delay_ms(max_delay_ms)
                .max_attempts(max_attempts)
                .jitter_factor(jitter)
                .into(),
            ConfigBackoffStrategy::Constant => ConstantBackoff::new()
                .delay_ms(retry.initial_backoff_ms)
                .max_attempts(max_attempts)
                .jitter_factor(jitter)
                .into(),
        };

        info!(
            strategy = ?retry.backoff_strategy,
            max_attempts = max_attempts,
            "Origin client initialized",
        );

        Ok(Self {
            backoff,
            breaker: Arc::new(Mutex::new(breaker)),
        })
    }

    pub async fn get_with_headers(&self, url: Uri, headers: &HeaderMap) -> Result<Response<Body>> {
        if self.breaker.lock().is_open() {
            return Err(anyhow!(
                "Circuit breaker is open - origin is currently unavailable"
            ));
        }

        let client = (TraceLayer::new_for_http(),).into_layer(EasyHttpWebClient::default());
        let mut attempt: u8 = 0;
        let mut rng = SmallRng::from_os_rng();
        let start_time = std::time::Instant::now();
        let max_attempts = self.backoff.max_attempts();

        loop {
            attempt += 1;

            let mut builder = Request::builder().method(Method::GET).uri(url.clone());
            {
                let h = builder
                    .headers_mut()
                    .ok_or_else(|| anyhow!("cannot get headers mut"))?;
                for (name, value) in headers {
                    h.insert(name, value.clone());
                }
                h.insert(USER_AGENT, HeaderValue::from_static(UA));
            }

            let request = builder
                .body(Body::empty())
                .map_err(|e| anyhow!("building origin request: {e}"))?;

            match client.serve(request).await {
                Ok(response) if response.status().is_server_error() && attempt < max_attempts => {
                    if let Some(delay_ms) = self.backoff.delay(attempt, &mut rng) {
                        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    }
                    continue;
                }
                Ok(response) => {
                    let status = response.status();
                    let duration = start_time.elapsed().as_secs_f64();

                    // 4xx is the origin answering, not the origin failing
                    if status.is_server_error() {
                        let mut breaker = self.breaker.lock();
                        breaker.record_failure(duration);
                        breaker.check_and_trip();
                    } else {
                        self.breaker.lock().record_success(duration);
                    }

                    let resp_headers = response.headers().clone();
                    let body_bytes = response.into_body().collect().await?.to_bytes();

                    let mut builder = Response::builder().status(status);
                    {
                        let h = builder
                            .headers_mut()
                            .ok_or_else(|| anyhow!("cannot get headers mut"))?;
                        for (name, value) in resp_headers.iter() {
                            h.insert(name, value.clone());
                        }
                    }

                    return builder
                        .body(Body::from(body_bytes))
                        .map_err(|e| anyhow!("rebuilding origin response: {e}"));
                }
                Err(err) => {
                    let duration = start_time.elapsed().as_secs_f64();

                    if attempt >= max_attempts {
                        let mut breaker = self.breaker.lock();
                        breaker.record_failure(duration);
                        breaker.check_and_trip();
                        return Err(anyhow!("origin request failed: {err}"));
                    }

                    if let Some(delay_ms) = self.backoff.delay(attempt, &mut rng) {
                        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    }
                }
            }
        }
    }
}

/// One origin base URL a request path can be joined onto.
#[derive(Clone)]
pub struct OriginTarget {
    pub base: Uri,
}

impl OriginTarget {
    pub fn from_url(url: &Uri) -> Result<Self> {
        Ok(Self { base: url.clone() })
    }

    /// Join a request's path and query onto this origin's base URL,
    /// keeping any base path prefix the origin is mounted under.
    pub fn join(&self, uri: &Uri) -> Result<Uri> {
        let req_path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

        let base_path = self
            .base
            .path_and_query()
            .map(|pq| pq.path())
            .unwrap_or("/")
            .trim_end_matches('/');

        let (req_path, query) = match req_path_and_query.find('?') {
            Some(idx) => (&req_path_and_query[..idx], Some(&req_path_and_query[idx..])),
            None => (req_path_and_query, None),
        };

        let combined = if base_path.is_empty() || base_path == "/" {
            req_path.to_string()
        } else {
            format!("{}{}", base_path, req_path)
        };

        let full_path = match query {
            Some(q) => format!("{}{}", combined, q),
            None => combined,
        };

        let mut parts = self.base.clone().into_parts();
        parts.path_and_query = Some(
            full_path
                .parse()
                .map_err(|e| anyhow!("parse combined path '{full_path}': {e}"))?,
        );

        Uri::from_parts(parts).map_err(|e| anyhow!("joining origin path: {e}"))
    }
}
