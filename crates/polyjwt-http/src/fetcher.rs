use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::result::{ErrorCategory, ErrorDetail, HttpResult, HttpState};
use crate::retry::RetryStrategy;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// Parse a URL the way every remote loader needs to: reject anything
/// that isn't absolute `http(s)`.
pub fn parse_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(FetchError::InvalidUrl(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }
    Ok(url)
}

#[derive(Clone)]
struct CachedBody<T> {
    content: T,
    etag: Option<String>,
    max_age: Option<Duration>,
}

/// Parse the `max-age` directive out of a `Cache-Control` header value.
/// Unrecognized or malformed headers are treated as absent rather than an
/// error — a TTL hint is advisory, never load-bearing.
fn parse_max_age(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get(reqwest::header::CACHE_CONTROL)?.to_str().ok()?;
    raw.split(',').find_map(|directive| {
        let (name, value) = directive.trim().split_once('=')?;
        if name.trim().eq_ignore_ascii_case("max-age") {
            value.trim().parse::<u64>().ok().map(Duration::from_secs)
        } else {
            None
        }
    })
}

/// Conditional-GET fetcher with a single-owner cache lock (spec §4.5).
///
/// `T` is the converted content type (e.g. a parsed JWKS document); the
/// `parse` closure converts response bytes to `T`. Concurrency: the cache
/// is guarded by a `parking_lot::RwLock` held only across the swap —
/// network I/O happens outside the lock, matching `oidc.rs`'s
/// `JwksCache`/`refresh_jwks_if_needed` shape.
pub struct ETagAwareFetcher<T> {
    url: Url,
    client: Client,
    retry: RetryStrategy,
    max_response_bytes: usize,
    parse: Arc<dyn Fn(&[u8]) -> Result<T, String> + Send + Sync>,
    cache: RwLock<Option<CachedBody<T>>>,
}

impl<T: Clone + Send + Sync + 'static> ETagAwareFetcher<T> {
    pub fn new(
        client: Client,
        url: Url,
        retry: RetryStrategy,
        max_response_bytes: usize,
        parse: impl Fn(&[u8]) -> Result<T, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            url,
            client,
            retry,
            max_response_bytes,
            parse: Arc::new(parse),
            cache: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The most recently cached content, if any, without triggering a
    /// fetch.
    #[must_use]
    pub fn cached_snapshot(&self) -> Option<T> {
        self.cache.read().as_ref().map(|c| c.content.clone())
    }

    /// The most recently observed `Cache-Control: max-age`, if the server
    /// has ever sent one.
    #[must_use]
    pub fn cached_max_age(&self) -> Option<Duration> {
        self.cache.read().as_ref().and_then(|c| c.max_age)
    }

    pub async fn load(&self) -> HttpResult<T> {
        self.load_cancellable(&CancellationToken::new()).await
    }

    pub async fn load_cancellable(&self, cancel: &CancellationToken) -> HttpResult<T> {
        let cached = self.cache.read().clone();
        let result = self
            .retry
            .execute(cancel, |_attempt| self.attempt_once(&cached))
            .await;
        self.reconcile_cache(result, cached)
    }

    async fn attempt_once(&self, cached: &Option<CachedBody<T>>) -> HttpResult<T> {
        let start = Instant::now();
        let mut req = self.client.get(self.url.clone());
        if let Some(c) = cached
            && let Some(etag) = &c.etag
        {
            req = req.header(reqwest::header::IF_NONE_MATCH, etag.clone());
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                let category = if e.is_timeout() {
                    ErrorCategory::Timeout
                } else {
                    ErrorCategory::Network
                };
                return HttpResult::error(
                    ErrorDetail {
                        category,
                        message: e.to_string(),
                    },
                    None,
                    start.elapsed(),
                );
            }
        };

        let status = resp.status();
        let etag = resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let max_age = parse_max_age(resp.headers());

        if status == StatusCode::NOT_MODIFIED {
            return match cached {
                Some(c) => HttpResult::cached(c.content.clone(), c.etag.clone(), start.elapsed())
                    .with_max_age(max_age.or(c.max_age)),
                None => HttpResult::error(
                    ErrorDetail {
                        category: ErrorCategory::InvalidContent,
                        message: "304 Not Modified with no cached snapshot".into(),
                    },
                    Some(304),
                    start.elapsed(),
                ),
            };
        }

        if let Some(len) = resp.content_length()
            && len as usize > self.max_response_bytes
        {
            return HttpResult::error(
                ErrorDetail {
                    category: ErrorCategory::InvalidContent,
                    message: format!("response size {len} exceeds limit"),
                },
                Some(status.as_u16()),
                start.elapsed(),
            );
        }

        if !status.is_success() {
            let category = if status.is_server_error() {
                ErrorCategory::Status5xx(status.as_u16())
            } else {
                ErrorCategory::Status4xx(status.as_u16())
            };
            return HttpResult::error(
                ErrorDetail {
                    category,
                    message: format!("unexpected status {status}"),
                },
                Some(status.as_u16()),
                start.elapsed(),
            );
        }

        let bytes = match resp.bytes().await {
            Ok(b) => b,
            Err(e) => {
                return HttpResult::error(
                    ErrorDetail {
                        category: ErrorCategory::Network,
                        message: e.to_string(),
                    },
                    Some(status.as_u16()),
                    start.elapsed(),
                );
            }
        };
        if bytes.len() > self.max_response_bytes {
            return HttpResult::error(
                ErrorDetail {
                    category: ErrorCategory::InvalidContent,
                    message: format!("response size {} exceeds limit", bytes.len()),
                },
                Some(status.as_u16()),
                start.elapsed(),
            );
        }

        match (self.parse)(&bytes) {
            Ok(content) => HttpResult::fresh(content, etag, start.elapsed()).with_max_age(max_age),
            Err(message) => HttpResult::error(
                ErrorDetail {
                    category: ErrorCategory::InvalidContent,
                    message,
                },
                Some(status.as_u16()),
                start.elapsed(),
            ),
        }
    }

    fn reconcile_cache(&self, result: HttpResult<T>, cached: Option<CachedBody<T>>) -> HttpResult<T> {
        match result.state {
            HttpState::Fresh => {
                if let Some(content) = &result.content {
                    *self.cache.write() = Some(CachedBody {
                        content: content.clone(),
                        etag: result.etag.clone(),
                        max_age: result.max_age,
                    });
                }
                result
            }
            HttpState::Recovered if result.http_status == Some(200) => {
                if let Some(content) = &result.content {
                    *self.cache.write() = Some(CachedBody {
                        content: content.clone(),
                        etag: result.etag.clone(),
                        max_age: result.max_age,
                    });
                }
                result
            }
            HttpState::Cached if result.max_age.is_some() => {
                if let Some(content) = &result.content {
                    let etag = self
                        .cache
                        .read()
                        .as_ref()
                        .and_then(|c| c.etag.clone())
                        .or_else(|| result.etag.clone());
                    *self.cache.write() = Some(CachedBody {
                        content: content.clone(),
                        etag,
                        max_age: result.max_age,
                    });
                }
                result
            }
            HttpState::Cached | HttpState::Recovered => result,
            HttpState::Error | HttpState::Stale => match cached {
                Some(c) => {
                    let mut stale = HttpResult::stale(c.content, c.etag, result.http_status, result.response_time)
                        .with_max_age(c.max_age);
                    stale.detail = result.detail;
                    stale.retry_metrics = result.retry_metrics;
                    stale
                }
                None => result,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryConfig;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_retry() -> RetryStrategy {
        RetryStrategy::new(RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_factor: 0.0,
            max_attempts: 3,
            ..RetryConfig::default()
        })
    }

    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn fresh_then_cached_on_etag_match() {
        let hits = Arc::new(AtomicU32::new(0));
        let hits_clone = hits.clone();
        let app = Router::new().route(
            "/jwks",
            get(move |headers: axum::http::HeaderMap| {
                let hits = hits_clone.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    if headers
                        .get("if-none-match")
                        .and_then(|v| v.to_str().ok())
                        == Some("\"v1\"")
                    {
                        axum::http::Response::builder()
                            .status(304)
                            .body(axum::body::Body::empty())
                            .unwrap()
                    } else {
                        axum::http::Response::builder()
                            .status(200)
                            .header("etag", "\"v1\"")
                            .body(axum::body::Body::from("{\"ok\":true}"))
                            .unwrap()
                    }
                }
            }),
        );
        let base = spawn_server(app).await;
        let url = parse_url(&format!("{base}/jwks")).unwrap();

        let fetcher = ETagAwareFetcher::new(
            Client::new(),
            url,
            fast_retry(),
            1024 * 1024,
            |bytes| Ok(String::from_utf8_lossy(bytes).to_string()),
        );

        let first = fetcher.load().await;
        assert_eq!(first.state, HttpState::Fresh);
        let second = fetcher.load().await;
        assert_eq!(second.state, HttpState::Cached);
        assert_eq!(first.content, second.content);
    }

    #[tokio::test]
    async fn stale_served_when_all_attempts_fail_after_prior_success() {
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fail_clone = fail.clone();
        let app = Router::new().route(
            "/jwks",
            get(move || {
                let fail = fail_clone.clone();
                async move {
                    if fail.load(Ordering::SeqCst) {
                        axum::http::StatusCode::SERVICE_UNAVAILABLE
                    } else {
                        axum::http::StatusCode::OK
                    }
                }
            }),
        );
        let base = spawn_server(app).await;
        let url = parse_url(&format!("{base}/jwks")).unwrap();
        let fetcher = ETagAwareFetcher::new(
            Client::new(),
            url,
            fast_retry(),
            1024,
            |bytes| Ok(bytes.len()),
        );

        let first = fetcher.load().await;
        assert_eq!(first.state, HttpState::Fresh);

        fail.store(true, Ordering::SeqCst);
        let second = fetcher.load().await;
        assert_eq!(second.state, HttpState::Stale);
        assert_eq!(second.content, first.content);
    }

    #[tokio::test]
    async fn cache_control_max_age_is_captured() {
        let app = Router::new().route(
            "/jwks",
            get(|| async {
                axum::http::Response::builder()
                    .status(200)
                    .header("cache-control", "max-age=30, must-revalidate")
                    .body(axum::body::Body::from("{\"ok\":true}"))
                    .unwrap()
            }),
        );
        let base = spawn_server(app).await;
        let url = parse_url(&format!("{base}/jwks")).unwrap();
        let fetcher = ETagAwareFetcher::new(
            Client::new(),
            url,
            fast_retry(),
            1024,
            |bytes| Ok(String::from_utf8_lossy(bytes).to_string()),
        );

        let result = fetcher.load().await;
        assert_eq!(result.max_age, Some(Duration::from_secs(30)));
        assert_eq!(fetcher.cached_max_age(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn parse_max_age_ignores_unrelated_directives() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::CACHE_CONTROL, "no-cache".parse().unwrap());
        assert_eq!(parse_max_age(&headers), None);
    }
}
