use std::time::Duration;

/// Tri-state (really five-state) outcome of an HTTP operation (spec §3
/// `HttpResult<T>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpState {
    /// A new representation was fetched (HTTP 200).
    Fresh,
    /// The server confirmed the cached representation is still valid
    /// (HTTP 304), or an in-memory snapshot was served without a network
    /// round-trip.
    Cached,
    /// Every attempt failed, but a previous snapshot is still available.
    Stale,
    /// A prior attempt failed but a later attempt in the same retry loop
    /// succeeded.
    Recovered,
    /// Every attempt failed and no usable snapshot exists.
    Error,
}

/// Why an attempt failed, used by [`RetryStrategy`](crate::RetryStrategy)
/// to decide retryability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Timeout,
    Status4xx(u16),
    Status5xx(u16),
    InvalidContent,
    Interrupted,
}

impl ErrorCategory {
    /// 5xx, network errors, timeouts, and 408/429 are retryable; other
    /// 4xx responses and content errors are not (spec §4.4).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorCategory::Network | ErrorCategory::Timeout => true,
            ErrorCategory::Status5xx(_) => true,
            ErrorCategory::Status4xx(408 | 429) => true,
            ErrorCategory::Status4xx(_) => false,
            ErrorCategory::InvalidContent | ErrorCategory::Interrupted => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub category: ErrorCategory,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryMetrics {
    pub attempts: u32,
    pub total_elapsed: Duration,
}

/// Result of one logical HTTP operation (itself possibly composed of
/// several retried attempts).
///
/// Invariant: `state == Error` if and only if `content` is `None`.
#[derive(Debug, Clone)]
pub struct HttpResult<T> {
    pub state: HttpState,
    pub content: Option<T>,
    pub etag: Option<String>,
    /// `Cache-Control: max-age` from the response, if present (spec §2
    /// supplement: Cache-Control-aware JWKS TTL). `None` means the server
    /// expressed no preference; the loader falls back to its configured
    /// refresh interval.
    pub max_age: Option<Duration>,
    pub http_status: Option<u16>,
    pub detail: Option<ErrorDetail>,
    pub retry_metrics: Option<RetryMetrics>,
    pub response_time: Duration,
}

impl<T> HttpResult<T> {
    #[must_use]
    pub fn fresh(content: T, etag: Option<String>, response_time: Duration) -> Self {
        Self {
            state: HttpState::Fresh,
            content: Some(content),
            etag,
            max_age: None,
            http_status: Some(200),
            detail: None,
            retry_metrics: None,
            response_time,
        }
    }

    #[must_use]
    pub fn cached(content: T, etag: Option<String>, response_time: Duration) -> Self {
        Self {
            state: HttpState::Cached,
            content: Some(content),
            etag,
            max_age: None,
            http_status: Some(304),
            detail: None,
            retry_metrics: None,
            response_time,
        }
    }

    #[must_use]
    pub fn stale(
        content: T,
        etag: Option<String>,
        http_status: Option<u16>,
        response_time: Duration,
    ) -> Self {
        Self {
            state: HttpState::Stale,
            content: Some(content),
            etag,
            max_age: None,
            http_status,
            detail: None,
            retry_metrics: None,
            response_time,
        }
    }

    #[must_use]
    pub fn error(detail: ErrorDetail, http_status: Option<u16>, response_time: Duration) -> Self {
        Self {
            state: HttpState::Error,
            content: None,
            etag: None,
            max_age: None,
            http_status,
            detail: Some(detail),
            retry_metrics: None,
            response_time,
        }
    }

    /// Attach a parsed `Cache-Control: max-age` to an otherwise-built
    /// result.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// True if this result's category (if any) is one the retry strategy
    /// should retry.
    #[must_use]
    pub(crate) fn is_retryable(&self) -> bool {
        self.detail
            .as_ref()
            .is_some_and(|d| d.category.is_retryable())
    }

    /// Promote a successful final attempt to `Recovered` after earlier
    /// attempts failed, annotating it with retry metrics.
    pub(crate) fn promote_recovered(&mut self, metrics: RetryMetrics) {
        if matches!(self.state, HttpState::Fresh | HttpState::Cached) {
            self.state = HttpState::Recovered;
        }
        self.retry_metrics = Some(metrics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_state_implies_no_content() {
        let result: HttpResult<()> = HttpResult::error(
            ErrorDetail {
                category: ErrorCategory::Network,
                message: "connection refused".into(),
            },
            None,
            Duration::from_millis(5),
        );
        assert_eq!(result.state, HttpState::Error);
        assert!(result.content.is_none());
    }

    #[test]
    fn retryable_categories() {
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::Timeout.is_retryable());
        assert!(ErrorCategory::Status5xx(503).is_retryable());
        assert!(ErrorCategory::Status4xx(429).is_retryable());
        assert!(ErrorCategory::Status4xx(408).is_retryable());
        assert!(!ErrorCategory::Status4xx(404).is_retryable());
        assert!(!ErrorCategory::InvalidContent.is_retryable());
        assert!(!ErrorCategory::Interrupted.is_retryable());
    }

    #[test]
    fn promote_recovered_only_applies_to_successful_states() {
        let mut stale: HttpResult<&str> =
            HttpResult::stale("old", None, Some(503), Duration::ZERO);
        stale.promote_recovered(RetryMetrics {
            attempts: 3,
            total_elapsed: Duration::from_secs(1),
        });
        assert_eq!(stale.state, HttpState::Stale);

        let mut fresh = HttpResult::fresh("new", None, Duration::ZERO);
        fresh.promote_recovered(RetryMetrics {
            attempts: 3,
            total_elapsed: Duration::from_secs(1),
        });
        assert_eq!(fresh.state, HttpState::Recovered);
        assert_eq!(fresh.retry_metrics.unwrap().attempts, 3);
    }
}
