use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Mutex, RwLock};
use polyjwt_http::{ETagAwareFetcher, HttpState, RetryStrategy};
use polyjwt_metrics::{EventType, SecurityEventCounter};
use reqwest::Client;
use tokio::sync::RwLock as AsyncRwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::KeysError;
use crate::key::{parse_jwks_document, JwksSnapshot, KeyInfo};
use crate::well_known::{expected_issuer, WellKnownResolver};

/// Floor for both scheduled background refresh and kid-miss-triggered
/// eager refresh, so a flood of unknown `kid`s can't turn into a
/// self-inflicted denial of service against the JWKS endpoint.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// A JWKS source supplied directly by the embedding application, never
/// fetched over the network.
#[derive(Clone)]
pub struct InMemoryLoader {
    snapshot: JwksSnapshot,
}

impl InMemoryLoader {
    #[must_use]
    pub fn new(snapshot: JwksSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn from_jwks_json(bytes: &[u8]) -> Result<Self, KeysError> {
        Ok(Self {
            snapshot: parse_jwks_document(bytes)?,
        })
    }

    #[must_use]
    pub fn get_key(&self, kid: Option<&str>) -> Vec<KeyInfo> {
        self.snapshot.candidates(kid).into_iter().cloned().collect()
    }
}

/// A JWKS document read from the local filesystem and re-read whenever
/// its mtime changes. A parse failure on reload keeps serving the last
/// good snapshot rather than going dark.
pub struct FileLoader {
    path: PathBuf,
    state: RwLock<(JwksSnapshot, Option<SystemTime>)>,
}

impl FileLoader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KeysError> {
        let path = path.as_ref().to_path_buf();
        let (snapshot, mtime) = Self::read(&path)?;
        Ok(Self {
            path,
            state: RwLock::new((snapshot, mtime)),
        })
    }

    fn read(path: &Path) -> Result<(JwksSnapshot, Option<SystemTime>), KeysError> {
        let bytes = std::fs::read(path)
            .map_err(|e| KeysError::JwksParse(format!("reading {}: {e}", path.display())))?;
        let mtime = std::fs::metadata(path).ok().and_then(|m| m.modified().ok());
        let snapshot = parse_jwks_document(&bytes)?;
        Ok((snapshot, mtime))
    }

    fn reload_if_changed(&self) {
        let current_mtime = std::fs::metadata(&self.path).ok().and_then(|m| m.modified().ok());
        let needs_reload = {
            let state = self.state.read();
            current_mtime != state.1
        };
        if !needs_reload {
            return;
        }
        match Self::read(&self.path) {
            Ok((snapshot, mtime)) => {
                *self.state.write() = (snapshot, mtime);
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "keeping previous JWKS snapshot after reload failure");
            }
        }
    }

    #[must_use]
    pub fn get_key(&self, kid: Option<&str>) -> Vec<KeyInfo> {
        self.reload_if_changed();
        self.state
            .read()
            .0
            .candidates(kid)
            .into_iter()
            .cloned()
            .collect()
    }
}

/// A JWKS document fetched over HTTP, refreshed on a background interval
/// and eagerly (rate-limited) on a `kid` miss (spec §4.6, §5 background
/// task model).
pub struct HttpLoader {
    fetcher: Arc<ETagAwareFetcher<JwksSnapshot>>,
    events: Arc<SecurityEventCounter>,
    last_eager_refresh: Mutex<Instant>,
    background: JoinHandle<()>,
    cancel: CancellationToken,
}

impl HttpLoader {
    pub async fn connect(
        client: Client,
        url: Url,
        retry: RetryStrategy,
        events: Arc<SecurityEventCounter>,
        refresh_interval: Duration,
        max_response_bytes: usize,
    ) -> Self {
        let fetcher = Arc::new(ETagAwareFetcher::new(
            client,
            url,
            retry,
            max_response_bytes,
            |bytes: &[u8]| parse_jwks_document(bytes).map_err(|e| e.to_string()),
        ));

        let first = fetcher.load().await;
        if !matches!(first.state, HttpState::Fresh | HttpState::Recovered) {
            events.increment(EventType::JwksFetchFailed);
            tracing::warn!("initial JWKS load did not succeed; starting in a degraded state");
        }

        let refresh_interval = refresh_interval.max(MIN_REFRESH_INTERVAL);
        let cancel = CancellationToken::new();
        let background = {
            let fetcher = fetcher.clone();
            let events = events.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    // The configured interval is a ceiling: a server's
                    // Cache-Control max-age can shorten the next refresh
                    // (down to MIN_REFRESH_INTERVAL) but never lengthen it
                    // past what the caller asked for.
                    let next = fetcher
                        .cached_max_age()
                        .map(|hint| hint.clamp(MIN_REFRESH_INTERVAL, refresh_interval))
                        .unwrap_or(refresh_interval);
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(next) => {
                            let result = fetcher.load_cancellable(&cancel).await;
                            if matches!(result.state, HttpState::Error | HttpState::Stale) {
                                events.increment(EventType::JwksFetchFailed);
                            }
                        }
                    }
                }
            })
        };

        Self {
            fetcher,
            events,
            last_eager_refresh: Mutex::new(
                Instant::now()
                    .checked_sub(MIN_REFRESH_INTERVAL)
                    .unwrap_or_else(Instant::now),
            ),
            background,
            cancel,
        }
    }

    pub async fn get_key(&self, kid: Option<&str>) -> Vec<KeyInfo> {
        let snapshot = self.fetcher.cached_snapshot().unwrap_or_default();
        let candidates: Vec<KeyInfo> = snapshot
            .candidates(kid)
            .into_iter()
            .cloned()
            .collect();
        if !candidates.is_empty() || kid.is_none() {
            return candidates;
        }

        let should_refresh = {
            let mut last = self.last_eager_refresh.lock();
            if last.elapsed() >= MIN_REFRESH_INTERVAL {
                *last = Instant::now();
                true
            } else {
                false
            }
        };
        if !should_refresh {
            return candidates;
        }

        let result = self.fetcher.load().await;
        if matches!(result.state, HttpState::Error | HttpState::Stale) {
            self.events.increment(EventType::JwksFetchFailed);
        }
        let snapshot = self.fetcher.cached_snapshot().unwrap_or_default();
        snapshot.candidates(kid).into_iter().cloned().collect()
    }
}

impl Drop for HttpLoader {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.background.abort();
    }
}

/// Classifies a failed discovery attempt for metrics purposes. Anything
/// other than a document-shape problem is folded into `JwksFetchFailed`:
/// there's no dedicated "well-known unreachable" counter, and a transport
/// failure during discovery is the same kind of event as one during a
/// plain JWKS fetch.
fn classify_discovery_error(error: &KeysError) -> EventType {
    match error {
        KeysError::WellKnownMissingField(_) => EventType::WellKnownMissingField,
        KeysError::WellKnownIssuerMismatch { .. } => EventType::WellKnownIssuerMismatch,
        _ => EventType::JwksFetchFailed,
    }
}

/// Either not yet discovered, or discovered and delegating to an
/// [`HttpLoader`] pointed at the resolved `jwks_uri`.
enum WellKnownState {
    Pending,
    Ready(HttpLoader),
}

/// Resolves an OIDC discovery document, then delegates to an independent
/// [`HttpLoader`] pointed at the resolved `jwks_uri`. If discovery fails at
/// construction time the loader still starts — serving no keys — and keeps
/// retrying discovery in the background until it succeeds (spec §4.11:
/// "the validator still starts" even while degraded). The resolver and the
/// inner loader share nothing but the issuer string, known up front from
/// the well-known URL itself rather than from a resolved document (spec
/// §4.9 design notes: "no back-pointers").
pub struct WellKnownLoader {
    state: Arc<AsyncRwLock<WellKnownState>>,
    issuer: String,
    background: JoinHandle<()>,
    cancel: CancellationToken,
}

impl WellKnownLoader {
    pub async fn connect(
        client: Client,
        well_known_url: Url,
        retry: RetryStrategy,
        events: Arc<SecurityEventCounter>,
        refresh_interval: Duration,
        max_response_bytes: usize,
    ) -> Self {
        let issuer = expected_issuer(&well_known_url);
        let resolver = WellKnownResolver::new(client.clone(), well_known_url, retry.clone());

        let state = Arc::new(AsyncRwLock::new(WellKnownState::Pending));
        match resolver.resolve().await {
            Ok(doc) => {
                let inner = HttpLoader::connect(
                    client.clone(),
                    doc.jwks_uri,
                    retry.clone(),
                    events.clone(),
                    refresh_interval,
                    max_response_bytes,
                )
                .await;
                *state.write().await = WellKnownState::Ready(inner);
            }
            Err(e) => {
                events.increment(classify_discovery_error(&e));
                tracing::warn!(error = %e, "initial OIDC discovery did not succeed; starting in a degraded state");
            }
        }

        let cancel = CancellationToken::new();
        let background = {
            let state = state.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    if matches!(*state.read().await, WellKnownState::Ready(_)) {
                        break;
                    }
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(MIN_REFRESH_INTERVAL) => {
                            match resolver.resolve().await {
                                Ok(doc) => {
                                    let inner = HttpLoader::connect(
                                        client.clone(),
                                        doc.jwks_uri,
                                        retry.clone(),
                                        events.clone(),
                                        refresh_interval,
                                        max_response_bytes,
                                    )
                                    .await;
                                    *state.write().await = WellKnownState::Ready(inner);
                                    break;
                                }
                                Err(e) => {
                                    events.increment(classify_discovery_error(&e));
                                    tracing::warn!(error = %e, "retrying OIDC discovery");
                                }
                            }
                        }
                    }
                }
            })
        };

        Self {
            state,
            issuer,
            background,
            cancel,
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub async fn get_key(&self, kid: Option<&str>) -> Vec<KeyInfo> {
        match &*self.state.read().await {
            WellKnownState::Ready(inner) => inner.get_key(kid).await,
            WellKnownState::Pending => Vec::new(),
        }
    }
}

impl Drop for WellKnownLoader {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.background.abort();
    }
}

/// The four ways a `ValidationPipeline` can source key material (spec §3
/// data model, `JwksLoader` tagged union).
pub enum JwksLoader {
    InMemory(InMemoryLoader),
    File(FileLoader),
    Http(HttpLoader),
    WellKnown(WellKnownLoader),
}

impl JwksLoader {
    pub async fn get_key(&self, kid: Option<&str>) -> Vec<KeyInfo> {
        match self {
            Self::InMemory(l) => l.get_key(kid),
            Self::File(l) => l.get_key(kid),
            Self::Http(l) => l.get_key(kid).await,
            Self::WellKnown(l) => l.get_key(kid).await,
        }
    }
}
