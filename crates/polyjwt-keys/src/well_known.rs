use polyjwt_http::{parse_url, ETagAwareFetcher, HttpState, RetryStrategy};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::KeysError;

#[derive(Clone)]
pub struct DiscoveryDoc {
    pub issuer: String,
    pub jwks_uri: Url,
}

#[derive(Deserialize)]
struct RawDiscoveryDoc {
    issuer: Option<String>,
    jwks_uri: Option<String>,
}

fn parse_discovery_doc(bytes: &[u8]) -> Result<DiscoveryDoc, String> {
    let raw: RawDiscoveryDoc =
        serde_json::from_slice(bytes).map_err(|e| format!("invalid JSON: {e}"))?;
    let issuer = raw.issuer.ok_or_else(|| "missing field 'issuer'".to_string())?;
    let jwks_uri_raw = raw
        .jwks_uri
        .ok_or_else(|| "missing field 'jwks_uri'".to_string())?;
    let jwks_uri =
        parse_url(&jwks_uri_raw).map_err(|e| format!("invalid 'jwks_uri': {e}"))?;
    Ok(DiscoveryDoc { issuer, jwks_uri })
}

/// The issuer URL a discovery document's `issuer` claim is expected to
/// match: the well-known URL with `/.well-known/openid-configuration` (or
/// similar suffix) and any trailing slash stripped. `WellKnownLoader` also
/// uses this to know its issuer identifier synchronously, before discovery
/// has necessarily succeeded even once (`validate` rejects any document
/// whose `issuer` doesn't match it, so the two can never disagree).
pub(crate) fn expected_issuer(well_known_url: &Url) -> String {
    let s = well_known_url.as_str();
    let trimmed = s
        .split("/.well-known/")
        .next()
        .unwrap_or(s)
        .trim_end_matches('/');
    trimmed.to_string()
}

/// Resolves and validates an OpenID Connect / OAuth 2.0 discovery document
/// (spec §4.9 `WellKnownResolver`). Wraps its own
/// [`ETagAwareFetcher`](polyjwt_http::ETagAwareFetcher) independent of any
/// loader built on top of it — no back-pointers, no shared fetcher
/// instance.
pub struct WellKnownResolver {
    well_known_url: Url,
    fetcher: ETagAwareFetcher<DiscoveryDoc>,
}

impl WellKnownResolver {
    #[must_use]
    pub fn new(client: Client, well_known_url: Url, retry: RetryStrategy) -> Self {
        let fetcher = ETagAwareFetcher::new(
            client,
            well_known_url.clone(),
            retry,
            1024 * 1024,
            |bytes| parse_discovery_doc(bytes),
        );
        Self {
            well_known_url,
            fetcher,
        }
    }

    #[must_use]
    pub fn well_known_url(&self) -> &Url {
        &self.well_known_url
    }

    /// Fetch (or serve a cached copy of) the discovery document and
    /// validate it: `issuer` and `jwks_uri` are both required, and
    /// `issuer` must match the origin this resolver was constructed with.
    pub async fn resolve(&self) -> Result<DiscoveryDoc, KeysError> {
        let result = self.fetcher.load().await;
        match result.state {
            HttpState::Fresh | HttpState::Cached | HttpState::Recovered => {
                let doc = result.content.expect("non-error state carries content");
                self.validate(&doc)?;
                Ok(doc)
            }
            HttpState::Stale | HttpState::Error => {
                let message = result
                    .detail
                    .map(|d| d.message)
                    .unwrap_or_else(|| "well-known document unavailable".to_string());
                // `parse_discovery_doc` phrases its own failure this way;
                // anything else (network, timeout, bad status) is a
                // transport-level unavailability, not a document defect.
                if message.starts_with("missing field") {
                    Err(KeysError::WellKnownMissingField(message))
                } else {
                    Err(KeysError::WellKnownUnavailable(message))
                }
            }
        }
    }

    fn validate(&self, doc: &DiscoveryDoc) -> Result<(), KeysError> {
        let expected = expected_issuer(&self.well_known_url);
        if doc.issuer.trim_end_matches('/') != expected {
            return Err(KeysError::WellKnownIssuerMismatch {
                expected,
                actual: doc.issuer.clone(),
            });
        }
        Ok(())
    }
}
