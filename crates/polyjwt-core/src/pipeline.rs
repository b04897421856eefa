use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use polyjwt_keys::{SignatureEngine, SignatureError};
use polyjwt_metrics::{EventType, SecurityEventCounter};

use crate::claims::ClaimsView;
use crate::content::TokenType;
use crate::error::{fail, ValidationResult};
use crate::issuer::IssuerConfig;
use crate::monitor::HttpMetricsMonitor;
use crate::parser::DecodedJwt;

/// Maximum leeway this library will ever apply to `nbf`/`iat`, never to
/// `exp` (spec §4.10 "Leeway policy").
pub const MAX_CLOCK_LEEWAY: Duration = Duration::from_secs(60);

/// Stages 5-13 of the validation pipeline, bound to one issuer (spec
/// §4.10). Stages 1-4 (size/segment/base64/JSON decode) run once, before
/// issuer resolution, in [`crate::validator::TokenValidator`] — they don't
/// yet know which issuer's preferences apply.
pub struct ValidationPipeline {
    issuer: IssuerConfig,
    engine: SignatureEngine,
    events: Arc<SecurityEventCounter>,
    monitor: Option<Arc<HttpMetricsMonitor>>,
    clock_leeway: Duration,
}

impl ValidationPipeline {
    #[must_use]
    pub fn new(
        issuer: IssuerConfig,
        events: Arc<SecurityEventCounter>,
        monitor: Option<Arc<HttpMetricsMonitor>>,
    ) -> Self {
        let engine = SignatureEngine::new(issuer.algorithm_preferences.iter().copied());
        Self {
            issuer,
            engine,
            events,
            monitor,
            clock_leeway: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_clock_leeway(mut self, leeway: Duration) -> Self {
        self.clock_leeway = leeway.min(MAX_CLOCK_LEEWAY);
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &IssuerConfig {
        &self.issuer
    }

    /// Run stages 5-13 against an already-decoded token, returning a
    /// lazily-mapped claims view on success (stage 14's materialization
    /// happens in the caller, which knows the concrete content type).
    pub async fn validate(&self, decoded: &DecodedJwt, token_type: TokenType) -> ValidationResult<ClaimsView> {
        let _timer = self.monitor.as_ref().map(|m| m.start("pipeline.validate"));

        if decoded.header.get("crit").is_some() {
            return Err(self.fail(EventType::Malformed, "unsupported crit header extension"));
        }

        let typ = decoded.header.get("typ").and_then(|v| v.as_str());
        let allowed_typ = token_type.allowed_typ();
        if let Some(t) = typ
            && !allowed_typ.is_empty()
            && !allowed_typ.contains(&t)
        {
            return Err(self.fail(EventType::WrongTyp, format!("unexpected typ '{t}'")));
        }

        let alg_header = decoded
            .header
            .get("alg")
            .and_then(|v| v.as_str())
            .ok_or_else(|| self.fail(EventType::Malformed, "missing alg header"))?;

        let kid = decoded.header.get("kid").and_then(|v| v.as_str());

        let candidates = self.issuer.jwks_loader.get_key(kid).await;
        if candidates.is_empty() {
            return Err(self.fail(EventType::KeyNotFound, "no key matched this token's kid"));
        }

        let mut last_signature_error = None;
        let mut verified = false;
        for key in &candidates {
            match self
                .engine
                .verify(alg_header, &decoded.signing_input, &decoded.signature_bytes, key)
            {
                Ok(()) => {
                    verified = true;
                    break;
                }
                Err(e) => last_signature_error = Some(e),
            }
        }
        if !verified {
            return Err(self.signature_failure(last_signature_error, alg_header));
        }

        let now = unix_now();
        let leeway = self.clock_leeway.as_secs() as i64;

        let exp = decoded
            .payload
            .get("exp")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| self.fail(EventType::MissingClaim, "missing exp claim"))?;
        if exp <= now {
            return Err(self.fail(EventType::TokenExpired, "token has expired"));
        }
        if let Some(nbf) = decoded.payload.get("nbf").and_then(|v| v.as_i64())
            && nbf > now + leeway
        {
            return Err(self.fail(EventType::NotYetValid, "token is not yet valid"));
        }
        if let Some(iat) = decoded.payload.get("iat").and_then(|v| v.as_i64())
            && iat > now + leeway
        {
            return Err(self.fail(EventType::IssuedInFuture, "token was issued in the future"));
        }

        if !self.issuer.expected_audience.is_empty() {
            let token_audiences = extract_strings(decoded.payload.get("aud"));
            let intersects = token_audiences
                .iter()
                .any(|aud| self.issuer.expected_audience.contains(aud));
            if !intersects {
                return Err(self.fail(EventType::AudienceMismatch, "audience does not match"));
            }
        }

        if let Some(expected_client) = &self.issuer.expected_client_id {
            let actual = decoded
                .payload
                .get("azp")
                .and_then(|v| v.as_str())
                .or_else(|| decoded.payload.get("client_id").and_then(|v| v.as_str()));
            if actual != Some(expected_client.as_str()) {
                return Err(self.fail(EventType::ClientIdMismatch, "client id does not match"));
            }
        }

        for claim in token_type.mandatory_claims() {
            if decoded.payload.get(*claim).is_none() {
                return Err(self.fail(
                    EventType::MissingClaim,
                    format!("missing required claim '{claim}'"),
                ));
            }
        }
        if token_type == TokenType::Access {
            if decoded.payload.get("aud").is_none() && decoded.payload.get("azp").is_none() {
                return Err(self.fail(EventType::MissingClaim, "missing aud or azp"));
            }
            if decoded.payload.get("scope").is_none() && decoded.payload.get("scp").is_none() {
                return Err(self.fail(EventType::MissingClaim, "missing scope or scp"));
            }
        }

        Ok(ClaimsView::new(decoded.payload.clone(), self.issuer.claim_mappers.clone()))
    }

    fn fail(&self, event_type: EventType, message: impl Into<String>) -> crate::error::ValidationError {
        fail(&self.events, event_type, message)
    }

    fn signature_failure(
        &self,
        last: Option<SignatureError>,
        alg_header: &str,
    ) -> crate::error::ValidationError {
        match last {
            Some(SignatureError::NoneOrHmacRejected) => {
                self.fail(EventType::AlgorithmNoneRejected, "alg 'none' or HMAC is never permitted")
            }
            Some(SignatureError::AlgorithmNotAllowed(_)) => self.fail(
                EventType::AlgorithmNotAllowed,
                format!("algorithm '{alg_header}' is not permitted for this issuer"),
            ),
            _ => self.fail(EventType::SignatureValidationFailed, "signature verification failed"),
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn extract_strings(value: Option<&serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
