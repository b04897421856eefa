use std::collections::HashMap;
use std::sync::Arc;

use polyjwt_metrics::{EventType, SecurityEventCounter};

use crate::content::{AccessTokenContent, IdTokenContent, RefreshTokenContent, TokenType};
use crate::error::{fail, ValidationResult};
use crate::issuer::IssuerConfig;
use crate::monitor::HttpMetricsMonitor;
use crate::parser::{self, ParserConfig};
use crate::pipeline::ValidationPipeline;

/// Public entry point (spec §4.11). Built once from a [`ParserConfig`]
/// and one or more [`IssuerConfig`]s; immutable and fully reentrant
/// afterward. Caches one [`ValidationPipeline`] per configured issuer.
pub struct TokenValidator {
    parser_config: ParserConfig,
    pipelines: HashMap<String, ValidationPipeline>,
    events: Arc<SecurityEventCounter>,
}

impl TokenValidator {
    /// Builds an immutable `issuer_identifier → ValidationPipeline` map.
    /// For `WellKnown`-backed issuers, construction of the underlying
    /// `IssuerConfig` (not this call) already blocked briefly on the
    /// first discovery load; if that discovery was degraded, the issuer
    /// is still registered and background refresh may heal it later.
    #[must_use]
    pub fn new(
        parser_config: ParserConfig,
        issuers: Vec<IssuerConfig>,
        events: Arc<SecurityEventCounter>,
        monitor: Option<Arc<HttpMetricsMonitor>>,
    ) -> Self {
        let pipelines = issuers
            .into_iter()
            .filter(|issuer| issuer.enabled)
            .map(|issuer| {
                let key = issuer.issuer_identifier.clone();
                (key, ValidationPipeline::new(issuer, events.clone(), monitor.clone()))
            })
            .collect();
        Self {
            parser_config,
            pipelines,
            events,
        }
    }

    pub async fn create_access_token(&self, raw: &str) -> ValidationResult<AccessTokenContent> {
        self.validate(raw, TokenType::Access).await.map(AccessTokenContent::new)
    }

    pub async fn create_id_token(&self, raw: &str) -> ValidationResult<IdTokenContent> {
        self.validate(raw, TokenType::Id).await.map(IdTokenContent::new)
    }

    pub async fn create_refresh_token(&self, raw: &str) -> ValidationResult<RefreshTokenContent> {
        self.validate(raw, TokenType::Refresh)
            .await
            .map(RefreshTokenContent::new)
    }

    /// The event counter this validator (and every pipeline it owns)
    /// reports into, for host metrics export (spec Design Notes:
    /// "the core exposes a flush/export operation").
    #[must_use]
    pub fn events(&self) -> &SecurityEventCounter {
        &self.events
    }

    async fn validate(
        &self,
        raw: &str,
        token_type: TokenType,
    ) -> ValidationResult<crate::claims::ClaimsView> {
        let decoded = parser::decode(raw, &self.parser_config)
            .map_err(|e| fail(&self.events, e.event_type, e.message))?;

        let iss = decoded
            .payload
            .get("iss")
            .and_then(|v| v.as_str())
            .ok_or_else(|| fail(&self.events, EventType::MissingClaim, "missing iss claim"))?;

        let pipeline = self
            .pipelines
            .get(iss)
            .ok_or_else(|| fail(&self.events, EventType::IssuerUnknown, format!("unknown issuer '{iss}'")))?;

        let result = pipeline.validate(&decoded, token_type).await;
        if result.is_ok() {
            self.events.increment(EventType::ValidationSuccess);
        }
        result
    }
}
