use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use polyjwt_keys::{Algorithm, JwksLoader};

use crate::claims::{ClaimMapper, ClaimMapperRegistry};
use crate::error::ConfigError;

/// The default algorithm allowlist (spec §3): every RustCrypto-backed
/// RSA/ECDSA scheme. `EdDSA` is deliberately absent — an issuer opts into
/// it explicitly (see SPEC_FULL §2).
fn default_algorithm_preferences() -> Vec<Algorithm> {
    vec![
        Algorithm::Rs256,
        Algorithm::Rs384,
        Algorithm::Rs512,
        Algorithm::Es256,
        Algorithm::Es384,
        Algorithm::Es512,
        Algorithm::Ps256,
        Algorithm::Ps384,
        Algorithm::Ps512,
    ]
}

/// Resolved, immutable per-issuer policy (spec §3 `IssuerConfig`). Built
/// once at startup via [`IssuerConfigBuilder`] and never mutated
/// afterward.
pub struct IssuerConfig {
    pub enabled: bool,
    pub issuer_identifier: String,
    pub expected_audience: HashSet<String>,
    pub expected_client_id: Option<String>,
    pub algorithm_preferences: Vec<Algorithm>,
    pub claim_mappers: Arc<ClaimMapperRegistry>,
    pub jwks_loader: Arc<JwksLoader>,
}

/// Fluent builder for [`IssuerConfig`], validating at `build()` per spec
/// §4.9: an issuer identifier (explicit or OIDC-discovered), a non-empty
/// algorithm allowlist, and exactly one `jwks_loader` variant.
pub struct IssuerConfigBuilder {
    enabled: bool,
    issuer_identifier: Option<String>,
    expected_audience: HashSet<String>,
    expected_client_id: Option<String>,
    algorithm_preferences: Option<Vec<Algorithm>>,
    claim_mapper_overrides: HashMap<String, ClaimMapper>,
    jwks_loader: Option<JwksLoader>,
}

impl Default for IssuerConfigBuilder {
    fn default() -> Self {
        Self {
            enabled: true,
            issuer_identifier: None,
            expected_audience: HashSet::new(),
            expected_client_id: None,
            algorithm_preferences: None,
            claim_mapper_overrides: HashMap::new(),
            jwks_loader: None,
        }
    }
}

impl IssuerConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn issuer_identifier(mut self, issuer: impl Into<String>) -> Self {
        self.issuer_identifier = Some(issuer.into());
        self
    }

    #[must_use]
    pub fn expected_audience<I, S>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_audience = audiences.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn expected_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.expected_client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn algorithm_preferences(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithm_preferences = Some(algorithms);
        self
    }

    #[must_use]
    pub fn claim_mapper(mut self, claim_name: impl Into<String>, mapper: ClaimMapper) -> Self {
        self.claim_mapper_overrides.insert(claim_name.into(), mapper);
        self
    }

    #[must_use]
    pub fn jwks_loader(mut self, loader: JwksLoader) -> Self {
        self.jwks_loader = Some(loader);
        self
    }

    pub fn build(self) -> Result<IssuerConfig, ConfigError> {
        let jwks_loader = self.jwks_loader.ok_or(ConfigError::MissingJwksLoader)?;

        let issuer_identifier = match (self.issuer_identifier, &jwks_loader) {
            (Some(id), _) => id,
            (None, JwksLoader::WellKnown(loader)) => loader.issuer().to_string(),
            (None, _) => return Err(ConfigError::MissingIssuerIdentifier),
        };

        let algorithm_preferences = self
            .algorithm_preferences
            .unwrap_or_else(default_algorithm_preferences);
        if algorithm_preferences.is_empty() {
            return Err(ConfigError::EmptyAlgorithmPreferences);
        }

        Ok(IssuerConfig {
            enabled: self.enabled,
            issuer_identifier,
            expected_audience: self.expected_audience,
            expected_client_id: self.expected_client_id,
            algorithm_preferences,
            claim_mappers: Arc::new(ClaimMapperRegistry::new(self.claim_mapper_overrides)),
            jwks_loader: Arc::new(jwks_loader),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyjwt_keys::InMemoryLoader;

    #[test]
    fn build_requires_jwks_loader() {
        let err = IssuerConfigBuilder::new()
            .issuer_identifier("https://idp.example")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingJwksLoader));
    }

    #[test]
    fn build_requires_issuer_identifier_for_non_discovered_loaders() {
        let loader = JwksLoader::InMemory(InMemoryLoader::new(Default::default()));
        let err = IssuerConfigBuilder::new().jwks_loader(loader).build().unwrap_err();
        assert!(matches!(err, ConfigError::MissingIssuerIdentifier));
    }

    #[test]
    fn build_rejects_empty_algorithm_preferences() {
        let loader = JwksLoader::InMemory(InMemoryLoader::new(Default::default()));
        let err = IssuerConfigBuilder::new()
            .issuer_identifier("https://idp.example")
            .jwks_loader(loader)
            .algorithm_preferences(vec![])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyAlgorithmPreferences));
    }

    #[test]
    fn build_succeeds_with_minimal_valid_config() {
        let loader = JwksLoader::InMemory(InMemoryLoader::new(Default::default()));
        let config = IssuerConfigBuilder::new()
            .issuer_identifier("https://idp.example")
            .jwks_loader(loader)
            .build()
            .unwrap();
        assert_eq!(config.issuer_identifier, "https://idp.example");
        assert!(!config.algorithm_preferences.is_empty());
    }
}
