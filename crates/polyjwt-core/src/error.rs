use std::fmt;

use polyjwt_metrics::{EventCategory, EventType, SecurityEventCounter};

/// The single structured error type every public fallible API returns
/// (spec §7 propagation policy): `{event_type, category, message}`, with
/// an optional source for infrastructure-layer causes.
#[derive(Debug)]
pub struct ValidationError {
    pub event_type: EventType,
    pub category: EventCategory,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.event_type, self.message)
    }
}

impl std::error::Error for ValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Construct a `ValidationError` and bump its counter in one call — every
/// pipeline stage failure goes through this so "fail" and "count" can
/// never drift apart (spec §4.10 "a stage failure increments the
/// corresponding SecurityEventCounter entry").
pub(crate) fn fail(
    events: &SecurityEventCounter,
    event_type: EventType,
    message: impl Into<String>,
) -> ValidationError {
    events.increment(event_type);
    ValidationError {
        event_type,
        category: event_type.category(),
        message: message.into(),
        source: None,
    }
}

/// Configuration errors raised by builders at construction time (spec
/// §4.9), before the validator begins serving traffic.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("issuer_identifier is required unless the loader is OIDC-discovered")]
    MissingIssuerIdentifier,

    #[error("algorithm_preferences must be non-empty")]
    EmptyAlgorithmPreferences,

    #[error("exactly one jwks_loader variant is required")]
    MissingJwksLoader,
}
