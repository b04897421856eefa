//! Multi-issuer JWT validation: decode, resolve issuer, verify signature,
//! validate claims, and materialize typed token content (spec §4.10-§4.13).
//!
//! [`TokenValidator`] is the public entry point; everything else in this
//! crate exists to build one.

mod claims;
mod content;
mod error;
mod issuer;
mod monitor;
mod parser;
mod pipeline;
mod validator;

pub use claims::{ClaimMapper, ClaimMapperRegistry, ClaimValue, ClaimsView};
pub use content::{AccessTokenContent, IdTokenContent, RefreshTokenContent, TokenType};
pub use error::{ConfigError, ValidationError, ValidationResult};
pub use issuer::{IssuerConfig, IssuerConfigBuilder};
pub use monitor::{HttpMetricsMonitor, StageTimer};
pub use parser::{DecodedJwt, ParserConfig};
pub use pipeline::{ValidationPipeline, MAX_CLOCK_LEEWAY};
pub use validator::TokenValidator;

pub use polyjwt_keys::{
    Algorithm, DiscoveryDoc, FileLoader, HttpLoader, InMemoryLoader, JwksLoader, JwksSnapshot,
    KeyInfo, KeyType, KeysError, SignatureEngine, SignatureError, WellKnownLoader, WellKnownResolver,
};
pub use polyjwt_metrics::{EventCategory, EventType, RingStatistics, SecurityEventCounter, StripedRingBuffer};
