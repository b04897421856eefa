//! Key material: JWKS loading (in-memory, file, HTTP, and OIDC discovery)
//! and the signature engine that verifies a token's signature against the
//! keys a loader produces (spec §4.6-§4.8).

mod error;
mod key;
mod loader;
mod signature;
mod well_known;

pub use error::{KeysError, SignatureError};
pub use key::{parse_jwks_document, JwksSnapshot, KeyInfo, KeyType, PublicKeyMaterial};
pub use loader::{
    FileLoader, HttpLoader, InMemoryLoader, JwksLoader, WellKnownLoader, MIN_REFRESH_INTERVAL,
};
pub use signature::{Algorithm, SignatureEngine};
pub use well_known::{DiscoveryDoc, WellKnownResolver};
