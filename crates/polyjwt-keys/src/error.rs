use thiserror::Error;

/// Failures surfaced by key loading and signature verification (spec §7,
/// the `KEY_NOT_FOUND` / `JWKS_*` / `WELL_KNOWN_*` / algorithm branches).
#[derive(Debug, Error)]
pub enum KeysError {
    #[error("malformed JWKS document: {0}")]
    JwksParse(String),

    #[error("well-known document missing required field: {0}")]
    WellKnownMissingField(String),

    #[error("well-known issuer mismatch: expected {expected}, document says {actual}")]
    WellKnownIssuerMismatch { expected: String, actual: String },

    #[error("well-known document unavailable: {0}")]
    WellKnownUnavailable(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("no key matched kid {0:?}")]
    KeyNotFound(Option<String>),
}

/// Failures specific to signature verification (spec §4.7 steps 1-6).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("algorithm 'none' or an HMAC algorithm is never permitted")]
    NoneOrHmacRejected,

    #[error("algorithm {0} is not permitted for this issuer")]
    AlgorithmNotAllowed(String),

    #[error("unsupported or unrecognized algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("key type does not match the token's algorithm")]
    KeyTypeMismatch,

    #[error("malformed signature encoding")]
    MalformedSignature,

    #[error("signature verification failed")]
    VerificationFailed,
}
