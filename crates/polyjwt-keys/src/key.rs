use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;

use crate::error::KeysError;

/// How many keys without a `kid` we'll try in document order before giving
/// up (spec §4.7 step 8: "try-all" is bounded, not unbounded).
const MAX_UNKEYED_TRIES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Rsa,
    Ec,
    Okp,
}

/// Parsed public key material, one variant per curve/key family we
/// support. `rsa::RsaPublicKey` and the `ecdsa::VerifyingKey`s are cheap
/// to clone (they wrap a handful of field elements), so `KeyInfo` itself
/// is `Clone` and snapshots can be handed to callers by value.
#[derive(Clone)]
pub enum PublicKeyMaterial {
    Rsa(rsa::RsaPublicKey),
    EcP256(p256::ecdsa::VerifyingKey),
    EcP384(p384::ecdsa::VerifyingKey),
    EcP521(p521::ecdsa::VerifyingKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

#[derive(Clone)]
pub struct KeyInfo {
    pub key_id: Option<String>,
    pub key_type: KeyType,
    /// The JWK's own `alg` hint, if present. Advisory only: the
    /// signature engine decides permitted algorithms from the issuer
    /// configuration, never from this field alone.
    pub algorithm_hint: Option<String>,
    pub material: PublicKeyMaterial,
}

#[derive(Deserialize)]
struct RawJwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(rename = "use", default)]
    use_: Option<String>,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
    #[serde(default)]
    crv: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
}

fn b64url(field: &str, value: &Option<String>) -> Result<Vec<u8>, String> {
    let raw = value
        .as_deref()
        .ok_or_else(|| format!("missing field '{field}'"))?;
    URL_SAFE_NO_PAD
        .decode(raw)
        .map_err(|e| format!("field '{field}' is not valid base64url: {e}"))
}

fn build_rsa(raw: &RawJwk) -> Result<PublicKeyMaterial, String> {
    let n = b64url("n", &raw.n)?;
    let e = b64url("e", &raw.e)?;
    let key = rsa::RsaPublicKey::new(
        rsa::BigUint::from_bytes_be(&n),
        rsa::BigUint::from_bytes_be(&e),
    )
    .map_err(|e| format!("invalid RSA key: {e}"))?;
    Ok(PublicKeyMaterial::Rsa(key))
}

fn ec_point(raw: &RawJwk, coord_len: usize) -> Result<Vec<u8>, String> {
    let x = b64url("x", &raw.x)?;
    let y = b64url("y", &raw.y)?;
    if x.len() != coord_len || y.len() != coord_len {
        return Err(format!(
            "EC coordinate length mismatch: expected {coord_len}, got x={}, y={}",
            x.len(),
            y.len()
        ));
    }
    let mut point = Vec::with_capacity(1 + 2 * coord_len);
    point.push(0x04);
    point.extend_from_slice(&x);
    point.extend_from_slice(&y);
    Ok(point)
}

fn build_ec(raw: &RawJwk) -> Result<PublicKeyMaterial, String> {
    match raw.crv.as_deref() {
        Some("P-256") => {
            let point = ec_point(raw, 32)?;
            let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&point)
                .map_err(|e| format!("invalid P-256 key: {e}"))?;
            Ok(PublicKeyMaterial::EcP256(key))
        }
        Some("P-384") => {
            let point = ec_point(raw, 48)?;
            let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(&point)
                .map_err(|e| format!("invalid P-384 key: {e}"))?;
            Ok(PublicKeyMaterial::EcP384(key))
        }
        Some("P-521") => {
            let point = ec_point(raw, 66)?;
            let key = p521::ecdsa::VerifyingKey::from_sec1_bytes(&point)
                .map_err(|e| format!("invalid P-521 key: {e}"))?;
            Ok(PublicKeyMaterial::EcP521(key))
        }
        other => Err(format!("unsupported or missing EC curve: {other:?}")),
    }
}

fn build_okp(raw: &RawJwk) -> Result<PublicKeyMaterial, String> {
    match raw.crv.as_deref() {
        Some("Ed25519") => {
            let x = b64url("x", &raw.x)?;
            let bytes: [u8; 32] = x
                .try_into()
                .map_err(|_| "Ed25519 public key must be 32 bytes".to_string())?;
            let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                .map_err(|e| format!("invalid Ed25519 key: {e}"))?;
            Ok(PublicKeyMaterial::Ed25519(key))
        }
        other => Err(format!("unsupported OKP curve: {other:?}")),
    }
}

fn build_key_info(raw: &RawJwk) -> Option<KeyInfo> {
    if let Some(use_) = &raw.use_
        && use_ != "sig"
    {
        return None;
    }
    let (key_type, material) = match raw.kty.as_str() {
        "RSA" => (KeyType::Rsa, build_rsa(raw)),
        "EC" => (KeyType::Ec, build_ec(raw)),
        "OKP" => (KeyType::Okp, build_okp(raw)),
        other => {
            tracing::warn!(kty = other, "dropping JWKS key with unsupported kty");
            return None;
        }
    };
    match material {
        Ok(material) => Some(KeyInfo {
            key_id: raw.kid.clone(),
            key_type,
            algorithm_hint: raw.alg.clone(),
            material,
        }),
        Err(reason) => {
            tracing::warn!(kty = raw.kty, reason, "dropping malformed JWKS key");
            None
        }
    }
}

/// A parsed, immutable snapshot of a JWKS document. Cheap to hand out by
/// reference; callers needing to hold onto one across an `await` should
/// wrap it in an `Arc` (the loaders do this internally).
#[derive(Default, Clone)]
pub struct JwksSnapshot {
    keys_by_kid: HashMap<String, KeyInfo>,
    unkeyed: Vec<KeyInfo>,
}

impl JwksSnapshot {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys_by_kid.len() + self.unkeyed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Candidate keys for a token's `kid` (or every key in the document,
    /// bounded by [`MAX_UNKEYED_TRIES`], if the token carries no `kid` —
    /// a `kid`-less token has no way to exclude any key, not just the
    /// ones that also happen to lack a `kid`).
    #[must_use]
    pub fn candidates(&self, kid: Option<&str>) -> Vec<&KeyInfo> {
        match kid {
            Some(k) => self.keys_by_kid.get(k).into_iter().collect(),
            None => self
                .keys_by_kid
                .values()
                .chain(self.unkeyed.iter())
                .take(MAX_UNKEYED_TRIES)
                .collect(),
        }
    }
}

/// Parse a `{"keys": [...]}` JWKS document. A key object that fails to
/// parse (unknown `kty`, missing coordinates, bad base64) is dropped with
/// a warning rather than failing the whole document; only a document that
/// isn't even shaped like `{"keys": [...]}` is an error.
pub fn parse_jwks_document(bytes: &[u8]) -> Result<JwksSnapshot, KeysError> {
    #[derive(Deserialize)]
    struct RawDocument {
        keys: Vec<serde_json::Value>,
    }

    let doc: RawDocument =
        serde_json::from_slice(bytes).map_err(|e| KeysError::JwksParse(e.to_string()))?;

    let mut keys_by_kid = HashMap::new();
    let mut unkeyed = Vec::new();
    for value in doc.keys {
        let raw: RawJwk = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed JWKS key object");
                continue;
            }
        };
        let Some(key) = build_key_info(&raw) else {
            continue;
        };
        match &key.key_id {
            Some(kid) => {
                keys_by_kid.insert(kid.clone(), key);
            }
            None => unkeyed.push(key),
        }
    }

    Ok(JwksSnapshot {
        keys_by_kid,
        unkeyed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kty_is_dropped_not_fatal() {
        let doc = serde_json::json!({
            "keys": [
                {"kty": "oct", "k": "deadbeef"},
                {"kty": "RSA", "n": "AQAB", "e": "AQAB", "kid": "k1"},
            ]
        });
        let snapshot = parse_jwks_document(doc.to_string().as_bytes()).unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn malformed_document_shape_is_an_error() {
        let err = parse_jwks_document(b"{\"not_keys\": []}").unwrap_err();
        assert!(matches!(err, KeysError::JwksParse(_)));
    }

    #[test]
    fn candidates_without_kid_try_unkeyed_bounded() {
        let mut keys = Vec::new();
        for _ in 0..20 {
            keys.push(serde_json::json!({"kty": "oct"}));
        }
        // All dropped (unsupported kty), so candidates() on an empty
        // snapshot returns nothing either way; this just exercises the
        // bound without panicking.
        let doc = serde_json::json!({"keys": keys});
        let snapshot = parse_jwks_document(doc.to_string().as_bytes()).unwrap();
        assert!(snapshot.candidates(None).len() <= MAX_UNKEYED_TRIES);
    }

    #[test]
    fn candidates_without_kid_also_tries_keyed_keys() {
        // The common real-world shape: every JWKS entry carries a `kid`,
        // but the token itself doesn't. A `kid`-less token must still be
        // able to find a matching key, not just the (usually empty) set
        // of keys that also lack a `kid`.
        let doc = serde_json::json!({
            "keys": [
                {"kty": "RSA", "n": "AQAB", "e": "AQAB", "kid": "k1"},
                {"kty": "RSA", "n": "AQAB", "e": "AQAB", "kid": "k2"},
            ]
        });
        let snapshot = parse_jwks_document(doc.to_string().as_bytes()).unwrap();
        assert_eq!(snapshot.candidates(None).len(), 2);
    }
}
