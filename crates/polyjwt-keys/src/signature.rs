use std::collections::HashSet;

use ed25519_dalek::Verifier as _;
use rsa::{Pkcs1v15Sign, Pss};
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::Verifier as _;

use crate::error::SignatureError;
use crate::key::{KeyInfo, PublicKeyMaterial};

/// Signing algorithms the engine knows how to verify. `none` and the HMAC
/// family are deliberately absent: they are rejected before this type is
/// ever constructed (spec §4.7 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Rs256,
    Rs384,
    Rs512,
    Ps256,
    Ps384,
    Ps512,
    Es256,
    Es384,
    Es512,
    EdDsa,
}

impl Algorithm {
    #[must_use]
    pub fn from_header(alg: &str) -> Option<Self> {
        match alg {
            "RS256" => Some(Self::Rs256),
            "RS384" => Some(Self::Rs384),
            "RS512" => Some(Self::Rs512),
            "PS256" => Some(Self::Ps256),
            "PS384" => Some(Self::Ps384),
            "PS512" => Some(Self::Ps512),
            "ES256" => Some(Self::Es256),
            "ES384" => Some(Self::Es384),
            "ES512" => Some(Self::Es512),
            "EdDSA" => Some(Self::EdDsa),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::Rs384 => "RS384",
            Self::Rs512 => "RS512",
            Self::Ps256 => "PS256",
            Self::Ps384 => "PS384",
            Self::Ps512 => "PS512",
            Self::Es256 => "ES256",
            Self::Es384 => "ES384",
            Self::Es512 => "ES512",
            Self::EdDsa => "EdDSA",
        }
    }
}

/// None of the algorithms this library will ever verify under, regardless
/// of what an issuer's configuration might (mis)permit (spec §4.7 step 1,
/// §4 "algorithm confusion" hardening).
fn is_always_rejected(alg_header: &str) -> bool {
    matches!(alg_header, "none" | "HS256" | "HS384" | "HS512")
}

/// Verifies JWT signatures against a fixed set of permitted algorithms
/// (spec §4.8 `SignatureEngine`). One engine is built per issuer from that
/// issuer's `algorithm_preferences`; the permitted set is cached as a
/// `HashSet` so each verification is an O(1) membership test rather than a
/// linear scan of the issuer's preference list.
pub struct SignatureEngine {
    allowed: HashSet<Algorithm>,
}

impl SignatureEngine {
    #[must_use]
    pub fn new(allowed: impl IntoIterator<Item = Algorithm>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Full verification pipeline for one token: reject `none`/HMAC,
    /// reject algorithms the issuer hasn't opted into, then dispatch to
    /// the concrete scheme matching both the header's `alg` and the key's
    /// type.
    pub fn verify(
        &self,
        alg_header: &str,
        signing_input: &[u8],
        signature: &[u8],
        key: &KeyInfo,
    ) -> Result<(), SignatureError> {
        if is_always_rejected(alg_header) {
            return Err(SignatureError::NoneOrHmacRejected);
        }
        let alg = Algorithm::from_header(alg_header)
            .ok_or_else(|| SignatureError::UnsupportedAlgorithm(alg_header.to_string()))?;
        if !self.allowed.contains(&alg) {
            return Err(SignatureError::AlgorithmNotAllowed(alg_header.to_string()));
        }
        verify_with_key(alg, signing_input, signature, &key.material)
    }
}

fn verify_with_key(
    alg: Algorithm,
    signing_input: &[u8],
    signature: &[u8],
    material: &PublicKeyMaterial,
) -> Result<(), SignatureError> {
    match (alg, material) {
        (Algorithm::Rs256, PublicKeyMaterial::Rsa(pk)) => {
            verify_rsa_pkcs1(pk, Sha256::digest(signing_input).as_slice(), signature, Pkcs1v15Sign::new::<Sha256>())
        }
        (Algorithm::Rs384, PublicKeyMaterial::Rsa(pk)) => {
            verify_rsa_pkcs1(pk, Sha384::digest(signing_input).as_slice(), signature, Pkcs1v15Sign::new::<Sha384>())
        }
        (Algorithm::Rs512, PublicKeyMaterial::Rsa(pk)) => {
            verify_rsa_pkcs1(pk, Sha512::digest(signing_input).as_slice(), signature, Pkcs1v15Sign::new::<Sha512>())
        }
        (Algorithm::Ps256, PublicKeyMaterial::Rsa(pk)) => {
            verify_rsa_pkcs1(pk, Sha256::digest(signing_input).as_slice(), signature, Pss::new::<Sha256>())
        }
        (Algorithm::Ps384, PublicKeyMaterial::Rsa(pk)) => {
            verify_rsa_pkcs1(pk, Sha384::digest(signing_input).as_slice(), signature, Pss::new::<Sha384>())
        }
        (Algorithm::Ps512, PublicKeyMaterial::Rsa(pk)) => {
            verify_rsa_pkcs1(pk, Sha512::digest(signing_input).as_slice(), signature, Pss::new::<Sha512>())
        }
        (Algorithm::Es256, PublicKeyMaterial::EcP256(vk)) => {
            let sig = parse_ecdsa_p256(signature)?;
            vk.verify(signing_input, &sig)
                .map_err(|_| SignatureError::VerificationFailed)
        }
        (Algorithm::Es384, PublicKeyMaterial::EcP384(vk)) => {
            let sig = parse_ecdsa_p384(signature)?;
            vk.verify(signing_input, &sig)
                .map_err(|_| SignatureError::VerificationFailed)
        }
        (Algorithm::Es512, PublicKeyMaterial::EcP521(vk)) => {
            let sig = parse_ecdsa_p521(signature)?;
            vk.verify(signing_input, &sig)
                .map_err(|_| SignatureError::VerificationFailed)
        }
        (Algorithm::EdDsa, PublicKeyMaterial::Ed25519(vk)) => {
            let bytes: [u8; 64] = signature
                .try_into()
                .map_err(|_| SignatureError::MalformedSignature)?;
            let sig = ed25519_dalek::Signature::from_bytes(&bytes);
            vk.verify(signing_input, &sig)
                .map_err(|_| SignatureError::VerificationFailed)
        }
        _ => Err(SignatureError::KeyTypeMismatch),
    }
}

fn verify_rsa_pkcs1(
    pk: &rsa::RsaPublicKey,
    hashed: &[u8],
    signature: &[u8],
    scheme: impl rsa::traits::SignatureScheme,
) -> Result<(), SignatureError> {
    pk.verify(scheme, hashed, signature)
        .map_err(|_| SignatureError::VerificationFailed)
}

/// Accepts either raw IEEE P-1363 (`r || s`, fixed-width) or ASN.1 DER
/// signature encodings, normalizing to the same [`ecdsa::Signature`]
/// before verifying either way (resolves the ambiguity in how a raw
/// signature should be "converted" — both encodings parse to the same
/// in-memory value, so there is nothing further to convert).
fn parse_ecdsa_p256(bytes: &[u8]) -> Result<p256::ecdsa::Signature, SignatureError> {
    if bytes.len() == 64 {
        p256::ecdsa::Signature::from_slice(bytes).map_err(|_| SignatureError::MalformedSignature)
    } else {
        p256::ecdsa::Signature::from_der(bytes).map_err(|_| SignatureError::MalformedSignature)
    }
}

fn parse_ecdsa_p384(bytes: &[u8]) -> Result<p384::ecdsa::Signature, SignatureError> {
    if bytes.len() == 96 {
        p384::ecdsa::Signature::from_slice(bytes).map_err(|_| SignatureError::MalformedSignature)
    } else {
        p384::ecdsa::Signature::from_der(bytes).map_err(|_| SignatureError::MalformedSignature)
    }
}

fn parse_ecdsa_p521(bytes: &[u8]) -> Result<p521::ecdsa::Signature, SignatureError> {
    if bytes.len() == 132 {
        p521::ecdsa::Signature::from_slice(bytes).map_err(|_| SignatureError::MalformedSignature)
    } else {
        p521::ecdsa::Signature::from_der(bytes).map_err(|_| SignatureError::MalformedSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyInfo, KeyType};
    use rsa::pkcs1v15::SigningKey;
    use rsa::signature::{RandomizedSigner, SignatureEncoding};
    use rsa::RsaPrivateKey;

    fn rsa_keypair() -> (RsaPrivateKey, KeyInfo) {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public = private.to_public_key();
        (
            private,
            KeyInfo {
                key_id: Some("k1".into()),
                key_type: KeyType::Rsa,
                algorithm_hint: Some("RS256".into()),
                material: PublicKeyMaterial::Rsa(public),
            },
        )
    }

    #[test]
    fn none_and_hmac_are_always_rejected() {
        let engine = SignatureEngine::new([Algorithm::Rs256]);
        let (_priv, key) = rsa_keypair();
        for alg in ["none", "HS256", "HS384", "HS512"] {
            let err = engine.verify(alg, b"msg", b"sig", &key).unwrap_err();
            assert_eq!(err, SignatureError::NoneOrHmacRejected);
        }
    }

    #[test]
    fn algorithm_outside_issuer_preferences_is_rejected() {
        let engine = SignatureEngine::new([Algorithm::Es256]);
        let (_priv, key) = rsa_keypair();
        let err = engine.verify("RS256", b"msg", b"sig", &key).unwrap_err();
        assert_eq!(err, SignatureError::AlgorithmNotAllowed("RS256".into()));
    }

    #[test]
    fn valid_rs256_signature_verifies() {
        let engine = SignatureEngine::new([Algorithm::Rs256]);
        let (private, key) = rsa_keypair();
        let signing_key = SigningKey::<Sha256>::new(private);
        let mut rng = rand::thread_rng();
        let sig = signing_key.sign_with_rng(&mut rng, b"signing-input");
        engine
            .verify("RS256", b"signing-input", &sig.to_bytes(), &key)
            .unwrap();
    }

    #[test]
    fn tampered_signature_fails_verification() {
        let engine = SignatureEngine::new([Algorithm::Rs256]);
        let (private, key) = rsa_keypair();
        let signing_key = SigningKey::<Sha256>::new(private);
        let mut rng = rand::thread_rng();
        let mut sig_bytes = signing_key.sign_with_rng(&mut rng, b"signing-input").to_bytes().to_vec();
        sig_bytes[0] ^= 0xFF;
        let err = engine
            .verify("RS256", b"signing-input", &sig_bytes, &key)
            .unwrap_err();
        assert_eq!(err, SignatureError::VerificationFailed);
    }
}
