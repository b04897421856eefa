use std::net::TcpListener;
use std::process::Child;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::{json, Value};
use sha2::Sha256;

pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
    }
}

/// Pick an unused TCP port on localhost.
///
/// Note: this does not reserve the port; it's still possible for another process to bind it
/// before you do.
///
/// # Errors
///
/// Returns an error if binding an ephemeral localhost port fails or if the bound socket's
/// local address cannot be read.
pub fn pick_unused_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("bind ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

/// Poll an HTTP URL until it returns a success status (2xx/3xx).
///
/// # Errors
///
/// Returns an error if the timeout elapses before the endpoint returns a success status.
pub async fn wait_http_ok(url: &str, timeout_dur: Duration) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let start = Instant::now();
    loop {
        if start.elapsed() > timeout_dur {
            anyhow::bail!("timed out waiting for {url}");
        }

        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            _ => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    }
}

/// An in-process mock OIDC provider: serves `/jwks` and
/// `/.well-known/openid-configuration` over a real localhost socket, so
/// integration tests can exercise the HTTP-backed loaders without a
/// container. The JWKS body is swappable at runtime for refresh tests.
/// The discovery document's `issuer` is always the server's own bound
/// URL (a real provider's would be too), so `WellKnownResolver`'s
/// origin check always passes against a plain `MockOidcServer`.
pub struct MockOidcServer {
    pub base_url: String,
    jwks: Arc<RwLock<Value>>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for MockOidcServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl MockOidcServer {
    /// # Errors
    ///
    /// Returns an error if the mock listener's localhost socket cannot be bound.
    pub async fn start(jwks: Value) -> anyhow::Result<Self> {
        let state = Arc::new(RwLock::new(jwks));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind mock OIDC listener")?;
        let addr = listener.local_addr()?;
        let issuer = format!("http://{addr}");

        let jwks_state = state.clone();
        let jwks_route = get(move || {
            let state = jwks_state.clone();
            async move { Json(state.read().expect("jwks lock poisoned").clone()) }
        });

        let discovery_issuer = issuer.clone();
        let discovery_route = get(move || {
            let issuer = discovery_issuer.clone();
            async move {
                Json(json!({
                    "issuer": issuer,
                    "jwks_uri": format!("{issuer}/jwks"),
                }))
            }
        });

        let app = Router::new()
            .route("/jwks", jwks_route)
            .route("/.well-known/openid-configuration", discovery_route);

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            base_url: issuer,
            jwks: state,
            handle,
        })
    }

    pub fn set_jwks(&self, jwks: Value) {
        *self.jwks.write().expect("jwks lock poisoned") = jwks;
    }

    #[must_use]
    pub fn jwks_url(&self) -> String {
        format!("{}/jwks", self.base_url)
    }

    #[must_use]
    pub fn well_known_url(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.base_url)
    }
}

fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the unsigned `header.payload` portion of a compact JWT, filling
/// in `alg`/`kid` on the header.
fn signing_input(alg: &str, kid: &str, mut header: Value, payload: &Value) -> (String, Vec<u8>) {
    header["alg"] = json!(alg);
    header["kid"] = json!(kid);
    let header_seg = b64(&serde_json::to_vec(&header).expect("serialize header"));
    let payload_seg = b64(&serde_json::to_vec(payload).expect("serialize payload"));
    let joined = format!("{header_seg}.{payload_seg}");
    let bytes = joined.clone().into_bytes();
    (joined, bytes)
}

/// An RSA test keypair, signing RS256/PS256.
pub struct RsaTestKey {
    pub kid: String,
    private: rsa::RsaPrivateKey,
}

impl RsaTestKey {
    #[must_use]
    pub fn generate(kid: impl Into<String>) -> Self {
        let private =
            rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("generate test RSA key");
        Self {
            kid: kid.into(),
            private,
        }
    }

    #[must_use]
    pub fn jwk(&self) -> Value {
        let public = self.private.to_public_key();
        json!({
            "kty": "RSA",
            "kid": self.kid,
            "use": "sig",
            "n": b64(&public.n().to_bytes_be()),
            "e": b64(&public.e().to_bytes_be()),
        })
    }

    #[must_use]
    pub fn sign(&self, alg: &str, header: Value, payload: &Value) -> String {
        use rsa::signature::{RandomizedSigner, SignatureEncoding};

        let (joined, bytes) = signing_input(alg, &self.kid, header, payload);
        let sig = match alg {
            "RS256" => rsa::pkcs1v15::SigningKey::<Sha256>::new(self.private.clone())
                .sign_with_rng(&mut rand::thread_rng(), &bytes)
                .to_bytes()
                .to_vec(),
            "PS256" => rsa::pss::SigningKey::<Sha256>::new(self.private.clone())
                .sign_with_rng(&mut rand::thread_rng(), &bytes)
                .to_bytes()
                .to_vec(),
            other => panic!("unsupported test-signing alg {other}"),
        };
        format!("{joined}.{}", b64(&sig))
    }
}

/// An EC P-256 test keypair, signing ES256 with a raw P-1363 (`r || s`)
/// signature by default (spec §8's testable property on both-encoding
/// acceptance also wants a DER-encoded variant, via [`Self::sign_der`]).
pub struct EcTestKey {
    pub kid: String,
    private: p256::ecdsa::SigningKey,
}

impl EcTestKey {
    #[must_use]
    pub fn generate(kid: impl Into<String>) -> Self {
        Self {
            kid: kid.into(),
            private: p256::ecdsa::SigningKey::random(&mut rand::thread_rng()),
        }
    }

    #[must_use]
    pub fn jwk(&self) -> Value {
        let point = self.private.verifying_key().to_encoded_point(false);
        json!({
            "kty": "EC",
            "kid": self.kid,
            "use": "sig",
            "crv": "P-256",
            "x": b64(point.x().expect("uncompressed point has x")),
            "y": b64(point.y().expect("uncompressed point has y")),
        })
    }

    #[must_use]
    pub fn sign(&self, header: Value, payload: &Value) -> String {
        use p256::ecdsa::signature::Signer;

        let (joined, bytes) = signing_input("ES256", &self.kid, header, payload);
        let sig: p256::ecdsa::Signature = self.private.sign(&bytes);
        format!("{joined}.{}", b64(&sig.to_bytes()))
    }

    /// Same signature, re-encoded as ASN.1 DER.
    #[must_use]
    pub fn sign_der(&self, header: Value, payload: &Value) -> String {
        use p256::ecdsa::signature::Signer;

        let (joined, bytes) = signing_input("ES256", &self.kid, header, payload);
        let sig: p256::ecdsa::Signature = self.private.sign(&bytes);
        format!("{joined}.{}", b64(sig.to_der().as_bytes()))
    }
}

/// An Ed25519 test keypair, signing EdDSA tokens.
pub struct EdTestKey {
    pub kid: String,
    signing_key: ed25519_dalek::SigningKey,
}

impl EdTestKey {
    #[must_use]
    pub fn generate(kid: impl Into<String>) -> Self {
        Self {
            kid: kid.into(),
            signing_key: ed25519_dalek::SigningKey::generate(&mut rand::thread_rng()),
        }
    }

    #[must_use]
    pub fn jwk(&self) -> Value {
        json!({
            "kty": "OKP",
            "kid": self.kid,
            "use": "sig",
            "crv": "Ed25519",
            "x": b64(self.signing_key.verifying_key().as_bytes()),
        })
    }

    #[must_use]
    pub fn sign(&self, header: Value, payload: &Value) -> String {
        use ed25519_dalek::Signer;

        let (joined, bytes) = signing_input("EdDSA", &self.kid, header, payload);
        let sig = self.signing_key.sign(&bytes);
        format!("{joined}.{}", b64(&sig.to_bytes()))
    }
}

/// A realistic access-token payload for `issuer`, expiring one hour from
/// `now_unix`. Tests override individual fields before signing to probe
/// edge cases (expired, wrong audience, missing scope, ...).
#[must_use]
pub fn sample_access_token_payload(issuer: &str, now_unix: i64) -> Value {
    json!({
        "iss": issuer,
        "sub": "user-1",
        "aud": ["api"],
        "azp": "api-client",
        "exp": now_unix + 3600,
        "iat": now_unix,
        "scope": "read write",
    })
}

/// A realistic ID-token payload for `issuer`.
#[must_use]
pub fn sample_id_token_payload(issuer: &str, audience: &str, now_unix: i64) -> Value {
    json!({
        "iss": issuer,
        "sub": "user-1",
        "aud": audience,
        "exp": now_unix + 3600,
        "iat": now_unix,
    })
}

#[must_use]
pub fn plain_header() -> Value {
    json!({"typ": "JWT"})
}
