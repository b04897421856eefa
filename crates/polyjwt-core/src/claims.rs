use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

/// A JSON claim value after mapping (spec §3 `ClaimValue`).
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimValue {
    String(String),
    StringList(Vec<String>),
    Instant(i64),
    Raw(Value),
}

impl ClaimValue {
    #[must_use]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            Self::StringList(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_instant(&self) -> Option<i64> {
        match self {
            Self::Instant(v) => Some(*v),
            _ => None,
        }
    }
}

/// A named strategy converting a raw JSON claim into a [`ClaimValue`]
/// (spec §4.8). `Custom` lets a host register arbitrary logic through the
/// same seam as the six built-ins.
#[derive(Clone)]
pub enum ClaimMapper {
    IdentityString,
    JsonCollection,
    StringSplitter(char),
    Instant,
    KeycloakRoles,
    KeycloakGroups,
    Custom(Arc<dyn Fn(&Value) -> Result<ClaimValue, String> + Send + Sync>),
}

impl ClaimMapper {
    pub fn apply(&self, value: &Value) -> Result<ClaimValue, String> {
        match self {
            Self::IdentityString => value
                .as_str()
                .map(|s| ClaimValue::String(s.to_string()))
                .ok_or_else(|| "expected a JSON string".to_string()),
            Self::JsonCollection => json_collection(value),
            Self::StringSplitter(sep) => value
                .as_str()
                .map(|s| {
                    ClaimValue::StringList(
                        s.split(*sep)
                            .map(str::trim)
                            .filter(|part| !part.is_empty())
                            .map(str::to_string)
                            .collect(),
                    )
                })
                .ok_or_else(|| "expected a JSON string".to_string()),
            Self::Instant => value
                .as_i64()
                .map(ClaimValue::Instant)
                .ok_or_else(|| "expected a JSON number".to_string()),
            Self::KeycloakRoles => value
                .get("roles")
                .map(json_collection)
                .transpose()?
                .ok_or_else(|| "expected realm_access.roles".to_string()),
            Self::KeycloakGroups => json_collection(value),
            Self::Custom(f) => f(value),
        }
    }
}

fn json_collection(value: &Value) -> Result<ClaimValue, String> {
    match value {
        Value::String(s) => Ok(ClaimValue::StringList(vec![s.clone()])),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => out.push(s.clone()),
                    Value::Number(n) => out.push(n.to_string()),
                    Value::Bool(b) => out.push(b.to_string()),
                    other => return Err(format!("unsupported array element: {other}")),
                }
            }
            Ok(ClaimValue::StringList(out))
        }
        other => Err(format!("expected a JSON array or string, got {other}")),
    }
}

/// Per-claim mapper lookup with issuer-configured overrides taking
/// precedence over the six built-ins (spec §4.8).
pub struct ClaimMapperRegistry {
    overrides: HashMap<String, ClaimMapper>,
    defaults: HashMap<String, ClaimMapper>,
}

impl ClaimMapperRegistry {
    #[must_use]
    pub fn new(overrides: HashMap<String, ClaimMapper>) -> Self {
        let mut defaults = HashMap::new();
        defaults.insert("sub".to_string(), ClaimMapper::IdentityString);
        defaults.insert("scope".to_string(), ClaimMapper::StringSplitter(' '));
        defaults.insert("scp".to_string(), ClaimMapper::JsonCollection);
        defaults.insert("roles".to_string(), ClaimMapper::JsonCollection);
        defaults.insert("groups".to_string(), ClaimMapper::JsonCollection);
        defaults.insert("realm_access".to_string(), ClaimMapper::KeycloakRoles);
        defaults.insert("aud".to_string(), ClaimMapper::JsonCollection);
        defaults.insert("iat".to_string(), ClaimMapper::Instant);
        defaults.insert("exp".to_string(), ClaimMapper::Instant);
        defaults.insert("nbf".to_string(), ClaimMapper::Instant);
        Self { overrides, defaults }
    }

    #[must_use]
    pub fn resolve(&self, claim_name: &str) -> Option<&ClaimMapper> {
        self.overrides
            .get(claim_name)
            .or_else(|| self.defaults.get(claim_name))
    }
}

impl Default for ClaimMapperRegistry {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

/// A lazily-mapped view over a decoded payload (spec §4.8 "applied
/// lazily: only when the typed-content accessor requests the claim").
/// Mapped values are cached after first access; the registry itself is
/// shared (and immutable) across every token validated under the owning
/// issuer.
pub struct ClaimsView {
    payload: Value,
    registry: Arc<ClaimMapperRegistry>,
    cache: RwLock<HashMap<String, ClaimValue>>,
}

impl ClaimsView {
    #[must_use]
    pub fn new(payload: Value, registry: Arc<ClaimMapperRegistry>) -> Self {
        Self {
            payload,
            registry,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The raw JSON value for a claim, unmapped.
    #[must_use]
    pub fn raw(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// The mapped claim value, computing and caching it on first access.
    /// Returns `None` if the claim is absent or no mapper is registered
    /// for it (note: a mapper that errors on malformed input is also
    /// treated as absent rather than panicking a caller over untrusted
    /// token content).
    pub fn claim(&self, name: &str) -> Option<ClaimValue> {
        if let Some(cached) = self.cache.read().get(name) {
            return Some(cached.clone());
        }
        let raw = self.payload.get(name)?;
        let mapper = self.registry.resolve(name)?;
        let value = match mapper.apply(raw) {
            Ok(v) => v,
            Err(reason) => {
                tracing::warn!(claim = name, reason, "claim mapper rejected claim value");
                return None;
            }
        };
        self.cache.write().insert(name.to_string(), value.clone());
        Some(value)
    }
}
