use std::collections::HashSet;

use crate::claims::ClaimsView;

/// Which token-type-specific structural and mandatory-claim checks the
/// pipeline applies (spec §6 token-type table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Access,
    Id,
    Refresh,
}

impl TokenType {
    /// Acceptable `typ` header values; an empty slice means "irrelevant",
    /// a present-but-unlisted `typ` still fails stage 5. `typ` absent
    /// always passes regardless of this list (spec §6: "or absent").
    #[must_use]
    pub(crate) fn allowed_typ(self) -> &'static [&'static str] {
        match self {
            Self::Access => &["at+jwt"],
            Self::Id => &["JWT", "id+jwt"],
            Self::Refresh => &[],
        }
    }

    /// Claims required unconditionally for this token type (beyond the
    /// aud/azp and scope/scp special cases handled separately).
    #[must_use]
    pub(crate) fn mandatory_claims(self) -> &'static [&'static str] {
        match self {
            Self::Access => &["iss", "sub", "exp"],
            Self::Id => &["iss", "sub", "exp", "aud"],
            Self::Refresh => &["exp"],
        }
    }
}

fn set_difference(required: &[String], present: &[String]) -> Vec<String> {
    let present: HashSet<&str> = present.iter().map(String::as_str).collect();
    required
        .iter()
        .filter(|r| !present.contains(r.as_str()))
        .cloned()
        .collect()
}

/// Validated access-token content (spec §3/§6). Scopes come from either
/// `scope` (space-separated string) or `scp` (JSON array); both are
/// checked since issuers disagree on which one they emit.
pub struct AccessTokenContent {
    claims: ClaimsView,
}

impl AccessTokenContent {
    #[must_use]
    pub(crate) fn new(claims: ClaimsView) -> Self {
        Self { claims }
    }

    #[must_use]
    pub fn claims(&self) -> &ClaimsView {
        &self.claims
    }

    #[must_use]
    pub fn subject(&self) -> Option<String> {
        self.claims.raw("sub")?.as_str().map(str::to_string)
    }

    #[must_use]
    pub fn issuer(&self) -> Option<String> {
        self.claims.raw("iss")?.as_str().map(str::to_string)
    }

    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        if let Some(list) = self.claims.claim("scope").and_then(|v| v.as_string_list().map(<[String]>::to_vec)) {
            return list;
        }
        self.claims
            .claim("scp")
            .and_then(|v| v.as_string_list().map(<[String]>::to_vec))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn roles(&self) -> Vec<String> {
        if let Some(list) = self.claims.claim("roles").and_then(|v| v.as_string_list().map(<[String]>::to_vec)) {
            return list;
        }
        self.claims
            .claim("realm_access")
            .and_then(|v| v.as_string_list().map(<[String]>::to_vec))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn groups(&self) -> Vec<String> {
        self.claims
            .claim("groups")
            .and_then(|v| v.as_string_list().map(<[String]>::to_vec))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn determine_missing_scopes(&self, required: &[String]) -> Vec<String> {
        set_difference(required, &self.scopes())
    }

    #[must_use]
    pub fn determine_missing_roles(&self, required: &[String]) -> Vec<String> {
        set_difference(required, &self.roles())
    }

    #[must_use]
    pub fn determine_missing_groups(&self, required: &[String]) -> Vec<String> {
        set_difference(required, &self.groups())
    }
}

/// Validated ID-token content (spec §3/§6).
pub struct IdTokenContent {
    claims: ClaimsView,
}

impl IdTokenContent {
    #[must_use]
    pub(crate) fn new(claims: ClaimsView) -> Self {
        Self { claims }
    }

    #[must_use]
    pub fn claims(&self) -> &ClaimsView {
        &self.claims
    }

    #[must_use]
    pub fn subject(&self) -> Option<String> {
        self.claims.raw("sub")?.as_str().map(str::to_string)
    }

    #[must_use]
    pub fn issuer(&self) -> Option<String> {
        self.claims.raw("iss")?.as_str().map(str::to_string)
    }

    #[must_use]
    pub fn audience(&self) -> Vec<String> {
        self.claims
            .claim("aud")
            .and_then(|v| v.as_string_list().map(<[String]>::to_vec))
            .unwrap_or_default()
    }
}

/// Validated refresh-token content. Often opaque; when JWT-structured,
/// only structural, signature, and temporal checks apply (spec §4.11).
pub struct RefreshTokenContent {
    claims: ClaimsView,
}

impl RefreshTokenContent {
    #[must_use]
    pub(crate) fn new(claims: ClaimsView) -> Self {
        Self { claims }
    }

    #[must_use]
    pub fn claims(&self) -> &ClaimsView {
        &self.claims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_scopes_are_the_set_difference() {
        let required = vec!["read".to_string(), "write".to_string(), "admin".to_string()];
        let present = vec!["read".to_string(), "write".to_string()];
        assert_eq!(set_difference(&required, &present), vec!["admin".to_string()]);
    }
}
