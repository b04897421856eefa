use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Closed taxonomy of security-relevant events a validation pipeline can
/// emit. Grouped into [`EventCategory`] for HTTP-layer response mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EventType {
    TokenEmpty,
    TokenTooLarge,
    Malformed,
    MalformedJson,
    WrongTyp,
    SizeLimitExceeded,

    AlgorithmNotAllowed,
    AlgorithmNoneRejected,
    KeyNotFound,
    SignatureValidationFailed,
    JwksUnavailable,

    MissingClaim,
    TokenExpired,
    NotYetValid,
    IssuedInFuture,
    IssuerMismatch,
    IssuerUnknown,
    AudienceMismatch,
    ClientIdMismatch,

    JwksFetchFailed,
    JwksJsonParseFailed,
    WellKnownMissingField,
    WellKnownIssuerMismatch,
    Interrupted,

    ValidationSuccess,
}

/// The four failure categories plus success, per `spec.md` §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    InvalidStructure,
    InvalidSignature,
    SemanticIssues,
    Infrastructure,
    Success,
}

impl EventType {
    /// All variants, in declaration order — used both for the counter's
    /// backing array size and for `snapshot()` iteration.
    const ALL: [EventType; 25] = [
        EventType::TokenEmpty,
        EventType::TokenTooLarge,
        EventType::Malformed,
        EventType::MalformedJson,
        EventType::WrongTyp,
        EventType::SizeLimitExceeded,
        EventType::AlgorithmNotAllowed,
        EventType::AlgorithmNoneRejected,
        EventType::KeyNotFound,
        EventType::SignatureValidationFailed,
        EventType::JwksUnavailable,
        EventType::MissingClaim,
        EventType::TokenExpired,
        EventType::NotYetValid,
        EventType::IssuedInFuture,
        EventType::IssuerMismatch,
        EventType::IssuerUnknown,
        EventType::AudienceMismatch,
        EventType::ClientIdMismatch,
        EventType::JwksFetchFailed,
        EventType::JwksJsonParseFailed,
        EventType::WellKnownMissingField,
        EventType::WellKnownIssuerMismatch,
        EventType::Interrupted,
        EventType::ValidationSuccess,
    ];

    fn index(self) -> usize {
        match self {
            EventType::TokenEmpty => 0,
            EventType::TokenTooLarge => 1,
            EventType::Malformed => 2,
            EventType::MalformedJson => 3,
            EventType::WrongTyp => 4,
            EventType::SizeLimitExceeded => 5,
            EventType::AlgorithmNotAllowed => 6,
            EventType::AlgorithmNoneRejected => 7,
            EventType::KeyNotFound => 8,
            EventType::SignatureValidationFailed => 9,
            EventType::JwksUnavailable => 10,
            EventType::MissingClaim => 11,
            EventType::TokenExpired => 12,
            EventType::NotYetValid => 13,
            EventType::IssuedInFuture => 14,
            EventType::IssuerMismatch => 15,
            EventType::IssuerUnknown => 16,
            EventType::AudienceMismatch => 17,
            EventType::ClientIdMismatch => 18,
            EventType::JwksFetchFailed => 19,
            EventType::JwksJsonParseFailed => 20,
            EventType::WellKnownMissingField => 21,
            EventType::WellKnownIssuerMismatch => 22,
            EventType::Interrupted => 23,
            EventType::ValidationSuccess => 24,
        }
    }

    /// The category this event belongs to, used by HTTP-layer callers to
    /// pick a status code (e.g. 401 vs 403).
    #[must_use]
    pub fn category(self) -> EventCategory {
        use EventType::{
            AlgorithmNoneRejected, AlgorithmNotAllowed, AudienceMismatch, ClientIdMismatch,
            Interrupted, IssuedInFuture, IssuerMismatch, IssuerUnknown, JwksFetchFailed,
            JwksJsonParseFailed, JwksUnavailable, KeyNotFound, Malformed, MalformedJson,
            MissingClaim, NotYetValid, SignatureValidationFailed, SizeLimitExceeded, TokenEmpty,
            TokenExpired, TokenTooLarge, ValidationSuccess, WellKnownIssuerMismatch,
            WellKnownMissingField, WrongTyp,
        };
        match self {
            TokenEmpty | TokenTooLarge | Malformed | MalformedJson | WrongTyp
            | SizeLimitExceeded => EventCategory::InvalidStructure,
            AlgorithmNotAllowed | AlgorithmNoneRejected | KeyNotFound
            | SignatureValidationFailed | JwksUnavailable => EventCategory::InvalidSignature,
            MissingClaim | TokenExpired | NotYetValid | IssuedInFuture | IssuerMismatch
            | IssuerUnknown | AudienceMismatch | ClientIdMismatch => EventCategory::SemanticIssues,
            JwksFetchFailed | JwksJsonParseFailed | WellKnownMissingField
            | WellKnownIssuerMismatch | Interrupted => EventCategory::Infrastructure,
            ValidationSuccess => EventCategory::Success,
        }
    }
}

/// Wait-free per-event-type counters.
///
/// Increments are `Ordering::Relaxed`: no total order across event types
/// is required or provided (spec §4.2).
pub struct SecurityEventCounter {
    counts: Box<[AtomicU64; 25]>,
}

impl Default for SecurityEventCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityEventCounter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: Box::new(std::array::from_fn(|_| AtomicU64::new(0))),
        }
    }

    pub fn increment(&self, event: EventType) {
        self.counts[event.index()].fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self, event: EventType) -> u64 {
        self.counts[event.index()].load(Ordering::Relaxed)
    }

    /// Point-in-time read of every counter, for host metrics export.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<EventType, u64> {
        EventType::ALL
            .iter()
            .map(|&e| (e, self.get(e)))
            .collect()
    }

    /// Reset every counter to zero. Only meaningful in tests.
    #[cfg(feature = "test-util")]
    pub fn reset(&self) {
        for c in self.counts.iter() {
            c.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_are_independent_per_event_type() {
        let counter = SecurityEventCounter::new();
        counter.increment(EventType::TokenExpired);
        counter.increment(EventType::TokenExpired);
        counter.increment(EventType::AudienceMismatch);

        assert_eq!(counter.get(EventType::TokenExpired), 2);
        assert_eq!(counter.get(EventType::AudienceMismatch), 1);
        assert_eq!(counter.get(EventType::ValidationSuccess), 0);
    }

    #[test]
    fn snapshot_covers_every_event_type() {
        let counter = SecurityEventCounter::new();
        counter.increment(EventType::ValidationSuccess);
        let snap = counter.snapshot();
        assert_eq!(snap.len(), 25);
        assert_eq!(snap[&EventType::ValidationSuccess], 1);
    }

    #[test]
    fn category_mapping_matches_taxonomy() {
        assert_eq!(
            EventType::TokenExpired.category(),
            EventCategory::SemanticIssues
        );
        assert_eq!(
            EventType::AlgorithmNoneRejected.category(),
            EventCategory::InvalidSignature
        );
        assert_eq!(
            EventType::JwksFetchFailed.category(),
            EventCategory::Infrastructure
        );
        assert_eq!(
            EventType::ValidationSuccess.category(),
            EventCategory::Success
        );
    }

    #[test]
    #[cfg(feature = "test-util")]
    fn reset_clears_all_counters() {
        let counter = SecurityEventCounter::new();
        counter.increment(EventType::MissingClaim);
        counter.reset();
        assert_eq!(counter.get(EventType::MissingClaim), 0);
    }
}
