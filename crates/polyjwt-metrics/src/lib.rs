//! Observability primitives for the validation pipeline: a lock-free
//! security-event counter and a striped ring-buffer percentile monitor.
//!
//! Neither type allocates on the hot path once constructed, and neither
//! takes a lock: [`SecurityEventCounter`] is a bank of atomics indexed by
//! [`EventType`], and [`StripedRingBuffer`] spreads writes across
//! per-stripe rings to avoid a single point of contention.

mod events;
mod ring;

pub use events::{EventCategory, EventType, SecurityEventCounter};
pub use ring::{RingStatistics, StripedRingBuffer};
