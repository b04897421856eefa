use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash as _, Hasher as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

const DEFAULT_CAPACITY: usize = 10_000;

struct Stripe {
    slots: Box<[AtomicU64]>,
    cursor: AtomicU64,
}

impl Stripe {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            cursor: AtomicU64::new(0),
        }
    }

    fn record(&self, micros: u64) {
        let capacity = self.slots.len() as u64;
        let pos = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.slots[(pos % capacity) as usize].store(micros, Ordering::Relaxed);
    }

    /// Valid sample count and a copy of the valid slots. Best-effort: a
    /// concurrent writer may still be mid-write to one of the slots we
    /// read, in which case we observe either the old or new sample, never
    /// a torn one (each slot is a single atomic word).
    fn snapshot(&self, capacity: usize, out: &mut Vec<u64>) {
        let cursor = self.cursor.load(Ordering::Acquire);
        let valid = cursor.min(capacity as u64) as usize;
        for slot in &self.slots[..valid] {
            out.push(slot.load(Ordering::Relaxed));
        }
    }
}

/// Percentile readout over a [`StripedRingBuffer`] snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStatistics {
    pub sample_count: usize,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

impl RingStatistics {
    const EMPTY: RingStatistics = RingStatistics {
        sample_count: 0,
        p50: 0,
        p95: 0,
        p99: 0,
    };
}

/// A lock-free, striped sliding window over fixed-capacity rings of
/// microsecond-duration samples.
///
/// Writers hash their [`ThreadId`] to a stripe, so concurrent `record`
/// calls from different threads rarely contend on the same stripe's
/// cursor. `statistics()` copies every stripe's valid region into a
/// scratch buffer and sorts once; it is linearizable with `record` on the
/// same stripe, best-effort across stripes (spec §4.3).
pub struct StripedRingBuffer {
    stripes: Vec<Stripe>,
    capacity: usize,
}

impl StripedRingBuffer {
    /// `stripe_count` defaults to the available parallelism; `capacity`
    /// defaults to 10,000 samples per stripe.
    #[must_use]
    pub fn new(stripe_count: usize, capacity: usize) -> Self {
        let stripe_count = stripe_count.max(1);
        let capacity = capacity.max(1);
        Self {
            stripes: (0..stripe_count).map(|_| Stripe::new(capacity)).collect(),
            capacity,
        }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        let stripe_count = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        Self::new(stripe_count, DEFAULT_CAPACITY)
    }

    fn stripe_for(&self, thread_id: ThreadId) -> &Stripe {
        let mut hasher = DefaultHasher::new();
        thread_id.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.stripes.len();
        &self.stripes[idx]
    }

    pub fn record(&self, micros: u64) {
        self.stripe_for(std::thread::current().id()).record(micros);
    }

    #[must_use]
    pub fn statistics(&self) -> RingStatistics {
        let mut samples = Vec::new();
        for stripe in &self.stripes {
            stripe.snapshot(self.capacity, &mut samples);
        }
        if samples.is_empty() {
            return RingStatistics::EMPTY;
        }
        samples.sort_unstable();
        // Nearest-rank method: the p-th percentile is the ceil(p * n)-th
        // smallest sample (1-indexed).
        let at = |p: f64| -> u64 {
            let rank = (p * samples.len() as f64).ceil() as usize;
            let idx = rank.saturating_sub(1).min(samples.len() - 1);
            samples[idx]
        };
        RingStatistics {
            sample_count: samples.len(),
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_has_zeroed_statistics() {
        let buf = StripedRingBuffer::new(4, 16);
        assert_eq!(buf.statistics(), RingStatistics::EMPTY);
    }

    #[test]
    fn percentiles_over_known_distribution() {
        let buf = StripedRingBuffer::new(1, 1000);
        for v in 1..=1000u64 {
            buf.record(v);
        }
        let stats = buf.statistics();
        assert_eq!(stats.sample_count, 1000);
        assert_eq!(stats.p50, 500);
        assert_eq!(stats.p95, 950);
        assert_eq!(stats.p99, 990);
    }

    #[test]
    fn ring_wraps_and_keeps_capacity_bound() {
        let buf = StripedRingBuffer::new(1, 10);
        for v in 1..=25u64 {
            buf.record(v);
        }
        let stats = buf.statistics();
        assert_eq!(stats.sample_count, 10);
        // Only the most recent 10 samples (16..=25) remain.
        assert_eq!(stats.p50, 20);
    }

    #[test]
    fn stripes_independently_bound_samples() {
        let buf = StripedRingBuffer::new(4, 16);
        for v in 0..200u64 {
            buf.record(v);
        }
        let stats = buf.statistics();
        assert!(stats.sample_count <= 64);
        assert!(stats.sample_count > 0);
    }
}
