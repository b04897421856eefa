use std::collections::{HashMap, HashSet};
use std::time::Instant;

use polyjwt_metrics::{RingStatistics, StripedRingBuffer};

/// Optional per-stage timing wrapper around the validation pipeline (spec
/// §4.12). Recording is zero-cost when a stage isn't enabled: no ring
/// buffer is allocated for it.
pub struct HttpMetricsMonitor {
    rings: HashMap<&'static str, StripedRingBuffer>,
}

impl HttpMetricsMonitor {
    #[must_use]
    pub fn new(enabled_stages: impl IntoIterator<Item = &'static str>) -> Self {
        let rings = enabled_stages
            .into_iter()
            .map(|stage| (stage, StripedRingBuffer::with_defaults()))
            .collect();
        Self { rings }
    }

    #[must_use]
    pub fn enabled_stages(&self) -> HashSet<&'static str> {
        self.rings.keys().copied().collect()
    }

    /// Start a timer for `stage`; recording is a no-op (and costs nothing
    /// beyond the `Option` check) if `stage` wasn't enabled.
    #[must_use]
    pub fn start(&self, stage: &'static str) -> StageTimer<'_> {
        StageTimer {
            monitor: self,
            stage,
            started: Instant::now(),
        }
    }

    fn record(&self, stage: &'static str, micros: u64) {
        if let Some(ring) = self.rings.get(stage) {
            ring.record(micros);
        }
    }

    #[must_use]
    pub fn statistics(&self, stage: &str) -> Option<RingStatistics> {
        self.rings.get(stage).map(StripedRingBuffer::statistics)
    }
}

/// RAII timer returned by [`HttpMetricsMonitor::start`]; records the
/// elapsed microseconds into its stage's ring on drop.
pub struct StageTimer<'a> {
    monitor: &'a HttpMetricsMonitor,
    stage: &'static str,
    started: Instant,
}

impl Drop for StageTimer<'_> {
    fn drop(&mut self) {
        let micros = self.started.elapsed().as_micros().min(u128::from(u64::MAX)) as u64;
        self.monitor.record(self.stage, micros);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_stage_records_nothing() {
        let monitor = HttpMetricsMonitor::new(["validate"]);
        {
            let _timer = monitor.start("decode");
        }
        assert!(monitor.statistics("decode").is_none());
    }

    #[test]
    fn enabled_stage_accumulates_samples() {
        let monitor = HttpMetricsMonitor::new(["validate"]);
        {
            let _timer = monitor.start("validate");
        }
        let stats = monitor.statistics("validate").unwrap();
        assert_eq!(stats.sample_count, 1);
    }
}
