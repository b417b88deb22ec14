use std::time::Duration;

use crate::config::SourceSettings;

/// Persistent per-source state, owned exclusively by that source's fetch
/// controller for the lifetime of the process.
///
/// Built per source from the immutable configuration template; two sources
/// never share a state record, so no synchronization is needed.
#[derive(Debug, Clone)]
pub struct SourceState {
    /// History table this state belongs to.
    pub source_id: String,

    /// Clock of the newest fully forwarded sample, epoch seconds on the
    /// source's clock. Zero means uninitialized.
    pub watermark: i64,

    /// Max rows requested per cycle; mutated only by the rate controller.
    pub limit: i64,

    /// Step applied when the rate controller grows or shrinks the limit.
    pub increment: i64,

    /// Seconds subtracted from the source clock when the watermark is first
    /// initialized.
    pub lag_seconds: i64,

    /// Sleep between cycles that found less data than the limit.
    pub interval: Duration,

    /// Per-query timeout; zero disables it.
    pub query_timeout: Duration,

    /// Skip the query/forward step entirely (timing dry-run).
    pub profile_only: bool,

    /// Forward per-cycle instrumentation through the sink.
    pub metrics_enabled: bool,

    /// Prefix prepended to every forwarded metric name; either empty or
    /// ending in exactly one dot.
    pub prefix: String,

    point_rate: f64,
    ratio_sum: f64,
    ratio_count: u64,
}

impl SourceState {
    pub fn new(source_id: &str, settings: &SourceSettings, prefix: &str, metrics_enabled: bool) -> Self {
        Self {
            source_id: source_id.to_string(),
            watermark: 0,
            limit: settings.batch_size,
            increment: settings.increment,
            lag_seconds: settings.lag.as_secs() as i64,
            interval: settings.interval,
            query_timeout: settings.query_timeout,
            profile_only: settings.profile_only,
            metrics_enabled,
            prefix: prefix.to_string(),
            point_rate: 0.0,
            ratio_sum: 0.0,
            ratio_count: 0,
        }
    }

    /// Samples per millisecond observed in the previous cycle.
    pub fn point_rate(&self) -> f64 {
        self.point_rate
    }

    /// Lifetime mean of cycle-over-cycle rate ratios.
    ///
    /// NaN until two consecutive non-zero rates have been observed; callers
    /// must guard with `is_nan`. The accumulators are never reset, so this is
    /// a lifetime mean rather than a recent window.
    pub fn avg_ratio(&self) -> f64 {
        self.ratio_sum / self.ratio_count as f64
    }

    /// Records the forwarding rate of the cycle that just completed.
    ///
    /// The first non-zero reading establishes a baseline and contributes no
    /// ratio; afterwards each pair of consecutive non-zero rates adds
    /// `current / previous` to the running mean. The stored rate is always
    /// overwritten.
    pub fn record_rate(&mut self, rate: f64) {
        if self.point_rate != 0.0 && rate != 0.0 {
            self.ratio_sum += rate / self.point_rate;
            self.ratio_count += 1;
        }

        self.point_rate = rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SourceSettings {
        SourceSettings {
            interval: Duration::from_secs(30),
            lag: Duration::from_secs(60),
            batch_size: 1000,
            increment: 100,
            query_timeout: Duration::ZERO,
            profile_only: false,
        }
    }

    #[test]
    fn test_new_state_is_uninitialized() {
        let state = SourceState::new("history", &settings(), "", false);

        assert_eq!(state.watermark, 0);
        assert_eq!(state.limit, 1000);
        assert_eq!(state.lag_seconds, 60);
        assert!(state.avg_ratio().is_nan());
    }

    #[test]
    fn test_first_rate_is_baseline_only() {
        let mut state = SourceState::new("history", &settings(), "", false);

        state.record_rate(2.0);

        assert_eq!(state.point_rate(), 2.0);
        assert!(state.avg_ratio().is_nan());
    }

    #[test]
    fn test_consecutive_rates_accumulate_ratios() {
        let mut state = SourceState::new("history", &settings(), "", false);

        state.record_rate(2.0);
        state.record_rate(4.0); // ratio 2.0
        state.record_rate(4.0); // ratio 1.0

        assert_eq!(state.point_rate(), 4.0);
        assert!((state.avg_ratio() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_rate_contributes_no_ratio() {
        let mut state = SourceState::new("history", &settings(), "", false);

        state.record_rate(2.0);
        state.record_rate(0.0);
        state.record_rate(3.0);

        // Neither transition through zero produced a ratio.
        assert!(state.avg_ratio().is_nan());
        assert_eq!(state.point_rate(), 3.0);
    }
}
