use tracing::debug;

use super::state::SourceState;

/// Ratio above which the limit grows by one increment.
const GROW_THRESHOLD: f64 = 1.5;

/// Ratio below which the limit would shrink by one increment.
const SHRINK_THRESHOLD: f64 = 0.5;

/// Retunes the per-cycle row limit from the lifetime rate-ratio mean.
///
/// Only acts when the just-completed cycle forwarded more rows than the
/// current limit, the one signal that the controller is behind the available
/// volume. At most one adjustment happens per cycle.
///
/// The shrink branch additionally requires `limit <= 0`, which a limit that
/// starts positive and only ever grows can never satisfy; it is kept as
/// documented behavior.
pub fn adjust_limit(state: &mut SourceState, sent: u64) {
    if sent as i64 <= state.limit {
        return;
    }

    let avg_ratio = state.avg_ratio();
    debug!(
        source = %state.source_id,
        avg_ratio,
        sent,
        limit = state.limit,
        "limit check"
    );

    if avg_ratio.is_nan() {
        return;
    }

    if avg_ratio > GROW_THRESHOLD {
        state.limit += state.increment;
        debug!(source = %state.source_id, limit = state.limit, "limit raised");
    } else if avg_ratio < SHRINK_THRESHOLD && state.limit <= 0 {
        state.limit -= state.increment;
        debug!(source = %state.source_id, limit = state.limit, "limit lowered");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::SourceSettings;

    fn state(batch_size: i64, increment: i64) -> SourceState {
        SourceState::new(
            "history",
            &SourceSettings {
                interval: Duration::from_secs(30),
                lag: Duration::from_secs(60),
                batch_size,
                increment,
                query_timeout: Duration::ZERO,
                profile_only: false,
            },
            "",
            false,
        )
    }

    /// Feeds rates whose pairwise ratio is 2.0, driving avg_ratio above the
    /// grow threshold.
    fn warm_up_growing(state: &mut SourceState) {
        state.record_rate(1.0);
        state.record_rate(2.0);
    }

    #[test]
    fn test_grows_once_per_saturated_cycle() {
        let mut s = state(100, 20);
        warm_up_growing(&mut s);

        adjust_limit(&mut s, 150);
        assert_eq!(s.limit, 120);

        s.record_rate(4.0);
        adjust_limit(&mut s, 150);
        assert_eq!(s.limit, 140);
    }

    #[test]
    fn test_no_adjustment_when_under_limit() {
        let mut s = state(100, 20);
        warm_up_growing(&mut s);

        adjust_limit(&mut s, 100);
        assert_eq!(s.limit, 100);

        adjust_limit(&mut s, 40);
        assert_eq!(s.limit, 100);
    }

    #[test]
    fn test_no_adjustment_without_ratio_history() {
        let mut s = state(100, 20);

        adjust_limit(&mut s, 150);

        assert_eq!(s.limit, 100);
    }

    #[test]
    fn test_no_adjustment_in_dead_band() {
        let mut s = state(100, 20);
        s.record_rate(1.0);
        s.record_rate(1.0); // ratio 1.0, inside [0.5, 1.5]

        adjust_limit(&mut s, 150);

        assert_eq!(s.limit, 100);
    }

    #[test]
    fn test_shrink_branch_dead_at_positive_limit() {
        let mut s = state(100, 20);
        s.record_rate(10.0);
        s.record_rate(1.0); // ratio 0.1, below the shrink threshold

        adjust_limit(&mut s, 150);

        // limit > 0, so the shrink branch does not fire.
        assert_eq!(s.limit, 100);
    }

    #[test]
    fn test_shrink_branch_fires_at_nonpositive_limit() {
        let mut s = state(100, 20);
        s.record_rate(10.0);
        s.record_rate(1.0);
        s.limit = 0;

        adjust_limit(&mut s, 150);

        assert_eq!(s.limit, -20);
    }
}
