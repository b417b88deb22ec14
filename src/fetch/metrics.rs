use std::time::Duration;

/// Per-cycle counters: phase timings plus the forwarded-sample count.
///
/// Created fresh (or reset) at the start of each cycle and accumulated
/// additively while it runs. The cycle's owning task is the only writer, so
/// reads are consistent once the cycle completes.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleMetrics {
    conn_time: Duration,
    prep_time: Duration,
    exec_time: Duration,
    iter_time: Duration,
    send_time: Duration,
    sent: u64,
}

impl CycleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zeroes every counter for a new cycle.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn add_conn_time(&mut self, d: Duration) {
        self.conn_time += d;
    }

    pub fn add_prep_time(&mut self, d: Duration) {
        self.prep_time += d;
    }

    pub fn add_exec_time(&mut self, d: Duration) {
        self.exec_time += d;
    }

    pub fn add_iter_time(&mut self, d: Duration) {
        self.iter_time += d;
    }

    pub fn add_send_time(&mut self, d: Duration) {
        self.send_time += d;
    }

    pub fn add_sent(&mut self, n: u64) {
        self.sent += n;
    }

    /// Time spent acquiring the database connection.
    pub fn conn_time(&self) -> Duration {
        self.conn_time
    }

    /// Time spent preparing the windowed query.
    pub fn prep_time(&self) -> Duration {
        self.prep_time
    }

    /// Time spent executing the windowed query.
    pub fn exec_time(&self) -> Duration {
        self.exec_time
    }

    /// Time spent iterating the result set, forwarding included.
    pub fn iter_time(&self) -> Duration {
        self.iter_time
    }

    /// Time spent in sink send calls.
    pub fn send_time(&self) -> Duration {
        self.send_time
    }

    /// Samples forwarded this cycle.
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_additively() {
        let mut m = CycleMetrics::new();

        m.add_exec_time(Duration::from_millis(10));
        m.add_exec_time(Duration::from_millis(5));
        m.add_sent(3);
        m.add_sent(2);

        assert_eq!(m.exec_time(), Duration::from_millis(15));
        assert_eq!(m.sent(), 5);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let mut m = CycleMetrics::new();
        m.add_conn_time(Duration::from_millis(1));
        m.add_iter_time(Duration::from_millis(2));
        m.add_sent(10);

        m.reset();

        assert_eq!(m.conn_time(), Duration::ZERO);
        assert_eq!(m.iter_time(), Duration::ZERO);
        assert_eq!(m.sent(), 0);
    }
}
