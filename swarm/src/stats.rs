use std::time::Instant;

/// Bytes received from one neighbor.
///
/// `round` only covers the current measuring window, which is restarted
/// whenever the neighbor is choked or unchoked so the rate reflects the
/// current unchoke period.
#[derive(Debug, Clone, Copy)]
pub struct RateCounter {
    total: u64,
    round: u64,
    window_start: Instant,
}

impl Default for RateCounter {
    fn default() -> Self {
        Self {
            total: 0,
            round: 0,
            window_start: Instant::now(),
        }
    }
}

impl RateCounter {

    pub fn add(&mut self, n: u64) {
        self.total += n;
        self.round += n;
    }

    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    pub fn reset_at(&mut self, now: Instant) {
        self.round = 0;
        self.window_start = now;
    }

    // Bytes per second over the current window.
    pub fn rate_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.window_start).as_secs_f64();
        if elapsed <= f64::EPSILON {
            return 0.0;
        }
        self.round as f64 / elapsed
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn round(&self) -> u64 {
        self.round
    }

}

impl std::ops::AddAssign<u64> for RateCounter {
    fn add_assign(&mut self, n: u64) {
        self.add(n);
    }
}
