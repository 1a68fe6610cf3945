//! Fixed-timestep accumulator.
//!
//! Wall-clock wake-ups feed elapsed time in; whole simulation steps come
//! out. A late wake-up yields several catch-up steps, an early one yields
//! none, so the simulation rate never depends on timer jitter.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FixedTimestep {
    dt: f64,
    accumulator: f64,
    tick: u64,
}

impl FixedTimestep {
    /// `tick_hz` of zero is treated as one.
    pub fn new(tick_hz: u32) -> Self {
        Self::with_dt(1.0 / f64::from(tick_hz.max(1)))
    }

    pub fn with_dt(dt: f64) -> Self {
        Self {
            dt,
            accumulator: 0.0,
            tick: 0,
        }
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Ticks run so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Time carried over to the next wake-up.
    pub fn remainder(&self) -> f64 {
        self.accumulator
    }

    pub fn accumulate(&mut self, elapsed: Duration) {
        self.accumulate_secs(elapsed.as_secs_f64());
    }

    pub fn accumulate_secs(&mut self, elapsed: f64) {
        if elapsed.is_finite() && elapsed > 0.0 {
            self.accumulator += elapsed;
        }
    }

    /// Consumes one `dt` if available and returns the new tick number.
    pub fn next_step(&mut self) -> Option<u64> {
        if self.accumulator < self.dt {
            return None;
        }
        self.accumulator -= self.dt;
        self.tick += 1;
        Some(self.tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(ts: &mut FixedTimestep) -> Vec<u64> {
        std::iter::from_fn(|| ts.next_step()).collect()
    }

    #[test]
    fn late_wake_up_runs_catch_up_steps() {
        let mut ts = FixedTimestep::new(30);
        ts.accumulate(Duration::from_millis(80));
        assert_eq!(drain(&mut ts), vec![1, 2]);
        assert!((ts.remainder() - (0.08 - 2.0 / 30.0)).abs() < 1e-9);
        assert!((ts.remainder() - 0.01333).abs() < 1e-4);
    }

    #[test]
    fn early_wake_ups_accumulate_until_a_step_is_due() {
        let mut ts = FixedTimestep::new(30);
        for _ in 0..3 {
            ts.accumulate(Duration::from_millis(10));
            assert!(ts.next_step().is_none());
        }
        ts.accumulate(Duration::from_millis(10));
        assert_eq!(ts.next_step(), Some(1));
        assert_eq!(ts.tick(), 1);
    }

    #[test]
    fn garbage_elapsed_time_is_ignored() {
        let mut ts = FixedTimestep::new(0);
        assert_eq!(ts.dt(), 1.0);
        ts.accumulate_secs(f64::NAN);
        ts.accumulate_secs(-5.0);
        assert_eq!(ts.remainder(), 0.0);
    }
}
