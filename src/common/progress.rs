//! Progress reporting helpers: percent/ETA bookkeeping and nested
//! sub-range remapping for multi-phase operations.

use std::time::Instant;

/// Progress callbacks receive `(percent, units, eta_seconds)` where `units`
/// is whatever the caller counts (bytes, rows, rsIDs).
pub type ProgressFn<'a> = &'a mut dyn FnMut(u8, u64, f64);

/// Remaps an inner 0..=100 progress range into an outer `[lo, hi]` slice.
///
/// Lets a sub-phase report its own 0-100 while the caller sees, say, 20-95.
pub struct SubRange<'a> {
    outer: &'a mut dyn FnMut(u8, u64, f64),
    lo: u8,
    hi: u8,
}

impl<'a> SubRange<'a> {
    pub fn new(outer: &'a mut dyn FnMut(u8, u64, f64), lo: u8, hi: u8) -> Self {
        debug_assert!(lo <= hi && hi <= 100);
        Self { outer, lo, hi }
    }

    pub fn report(&mut self, percent: u8, units: u64, eta_seconds: f64) {
        let span = (self.hi - self.lo) as u32;
        let mapped = self.lo as u32 + span * percent.min(100) as u32 / 100;
        (self.outer)(mapped as u8, units, eta_seconds);
    }
}

/// Running-average rate estimator used for ETA computation.
#[derive(Debug)]
pub struct RateMeter {
    started: Instant,
}

impl RateMeter {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Seconds remaining, from the average rate since start.
    ///
    /// Returns 0.0 until any progress has been made or once done.
    pub fn eta_seconds(&self, done: u64, total: u64) -> f64 {
        if done == 0 || total == 0 || done >= total {
            return 0.0;
        }
        let elapsed = self.started.elapsed().as_secs_f64().max(1e-3);
        let rate = done as f64 / elapsed;
        (total - done) as f64 / rate
    }
}

/// Integer percentage of `done` over `total`, clamped to 100.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (done.saturating_mul(100) / total).min(100) as u8
}

/// Render an ETA as `MM:SS`, or `HH:MM:SS` beyond an hour.
pub fn format_eta(eta_seconds: f64) -> String {
    let total = eta_seconds.max(0.0) as u64;
    let (minutes, seconds) = (total / 60, total % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}
