//! Coarse stage progress reporting.

use log::info;

/// Receives `(stage, fraction)` updates while a pipeline runs.
///
/// Every stage reports `0.0` when it starts and `1.0` when it succeeds, with
/// optional updates in between. A failed stage never reports `1.0`.
pub trait ProgressObserver {
    fn report(&mut self, stage: &str, fraction: f64);
}

/// Default observer: one `info!` line per update.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn report(&mut self, stage: &str, fraction: f64) {
        info!("{stage}: {:.0}%", 100.0 * fraction.clamp(0.0, 1.0));
    }
}

impl<F: FnMut(&str, f64)> ProgressObserver for F {
    fn report(&mut self, stage: &str, fraction: f64) {
        self(stage, fraction)
    }
}
