use tracing::info;

/// Receives the completed fraction of a run, in [0, 1].
pub trait ProgressReporter: Send {
    fn report(&mut self, fraction: f64);
}

impl<F: FnMut(f64) + Send> ProgressReporter for F {
    fn report(&mut self, fraction: f64) {
        self(fraction)
    }
}

/// Logs progress at every 10% step crossed.
#[derive(Debug, Default)]
pub struct LoggingProgress {
    last_decile: Option<u32>,
}

impl LoggingProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for LoggingProgress {
    fn report(&mut self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        let decile = (fraction * 10.0).floor() as u32;
        if self.last_decile.is_some_and(|d| d >= decile) {
            return;
        }
        self.last_decile = Some(decile);
        info!(percent = decile * 10, "progress");
    }
}
