//! Per-turn latency accounting.
//!
//! `start_processing` is stamped when a final user transcript arrives;
//! the first outbound audio write of the turn calls `stop_processing`,
//! appending the elapsed time. Subsequent writes in the same turn are
//! no-ops until the next `start_processing`.

use std::time::Instant;

#[derive(Debug)]
pub struct Metrics {
    started_at: Instant,
    processed: bool,
    latencies_ms: Vec<f64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            processed: true,
            latencies_ms: Vec::new(),
        }
    }

    pub fn start_processing(&mut self) {
        self.started_at = Instant::now();
        self.processed = false;
    }

    pub fn stop_processing(&mut self) {
        if !self.processed {
            self.latencies_ms
                .push(self.started_at.elapsed().as_secs_f64() * 1000.0);
        }
        self.processed = true;
    }

    pub fn average_latency(&self) -> f64 {
        if self.latencies_ms.is_empty() {
            return 0.0;
        }
        self.latencies_ms.iter().sum::<f64>() / self.latencies_ms.len() as f64
    }

    pub fn samples(&self) -> &[f64] {
        &self.latencies_ms
    }
}
