//! Per-stage timing for pipeline runs.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Wall-clock timing of one preprocessing invocation, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreprocessTiming {
    pub transpose_ms: f64,
    pub crop_ms: f64,
    pub normalize_ms: f64,
    pub resample_ms: f64,
    pub total_ms: f64,
    /// Whether the normalize/resample stages ran on the GPU.
    pub used_gpu: bool,
}

/// Simple stage timer.
pub struct StageTimer {
    start: Instant,
}

impl StageTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Milliseconds since the timer started.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Elapsed milliseconds, restarting the timer for the next stage.
    pub fn lap_ms(&mut self) -> f64 {
        let elapsed = self.elapsed_ms();
        self.start = Instant::now();
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lap_resets_the_clock() {
        let mut timer = StageTimer::start();
        let first = timer.lap_ms();
        let second = timer.lap_ms();
        assert!(first >= 0.0);
        assert!(second >= 0.0);
        // The second lap measures only its own interval, which is short.
        assert!(second < 1000.0);
    }

    #[test]
    fn test_timing_serializes_round_trip() {
        let timing = PreprocessTiming {
            transpose_ms: 1.0,
            crop_ms: 2.0,
            normalize_ms: 3.0,
            resample_ms: 4.0,
            total_ms: 10.0,
            used_gpu: true,
        };
        let json = serde_json::to_string(&timing).unwrap();
        let back: PreprocessTiming = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total_ms, 10.0);
        assert!(back.used_gpu);
    }
}
