use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
const DEFAULT_MAX_SAMPLES: usize = 100;

/// Sliding-window transfer speed and ETA.
#[derive(Debug)]
pub struct TransferRate {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    max_samples: usize,
}

impl Default for TransferRate {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_SAMPLES)
    }
}

impl TransferRate {
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
            max_samples: max_samples.max(2),
        }
    }

    /// Records `bytes` transferred now.
    pub fn record(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    /// Records `bytes` transferred at `at`. Samples must be recorded in time order.
    pub fn record_at(&mut self, at: Instant, bytes: u64) {
        self.samples.push_back((at, bytes));

        while let Some(&(first, _)) = self.samples.front() {
            if at.duration_since(first) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Average bytes per second over the window; 0 with fewer than two samples.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(&(first, _)), Some(&(last, _))) = (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        let elapsed = last.duration_since(first);
        if self.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }
        let total: u64 = self.samples.iter().map(|&(_, bytes)| bytes).sum();
        total as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining_bytes` at the current rate.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}
