use std::collections::VecDeque;
use std::time::Duration;

/// Default number of samples kept by [`RollingStats`].
pub const DEFAULT_WINDOW: usize = 50;

/// Rolling mean over the most recent demux+send cycle durations.
///
/// Length-prefixed input carries no capture clock, so the stream advances
/// its timestamp by this average instead of by the raw cycle time, which
/// jitters with the burstiness of the source.
///
/// The running sum is maintained on push/evict so [`average`](Self::average)
/// is O(1) and defined before the window has filled.
#[derive(Debug, Clone)]
pub struct RollingStats {
    samples: VecDeque<u64>,
    capacity: usize,
    sum: u128,
}

impl RollingStats {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0,
        }
    }

    /// Record one observation, evicting the oldest once the window is full.
    pub fn push(&mut self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        if self.samples.len() == self.capacity {
            if let Some(oldest) = self.samples.pop_front() {
                self.sum -= oldest as u128;
            }
        }
        self.samples.push_back(nanos);
        self.sum += nanos as u128;
    }

    /// Mean of the samples in the window, or zero when empty.
    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let mean = self.sum / self.samples.len() as u128;
        Duration::from_nanos(mean as u64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.sum = 0;
    }
}

impl Default for RollingStats {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
