/// Counts reconciliation cycles and decides when the full drift listing runs.
///
/// With a threshold of 3 the listing runs on cycles 3, 6, 9, ...; the counter
/// resets to zero each time so it never overflows.
#[derive(Debug, Clone)]
pub struct RefreshCounter {
    count: u32,
    threshold: u32,
    enabled: bool,
}

impl RefreshCounter {
    /// `threshold` must be non-zero; configuration validation enforces it.
    pub fn new(threshold: u32, enabled: bool) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
            enabled,
        }
    }

    /// Advances one cycle; true when this cycle should list the agents.
    pub fn tick(&mut self) -> bool {
        self.count += 1;
        if self.count < self.threshold {
            return false;
        }
        self.count = 0;
        self.enabled
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}
