use std::time::Duration;

/// Client-side knobs for a [`crate::HandoffSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoffConfig {
    /// Period between status polls while a code is displayed.
    pub poll_interval: Duration,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            poll_interval: handoff_core::DEFAULT_POLL_INTERVAL,
        }
    }
}

impl HandoffConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}
