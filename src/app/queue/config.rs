//! Task queue configuration builder and presets

use std::time::Duration;

use super::types::TaskQueueConfig;

/// Builder for creating task queue configurations
#[derive(Debug, Clone, Default)]
pub struct TaskQueueConfigBuilder {
    config: TaskQueueConfig,
}

impl TaskQueueConfigBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrent_dispatches(mut self, max: usize) -> Self {
        self.config.max_concurrent_dispatches = max;
        self
    }

    pub fn max_dispatches_per_second(mut self, rate: f64) -> Self {
        self.config.max_dispatches_per_second = rate;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Set the backoff range
    pub fn backoff(mut self, min: Duration, max: Duration) -> Self {
        self.config.min_backoff = min;
        self.config.max_backoff = max;
        self
    }

    pub fn schedule_delay(mut self, delay: Duration) -> Self {
        self.config.schedule_delay = delay;
        self
    }

    pub fn dispatch_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.config.dispatch_deadline = deadline;
        self
    }

    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.config.download_timeout = timeout;
        self
    }

    /// Build the configuration
    pub fn build(self) -> TaskQueueConfig {
        self.config
    }
}

/// Configuration presets for different use cases
pub struct ConfigPresets;

impl ConfigPresets {
    /// Serialized dispatch at a polite rate
    pub fn production() -> TaskQueueConfig {
        TaskQueueConfig::default()
    }

    /// Fast dispatch and short backoff for tests
    pub fn testing() -> TaskQueueConfig {
        TaskQueueConfigBuilder::new()
            .max_concurrent_dispatches(1)
            .max_dispatches_per_second(1000.0)
            .max_attempts(3)
            .backoff(Duration::from_millis(10), Duration::from_millis(40))
            .schedule_delay(Duration::ZERO)
            .dispatch_deadline(Some(Duration::from_secs(30)))
            .download_timeout(Duration::from_secs(5))
            .build()
    }
}
