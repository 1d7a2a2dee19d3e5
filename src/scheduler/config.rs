//! # Scheduler Configuration Module
//!
//! Configuration structures and a builder for the batching scheduler.
//!
//! ## Key Components
//!
//! - `SchedulerConfig`: time budget and batching limits for every submit call
//! - `SchedulerConfigBuilder`: Builder pattern implementation for easier configuration

use std::time::Duration;

/// Most inputs a single embeddings request may carry
pub const DEFAULT_MAX_BATCH_ITEMS: usize = 2000;

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Longest a submit call may take, counted from when it is made
    pub time_budget: Duration,

    /// Most records in one sub-batch
    pub max_batch_items: usize,

    /// Send a single record first while no limits are known
    pub probe_unconstrained: bool,

    /// How often a sub-batch rejected with HTTP 429 is sent again
    pub max_rate_limit_retries: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            time_budget: Duration::from_secs(60),
            max_batch_items: DEFAULT_MAX_BATCH_ITEMS,
            probe_unconstrained: true,
            max_rate_limit_retries: 1,
        }
    }
}

/// Builder for SchedulerConfig
#[derive(Debug, Default)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
        }
    }

    /// Set the per-call time budget
    pub fn time_budget(mut self, time_budget: Duration) -> Self {
        self.config.time_budget = time_budget;
        self
    }

    /// Set the maximum number of records per sub-batch
    pub fn max_batch_items(mut self, max_batch_items: usize) -> Self {
        self.config.max_batch_items = max_batch_items.max(1);
        self
    }

    /// Enable or disable the single-record probe
    pub fn probe_unconstrained(mut self, probe: bool) -> Self {
        self.config.probe_unconstrained = probe;
        self
    }

    /// Set how often a rate-limited sub-batch is retried
    pub fn max_rate_limit_retries(mut self, retries: usize) -> Self {
        self.config.max_rate_limit_retries = retries;
        self
    }

    /// Build the configuration
    pub fn build(self) -> SchedulerConfig {
        self.config
    }
}

impl SchedulerConfig {
    /// Create a new builder
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.time_budget, Duration::from_secs(60));
        assert_eq!(config.max_batch_items, DEFAULT_MAX_BATCH_ITEMS);
        assert!(config.probe_unconstrained);
        assert_eq!(config.max_rate_limit_retries, 1);
    }

    #[test]
    fn test_builder() {
        let config = SchedulerConfig::builder()
            .time_budget(Duration::from_millis(500))
            .max_batch_items(0)
            .probe_unconstrained(false)
            .max_rate_limit_retries(3)
            .build();

        assert_eq!(config.time_budget, Duration::from_millis(500));
        assert_eq!(config.max_batch_items, 1);
        assert!(!config.probe_unconstrained);
        assert_eq!(config.max_rate_limit_retries, 3);
    }
}
