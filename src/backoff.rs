//! Idle backoff for polling workers.
//!
//! Each worker owns one [`Backoff`]. Consecutive empty polls grow the wait
//! geometrically until `max_interval`; a successful poll calls
//! [`Backoff::reset`] and the next idle wait starts from `initial_interval`
//! again.

use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    /// Carried for configuration compatibility; reaching it has no effect.
    pub max_elapsed_time: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            initial_interval: Duration::from_millis(1),
            multiplier: 2.0,
            max_interval: Duration::from_millis(10),
            max_elapsed_time: Duration::from_millis(10),
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<()> {
        if self.initial_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "backoff initial interval must be positive".into(),
            ));
        }
        if !(self.multiplier > 1.0) || !self.multiplier.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "backoff multiplier must be finite and greater than 1, got {}",
                self.multiplier
            )));
        }
        if self.initial_interval > self.max_interval {
            return Err(Error::InvalidConfig(format!(
                "backoff initial interval {:?} exceeds max interval {:?}",
                self.initial_interval, self.max_interval
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial_interval;
        Backoff { config, current }
    }

    /// Returns the wait to apply now and advances the sequence.
    pub fn next(&mut self) -> Duration {
        let wait = self.current;
        self.current = self
            .current
            .mul_f64(self.config.multiplier)
            .min(self.config.max_interval);
        wait
    }

    pub fn reset(&mut self) {
        self.current = self.config.initial_interval;
    }

    pub fn max_elapsed_time(&self) -> Duration {
        self.config.max_elapsed_time
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(BackoffConfig::default())
    }
}
