//! Worker restart policy

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::duration_millis;

/// Delay applied before a faulted worker is replaced
///
/// Repeated faults in the same worker slot back off exponentially with
/// jitter so that a persistently failing initializer does not spin.
///
/// # Example
///
/// ```
/// use workpool::RestartPolicy;
/// use std::time::Duration;
///
/// let policy = RestartPolicy::default()
///     .with_initial_delay(Duration::from_millis(10))
///     .with_max_delay(Duration::from_secs(1))
///     .with_jitter(0.0);
///
/// assert_eq!(policy.delay_for_restart(1), Duration::from_millis(10));
/// assert_eq!(policy.delay_for_restart(2), Duration::from_millis(20));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RestartPolicy {
    /// Delay before the first replacement of a slot
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,

    /// Upper bound for the delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Backoff multiplier per additional restart of the same slot
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }
}

impl RestartPolicy {
    /// Replace faulted workers without waiting
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Set the initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff coefficient
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient.max(1.0);
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before the `restart`-th replacement (1-based) of a worker slot
    pub fn delay_for_restart(&self, restart: u32) -> Duration {
        if restart == 0 {
            return Duration::ZERO;
        }

        // Deserialized policies skip the builder clamps
        let coefficient = self.backoff_coefficient.max(1.0);
        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let exponent = (restart - 1).min(i32::MAX as u32) as i32;
        let base = self.initial_delay.as_secs_f64() * coefficient.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = if jitter > 0.0 && capped > 0.0 {
            let jitter_range = capped * jitter;
            let offset = rand::thread_rng().gen_range(-jitter_range..jitter_range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::try_from_secs_f64(jittered).unwrap_or(self.max_delay)
    }
}
