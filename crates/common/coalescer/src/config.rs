use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(8);
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(20);
pub const DEFAULT_MAX_USERS: usize = 20;

/// The point in time from which `max_wait` is measured.
///
/// The default, [MaxWaitAnchor::OpenedAt], bounds the latency of any batch to `max_wait`
/// plus the delay to the next arrival. [MaxWaitAnchor::ScheduledStart] measures from
/// `deadline - base_delay` instead, as the reference algorithm does, at the cost of that bound.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxWaitAnchor {
    /// The arrival that opened the batch.
    #[default]
    OpenedAt,

    /// The current deadline minus the base delay.
    ///
    /// This point moves forward each time the deadline is extended,
    /// so a steady burst of arrivals can postpone the forced flush indefinitely.
    ScheduledStart,
}

/// The parameters for the coalescing process.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CoalescerConfig {
    base_delay: Duration,
    min_delay: Duration,
    max_wait: Duration,
    max_users: usize,
    max_wait_anchor: MaxWaitAnchor,
    notified_capacity: Option<usize>,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        CoalescerConfig {
            base_delay: DEFAULT_BASE_DELAY,
            min_delay: DEFAULT_MIN_DELAY,
            max_wait: DEFAULT_MAX_WAIT,
            max_users: DEFAULT_MAX_USERS,
            max_wait_anchor: MaxWaitAnchor::default(),
            notified_capacity: None,
        }
    }
}

impl CoalescerConfig {
    pub fn builder() -> CoalescerConfigBuilder {
        CoalescerConfigBuilder::default()
    }

    /// Get the initial wait window of a new batch.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Get the shortest wait left to a batch after any arrival.
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Get the longest a batch can be postponed by new arrivals.
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Get the maximum number of subjects emitted per batch.
    pub fn max_users(&self) -> usize {
        self.max_users
    }

    pub fn max_wait_anchor(&self) -> MaxWaitAnchor {
        self.max_wait_anchor
    }

    /// Get the maximum number of notified subjects remembered, if bounded.
    pub fn notified_capacity(&self) -> Option<usize> {
        self.notified_capacity
    }
}

#[derive(thiserror::Error, Debug, Eq, PartialEq)]
pub enum ConfigError {
    #[error("max_users must be at least 1")]
    NoUsersPerBatch,

    #[error("notified_capacity must be at least 1 when set")]
    EmptyNotifiedCapacity,
}

/// Used to configure the parameters for coalescing.
///
/// Any parameter left unset keeps its default value.
#[derive(Debug, Default)]
pub struct CoalescerConfigBuilder {
    config: CoalescerConfig,
}

impl CoalescerConfigBuilder {
    pub fn base_delay(self, base_delay: Duration) -> Self {
        Self {
            config: CoalescerConfig {
                base_delay,
                ..self.config
            },
        }
    }

    pub fn min_delay(self, min_delay: Duration) -> Self {
        Self {
            config: CoalescerConfig {
                min_delay,
                ..self.config
            },
        }
    }

    pub fn max_wait(self, max_wait: Duration) -> Self {
        Self {
            config: CoalescerConfig {
                max_wait,
                ..self.config
            },
        }
    }

    pub fn max_users(self, max_users: usize) -> Self {
        Self {
            config: CoalescerConfig {
                max_users,
                ..self.config
            },
        }
    }

    pub fn max_wait_anchor(self, max_wait_anchor: MaxWaitAnchor) -> Self {
        Self {
            config: CoalescerConfig {
                max_wait_anchor,
                ..self.config
            },
        }
    }

    pub fn notified_capacity(self, notified_capacity: Option<usize>) -> Self {
        Self {
            config: CoalescerConfig {
                notified_capacity,
                ..self.config
            },
        }
    }

    /// Finalise the coalescing parameters.
    pub fn build(self) -> Result<CoalescerConfig, ConfigError> {
        let config = self.config;
        if config.max_users == 0 {
            return Err(ConfigError::NoUsersPerBatch);
        }
        if config.notified_capacity == Some(0) {
            return Err(ConfigError::EmptyNotifiedCapacity);
        }
        Ok(config)
    }
}
