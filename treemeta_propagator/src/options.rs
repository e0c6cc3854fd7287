use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which aggregate attributes are maintained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accounting {
    pub tree_size: bool,
    pub tree_time: bool,
}

impl Accounting {
    pub fn enabled() -> Self {
        Self {
            tree_size: true,
            tree_time: true,
        }
    }

    /// Nothing to propagate: time accounting is off and either size
    /// accounting is off too or the size did not change.
    pub fn skips(&self, size_diff: i64) -> bool {
        !self.tree_time && (!self.tree_size || size_diff == 0)
    }

    pub fn is_disabled(&self) -> bool {
        !self.tree_time && !self.tree_size
    }
}

/// Tuning of the asynchronous strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncOptions {
    /// Debounce before a claimed batch is processed.
    pub propagation_delay: Duration,
    /// Pause between two watchdog scans.
    pub watchdog_interval: Duration,
    /// Age after which a changes directory counts as abandoned.
    pub stale_grace_period: Duration,
}

impl Default for AsyncOptions {
    fn default() -> Self {
        Self {
            propagation_delay: Duration::ZERO,
            watchdog_interval: Duration::from_secs(DEFAULT_WATCHDOG_INTERVAL_SECS),
            stale_grace_period: Duration::from_secs(DEFAULT_STALE_GRACE_PERIOD_SECS),
        }
    }
}

const DEFAULT_WATCHDOG_INTERVAL_SECS: u64 = 5 * 60;
const DEFAULT_STALE_GRACE_PERIOD_SECS: u64 = 3 * 60;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Sync,
    Async,
}

/// The `[propagation]` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(default)]
pub struct PropagatorConfig {
    pub tree_size_accounting: bool,
    pub tree_time_accounting: bool,
    pub strategy: Strategy,
    pub propagation_delay_ms: u64,
    pub watchdog_interval_secs: u64,
    pub stale_grace_period_secs: u64,
}

impl Default for PropagatorConfig {
    fn default() -> Self {
        Self {
            tree_size_accounting: true,
            tree_time_accounting: true,
            strategy: Strategy::default(),
            propagation_delay_ms: 0,
            watchdog_interval_secs: DEFAULT_WATCHDOG_INTERVAL_SECS,
            stale_grace_period_secs: DEFAULT_STALE_GRACE_PERIOD_SECS,
        }
    }
}

impl PropagatorConfig {
    pub fn accounting(&self) -> Accounting {
        Accounting {
            tree_size: self.tree_size_accounting,
            tree_time: self.tree_time_accounting,
        }
    }

    pub fn async_options(&self) -> AsyncOptions {
        AsyncOptions {
            propagation_delay: Duration::from_millis(self.propagation_delay_ms),
            watchdog_interval: Duration::from_secs(self.watchdog_interval_secs),
            stale_grace_period: Duration::from_secs(self.stale_grace_period_secs),
        }
    }
}
