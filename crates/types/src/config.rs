//! Configuration for the snapshot cycle.
//!
//! Validation happens via the [`validate`](SnapshotConfig::validate) method
//! after construction or deserialization; the builder does not enforce the
//! cross-field constraint on its own.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::{ensure, Snafu};

/// Configuration validation error.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },
}

/// Default interval between snapshot-initiation ticks.
const DEFAULT_SNAPSHOT_FREQUENCY: Duration = Duration::from_secs(1);

/// Default age after which a pending snapshot round is abandoned.
const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(30);

/// Snapshot cycle configuration for one topic controller.
///
/// # Validation Rules
///
/// - Both durations must be nonzero.
/// - `snapshot_timeout` must be >= `snapshot_frequency`: an unanswered
///   round blocks new rounds until it times out, so a timeout shorter than
///   the tick would make that throttle meaningless.
///
/// The timeout also bounds timeout-detection latency only up to one tick,
/// since timed-out rounds are reclaimed lazily at the start of each tick.
///
/// # Example
///
/// ```
/// # use std::time::Duration;
/// # use replisub_types::config::SnapshotConfig;
/// let config = SnapshotConfig::builder()
///     .snapshot_frequency(Duration::from_secs(2))
///     .snapshot_timeout(Duration::from_secs(60))
///     .build();
/// config.validate().expect("valid snapshot config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Interval between snapshot-initiation ticks.
    #[serde(default = "default_snapshot_frequency")]
    #[builder(default = DEFAULT_SNAPSHOT_FREQUENCY)]
    pub snapshot_frequency: Duration,
    /// Age after which a pending snapshot round is abandoned.
    #[serde(default = "default_snapshot_timeout")]
    #[builder(default = DEFAULT_SNAPSHOT_TIMEOUT)]
    pub snapshot_timeout: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            snapshot_frequency: DEFAULT_SNAPSHOT_FREQUENCY,
            snapshot_timeout: DEFAULT_SNAPSHOT_TIMEOUT,
        }
    }
}

impl SnapshotConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when a value is out of range or
    /// the timeout/frequency relation is violated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            !self.snapshot_frequency.is_zero(),
            ValidationSnafu {
                message: "snapshot_frequency must be nonzero".to_string(),
            }
        );
        ensure!(
            !self.snapshot_timeout.is_zero(),
            ValidationSnafu {
                message: "snapshot_timeout must be nonzero".to_string(),
            }
        );
        ensure!(
            self.snapshot_timeout >= self.snapshot_frequency,
            ValidationSnafu {
                message: format!(
                    "snapshot_timeout ({:?}) must be >= snapshot_frequency ({:?})",
                    self.snapshot_timeout, self.snapshot_frequency
                ),
            }
        );
        Ok(())
    }
}

fn default_snapshot_frequency() -> Duration {
    DEFAULT_SNAPSHOT_FREQUENCY
}

fn default_snapshot_timeout() -> Duration {
    DEFAULT_SNAPSHOT_TIMEOUT
}
