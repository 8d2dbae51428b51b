use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

const fn default_stage_concurrency() -> u16 {
    2
}

const fn default_overlap_secs() -> u64 {
    180
}

const fn default_batch_max_lag_secs() -> u64 {
    300
}

// 2 days.
const fn default_refresh_window_secs() -> u64 {
    60 * 60 * 24 * 2
}

const fn default_max_consecutive_failures() -> u32 {
    10
}

const fn default_retry_delay_ms() -> u64 {
    1000
}

const fn default_maintenance_every_cycles() -> u64 {
    100
}

/// Tuning knobs for the sync manager and its pipeline.
///
/// All fields have defaults matching long-running production use, so a config
/// file only needs to name the ones it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ManagerConfig {
    /// Number of workers per pipeline stage.
    #[serde(default = "default_stage_concurrency")]
    pub stage_concurrency: u16,
    /// Trailing window (seconds) re-read on every incremental cycle to cover
    /// commit-visibility lag in the source. Must comfortably exceed the
    /// longest expected source transaction.
    #[serde(default = "default_overlap_secs")]
    pub overlap_secs: u64,
    /// Maximum wall-clock gap (seconds) allowed between a batch capture and
    /// its table switch before another catch-up round is required.
    #[serde(default = "default_batch_max_lag_secs")]
    pub batch_max_lag_secs: u64,
    /// Size (seconds) of the trailing window deleted and reloaded by
    /// refresh-recent loads.
    #[serde(default = "default_refresh_window_secs")]
    pub refresh_window_secs: u64,
    /// Number of consecutive transient failures tolerated by the incremental
    /// loop before escalating to a fatal error.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Delay (milliseconds) before retrying after a transient failure.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// How many incremental cycles pass between consistency checks and
    /// registry purges.
    #[serde(default = "default_maintenance_every_cycles")]
    pub maintenance_every_cycles: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            stage_concurrency: default_stage_concurrency(),
            overlap_secs: default_overlap_secs(),
            batch_max_lag_secs: default_batch_max_lag_secs(),
            refresh_window_secs: default_refresh_window_secs(),
            max_consecutive_failures: default_max_consecutive_failures(),
            retry_delay_ms: default_retry_delay_ms(),
            maintenance_every_cycles: default_maintenance_every_cycles(),
        }
    }
}

impl ManagerConfig {
    /// Validates manager configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.stage_concurrency == 0 {
            return Err(ValidationError::StageConcurrencyZero);
        }

        if self.max_consecutive_failures == 0 {
            return Err(ValidationError::MaxConsecutiveFailuresZero);
        }

        if self.batch_max_lag_secs == 0 {
            return Err(ValidationError::BatchMaxLagZero);
        }

        if self.refresh_window_secs <= self.overlap_secs {
            return Err(ValidationError::RefreshWindowTooSmall);
        }

        Ok(())
    }
}
