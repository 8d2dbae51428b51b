use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Per-stage worker count cannot be zero.
    #[error("`stage_concurrency` cannot be zero")]
    StageConcurrencyZero,
    /// The transient retry bound cannot be zero.
    #[error("`max_consecutive_failures` cannot be zero")]
    MaxConsecutiveFailuresZero,
    /// The batch catch-up loop needs a positive staleness bound.
    #[error("`batch_max_lag_secs` cannot be zero")]
    BatchMaxLagZero,
    /// The refresh window must cover at least the overlap.
    #[error("`refresh_window_secs` must be greater than `overlap_secs`")]
    RefreshWindowTooSmall,
    /// A named source referenced by a table spec does not exist.
    #[error("table spec references unknown source `{0}`")]
    UnknownSource(String),
}
