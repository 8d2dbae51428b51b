//! Injected time source.
//!
//! Load actions and the manager never read the system clock directly; a
//! [`Clock`] is threaded through instead so staleness math (batch catch-up,
//! overlap windows) is testable with a manual clock.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

/// A shared, injectable source of "now".
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Returns a clock backed by the system time.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// The lower bound used for full extractions and bootstrap checkpoints.
///
/// Predates every row in any source we sync; using a fixed epoch rather than
/// a nullable "since" keeps the watermark arithmetic total.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
}
