//! Failure reporting for per-table load errors.
//!
//! The manager reports every table failure through this interface before
//! aggregating them, so external alerting can hang off individual tables
//! while the caller still sees one combined error. Connection errors tend to
//! embed connection strings; messages are scrubbed of passwords before they
//! leave the process.

use tracing::error;

use crate::error::DbsyncError;

/// Receives one report per failed table load.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, table: &str, error: &DbsyncError);
}

/// Default reporter writing structured error events.
#[derive(Debug, Default, Clone)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, table: &str, error: &DbsyncError) {
        error!(
            table,
            kind = ?error.kind(),
            location = %error.location(),
            error = %redact_passwords(&error.to_string()),
            "table load failed"
        );
    }
}

/// Masks the value of any `password=` pair embedded in a message.
pub fn redact_passwords(message: &str) -> String {
    const KEY: &str = "password=";

    let mut result = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(index) = rest.find(KEY) {
        let value_start = index + KEY.len();
        result.push_str(&rest[..value_start]);
        result.push_str("[redacted]");

        let value = &rest[value_start..];
        let value_end = value
            .find(|c: char| c.is_whitespace() || matches!(c, '&' | '\'' | '"' | ','))
            .unwrap_or(value.len());
        rest = &value[value_end..];
    }
    result.push_str(rest);

    result
}
