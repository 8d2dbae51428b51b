pub mod actions;
pub mod clock;
pub mod db;
pub mod error;
pub mod macros;
pub mod manager;
pub mod observe;
pub mod pipeline;
pub mod plan;
pub mod plans;
pub mod registry;
pub mod reporter;
pub mod schema;
pub mod staging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod verifier;
