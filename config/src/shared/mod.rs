mod base;
mod connection;
mod manager;
mod replicator;
mod tables;

pub use base::*;
pub use connection::*;
pub use manager::*;
pub use replicator::*;
pub use tables::*;
