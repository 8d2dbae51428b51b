pub mod adapter;
pub mod memory;
pub mod postgres;
