#![forbid(unsafe_code)]

pub mod common;
pub mod identity;
pub mod notify;
pub mod parking;
pub mod store_config;

pub use common::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};
