//! Common test utilities for channel-dl integration tests

#[allow(dead_code)]
pub mod assertions;
#[allow(dead_code)]
pub mod gateway;

#[allow(unused_imports)]
pub use assertions::*;
pub use gateway::*;
