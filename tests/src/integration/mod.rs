//! Integration scenarios.

pub mod isolation;
pub mod noop;
