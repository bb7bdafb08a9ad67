//! Shared utilities: errors, math types and slice helpers.

mod error;
mod math;
mod slice;

pub use error::*;
pub use math::*;
pub use slice::*;
