//! Deterministic integer math used by chain maintenance.

pub mod decay;
pub mod fixed;

pub use decay::{DecaySchedule, DecayWindow};
pub use fixed::{mul_div, FixedPointError, Rounding};
