//! Testing utilities and mock implementations
//!
//! In-memory stand-ins for the broker and the reed switch so the engine can
//! be exercised without a network or GPIO hardware.

pub mod mocks;

pub use mocks::*;
