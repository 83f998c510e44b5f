//! Testing utilities and mock implementations
//!
//! Mocks for every seam of the connectivity core, so the reconnect cascade
//! can be exercised without a radio, an NTP server or a broker.

pub mod mocks;

pub use mocks::*;
