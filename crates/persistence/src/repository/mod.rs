//! Repository implementations for database operations

pub mod scans;
pub mod setups;

pub use scans::*;
pub use setups::*;
