//! Core data types for the Pagemeter engine

pub mod counter;
pub mod device;
pub mod ids;
pub mod location;
pub mod period;
pub mod token;
