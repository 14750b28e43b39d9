//! Services module

pub mod usage;
