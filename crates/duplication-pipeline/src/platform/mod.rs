//! Platform capture backends.

pub mod windows;
