//! Session module
//!
//! Bridges one client connection to its one owned child process.

mod bridge;

pub use bridge::*;
