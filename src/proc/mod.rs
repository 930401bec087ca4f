//! Child process module
//!
//! Spawns the per-session child process with piped standard I/O and
//! streams its output as ordered line events.

mod child;

pub use child::*;
