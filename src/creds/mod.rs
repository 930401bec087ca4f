//! Credential provisioning module
//!
//! Materializes an environment-provided secret to a local file the child
//! process can read.

mod file;

pub use file::*;
