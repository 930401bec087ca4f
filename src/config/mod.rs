//! Configuration module
//!
//! Resolves server settings from CLI flags, environment variables, and an
//! optional TOML config file.

mod settings;

pub use settings::*;
