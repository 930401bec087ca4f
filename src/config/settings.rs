//! Server settings
//!
//! Settings are resolved once at startup with a fixed precedence:
//! CLI flags, then environment variables (`PORT`, `CREDS`), then the
//! optional TOML config file, then built-in defaults. The resolved value
//! is passed into the server constructor; nothing reads the environment
//! after startup.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable holding the listen port
pub const PORT_ENV: &str = "PORT";
/// Environment variable holding the credential blob
pub const CREDS_ENV: &str = "CREDS";

/// Default listen port
pub const DEFAULT_PORT: u16 = 8000;
/// Default bind address
pub const DEFAULT_BIND: &str = "0.0.0.0";
/// Default directory of browser assets
pub const DEFAULT_STATIC_DIR: &str = "static";
/// Default path the credential blob is written to
pub const DEFAULT_CREDS_FILE: &str = "creds.json";

/// Errors that can occur while resolving settings
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid {name} value: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Command used to start the per-session child process.
///
/// The default runs a Python program with unbuffered output, so the
/// interpreter flushes each line as it is produced instead of batching
/// until the pipe buffer fills.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SpawnCommand {
    /// Program to execute
    pub program: String,
    /// Command line arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the child
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the child (inherited when absent)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for SpawnCommand {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["-u".to_string(), "run.py".to_string()],
            env: HashMap::new(),
            working_dir: None,
        }
    }
}

impl SpawnCommand {
    /// Create a spawn command with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
        }
    }

    /// Set command line arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Human-readable command line for log messages
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// On-disk configuration file. Every field is optional; missing fields
/// fall back to environment variables or defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    /// Bind address
    pub bind: Option<String>,
    /// Listen port
    pub port: Option<u16>,
    /// Directory of browser assets
    pub static_dir: Option<PathBuf>,
    /// Path the credential blob is written to
    pub creds_path: Option<PathBuf>,
    /// Child process command
    pub command: Option<SpawnCommand>,
}

impl FileConfig {
    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: FileConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Settings supplied on the command line, overriding every other source
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub static_dir: Option<PathBuf>,
}

/// Fully resolved runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Directory of browser assets
    pub static_dir: PathBuf,
    /// Credential blob, if one was provided
    pub creds: Option<String>,
    /// Path the credential blob is written to
    pub creds_path: PathBuf,
    /// Child process command
    pub command: SpawnCommand,
}

impl Settings {
    /// Read the process environment once and resolve settings.
    pub fn load(config_file: Option<&Path>, cli: CliOverrides) -> Result<Self, ConfigError> {
        let file = match config_file {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let env_port = std::env::var(PORT_ENV).ok();
        let env_creds = std::env::var(CREDS_ENV).ok();
        Self::resolve(file, env_port, env_creds, cli)
    }

    /// Merge the three sources. Split out from `load` so precedence can
    /// be tested without touching the process environment.
    fn resolve(
        file: FileConfig,
        env_port: Option<String>,
        env_creds: Option<String>,
        cli: CliOverrides,
    ) -> Result<Self, ConfigError> {
        let port = match (cli.port, env_port) {
            (Some(port), _) => port,
            (None, Some(raw)) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                name: PORT_ENV,
                value: raw,
            })?,
            (None, None) => file.port.unwrap_or(DEFAULT_PORT),
        };

        let bind = cli
            .bind
            .or(file.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let static_dir = cli
            .static_dir
            .or(file.static_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR));

        let creds_path = file
            .creds_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDS_FILE));

        Ok(Self {
            bind,
            port,
            static_dir,
            creds: env_creds,
            creds_path,
            command: file.command.unwrap_or_default(),
        })
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
