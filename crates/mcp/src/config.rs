//! Configuration for the server and client sides.

use crate::error::{McpError, McpResult};
use crate::framing::FramingLimits;
use crate::protocol::{Implementation, LATEST_PROTOCOL_VERSION};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use toolwire_core::WeatherConfig;

/// Server settings, loaded from `toolwire.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_name")]
    pub server_name: String,

    #[serde(default = "default_server_version")]
    pub server_version: String,

    /// Free-form usage hints returned from `initialize`
    #[serde(default)]
    pub instructions: Option<String>,

    #[serde(default)]
    pub framing: FramingLimits,

    #[serde(default)]
    pub weather: WeatherConfig,
}

fn default_server_name() -> String {
    "toolwire".to_string()
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            server_version: default_server_version(),
            instructions: None,
            framing: FramingLimits::default(),
            weather: WeatherConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load the config file if it exists, otherwise use defaults
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            tracing::info!(path = %config_path.display(), "Configuration file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read configuration file {}", config_path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse configuration file {}", config_path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.framing.max_line_length == 0 {
            anyhow::bail!("framing.max_line_length must be greater than zero");
        }
        if !config.weather.random_min.is_finite() || !config.weather.random_max.is_finite() {
            anyhow::bail!("weather.random_min and weather.random_max must be finite numbers");
        }
        Ok(config)
    }

    pub fn server_info(&self) -> Implementation {
        Implementation::new(&self.server_name, &self.server_version)
    }
}

/// Client session settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identity sent in `initialize`
    pub client_info: Implementation,
    /// Protocol revision requested in `initialize`
    pub protocol_version: String,
    /// Default deadline for a call
    pub request_timeout: Duration,
    pub framing: FramingLimits,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_info: Implementation::new("toolwire-client", env!("CARGO_PKG_VERSION")),
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            request_timeout: Duration::from_secs(30),
            framing: FramingLimits::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_info = Implementation::new(name, version);
        self
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn validate(&self) -> McpResult<()> {
        if self.request_timeout.is_zero() {
            return Err(McpError::Config("request timeout must be non-zero".to_string()));
        }
        if self.framing.max_line_length == 0 {
            return Err(McpError::Config("max line length must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// How to launch the server process.
#[derive(Debug, Clone)]
pub struct ServerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    /// How long to wait for a clean exit after stdin is closed
    pub shutdown_timeout: Duration,
}

impl ServerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
