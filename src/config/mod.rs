//! Configuration types and builders.

use crate::error::{ConfigError, Result};
use crate::protocol::codec::DEFAULT_MAX_LINE_BYTES;
use crate::schema::MCP_VERSION;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::env;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: Cow<'static, str>,
    pub version: Cow<'static, str>,
    pub protocol_version: Cow<'static, str>,
    pub instructions: Option<String>,
    pub max_line_bytes: usize,
    /// Run each request on its own task instead of one at a time.
    pub concurrent_requests: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").into(),
            version: env!("CARGO_PKG_VERSION").into(),
            protocol_version: MCP_VERSION.into(),
            instructions: None,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            concurrent_requests: false,
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for ServerConfig with fluent API.
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<Cow<'static, str>>) -> Self {
        self.config.version = version.into();
        self
    }

    pub fn protocol_version(mut self, protocol_version: impl Into<Cow<'static, str>>) -> Self {
        self.config.protocol_version = protocol_version.into();
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.config.instructions = Some(instructions.into());
        self
    }

    pub fn max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.config.max_line_bytes = max_line_bytes;
        self
    }

    pub fn concurrent_requests(mut self, concurrent: bool) -> Self {
        self.config.concurrent_requests = concurrent;
        self
    }

    /// Build from environment variables.
    pub fn from_env(self) -> Result<Self> {
        self.from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(name) = lookup("MCP_SERVER_NAME") {
            self.config.name = name.into();
        }

        if let Some(version) = lookup("MCP_SERVER_VERSION") {
            self.config.version = version.into();
        }

        if let Some(protocol_version) = lookup("MCP_PROTOCOL_VERSION") {
            self.config.protocol_version = protocol_version.into();
        }

        if let Some(max) = lookup("MCP_MAX_LINE_BYTES") {
            self.config.max_line_bytes = parse_field("MCP_MAX_LINE_BYTES", &max)?;
        }

        if let Some(concurrent) = lookup("MCP_CONCURRENT_REQUESTS") {
            self.config.concurrent_requests = parse_field("MCP_CONCURRENT_REQUESTS", &concurrent)?;
        }

        Ok(self)
    }

    pub fn build(self) -> Result<ServerConfig> {
        self.validate()?;
        Ok(self.config)
    }

    fn validate(&self) -> Result<()> {
        if self.config.name.is_empty() {
            return Err(ConfigError::MissingField("name".into()).into());
        }
        if self.config.protocol_version.is_empty() {
            return Err(ConfigError::MissingField("protocol_version".into()).into());
        }
        validate_max_line_bytes(self.config.max_line_bytes)
    }
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub name: Cow<'static, str>,
    pub version: Cow<'static, str>,
    pub protocol_version: Cow<'static, str>,
    pub max_line_bytes: usize,
    /// Applied to every request; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").into(),
            version: env!("CARGO_PKG_VERSION").into(),
            protocol_version: MCP_VERSION.into(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            request_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for ClientConfig.
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<Cow<'static, str>>) -> Self {
        self.config.version = version.into();
        self
    }

    pub fn protocol_version(mut self, protocol_version: impl Into<Cow<'static, str>>) -> Self {
        self.config.protocol_version = protocol_version.into();
        self
    }

    pub fn max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.config.max_line_bytes = max_line_bytes;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Build from environment variables.
    pub fn from_env(self) -> Result<Self> {
        self.from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(name) = lookup("MCP_CLIENT_NAME") {
            self.config.name = name.into();
        }

        if let Some(version) = lookup("MCP_CLIENT_VERSION") {
            self.config.version = version.into();
        }

        if let Some(protocol_version) = lookup("MCP_PROTOCOL_VERSION") {
            self.config.protocol_version = protocol_version.into();
        }

        if let Some(max) = lookup("MCP_MAX_LINE_BYTES") {
            self.config.max_line_bytes = parse_field("MCP_MAX_LINE_BYTES", &max)?;
        }

        if let Some(timeout) = lookup("MCP_REQUEST_TIMEOUT_MS") {
            let millis: u64 = parse_field("MCP_REQUEST_TIMEOUT_MS", &timeout)?;
            // Zero disables the timeout.
            self.config.request_timeout = (millis > 0).then(|| Duration::from_millis(millis));
        }

        Ok(self)
    }

    pub fn build(self) -> Result<ClientConfig> {
        if self.config.protocol_version.is_empty() {
            return Err(ConfigError::MissingField("protocol_version".into()).into());
        }
        if self.config.request_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout".into(),
                message: "Timeout must be greater than 0".into(),
            }
            .into());
        }
        validate_max_line_bytes(self.config.max_line_bytes)?;
        Ok(self.config)
    }
}

fn parse_field<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ConfigError::InvalidValue {
            field: field.into(),
            message: format!("Cannot parse '{}'", value).into(),
        }
        .into()
    })
}

fn validate_max_line_bytes(max_line_bytes: usize) -> Result<()> {
    if max_line_bytes == 0 {
        return Err(ConfigError::InvalidValue {
            field: "max_line_bytes".into(),
            message: "Line limit must be greater than 0".into(),
        }
        .into());
    }
    Ok(())
}
