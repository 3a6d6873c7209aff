//! Server session state.

use crate::config::ServerConfig;
use crate::schema::{Implementation, LoggingLevel, ServerCapabilities};
use dashmap::DashSet;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// What the server knows about the current session.
pub struct ServerState {
    pub config: ServerConfig,
    pub capabilities: ServerCapabilities,
    initialized: AtomicBool,
    client_info: RwLock<Option<Implementation>>,
    protocol_version: RwLock<Option<String>>,
    log_level: RwLock<LoggingLevel>,
    subscriptions: DashSet<String>,
}

impl ServerState {
    pub fn new(config: ServerConfig, capabilities: ServerCapabilities) -> Self {
        Self {
            config,
            capabilities,
            initialized: AtomicBool::new(false),
            client_info: RwLock::new(None),
            protocol_version: RwLock::new(None),
            log_level: RwLock::new(LoggingLevel::Info),
            subscriptions: DashSet::new(),
        }
    }

    pub fn server_info(&self) -> Implementation {
        Implementation::new(self.config.name.to_string(), self.config.version.to_string())
    }

    /// Record the handshake request.
    pub fn begin_session(&self, client_info: Implementation, protocol_version: String) {
        *self.client_info.write() = Some(client_info);
        *self.protocol_version.write() = Some(protocol_version);
    }

    /// The client confirmed the handshake.
    pub fn set_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn client_info(&self) -> Option<Implementation> {
        self.client_info.read().clone()
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.protocol_version.read().clone()
    }

    pub fn log_level(&self) -> LoggingLevel {
        *self.log_level.read()
    }

    pub fn set_log_level(&self, level: LoggingLevel) {
        *self.log_level.write() = level;
    }

    /// Returns false if the uri was already subscribed.
    pub fn subscribe(&self, uri: String) -> bool {
        self.subscriptions.insert(uri)
    }

    /// Returns false if the uri was not subscribed.
    pub fn unsubscribe(&self, uri: &str) -> bool {
        self.subscriptions.remove(uri).is_some()
    }

    pub fn is_subscribed(&self, uri: &str) -> bool {
        self.subscriptions.contains(uri)
    }
}

pub struct ServerStateBuilder {
    config: Option<ServerConfig>,
    capabilities: ServerCapabilities,
}

impl ServerStateBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            capabilities: ServerCapabilities::default(),
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn build(self) -> ServerState {
        ServerState::new(self.config.unwrap_or_default(), self.capabilities)
    }
}

impl Default for ServerStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
