//! Server and client configuration.
//!
//! Both structs deserialize from JSON, fill missing fields with their
//! defaults, and must pass `validate()` before use.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Settings for a matchmaking server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,

    /// Name of the application clients must present in their hail.
    pub application_identifier: String,

    /// Client version clients must present in their hail.
    pub client_application_version: String,

    /// How often dirty player and room properties are flushed.
    pub sync_interval_ms: u64,

    /// How long a new connection has to send its hail.
    pub handshake_timeout_secs: u64,

    /// How long a connection may stay silent before it is dropped.
    pub connection_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7777".to_string(),
            application_identifier: String::new(),
            client_application_version: "1.0".to_string(),
            sync_interval_ms: 50,
            handshake_timeout_secs: 5,
            connection_timeout_secs: 25,
        }
    }
}

impl ServerConfig {
    /// A config for the given application with every other field
    /// defaulted.
    pub fn for_application(identifier: impl Into<String>) -> Self {
        Self {
            application_identifier: identifier.into(),
            ..Self::default()
        }
    }

    /// Parses a config from JSON.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Reads and parses a JSON config file, then validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier(&self.application_identifier)?;
        if self.sync_interval_ms == 0 {
            return Err(ConfigError::Invalid("sync_interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// The `<identifier>.<version>` key hails are checked against.
    pub fn application_key(&self) -> String {
        netsync_session::application_key(
            &self.application_identifier,
            &self.client_application_version,
        )
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Settings for a matchmaking client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub application_identifier: String,
    pub client_application_version: String,
    pub connection_timeout_secs: u64,
    /// Overrides the random `Player_<n>` nickname.
    pub nickname: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            application_identifier: String::new(),
            client_application_version: "1.0".to_string(),
            connection_timeout_secs: 25,
            nickname: None,
        }
    }
}

impl ClientConfig {
    pub fn for_application(identifier: impl Into<String>) -> Self {
        Self {
            application_identifier: identifier.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier(&self.application_identifier)
    }

    pub fn application_key(&self) -> String {
        netsync_session::application_key(
            &self.application_identifier,
            &self.client_application_version,
        )
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

fn validate_identifier(identifier: &str) -> Result<(), ConfigError> {
    if identifier.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "application_identifier must not be empty".into(),
        ));
    }
    Ok(())
}
