//! Client configuration parsing and validation.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::client::transport::Endpoint;
use crate::wire::codec::MAX_LINE_BYTES;
use crate::{ClientError, Result};

/// Configurable timeout values (seconds).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Upper bound on endpoint resolution plus transport handshake.
    #[serde(default = "default_connect_seconds")]
    pub connect_seconds: u64,
    /// Deadline applied by [`Client::request_default`](crate::Client::request_default).
    #[serde(default = "default_request_seconds")]
    pub request_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_seconds: default_connect_seconds(),
            request_seconds: default_request_seconds(),
        }
    }
}

fn default_connect_seconds() -> u64 {
    10
}

fn default_request_seconds() -> u64 {
    30
}

/// Wire protocol settings: discriminator tag sets and framing limits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProtocolConfig {
    /// `type` values classified as correlated responses.
    #[serde(default = "default_response_tags")]
    pub response_tags: BTreeSet<String>,
    /// `type` values classified as unsolicited notifications.
    #[serde(default = "default_notification_tags")]
    pub notification_tags: BTreeSet<String>,
    /// Maximum accepted inbound line length in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Resolve every pending request with a connection error when the
    /// reader stops, instead of leaving them to their own deadlines.
    #[serde(default = "default_true")]
    pub fail_pending_on_disconnect: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            response_tags: default_response_tags(),
            notification_tags: default_notification_tags(),
            max_frame_bytes: default_max_frame_bytes(),
            fail_pending_on_disconnect: true,
        }
    }
}

fn default_response_tags() -> BTreeSet<String> {
    BTreeSet::from(["response".to_owned()])
}

fn default_notification_tags() -> BTreeSet<String> {
    BTreeSet::from(["notification".to_owned()])
}

fn default_max_frame_bytes() -> usize {
    MAX_LINE_BYTES
}

fn default_true() -> bool {
    true
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").into()
}

/// Client configuration parsed from a TOML file or built in code.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Server endpoint: `tcp://host:port`, `host:port`, `local:<name>` or
    /// `unix:<path>`.
    pub endpoint: String,
    /// Identity announced in the registration frame.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Timeout configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Wire protocol settings.
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

impl ClientConfig {
    /// Build a configuration with defaults for everything but the endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_name: default_client_name(),
            timeouts: TimeoutConfig::default(),
            protocol: ProtocolConfig::default(),
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| ClientError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Add a `type` value to the response tag set.
    #[must_use]
    pub fn with_response_tag(mut self, tag: impl Into<String>) -> Self {
        self.protocol.response_tags.insert(tag.into());
        self
    }

    /// Add a `type` value to the notification tag set.
    #[must_use]
    pub fn with_notification_tag(mut self, tag: impl Into<String>) -> Self {
        self.protocol.notification_tags.insert(tag.into());
        self
    }

    /// Override the default request deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, seconds: u64) -> Self {
        self.timeouts.request_seconds = seconds;
        self
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.connect_seconds)
    }

    /// Default request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.request_seconds)
    }

    /// Check every field for consistency.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        Endpoint::parse(&self.endpoint)?;

        if self.client_name.trim().is_empty() {
            return Err(ClientError::Config("client_name must not be empty".into()));
        }

        if self.timeouts.connect_seconds == 0 {
            return Err(ClientError::Config(
                "timeouts.connect_seconds must be greater than zero".into(),
            ));
        }

        if self.timeouts.request_seconds == 0 {
            return Err(ClientError::Config(
                "timeouts.request_seconds must be greater than zero".into(),
            ));
        }

        if self.protocol.max_frame_bytes == 0 {
            return Err(ClientError::Config(
                "protocol.max_frame_bytes must be greater than zero".into(),
            ));
        }

        if self.protocol.response_tags.is_empty() {
            return Err(ClientError::Config(
                "protocol.response_tags must not be empty".into(),
            ));
        }

        if let Some(tag) = self
            .protocol
            .response_tags
            .intersection(&self.protocol.notification_tags)
            .next()
        {
            return Err(ClientError::Config(format!(
                "tag '{tag}' cannot be both a response and a notification tag"
            )));
        }

        Ok(())
    }
}
