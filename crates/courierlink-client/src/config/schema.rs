use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use courierlink_core::error::{LinkError, Result};

use crate::buffer::BufferSettings;
use crate::connection::{LinkSettings, ReconnectPolicy};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub version: u32,

    pub link: LinkSection,

    #[serde(default)]
    pub reconnect: ReconnectSection,

    #[serde(default)]
    pub buffer: BufferSection,

    #[serde(default)]
    pub store: StoreSection,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(LinkError::UnsupportedVersion);
        }

        self.link.validate()?;
        self.reconnect.validate()?;
        self.buffer.validate()?;

        Ok(())
    }

    /// Runtime settings for the connection manager.
    pub fn link_settings(&self) -> Result<LinkSettings> {
        Ok(LinkSettings {
            url: self.link.parsed_url()?,
            heartbeat_interval: Duration::from_millis(self.link.heartbeat_interval_ms),
            pong_timeout: Duration::from_millis(self.link.pong_timeout_ms),
            connect_timeout: Duration::from_millis(self.link.connect_timeout_ms),
            credential_threshold: Duration::from_millis(self.link.credential_threshold_ms),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
                max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
                max_attempts: self.reconnect.max_attempts,
            },
        })
    }

    pub fn buffer_settings(&self) -> BufferSettings {
        BufferSettings {
            capacity: self.buffer.capacity,
            storage_key: self.buffer.storage_key.clone(),
            save_debounce: Duration::from_millis(self.buffer.save_debounce_ms),
            send_timeout: Duration::from_millis(self.buffer.send_timeout_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkSection {
    pub url: String,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Remaining credential lifetime below which a refresh is forced.
    #[serde(default = "default_credential_threshold_ms")]
    pub credential_threshold_ms: u64,
}

impl LinkSection {
    pub fn validate(&self) -> Result<()> {
        self.parsed_url()?;
        if !(1000..=300_000).contains(&self.heartbeat_interval_ms) {
            return Err(LinkError::Config(
                "link.heartbeat_interval_ms must be between 1000 and 300000".into(),
            ));
        }
        if !(500..=120_000).contains(&self.pong_timeout_ms) {
            return Err(LinkError::Config(
                "link.pong_timeout_ms must be between 500 and 120000".into(),
            ));
        }
        if !(1000..=120_000).contains(&self.connect_timeout_ms) {
            return Err(LinkError::Config(
                "link.connect_timeout_ms must be between 1000 and 120000".into(),
            ));
        }
        if self.credential_threshold_ms > 3_600_000 {
            return Err(LinkError::Config(
                "link.credential_threshold_ms must not exceed 3600000".into(),
            ));
        }
        Ok(())
    }

    fn parsed_url(&self) -> Result<Url> {
        let url = Url::parse(&self.url)
            .map_err(|e| LinkError::Config(format!("link.url is not a valid url: {e}")))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(LinkError::Config(format!(
                "link.url scheme must be ws or wss, got {other}"
            ))),
        }
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    25_000
}
fn default_pong_timeout_ms() -> u64 {
    10_000
}
fn default_connect_timeout_ms() -> u64 {
    30_000
}
fn default_credential_threshold_ms() -> u64 {
    60_000
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectSection {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectSection {
    pub fn validate(&self) -> Result<()> {
        if !(100..=60_000).contains(&self.base_delay_ms) {
            return Err(LinkError::Config(
                "reconnect.base_delay_ms must be between 100 and 60000".into(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(LinkError::Config(
                "reconnect.max_delay_ms must be >= base_delay_ms".into(),
            ));
        }
        if !(1..=100).contains(&self.max_attempts) {
            return Err(LinkError::Config(
                "reconnect.max_attempts must be between 1 and 100".into(),
            ));
        }
        Ok(())
    }
}

fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_max_attempts() -> u32 {
    8
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BufferSection {
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default = "default_storage_key")]
    pub storage_key: String,

    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            storage_key: default_storage_key(),
            save_debounce_ms: default_save_debounce_ms(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl BufferSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=100_000).contains(&self.capacity) {
            return Err(LinkError::Config(
                "buffer.capacity must be between 1 and 100000".into(),
            ));
        }
        if self.storage_key.trim().is_empty() {
            return Err(LinkError::Config("buffer.storage_key must not be empty".into()));
        }
        if self.save_debounce_ms > 10_000 {
            return Err(LinkError::Config(
                "buffer.save_debounce_ms must not exceed 10000".into(),
            ));
        }
        if !(100..=120_000).contains(&self.send_timeout_ms) {
            return Err(LinkError::Config(
                "buffer.send_timeout_ms must be between 100 and 120000".into(),
            ));
        }
        Ok(())
    }
}

fn default_capacity() -> usize {
    200
}
fn default_storage_key() -> String {
    "outgoingBuffer".into()
}
fn default_save_debounce_ms() -> u64 {
    250
}
fn default_send_timeout_ms() -> u64 {
    10_000
}

/// Where the durable store lives. Without a path an in-memory store is used.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    #[serde(default)]
    pub path: Option<PathBuf>,
}
