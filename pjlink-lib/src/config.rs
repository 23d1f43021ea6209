use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::error::Error;

/// Default PJLink TCP port
pub const DEFAULT_PORT: u16 = 4352;

/// Configurable log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub const fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::Off,
            Self::Error => LevelFilter::Error,
            Self::Warn => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
        }
    }
}

/// Session timing.
///
/// The defaults come from observed projector behavior rather than the
/// protocol: firmware drops connections that sit idle for a few seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    /// Poll ticker period (ms)
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Inactivity before the status poll set is re-sent (ms)
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,
    /// Inactivity before the connection is closed (ms)
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// TCP connect timeout (ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

const fn default_tick_ms() -> u64 {
    100
}

const fn default_refresh_ms() -> u64 {
    1000
}

const fn default_idle_timeout_ms() -> u64 {
    4000
}

const fn default_connect_timeout_ms() -> u64 {
    2000
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            refresh_ms: default_refresh_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Timing {
    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_ms)
    }

    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Every interval must be non-zero; a zero tick would spin the task loop
    pub fn validate(&self) -> Result<(), Error> {
        let fields = [
            ("tick_ms", self.tick_ms),
            ("refresh_ms", self.refresh_ms),
            ("idle_timeout_ms", self.idle_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some(&(field, _)) => Err(Error::InvalidTiming { field }),
            None => Ok(()),
        }
    }
}

/// One projector target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectorConfig {
    /// Projector IP address
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// PJLink password (empty or absent for none)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub log_level: LogLevel,
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ProjectorConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            password: None,
            timing: Timing::default(),
            log_level: LogLevel::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Password to answer challenges with; an empty string counts as none
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    /// Check the host is an IP address and build the socket address
    pub fn socket_addr(&self) -> Result<SocketAddr, Error> {
        let ip: IpAddr = self.host.trim().parse().map_err(|_| Error::InvalidHost {
            host: self.host.clone(),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.socket_addr()?;
        self.timing.validate()
    }
}
