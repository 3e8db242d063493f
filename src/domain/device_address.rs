use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub const DEFAULT_DEVICE_PORT: u16 = 4370;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAddress {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("device address is empty")]
    MissingHost,
    #[error("invalid device port: {0}")]
    InvalidPort(String),
}

impl DeviceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressParseError;

    /// Parses `host` or `host:port`; the port defaults to 4370.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let (host, port) = match raw.split_once(':') {
            Some((host, port)) => (host.trim(), Some(port.trim())),
            None => (raw, None),
        };

        if host.is_empty() {
            return Err(AddressParseError::MissingHost);
        }

        let port = match port {
            Some(value) => value
                .parse::<u16>()
                .ok()
                .filter(|port| *port > 0)
                .ok_or_else(|| AddressParseError::InvalidPort(value.to_string()))?,
            None => DEFAULT_DEVICE_PORT,
        };

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
