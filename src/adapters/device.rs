use std::time::Duration;

use thiserror::Error;

use crate::adapters::zk_protocol::ProtocolError;
use crate::domain::device_address::DeviceAddress;
use crate::domain::models::{RawPunch, UserRecord};

/// Operations of one open connection to an attendance terminal.
///
/// A client is not safe for concurrent use; every request opens its own.
pub trait DeviceClient: Send {
    fn get_users(&mut self) -> Result<Vec<UserRecord>, DeviceError>;
    fn get_attendance(&mut self) -> Result<Vec<RawPunch>, DeviceError>;
    fn disable_device(&mut self) -> Result<(), DeviceError>;
    fn enable_device(&mut self) -> Result<(), DeviceError>;
    fn disconnect(&mut self) -> Result<(), DeviceError>;
}

pub trait DeviceConnector: Send + Sync + 'static {
    fn connect(
        &self,
        address: &DeviceAddress,
        timeout: Duration,
    ) -> Result<Box<dyn DeviceClient>, DeviceError>;
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to resolve device endpoint: {0}")]
    Resolve(#[source] std::io::Error),
    #[error("device communication failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("device protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("device rejected the connection: authentication required")]
    Unauthorized,
    #[error("unexpected device reply {reply} to command {command}")]
    UnexpectedReply { command: u16, reply: u16 },
    #[error("scripted device failure: {0}")]
    Scripted(String),
}

/// Scoped device session: the connection is released exactly once, when the
/// session is closed or dropped, on every exit path.
///
/// Release re-enables a device left disabled by an exclusive read before
/// disconnecting. Release failures are logged and swallowed.
pub struct DeviceSession {
    client: Option<Box<dyn DeviceClient>>,
    address: DeviceAddress,
    disabled: bool,
}

impl DeviceSession {
    pub fn open(
        connector: &dyn DeviceConnector,
        address: &DeviceAddress,
        timeout: Duration,
    ) -> Result<Self, DeviceError> {
        let client = connector.connect(address, timeout)?;
        tracing::debug!(device = %address, "device session opened");

        Ok(Self {
            client: Some(client),
            address: address.clone(),
            disabled: false,
        })
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn read_users(&mut self) -> Result<Vec<UserRecord>, DeviceError> {
        let users = self.client()?.get_users()?;
        tracing::info!(device = %self.address, users = users.len(), "device roster read");
        Ok(users)
    }

    pub fn read_attendance(&mut self) -> Result<Vec<RawPunch>, DeviceError> {
        let punches = self.client()?.get_attendance()?;
        tracing::info!(device = %self.address, punches = punches.len(), "device attendance read");
        Ok(punches)
    }

    /// Reads attendance with the terminal disabled, so no punches land mid-read.
    /// Enabling is attempted even when the read fails; the read error wins.
    pub fn read_attendance_exclusive(&mut self) -> Result<Vec<RawPunch>, DeviceError> {
        self.client()?.disable_device()?;
        self.disabled = true;

        let read = self.read_attendance();

        let enabled = self.client()?.enable_device();
        match &enabled {
            Ok(()) => self.disabled = false,
            Err(error) => {
                tracing::warn!(device = %self.address, error = %error, "failed to re-enable device after read")
            }
        }

        let punches = read?;
        enabled?;
        Ok(punches)
    }

    pub fn close(mut self) {
        self.release();
    }

    fn client(&mut self) -> Result<&mut Box<dyn DeviceClient>, DeviceError> {
        self.client.as_mut().ok_or_else(|| {
            DeviceError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "device session already released",
            ))
        })
    }

    fn release(&mut self) {
        let Some(mut client) = self.client.take() else {
            return;
        };

        if self.disabled {
            if let Err(error) = client.enable_device() {
                tracing::warn!(device = %self.address, error = %error, "failed to re-enable device before disconnect");
            }
            self.disabled = false;
        }

        match client.disconnect() {
            Ok(()) => tracing::debug!(device = %self.address, "device session closed"),
            Err(error) => {
                tracing::warn!(device = %self.address, error = %error, "device disconnect failed")
            }
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.release();
    }
}
