use std::collections::HashMap;
use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::adapters::device::{DeviceClient, DeviceConnector, DeviceError};
use crate::domain::device_address::DeviceAddress;
use crate::domain::models::{RawPunch, UserRecord};

const STEPS: &[&str] = &[
    "connect",
    "get_users",
    "get_attendance",
    "disable_device",
    "enable_device",
    "disconnect",
];

#[derive(Debug, Clone, Deserialize)]
struct ScriptFile {
    #[serde(default)]
    users: Vec<ScriptUser>,
    #[serde(default)]
    attendance: Vec<ScriptPunch>,
    #[serde(default)]
    failures: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ScriptUser {
    user_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    uid: u16,
    #[serde(default)]
    privilege: u8,
    #[serde(default)]
    password: String,
    #[serde(default)]
    group_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ScriptPunch {
    user_id: String,
    timestamp: NaiveDateTime,
    #[serde(default)]
    punch_code: u8,
}

#[derive(Debug)]
struct ReplayData {
    users: Vec<UserRecord>,
    punches: Vec<RawPunch>,
    failures: HashMap<String, String>,
}

/// Stand-in terminal loaded from a JSON script, for running the bridge
/// without hardware. Every connection serves the same roster and log.
#[derive(Debug, Clone)]
pub struct ReplayDeviceConnector {
    data: Arc<ReplayData>,
}

impl ReplayDeviceConnector {
    pub fn from_file(path: &str) -> Result<Self, DeviceError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, DeviceError> {
        let script: ScriptFile = serde_json::from_str(content).map_err(io::Error::from)?;

        if let Some(step) = script
            .failures
            .keys()
            .find(|step| !STEPS.contains(&step.as_str()))
        {
            return Err(DeviceError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("replay script names unknown device step: {step}"),
            )));
        }

        let users = script
            .users
            .into_iter()
            .map(|user| UserRecord {
                uid: user.uid,
                user_id: user.user_id,
                name: user.name,
                privilege: user.privilege,
                password: user.password,
                group_id: user.group_id,
            })
            .collect();

        let punches = script
            .attendance
            .into_iter()
            .map(|punch| RawPunch {
                user_id: punch.user_id,
                timestamp: punch.timestamp,
                punch_code: punch.punch_code,
                verify_state: 0,
            })
            .collect();

        Ok(Self {
            data: Arc::new(ReplayData {
                users,
                punches,
                failures: script.failures,
            }),
        })
    }
}

impl ReplayData {
    fn step(&self, step: &str) -> Result<(), DeviceError> {
        match self.failures.get(step) {
            Some(kind) => {
                tracing::debug!(step, kind = %kind, "replaying scripted device failure");
                Err(map_script_error(kind))
            }
            None => Ok(()),
        }
    }
}

fn map_script_error(kind: &str) -> DeviceError {
    let normalized = kind.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "timeout" => DeviceError::Io(io::Error::new(io::ErrorKind::TimedOut, kind)),
        "connection_refused" => {
            DeviceError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, kind))
        }
        "connection_reset" => DeviceError::Io(io::Error::new(io::ErrorKind::ConnectionReset, kind)),
        "host_unreachable" | "device_unreachable" => {
            DeviceError::Io(io::Error::new(io::ErrorKind::HostUnreachable, kind))
        }
        "network_unreachable" => {
            DeviceError::Io(io::Error::new(io::ErrorKind::NetworkUnreachable, kind))
        }
        "broken_pipe" => DeviceError::Io(io::Error::new(io::ErrorKind::BrokenPipe, kind)),
        "unauthorized" => DeviceError::Unauthorized,
        _ => DeviceError::Scripted(kind.to_string()),
    }
}

impl DeviceConnector for ReplayDeviceConnector {
    fn connect(
        &self,
        address: &DeviceAddress,
        _timeout: Duration,
    ) -> Result<Box<dyn DeviceClient>, DeviceError> {
        self.data.step("connect")?;
        tracing::debug!(device = %address, "replay device connected");
        Ok(Box::new(ReplayDeviceClient {
            data: Arc::clone(&self.data),
        }))
    }
}

struct ReplayDeviceClient {
    data: Arc<ReplayData>,
}

impl DeviceClient for ReplayDeviceClient {
    fn get_users(&mut self) -> Result<Vec<UserRecord>, DeviceError> {
        self.data.step("get_users")?;
        Ok(self.data.users.clone())
    }

    fn get_attendance(&mut self) -> Result<Vec<RawPunch>, DeviceError> {
        self.data.step("get_attendance")?;
        Ok(self.data.punches.clone())
    }

    fn disable_device(&mut self) -> Result<(), DeviceError> {
        self.data.step("disable_device")
    }

    fn enable_device(&mut self) -> Result<(), DeviceError> {
        self.data.step("enable_device")
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.data.step("disconnect")
    }
}
