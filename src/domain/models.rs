use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One enrolled user as stored on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub uid: u16,
    pub user_id: String,
    pub name: String,
    pub privilege: u8,
    pub password: String,
    pub group_id: String,
}

/// One scan event from the device attendance log. `timestamp` is device-local time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPunch {
    pub user_id: String,
    pub timestamp: NaiveDateTime,
    pub punch_code: u8,
    #[serde(default)]
    pub verify_state: u8,
}

/// Punch direction. Only two directions are distinguished: code 0 is a check-in,
/// every other code is a check-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PunchStatus {
    #[serde(rename = "Check In")]
    CheckIn,
    #[serde(rename = "Check Out")]
    CheckOut,
}

impl PunchStatus {
    pub fn from_punch_code(code: u8) -> Self {
        if code == 0 {
            Self::CheckIn
        } else {
            Self::CheckOut
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledLogEntry {
    pub user_id: String,
    pub name: String,
    pub number: String,
    #[serde(rename = "dateTime")]
    pub date_time: String,
    pub status: PunchStatus,
}

/// Wire shape sent to the backend; the internal `user_id` never leaves the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub date_time: String,
    pub name: String,
    pub status: PunchStatus,
    pub number: String,
}

impl From<&ReconciledLogEntry> for UploadRecord {
    fn from(entry: &ReconciledLogEntry) -> Self {
        Self {
            date_time: entry.date_time.clone(),
            name: entry.name.clone(),
            status: entry.status,
            number: entry.number.clone(),
        }
    }
}

pub fn format_timestamp(timestamp: &NaiveDateTime) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}
