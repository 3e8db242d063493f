use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::adapters::device::{DeviceConnector, DeviceError, DeviceSession};
use crate::adapters::upload::{UploadForwarder, UploadResult};
use crate::domain::date_range::{DateRange, DateRangeError};
use crate::domain::device_address::{AddressParseError, DeviceAddress};
use crate::domain::models::{RawPunch, ReconciledLogEntry, UserRecord};
use crate::domain::reconcile::{UserMap, build_user_map, reconcile_with_map};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid device address: {0}")]
    InvalidAddress(#[from] AddressParseError),
    #[error("invalid date range: {0}")]
    InvalidDateRange(#[from] DateRangeError),
    #[error("unknown upload environment: {0}")]
    UnknownEnvironment(String),
    #[error("failed to connect to device: {0}")]
    Connection(#[source] DeviceError),
    #[error("failed to read from device: {0}")]
    DeviceRead(#[source] DeviceError),
}

impl SyncError {
    /// Errors caused by the caller's input rather than the device.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress(_) | Self::InvalidDateRange(_) | Self::UnknownEnvironment(_)
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    pub device: String,
    pub start_date: String,
    pub end_date: String,
    pub auth_token: Option<String>,
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub logs: Vec<ReconciledLogEntry>,
    #[serde(rename = "userMap")]
    pub user_map: UserMap,
    pub upload: UploadResult,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub device_timeout: Duration,
    pub exclusive_read: bool,
    pub default_endpoint: String,
    pub endpoints: HashMap<String, String>,
}

pub trait AttendanceHandler {
    fn fetch_roster(&self, device: &str) -> Result<Vec<UserRecord>, SyncError>;
    fn sync_attendance(&self, request: &SyncRequest) -> Result<SyncReport, SyncError>;
}

#[derive(Clone)]
pub struct AttendanceService {
    connector: Arc<dyn DeviceConnector>,
    forwarder: UploadForwarder,
    settings: SyncSettings,
}

impl AttendanceService {
    pub fn new(
        connector: Arc<dyn DeviceConnector>,
        forwarder: UploadForwarder,
        settings: SyncSettings,
    ) -> Self {
        Self {
            connector,
            forwarder,
            settings,
        }
    }

    fn resolve_endpoint(&self, environment: Option<&str>) -> Result<&str, SyncError> {
        match environment.map(str::trim).filter(|name| !name.is_empty()) {
            None => Ok(&self.settings.default_endpoint),
            Some(name) => self
                .settings
                .endpoints
                .get(name)
                .map(String::as_str)
                .ok_or_else(|| SyncError::UnknownEnvironment(name.to_string())),
        }
    }

    fn open_session(&self, address: &DeviceAddress) -> Result<DeviceSession, SyncError> {
        DeviceSession::open(
            self.connector.as_ref(),
            address,
            self.settings.device_timeout,
        )
        .map_err(SyncError::Connection)
    }

    fn read_device(
        &self,
        address: &DeviceAddress,
    ) -> Result<(Vec<UserRecord>, Vec<RawPunch>), SyncError> {
        let mut session = self.open_session(address)?;

        let users = session.read_users().map_err(SyncError::DeviceRead)?;
        let punches = if self.settings.exclusive_read {
            session.read_attendance_exclusive()
        } else {
            session.read_attendance()
        }
        .map_err(SyncError::DeviceRead)?;

        session.close();
        Ok((users, punches))
    }
}

impl AttendanceHandler for AttendanceService {
    fn fetch_roster(&self, device: &str) -> Result<Vec<UserRecord>, SyncError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("fetch_roster", %request_id, device = %device.trim());
        let _guard = span.enter();

        let address: DeviceAddress = device.parse()?;
        let mut session = self.open_session(&address)?;
        let users = session.read_users().map_err(SyncError::DeviceRead)?;
        session.close();

        Ok(users)
    }

    fn sync_attendance(&self, request: &SyncRequest) -> Result<SyncReport, SyncError> {
        let request_id = Uuid::new_v4();
        let span =
            tracing::info_span!("sync_attendance", %request_id, device = %request.device.trim());
        let _guard = span.enter();

        let address: DeviceAddress = request.device.parse()?;
        let range = DateRange::parse(&request.start_date, &request.end_date)?;
        let endpoint = self.resolve_endpoint(request.environment.as_deref())?;

        let (users, punches) = self.read_device(&address)?;

        let user_map = build_user_map(&users);
        let logs = reconcile_with_map(&user_map, &punches, &range);
        tracing::info!(
            users = users.len(),
            punches = punches.len(),
            logs = logs.len(),
            start = %range.start,
            end = %range.end,
            "attendance reconciled"
        );

        let upload = self
            .forwarder
            .upload(&logs, endpoint, request.auth_token.as_deref());

        Ok(SyncReport {
            logs,
            user_map,
            upload,
        })
    }
}
