use std::collections::HashMap;

use chrono::NaiveDate;

use crate::app::AppError;

const DEFAULT_UPLOAD_ENDPOINT: &str = "http://localhost:3002/attendance/upload";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_bind: String,
    pub device_timeout_secs: u64,
    pub device_comm_key: u32,
    pub device_exclusive_read: bool,
    pub device_replay_file: Option<String>,
    pub upload_endpoint: String,
    pub upload_endpoints: HashMap<String, String>,
    pub upload_timeout_secs: u64,
    pub upload_require_token: bool,
    pub cors_allowed_origin: Option<String>,
}

/// One-shot sync settings for the `bridge_sync` job.
#[derive(Debug, Clone)]
pub struct SyncJobConfig {
    pub device: String,
    pub start_date: String,
    pub end_date: String,
    pub environment: Option<String>,
    pub auth_token: Option<String>,
}

pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Err(error) if !error.not_found() => {
            tracing::warn!(error = %error, "failed to load .env file");
        }
        _ => {}
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let device_timeout_secs = parse_or_default(&lookup, "DEVICE_TIMEOUT_SECS", 10_u64)?;
        if device_timeout_secs == 0 {
            return Err(AppError::config("DEVICE_TIMEOUT_SECS must be greater than zero"));
        }
        let upload_timeout_secs = parse_or_default(&lookup, "UPLOAD_TIMEOUT_SECS", 10_u64)?;
        if upload_timeout_secs == 0 {
            return Err(AppError::config("UPLOAD_TIMEOUT_SECS must be greater than zero"));
        }

        Ok(Self {
            http_bind: non_empty(&lookup, "HTTP_BIND")
                .unwrap_or_else(|| "127.0.0.1:5000".to_string()),
            device_timeout_secs,
            device_comm_key: parse_or_default(&lookup, "DEVICE_COMM_KEY", 0_u32)?,
            device_exclusive_read: parse_flag(&lookup, "DEVICE_EXCLUSIVE_READ", false)?,
            device_replay_file: non_empty(&lookup, "DEVICE_REPLAY_FILE"),
            upload_endpoint: non_empty(&lookup, "UPLOAD_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_UPLOAD_ENDPOINT.to_string()),
            upload_endpoints: match non_empty(&lookup, "UPLOAD_ENDPOINTS") {
                Some(raw) => parse_endpoints(&raw)?,
                None => HashMap::new(),
            },
            upload_timeout_secs,
            upload_require_token: parse_flag(&lookup, "UPLOAD_REQUIRE_TOKEN", false)?,
            cors_allowed_origin: non_empty(&lookup, "CORS_ALLOWED_ORIGIN"),
        })
    }
}

impl SyncJobConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let today = chrono::Local::now().date_naive();
        Self::from_lookup(|key| std::env::var(key).ok(), today)
    }

    fn from_lookup<F>(lookup: F, today: NaiveDate) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let device = non_empty(&lookup, "SYNC_DEVICE")
            .ok_or_else(|| AppError::config("SYNC_DEVICE is required"))?;
        let today = today.format("%Y-%m-%d").to_string();

        Ok(Self {
            device,
            start_date: non_empty(&lookup, "SYNC_START_DATE").unwrap_or_else(|| today.clone()),
            end_date: non_empty(&lookup, "SYNC_END_DATE").unwrap_or(today),
            environment: non_empty(&lookup, "SYNC_ENVIRONMENT"),
            auth_token: non_empty(&lookup, "UPLOAD_TOKEN"),
        })
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}

fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AppError::config(format!("{key} must be true or false"))),
        },
        None => Ok(default),
    }
}

fn parse_endpoints(raw: &str) -> Result<HashMap<String, String>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| -> Result<(String, String), AppError> {
            let (name, url) = entry
                .split_once('=')
                .map(|(name, url)| (name.trim(), url.trim()))
                .filter(|(name, url)| !name.is_empty() && !url.is_empty())
                .ok_or_else(|| {
                    AppError::config("UPLOAD_ENDPOINTS entries must look like name=url")
                })?;
            Ok((name.to_string(), url.to_string()))
        })
        .collect()
}
