mod config;
mod error;
mod logging;
mod runtime;
pub mod services;

pub use error::AppError;

pub fn run() -> Result<(), AppError> {
    logging::init()?;
    config::load_dotenv();

    let config = config::AppConfig::from_env()?;

    tracing::info!(
        http_bind = %config.http_bind,
        device_timeout_secs = config.device_timeout_secs,
        device_exclusive_read = config.device_exclusive_read,
        replay = config.device_replay_file.is_some(),
        upload_endpoint = %config.upload_endpoint,
        upload_environments = config.upload_endpoints.len(),
        upload_require_token = config.upload_require_token,
        "application bootstrap initialized"
    );

    runtime::run(config)
}

/// One-shot sync for cron-style use: read the device, upload, print the report.
pub fn run_sync() -> Result<(), AppError> {
    logging::init()?;
    config::load_dotenv();

    let config = config::AppConfig::from_env()?;
    let job = config::SyncJobConfig::from_env()?;

    tracing::info!(
        device = %job.device,
        start_date = %job.start_date,
        end_date = %job.end_date,
        environment = job.environment.as_deref().unwrap_or("default"),
        "attendance sync job starting"
    );

    runtime::run_sync(config, job)
}
