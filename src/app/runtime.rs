use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::device::DeviceConnector;
use crate::adapters::device_replay::ReplayDeviceConnector;
use crate::adapters::upload::UploadForwarder;
use crate::adapters::zk_tcp::ZkTcpConnector;
use crate::app::config::{AppConfig, SyncJobConfig};
use crate::app::error::AppError;
use crate::app::services::{
    AttendanceHandler, AttendanceService, SyncReport, SyncRequest, SyncSettings,
};

fn build_connector(config: &AppConfig) -> Result<Arc<dyn DeviceConnector>, AppError> {
    match &config.device_replay_file {
        Some(path) => {
            tracing::warn!(path = %path, "using replay device instead of hardware");
            let connector = ReplayDeviceConnector::from_file(path).map_err(AppError::config)?;
            Ok(Arc::new(connector))
        }
        None => Ok(Arc::new(ZkTcpConnector::new(config.device_comm_key))),
    }
}

pub fn build_service(config: &AppConfig) -> Result<AttendanceService, AppError> {
    let connector = build_connector(config)?;
    let forwarder = UploadForwarder::new(
        Duration::from_secs(config.upload_timeout_secs),
        config.upload_require_token,
    )
    .map_err(AppError::runtime)?;

    Ok(AttendanceService::new(
        connector,
        forwarder,
        SyncSettings {
            device_timeout: Duration::from_secs(config.device_timeout_secs),
            exclusive_read: config.device_exclusive_read,
            default_endpoint: config.upload_endpoint.clone(),
            endpoints: config.upload_endpoints.clone(),
        },
    ))
}

fn cors(allowed_origin: Option<&str>) -> Cors {
    match allowed_origin {
        Some(origin) => Cors::default()
            .allowed_origin(origin)
            .allowed_methods(["GET", "POST"])
            .allow_any_header(),
        None => Cors::permissive(),
    }
}

pub fn run(config: AppConfig) -> Result<(), AppError> {
    // Built outside the actix system: the blocking upload client owns its own runtime.
    let service = Arc::new(build_service(&config)?);
    let api_state = ApiState {
        attendance: Arc::clone(&service),
    };
    let allowed_origin = config.cors_allowed_origin.clone();

    tracing::info!(bind = %config.http_bind, "http server starting");

    let server_result = actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .wrap(cors(allowed_origin.as_deref()))
                .app_data(web::Data::new(api_state.clone()))
                .configure(configure_routes)
        })
        .bind(&config.http_bind)?
        .run()
        .await
    });

    drop(service);
    server_result.map_err(AppError::runtime)
}

fn execute_sync(
    service: &AttendanceService,
    job: &SyncJobConfig,
) -> Result<SyncReport, AppError> {
    let request = SyncRequest {
        device: job.device.clone(),
        start_date: job.start_date.clone(),
        end_date: job.end_date.clone(),
        auth_token: job.auth_token.clone(),
        environment: job.environment.clone(),
    };

    service
        .sync_attendance(&request)
        .map_err(AppError::runtime)
}

pub fn run_sync(config: AppConfig, job: SyncJobConfig) -> Result<(), AppError> {
    let service = build_service(&config)?;
    let report = execute_sync(&service, &job)?;

    let rendered = serde_json::to_string_pretty(&report).map_err(AppError::runtime)?;
    println!("{rendered}");

    if !report.upload.success {
        let reason = report.upload.error.as_deref().unwrap_or("unknown error");
        return Err(AppError::runtime(format!("upload failed: {reason}")));
    }

    tracing::info!(logs = report.logs.len(), "attendance sync finished");
    Ok(())
}
