use std::sync::Arc;

use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, Responder, get, post, web};
use serde::{Deserialize, Serialize};

use crate::adapters::upload::UploadResult;
use crate::app::services::{AttendanceHandler, AttendanceService, SyncError, SyncRequest};
use crate::domain::models::{ReconciledLogEntry, UserRecord};
use crate::domain::reconcile::UserMap;

#[derive(Clone)]
pub struct ApiState {
    pub attendance: Arc<AttendanceService>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub ip: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRequest {
    pub ip: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub environment: Option<String>,
    pub auth_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub message: &'static str,
    pub users: Vec<UserRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceLogs {
    pub logs: Vec<ReconciledLogEntry>,
    pub user_map: UserMap,
}

#[derive(Debug, Serialize)]
pub struct AttendanceResponse {
    pub attendance: AttendanceLogs,
    pub upload: UploadResult,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(connect_endpoint)
        .service(attendance_endpoint);
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[post("/connect")]
async fn connect_endpoint(
    state: web::Data<ApiState>,
    body: web::Json<ConnectRequest>,
) -> impl Responder {
    let Some(ip) = present(body.into_inner().ip) else {
        return bad_request("IP address is required");
    };

    let service = Arc::clone(&state.attendance);
    match web::block(move || service.fetch_roster(&ip)).await {
        Ok(Ok(users)) => HttpResponse::Ok().json(ConnectResponse {
            message: "Successfully connected to device",
            users,
        }),
        Ok(Err(error)) => sync_error_response(error),
        Err(error) => worker_error_response(error),
    }
}

#[post("/attendance")]
async fn attendance_endpoint(
    state: web::Data<ApiState>,
    http: HttpRequest,
    body: web::Json<AttendanceRequest>,
) -> impl Responder {
    let body = body.into_inner();

    let Some(device) = present(body.ip) else {
        return bad_request("IP address is required");
    };
    let (Some(start_date), Some(end_date)) = (present(body.start_date), present(body.end_date))
    else {
        return bad_request("startDate and endDate are required");
    };

    let request = SyncRequest {
        device,
        start_date,
        end_date,
        auth_token: present(body.auth_token).or_else(|| bearer_token(&http)),
        environment: present(body.environment),
    };

    let service = Arc::clone(&state.attendance);
    match web::block(move || service.sync_attendance(&request)).await {
        Ok(Ok(report)) => HttpResponse::Ok().json(AttendanceResponse {
            attendance: AttendanceLogs {
                logs: report.logs,
                user_map: report.user_map,
            },
            upload: report.upload,
        }),
        Ok(Err(error)) => sync_error_response(error),
        Err(error) => worker_error_response(error),
    }
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn bearer_token(request: &HttpRequest) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .and_then(|token| present(Some(token.to_string())))
}

fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({ "error": message }))
}

fn sync_error_response(error: SyncError) -> HttpResponse {
    if error.is_client_error() {
        return bad_request(&error.to_string());
    }

    tracing::warn!(error = %error, "device request failed");
    HttpResponse::InternalServerError().json(serde_json::json!({
        "error": error.to_string()
    }))
}

fn worker_error_response(error: actix_web::error::BlockingError) -> HttpResponse {
    tracing::error!(error = %error, "blocking worker failed");
    HttpResponse::InternalServerError().json(serde_json::json!({
        "error": "device worker failed"
    }))
}
