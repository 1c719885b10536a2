use std::sync::Arc;
use std::time::Duration;

use actix_web::{Error, HttpRequest, HttpResponse, Responder, get, post, web};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};

use crate::adapters::token::TokenService;
use crate::adapters::ws::DeviceSocket;
use crate::app::protocol::DeviceProtocol;
use crate::app::services::{
    DeviceCommandHandler, DeviceQueryHandler, ServiceError, SqliteDeviceService,
};
use crate::app::stats::{StatsError, StatsOutcome, WorkingTimeSettings, working_time_stats};
use crate::domain::models::{NewDeviceRecord, new_device_cuid};
use crate::domain::session_state::Clock;

#[derive(Clone)]
pub struct ApiState {
    pub devices: SqliteDeviceService,
    pub tokens: TokenService,
    pub protocol: Arc<DeviceProtocol>,
    pub clock: Arc<dyn Clock + Send + Sync>,
    pub working_time: WorkingTimeSettings,
    pub status_request_interval: Duration,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterDeviceRequest {
    pub name: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct RegisterDeviceResponse {
    pub cuid: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub cuid: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatusResponse {
    pub container_name: String,
    pub status_code: i64,
    pub status_msg: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct WorkingTimeQuery {
    pub refresh: Option<bool>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkingTimeResponse {
    pub cuid: String,
    pub avg_working_ms_per_day: i64,
    pub updated_at: String,
    pub refreshed: bool,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(register_device_endpoint)
        .service(issue_token_endpoint)
        .service(list_containers_endpoint)
        .service(working_time_endpoint)
        .service(device_socket_endpoint);
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[post("/donationbox")]
async fn register_device_endpoint(
    state: web::Data<ApiState>,
    body: Option<web::Json<RegisterDeviceRequest>>,
) -> impl Responder {
    let name = body
        .and_then(|body| body.into_inner().name)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());
    let new_device = NewDeviceRecord {
        cuid: new_device_cuid(),
        name,
        created_at: state.clock.now().to_rfc3339(),
    };

    let devices = state.devices.clone();
    let record = new_device.clone();
    match web::block(move || devices.insert_device(&record)).await {
        Ok(Ok(_)) => {
            tracing::info!(device_id = %new_device.cuid, "donation box registered");
            HttpResponse::Created().json(RegisterDeviceResponse {
                cuid: new_device.cuid,
            })
        }
        Ok(Err(error)) => service_error_response(error),
        Err(error) => blocking_error_response(error),
    }
}

#[post("/donationbox/token")]
async fn issue_token_endpoint(
    state: web::Data<ApiState>,
    body: web::Json<TokenRequest>,
) -> impl Responder {
    let cuid = body.into_inner().cuid;
    let devices = state.devices.clone();
    let lookup_cuid = cuid.clone();

    match web::block(move || devices.get_device(&lookup_cuid)).await {
        Ok(Ok(Some(_))) => {}
        Ok(Ok(None)) => return device_not_found_response(),
        Ok(Err(error)) => return service_error_response(error),
        Err(error) => return blocking_error_response(error),
    }

    match state.tokens.issue_at(&cuid, state.clock.now()) {
        Ok(token) => {
            tracing::info!(device_id = %cuid, "device token issued");
            HttpResponse::Ok().json(TokenResponse { token })
        }
        Err(error) => {
            tracing::error!(device_id = %cuid, error = %error, "failed to issue device token");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "failed to issue token"
            }))
        }
    }
}

#[get("/donationbox/{cuid}/containers")]
async fn list_containers_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> impl Responder {
    let cuid = path.into_inner();
    let devices = state.devices.clone();

    let result = web::block(move || {
        if devices.get_device(&cuid)?.is_none() {
            return Ok(None);
        }
        devices.latest_container_statuses(&cuid).map(Some)
    })
    .await;

    match result {
        Ok(Ok(Some(statuses))) => {
            let mapped: Vec<ContainerStatusResponse> = statuses
                .into_iter()
                .map(|status| ContainerStatusResponse {
                    container_name: status.container_name,
                    status_code: status.status_code,
                    status_msg: status.status_msg,
                    updated_at: status.created_at,
                })
                .collect();
            HttpResponse::Ok().json(mapped)
        }
        Ok(Ok(None)) => device_not_found_response(),
        Ok(Err(error)) => service_error_response(error),
        Err(error) => blocking_error_response(error),
    }
}

#[get("/donationbox/{cuid}/working-time")]
async fn working_time_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    query: web::Query<WorkingTimeQuery>,
) -> impl Responder {
    let cuid = path.into_inner();
    let force = query.refresh.unwrap_or(false);
    let devices = state.devices.clone();
    let settings = state.working_time.clone();
    let now = state.clock.now();
    let lookup_cuid = cuid.clone();

    let result =
        web::block(move || working_time_stats(&devices, &lookup_cuid, &settings, now, force))
            .await;

    match result {
        Ok(Ok(outcome)) => {
            let refreshed = matches!(outcome, StatsOutcome::Refreshed(_));
            let stats = outcome.stats();
            HttpResponse::Ok().json(WorkingTimeResponse {
                cuid,
                avg_working_ms_per_day: stats.avg_working_ms_per_day,
                updated_at: stats.updated_at.clone(),
                refreshed,
            })
        }
        Ok(Err(StatsError::DeviceNotFound(_))) => device_not_found_response(),
        Ok(Err(StatsError::Service(error))) => {
            let devices = state.devices.clone();
            let flagged_cuid = cuid.clone();
            if let Ok(Err(flag_error)) =
                web::block(move || devices.mark_stats_update_failed(&flagged_cuid)).await
            {
                tracing::warn!(device_id = %cuid, error = %flag_error, "failed to flag unsuccessful working time update");
            }
            service_error_response(error)
        }
        Err(error) => blocking_error_response(error),
    }
}

#[get("/ws")]
async fn device_socket_endpoint(
    state: web::Data<ApiState>,
    req: HttpRequest,
    stream: web::Payload,
) -> Result<HttpResponse, Error> {
    ws::start(
        DeviceSocket::new(Arc::clone(&state.protocol), state.status_request_interval),
        &req,
        stream,
    )
}

fn device_not_found_response() -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({
        "error": "device not found"
    }))
}

fn blocking_error_response(error: actix_web::error::BlockingError) -> HttpResponse {
    tracing::error!(error = %error, "blocking task failed");
    HttpResponse::InternalServerError().json(serde_json::json!({
        "error": "internal error"
    }))
}

fn service_error_response(error: ServiceError) -> HttpResponse {
    match error {
        ServiceError::DbLockPoisoned => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "database lock poisoned"
            }))
        }
        ServiceError::Database(error) => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("database query failed: {error}")
            }))
        }
    }
}
