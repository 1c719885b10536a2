//! Device session protocol.
//!
//! Transport-agnostic: every inbound frame is turned into a [`Reply`] holding
//! the frames to send back and whether the connection must be closed. The
//! socket actor owns delivery; this module owns the decisions and all
//! persistence side effects. Calls block on the database and are expected to
//! run on a blocking pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::adapters::token::CredentialVerifier;
use crate::app::config::CompanionConfig;
use crate::app::registry::{ConnectionId, SessionRegistry};
use crate::app::services::{
    DeviceCommandHandler, DeviceQueryHandler, ServiceError, SqliteDeviceService,
};
use crate::domain::dispatch::{DispatchDecision, DispatchPolicy, JOB_REQUEST_MESSAGE};
use crate::domain::message::{ErrorCode, decode_frame, encode_error, encode_message, events};
use crate::domain::models::{
    CONNECTED_STATUS_CODE, CONNECTED_STATUS_MSG, DISCONNECTED_STATUS_CODE,
    DISCONNECTED_STATUS_MSG, NewStatusRecord, StatusRecord,
};
use crate::domain::payload::{
    PowerSupplyStatus, validate_auth_request, validate_container_status, validate_status_update,
};
use crate::domain::session_state::Clock;

pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized";
pub const TOKEN_INVALID_MESSAGE: &str = "token invalid";
pub const INVALID_PAYLOAD_MESSAGE: &str = "invalid payload";
pub const DEVICE_NOT_FOUND_MESSAGE: &str = "device not found";
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error";
pub const MALFORMED_MESSAGE: &str = "malformed message";

#[derive(Debug, Clone)]
pub struct ProtocolSettings {
    pub primary_container: String,
    pub companion: Option<CompanionConfig>,
    pub dispatch: DispatchPolicy,
}

/// Outcome of handling one inbound frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub frames: Vec<String>,
    pub close: bool,
    /// Device the connection became bound to while handling the frame.
    pub authenticated_device: Option<String>,
}

impl Reply {
    pub fn none() -> Self {
        Self::default()
    }

    fn reject(frame: String) -> Self {
        Self {
            frames: vec![frame],
            close: true,
            authenticated_device: None,
        }
    }
}

#[derive(Serialize)]
struct AuthResponse {
    success: bool,
    monitored_containers: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartContainerRequest<'a> {
    image_name: &'a str,
    container_name: &'a str,
    environment_vars: BTreeMap<&'static str, &'a str>,
}

#[derive(Serialize)]
struct JobRequest {
    message: &'static str,
}

pub struct DeviceProtocol {
    registry: Arc<SessionRegistry>,
    service: SqliteDeviceService,
    verifier: Arc<dyn CredentialVerifier>,
    clock: Arc<dyn Clock + Send + Sync>,
    settings: ProtocolSettings,
}

impl DeviceProtocol {
    pub fn new(
        registry: Arc<SessionRegistry>,
        service: SqliteDeviceService,
        verifier: Arc<dyn CredentialVerifier>,
        clock: Arc<dyn Clock + Send + Sync>,
        settings: ProtocolSettings,
    ) -> Self {
        Self {
            registry,
            service,
            verifier,
            clock,
            settings,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn handle_frame(&self, connection_id: ConnectionId, text: &str) -> Reply {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %error,
                    "dropping connection after undecodable frame"
                );
                return Reply::reject(encode_error(
                    events::ERROR,
                    ErrorCode::BadRequest,
                    MALFORMED_MESSAGE,
                ));
            }
        };

        tracing::debug!(connection_id = %connection_id, event = %frame.event, "frame received");

        if frame.event == events::AUTH_REQUEST {
            return self.handle_auth_request(connection_id, &frame.data);
        }

        let Some(device_id) = self.registry.lookup(connection_id) else {
            return self.reject_unauthorized(connection_id, &frame.event);
        };

        match frame.event.as_str() {
            events::STATUS_UPDATE_RESPONSE => self.handle_status_update(&device_id, &frame.data),
            events::ADD_ERROR_RESPONSE => self.handle_add_error(&device_id, &frame.data),
            other => {
                tracing::warn!(
                    connection_id = %connection_id,
                    device_id = %device_id,
                    event = %other,
                    "ignoring unknown event"
                );
                Reply::none()
            }
        }
    }

    /// Pure check against the session registry.
    pub fn is_authorized(&self, connection_id: ConnectionId) -> bool {
        self.registry.is_authorized(connection_id)
    }

    pub fn reject_unauthorized(&self, connection_id: ConnectionId, event: &str) -> Reply {
        tracing::warn!(
            connection_id = %connection_id,
            event = %event,
            "rejecting event from unauthenticated connection"
        );
        Reply::reject(encode_error(
            events::AUTH_RESPONSE,
            ErrorCode::Forbidden,
            UNAUTHORIZED_MESSAGE,
        ))
    }

    /// Rejection for a connection that let its authentication deadline pass.
    /// `None` once the connection is bound to a device.
    pub fn expire_unauthenticated(&self, connection_id: ConnectionId) -> Option<Reply> {
        if self.is_authorized(connection_id) {
            return None;
        }
        tracing::info!(connection_id = %connection_id, "authentication deadline passed");
        Some(self.reject_unauthorized(connection_id, events::AUTH_REQUEST))
    }

    pub fn handle_auth_request(&self, connection_id: ConnectionId, data: &Value) -> Reply {
        let request = match validate_auth_request(data) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(connection_id = %connection_id, error = %error, "auth request rejected");
                return auth_failure(ErrorCode::BadRequest, INVALID_PAYLOAD_MESSAGE);
            }
        };

        let claims = match self.verifier.verify(&request.token) {
            Ok(claims) => claims,
            Err(error) => {
                tracing::warn!(connection_id = %connection_id, error = %error, "auth token rejected");
                return auth_failure(ErrorCode::BadRequest, TOKEN_INVALID_MESSAGE);
            }
        };
        let device_id = claims.cuid;

        match self.service.get_device(&device_id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    device_id = %device_id,
                    "valid token for unknown device"
                );
                return auth_failure(ErrorCode::NotFound, DEVICE_NOT_FOUND_MESSAGE);
            }
            Err(error) => {
                tracing::error!(
                    connection_id = %connection_id,
                    device_id = %device_id,
                    error = %error,
                    "device lookup failed during authentication"
                );
                return auth_failure(ErrorCode::Internal, INTERNAL_ERROR_MESSAGE);
            }
        }

        if let Some(previous) = self.registry.register(connection_id, device_id.clone())
            && previous != device_id
        {
            tracing::info!(
                connection_id = %connection_id,
                previous_device_id = %previous,
                device_id = %device_id,
                "session rebound to another device"
            );
            self.record_disconnect(&previous);
        }

        let monitored_containers = match self.connect_and_list_monitored(&device_id) {
            Ok(containers) => containers,
            Err(error) => {
                self.registry.unregister(connection_id);
                tracing::error!(
                    connection_id = %connection_id,
                    device_id = %device_id,
                    error = %error,
                    "failed to record connect status"
                );
                return auth_failure(ErrorCode::Internal, INTERNAL_ERROR_MESSAGE);
            }
        };

        tracing::info!(
            connection_id = %connection_id,
            device_id = %device_id,
            monitored = monitored_containers.len(),
            "device authenticated"
        );

        let mut reply = Reply {
            authenticated_device: Some(device_id.clone()),
            ..Reply::default()
        };
        push_message(
            &mut reply,
            events::AUTH_RESPONSE,
            &AuthResponse {
                success: true,
                monitored_containers,
            },
        );

        if let Some(companion) = &self.settings.companion {
            push_message(
                &mut reply,
                events::START_CONTAINER_REQUEST,
                &StartContainerRequest {
                    image_name: &companion.image_name,
                    container_name: &companion.container_name,
                    environment_vars: BTreeMap::from([("DONATIONBOX_ID", device_id.as_str())]),
                },
            );
        }

        reply
    }

    /// Validates the whole batch first; nothing is written unless every
    /// container entry is valid.
    pub fn handle_status_update(&self, device_id: &str, data: &Value) -> Reply {
        let update = match validate_status_update(data) {
            Ok(update) => update,
            Err(error) => {
                tracing::warn!(device_id = %device_id, error = %error, "status update rejected");
                return Reply::reject(encode_error(
                    events::STATUS_UPDATE_RESPONSE,
                    ErrorCode::BadRequest,
                    INVALID_PAYLOAD_MESSAGE,
                ));
            }
        };

        let mut failed = 0_usize;
        for container in &update.containers {
            if let Err(error) = self.record_status(
                device_id,
                &container.container_name,
                container.status_code,
                &container.status_msg,
            ) {
                failed += 1;
                log_ingestion_failure(device_id, &container.container_name, &error);
            }
        }

        tracing::debug!(
            device_id = %device_id,
            device_time = %update.time,
            containers = update.containers.len(),
            failed,
            "status update ingested"
        );

        let mut reply = Reply::none();
        if let Some(power_supply) = &update.power_supply
            && let Some(frame) = self.handle_power_supply_report(device_id, power_supply)
        {
            reply.frames.push(frame);
        }
        reply
    }

    pub fn handle_add_error(&self, device_id: &str, data: &Value) -> Reply {
        let status = match validate_container_status(data) {
            Ok(status) => status,
            Err(error) => {
                tracing::warn!(device_id = %device_id, error = %error, "error report rejected");
                return Reply::reject(encode_error(
                    events::ADD_ERROR_RESPONSE,
                    ErrorCode::BadRequest,
                    INVALID_PAYLOAD_MESSAGE,
                ));
            }
        };

        match self.record_status(
            device_id,
            &status.container_name,
            status.status_code,
            &status.status_msg,
        ) {
            Ok(record) => tracing::info!(
                device_id = %device_id,
                container = %record.container_name,
                status_code = record.status_code,
                status_msg = %record.status_msg,
                "container error reported"
            ),
            Err(error) => log_ingestion_failure(device_id, &status.container_name, &error),
        }

        Reply::none()
    }

    /// Persists the latest power snapshot and returns a `jobRequest` frame
    /// when the dispatch policy asks for one.
    pub fn handle_power_supply_report(
        &self,
        device_id: &str,
        power_supply: &PowerSupplyStatus,
    ) -> Option<String> {
        let updated_at = self.clock.now().to_rfc3339();
        match serde_json::to_string(power_supply) {
            Ok(json) => {
                if let Err(error) = self
                    .service
                    .update_power_supply(device_id, &json, &updated_at)
                {
                    tracing::warn!(device_id = %device_id, error = %error, "failed to persist power supply status");
                }
            }
            Err(error) => {
                tracing::error!(device_id = %device_id, error = %error, "failed to serialize power supply status");
            }
        }

        match self.settings.dispatch.decide(power_supply) {
            DispatchDecision::Hold => None,
            DispatchDecision::RequestJob => {
                tracing::info!(
                    device_id = %device_id,
                    grid = power_supply.production.grid,
                    delta = self.settings.dispatch.grid_delta(),
                    "dispatching job request"
                );
                encode_or_log(
                    events::JOB_REQUEST,
                    &JobRequest {
                        message: JOB_REQUEST_MESSAGE,
                    },
                )
            }
        }
    }

    pub fn record_status(
        &self,
        device_id: &str,
        container_name: &str,
        status_code: i64,
        status_msg: &str,
    ) -> Result<StatusRecord, ServiceError> {
        self.service.record_status(
            device_id,
            &NewStatusRecord {
                container_name: container_name.to_string(),
                status_code,
                status_msg: status_msg.to_string(),
                created_at: self.clock.now().to_rfc3339(),
            },
        )
    }

    /// Drops the registry entry right away; returns the device that was bound.
    pub fn end_session(&self, connection_id: ConnectionId) -> Option<String> {
        self.registry.unregister(connection_id)
    }

    pub fn record_disconnect(&self, device_id: &str) {
        match self.record_status(
            device_id,
            &self.settings.primary_container,
            DISCONNECTED_STATUS_CODE,
            DISCONNECTED_STATUS_MSG,
        ) {
            Ok(_) => tracing::info!(device_id = %device_id, "device disconnected"),
            Err(error) => tracing::warn!(
                device_id = %device_id,
                error = %error,
                "failed to record disconnect status"
            ),
        }
    }

    /// Session cleanup for a closed connection. Connections that never
    /// authenticated need none and yield `None`.
    pub fn handle_disconnect(&self, connection_id: ConnectionId) -> Option<String> {
        let device_id = self.end_session(connection_id)?;
        self.record_disconnect(&device_id);
        Some(device_id)
    }

    pub fn status_update_request(&self) -> Option<String> {
        encode_or_log(events::STATUS_UPDATE_REQUEST, &serde_json::json!({}))
    }

    fn connect_and_list_monitored(&self, device_id: &str) -> Result<Vec<String>, ServiceError> {
        self.record_status(
            device_id,
            &self.settings.primary_container,
            CONNECTED_STATUS_CODE,
            CONNECTED_STATUS_MSG,
        )?;

        Ok(self
            .service
            .latest_successful_container_statuses(device_id)?
            .into_iter()
            .map(|record| record.container_name)
            .collect())
    }
}

fn auth_failure(code: ErrorCode, message: &str) -> Reply {
    Reply::reject(encode_error(events::AUTH_RESPONSE, code, message))
}

fn push_message<T: Serialize>(reply: &mut Reply, event: &str, data: &T) {
    if let Some(frame) = encode_or_log(event, data) {
        reply.frames.push(frame);
    }
}

fn encode_or_log<T: Serialize>(event: &str, data: &T) -> Option<String> {
    encode_message(event, data)
        .map_err(|error| tracing::error!(event = %event, error = %error, "failed to encode message"))
        .ok()
}

fn log_ingestion_failure(device_id: &str, container_name: &str, error: &ServiceError) {
    if error.is_not_found() {
        tracing::warn!(
            device_id = %device_id,
            container = %container_name,
            error = %error,
            "status for missing device skipped"
        );
    } else {
        tracing::error!(
            device_id = %device_id,
            container = %container_name,
            error = %error,
            "failed to record container status"
        );
    }
}
