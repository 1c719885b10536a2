use std::sync::Arc;
use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_web::web;
use actix_web_actors::ws;

use crate::app::protocol::{DeviceProtocol, Reply};
use crate::app::registry::ConnectionId;
use crate::domain::session_state::{ConnectionPhase, PhaseTransition};

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long a silent client is tolerated before the session is closed
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Time a connection gets to authenticate: one status request interval, or
/// the client timeout when periodic requests are disabled.
pub fn auth_deadline(status_request_interval: Duration) -> Duration {
    if status_request_interval.is_zero() {
        CLIENT_TIMEOUT
    } else {
        status_request_interval
    }
}

/// WebSocket actor for one donation box connection.
///
/// Frames are handed to [`DeviceProtocol`] on the blocking pool one at a
/// time, so replies leave in the order their frames arrived.
pub struct DeviceSocket {
    connection_id: ConnectionId,
    phase: ConnectionPhase,
    last_heartbeat: Instant,
    status_request_interval: Duration,
    protocol: Arc<DeviceProtocol>,
}

impl DeviceSocket {
    pub fn new(protocol: Arc<DeviceProtocol>, status_request_interval: Duration) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            phase: ConnectionPhase::default(),
            last_heartbeat: Instant::now(),
            status_request_interval,
            protocol,
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                tracing::warn!(
                    connection_id = %act.connection_id,
                    device_id = ?act.phase.device_id(),
                    "websocket client heartbeat failed, disconnecting"
                );
                ctx.stop();
                return;
            }

            ctx.ping(b"heartbeat");
        });
    }

    fn start_auth_deadline(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_later(auth_deadline(self.status_request_interval), |act, ctx| {
            if act.phase.is_authenticated() || act.phase.is_closed() {
                return;
            }
            if let Some(reply) = act.protocol.expire_unauthenticated(act.connection_id) {
                act.apply_reply(reply, ctx);
            }
        });
    }

    fn start_status_requests(&self, ctx: &mut ws::WebsocketContext<Self>) {
        if self.status_request_interval.is_zero() {
            return;
        }

        ctx.run_interval(self.status_request_interval, |act, ctx| {
            if !act.phase.is_authenticated() {
                return;
            }
            if let Some(frame) = act.protocol.status_update_request() {
                ctx.text(frame);
            }
        });
    }

    fn handle_text(&mut self, text: String, ctx: &mut ws::WebsocketContext<Self>) {
        if self.phase.is_closed() {
            return;
        }

        let protocol = Arc::clone(&self.protocol);
        let connection_id = self.connection_id;
        let pending = web::block(move || protocol.handle_frame(connection_id, &text));

        ctx.wait(
            pending
                .into_actor(self)
                .map(|result, act, ctx| match result {
                    Ok(reply) => act.apply_reply(reply, ctx),
                    Err(error) => {
                        tracing::error!(
                            connection_id = %act.connection_id,
                            error = %error,
                            "frame handler did not complete"
                        );
                        act.close(ctx);
                    }
                }),
        );
    }

    fn apply_reply(&mut self, reply: Reply, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(device_id) = reply.authenticated_device
            && let Some(PhaseTransition::Rebound {
                previous_device_id,
                device_id,
            }) = self.phase.authenticate(device_id)
        {
            tracing::debug!(
                connection_id = %self.connection_id,
                previous_device_id = %previous_device_id,
                device_id = %device_id,
                "connection rebound"
            );
        }

        for frame in reply.frames {
            ctx.text(frame);
        }

        if reply.close {
            self.close(ctx);
        }
    }

    fn close(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.close(Some(ws::CloseCode::Policy.into()));
        ctx.stop();
    }
}

impl Actor for DeviceSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.connection_id, "websocket connection started");
        self.start_heartbeat(ctx);
        self.start_auth_deadline(ctx);
        self.start_status_requests(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(PhaseTransition::Closed { device_id }) = self.phase.close() {
            tracing::info!(
                connection_id = %self.connection_id,
                device_id = ?device_id,
                "websocket connection stopped"
            );
        }

        // Authorization ends here; the status write may lag behind it.
        let Some(device_id) = self.protocol.end_session(self.connection_id) else {
            return;
        };

        let protocol = Arc::clone(&self.protocol);
        actix_web::rt::spawn(async move {
            if let Err(error) = web::block(move || protocol.record_disconnect(&device_id)).await {
                tracing::warn!(error = %error, "disconnect cleanup did not complete");
            }
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for DeviceSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(payload)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_text(text.to_string(), ctx);
            }
            Ok(ws::Message::Binary(bytes)) => {
                self.last_heartbeat = Instant::now();
                match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => self.handle_text(text, ctx),
                    Err(_) => tracing::warn!(
                        connection_id = %self.connection_id,
                        len = bytes.len(),
                        "ignoring non-utf8 binary frame"
                    ),
                }
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(
                    connection_id = %self.connection_id,
                    reason = ?reason,
                    "websocket close received"
                );
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_) | ws::Message::Nop) => {}
            Err(error) => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    error = %error,
                    "websocket protocol error"
                );
                ctx.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CLIENT_TIMEOUT, auth_deadline};

    #[test]
    fn auth_deadline_follows_status_request_interval() {
        assert_eq!(auth_deadline(Duration::from_secs(45)), Duration::from_secs(45));
        assert_eq!(auth_deadline(Duration::ZERO), CLIENT_TIMEOUT);
    }
}
