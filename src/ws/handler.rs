//! WebSocket connection gateway.
//!
//! Sockets upgrade on `/ws` unconditionally; authentication happens in-band
//! so the client always receives a typed error frame. Frames arriving while
//! token verification is outstanding land in a bounded pre-auth buffer and
//! are dispatched in arrival order once the session is bound.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::auth::{AccessClaims, VerifyOptions};
use crate::game::registry::RoomRegistry;
use crate::game::RoomCommand;
use crate::util::rate_limit::InputRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{
    ClientEnvelope, ClientMsgKind, ErrorCode, InputPayload, ServerMsg,
};

/// Frames buffered while token verification is in flight.
const PRE_AUTH_BUFFER_MAX: usize = 32;

/// Outbound queue per socket; the room drops frames for saturated clients.
const OUTBOUND_QUEUE: usize = 256;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, query.token, state))
}

async fn handle_socket(socket: WebSocket, token: Option<String>, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let Some(token) = token.filter(|t| !t.is_empty()) else {
        let frame = ServerMsg::Error {
            code: ErrorCode::NoToken,
            message: Some("token query parameter required".to_string()),
            reason: None,
            expected_gt: None,
        };
        let _ = send_direct(&mut ws_sink, &frame).await;
        let _ = ws_sink.close().await;
        return;
    };

    // Verify while buffering any frames the client sends early.
    let mut pre_auth: Vec<ClientEnvelope> = Vec::new();
    let opts = VerifyOptions::default();
    let verify_fut = state.verifier.verify(&token, &opts);
    tokio::pin!(verify_fut);
    let verdict = loop {
        tokio::select! {
            verdict = &mut verify_fut => break verdict,
            frame = ws_stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if pre_auth.len() < PRE_AUTH_BUFFER_MAX {
                        if let Ok(env) = serde_json::from_str::<ClientEnvelope>(&text) {
                            pre_auth.push(env);
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    debug!(%error, "Socket error during authentication");
                    return;
                }
            }
        }
    };

    let claims = match verdict {
        Ok(claims) => claims,
        Err(error) => {
            info!(%error, "Token rejected");
            let frame = ServerMsg::Error {
                code: ErrorCode::InvalidToken,
                message: Some(error.to_string()),
                reason: None,
                expected_gt: None,
            };
            let _ = send_direct(&mut ws_sink, &frame).await;
            let _ = ws_sink.close().await;
            return;
        }
    };

    info!(
        user_id = %claims.subject,
        room_id = %claims.room_id,
        session_id = %claims.session_id,
        "Session authenticated"
    );

    // Writer task: room broadcasts -> socket.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sink.send(msg).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    let mut session = GatewaySession {
        state: &state,
        claims: &claims,
        outbound: outbound_tx,
    };

    for env in pre_auth {
        session.dispatch(env).await;
    }

    let mut rate_limiter = InputRateLimiter::for_tick_rate(state.config.sim_tick_hz);
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.admit() {
                    continue;
                }
                match serde_json::from_str::<ClientEnvelope>(&text) {
                    Ok(env) => session.dispatch(env).await,
                    Err(error) => {
                        // Malformed frames are dropped, never fatal.
                        debug!(user_id = %claims.subject, %error, "Unparseable frame");
                    }
                }
            }
            Ok(Message::Close(_)) => {
                debug!(session_id = %claims.session_id, "Client closed");
                break;
            }
            Ok(_) => {}
            Err(error) => {
                debug!(session_id = %claims.session_id, %error, "Socket error");
                break;
            }
        }
    }

    if rate_limiter.dropped() > 0 {
        warn!(
            user_id = %claims.subject,
            session_id = %claims.session_id,
            dropped = rate_limiter.dropped(),
            "Connection exceeded the input frame budget"
        );
    }

    // Socket gone: the room decides whether the match survives.
    if let Some(room) = state.rooms.get(&claims.room_id) {
        let _ = room
            .cmd_tx
            .send(RoomCommand::Disconnected {
                session_id: claims.session_id.clone(),
            })
            .await;
    }
    writer.abort();
    info!(session_id = %claims.session_id, "Connection closed");
}

struct GatewaySession<'a> {
    state: &'a AppState,
    claims: &'a AccessClaims,
    outbound: mpsc::Sender<Message>,
}

impl GatewaySession<'_> {
    async fn dispatch(&mut self, env: ClientEnvelope) {
        match env.kind {
            ClientMsgKind::Join => self.handle_join().await,
            ClientMsgKind::Input => self.handle_input(&env).await,
            ClientMsgKind::Ping => self.handle_ping().await,
            ClientMsgKind::Leave => self.handle_leave().await,
            ClientMsgKind::Unknown => {}
        }
    }

    async fn handle_join(&mut self) {
        let room = RoomRegistry::get_or_create(
            &self.state.rooms,
            &self.claims.room_id,
            &self.state.config,
            self.state.reporter.clone(),
        );
        let _ = room
            .cmd_tx
            .send(RoomCommand::Join {
                session_id: self.claims.session_id.clone(),
                user_id: self.claims.subject.clone(),
                outbound: self.outbound.clone(),
            })
            .await;
    }

    async fn handle_input(&mut self, env: &ClientEnvelope) {
        let Ok(payload) = serde_json::from_value::<InputPayload>(env.action_data().clone()) else {
            return;
        };
        let Some(room) = self.state.rooms.get(&self.claims.room_id) else {
            self.send(&ServerMsg::Error {
                code: ErrorCode::InputRejected,
                message: None,
                reason: Some("ROOM_NOT_RUNNING".to_string()),
                expected_gt: None,
            })
            .await;
            return;
        };
        let _ = room
            .cmd_tx
            .send(RoomCommand::Input {
                session_id: self.claims.session_id.clone(),
                user_id: self.claims.subject.clone(),
                seq: env.seq,
                payload,
                received_at_ms: unix_millis(),
            })
            .await;
    }

    async fn handle_ping(&mut self) {
        match self.state.rooms.get(&self.claims.room_id) {
            Some(room) => {
                let _ = room
                    .cmd_tx
                    .send(RoomCommand::Ping {
                        session_id: self.claims.session_id.clone(),
                    })
                    .await;
            }
            None => {
                // Not joined yet; answer from the gateway.
                let config = &self.state.config;
                self.send(&ServerMsg::Pong {
                    room_id: self.claims.room_id.clone(),
                    server_tick: 0,
                    server_ts: unix_millis(),
                    deploy_region: config.deploy_region.clone(),
                    sim_hz: config.sim_tick_hz,
                    net_hz: config.network_hz,
                })
                .await;
            }
        }
    }

    async fn handle_leave(&mut self) {
        if let Some(room) = self.state.rooms.get(&self.claims.room_id) {
            let _ = room
                .cmd_tx
                .send(RoomCommand::Leave {
                    session_id: self.claims.session_id.clone(),
                })
                .await;
        }
    }

    async fn send(&self, msg: &ServerMsg) {
        if let Ok(text) = serde_json::to_string(msg) {
            let _ = self.outbound.send(Message::Text(text)).await;
        }
    }
}

async fn send_direct(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(msg).unwrap_or_default();
    sink.send(Message::Text(text)).await
}
