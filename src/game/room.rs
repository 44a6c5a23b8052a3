//! Room runtime: the authoritative per-match actor.
//!
//! Each room is a single task that owns its world outright. Sockets hand off
//! through the command channel; nothing else touches room state, so the tick
//! path never takes a lock and never runs concurrently with itself.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::game::constants::MAX_LAG_COMP_MS;
use crate::game::registry::RoomRegistry;
use crate::game::sim;
use crate::game::snapshot::{FrameCadence, NetFrame};
use crate::game::world::{seed_from_room_id, EndReason, InputState, PlayerStats, World};
use crate::results::{MatchResult, MatchResultReporter};
use crate::util::time::unix_millis;
use crate::ws::protocol::{ErrorCode, InputPayload, ServerMsg, PROTOCOL_VERSION};

/// Participants per room; the arena is strictly two-player.
pub const MAX_PLAYERS: usize = 2;

/// Close code sent to surviving peers on mid-match disconnect termination.
pub const CLOSE_MATCH_TERMINATED: u16 = 4001;

/// Latency samples older than this are treated as clock skew and ignored.
const LATENCY_SAMPLE_WINDOW_MS: f64 = 2000.0;

/// Commands accepted by a room task.
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        session_id: String,
        user_id: String,
        outbound: mpsc::Sender<Message>,
    },
    Input {
        session_id: String,
        user_id: String,
        seq: u64,
        payload: InputPayload,
        received_at_ms: u64,
    },
    Ping {
        session_id: String,
    },
    Leave {
        session_id: String,
    },
    Disconnected {
        session_id: String,
    },
}

/// Handle to a running room task.
#[derive(Clone)]
pub struct RoomHandle {
    pub room_id: String,
    pub cmd_tx: mpsc::Sender<RoomCommand>,
    pub session_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn session_count(&self) -> usize {
        self.session_count.load(Ordering::Relaxed)
    }
}

struct Session {
    user_id: String,
    outbound: mpsc::Sender<Message>,
}

/// The room actor. Created by the registry, dropped when the room closes.
pub struct Room {
    room_id: String,
    config: Arc<Config>,
    registry: Arc<RoomRegistry>,
    reporter: Option<Arc<MatchResultReporter>>,

    sessions: HashMap<String, Session>,
    session_count: Arc<AtomicUsize>,
    /// Join order; at most two distinct user ids.
    participants: Vec<String>,
    /// Session id from the first join, reported with the match result.
    primary_session_id: Option<String>,

    /// Latest-wins input slot per user, consumed every tick.
    pending_inputs: HashMap<String, InputState>,
    last_seq: HashMap<String, u64>,
    ack_seq: BTreeMap<String, u64>,
    /// Smoothed client-to-server latency per user.
    latency_ms: HashMap<String, f64>,

    world: Option<World>,
    cadence: FrameCadence,
    running: bool,
    finished: bool,
    closed: bool,
}

impl Room {
    pub fn new(
        room_id: String,
        config: Arc<Config>,
        registry: Arc<RoomRegistry>,
        reporter: Option<Arc<MatchResultReporter>>,
    ) -> (Self, RoomHandle, mpsc::Receiver<RoomCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let session_count = Arc::new(AtomicUsize::new(0));
        let handle = RoomHandle {
            room_id: room_id.clone(),
            cmd_tx,
            session_count: session_count.clone(),
        };
        let cadence = FrameCadence::new(config.full_snapshot_interval_net_ticks as u64);
        let room = Self {
            room_id,
            config,
            registry,
            reporter,
            sessions: HashMap::new(),
            session_count,
            participants: Vec::new(),
            primary_session_id: None,
            pending_inputs: HashMap::new(),
            last_seq: HashMap::new(),
            ack_seq: BTreeMap::new(),
            latency_ms: HashMap::new(),
            world: None,
            cadence,
            running: false,
            finished: false,
            closed: false,
        };
        (room, handle, cmd_rx)
    }

    /// Drive the room until it closes. The scheduler is self-correcting:
    /// each tick is scheduled `period` after the previous tick *started*,
    /// and the measured interval, clamped to [period, 2·period], is the dt
    /// handed to the simulation.
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<RoomCommand>) {
        let period = Duration::from_micros(1_000_000 / self.config.sim_tick_hz.max(1) as u64);
        let mut last_tick_start = Instant::now();
        let mut next_tick = last_tick_start + period;

        info!(room_id = %self.room_id, "Room created");

        loop {
            let was_running = self.running;
            tokio::select! {
                biased;
                maybe_cmd = cmd_rx.recv() => match maybe_cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => self.closed = true,
                },
                _ = tokio::time::sleep_until(next_tick), if self.running && !self.finished => {
                    let tick_start = Instant::now();
                    let dt = (tick_start - last_tick_start).clamp(period, period * 2);
                    last_tick_start = tick_start;
                    self.run_tick(dt.as_secs_f64() * 1000.0);
                    next_tick = tick_start + period;
                }
            }
            if !was_running && self.running {
                last_tick_start = Instant::now();
                next_tick = last_tick_start + period;
            }
            if self.closed {
                break;
            }
        }

        self.registry.remove(&self.room_id);
        info!(room_id = %self.room_id, "Room closed");
    }

    fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join {
                session_id,
                user_id,
                outbound,
            } => self.upsert_session(session_id, user_id, outbound),
            RoomCommand::Input {
                session_id,
                user_id,
                seq,
                payload,
                received_at_ms,
            } => self.enqueue_input(&session_id, &user_id, seq, payload, received_at_ms),
            RoomCommand::Ping { session_id } => self.send_to(
                &session_id,
                &ServerMsg::Pong {
                    room_id: self.room_id.clone(),
                    server_tick: self.world.as_ref().map(|w| w.tick).unwrap_or(0),
                    server_ts: unix_millis(),
                    deploy_region: self.config.deploy_region.clone(),
                    sim_hz: self.config.sim_tick_hz,
                    net_hz: self.config.network_hz,
                },
            ),
            RoomCommand::Leave { session_id } => {
                if let Some(session) = self.sessions.get(&session_id) {
                    let _ = session.outbound.try_send(Message::Close(None));
                }
                self.remove_session(&session_id);
            }
            RoomCommand::Disconnected { session_id } => self.remove_session(&session_id),
        }
    }

    /// Register or refresh a session. A join with a known session id is an
    /// idempotent reconnect: the socket handle is replaced and the current
    /// joined snapshot re-sent, with no broadcast and no state change.
    fn upsert_session(
        &mut self,
        session_id: String,
        user_id: String,
        outbound: mpsc::Sender<Message>,
    ) {
        if let Some(existing) = self.sessions.get_mut(&session_id) {
            existing.outbound = outbound;
            let msg = self.joined_msg(&user_id);
            self.send_to(&session_id, &msg);
            debug!(room_id = %self.room_id, session_id = %session_id, "Idempotent rejoin");
            return;
        }

        if !self.participants.contains(&user_id) {
            if self.participants.len() >= MAX_PLAYERS {
                let _ = outbound.try_send(error_frame(
                    ErrorCode::RoomFull,
                    Some("Room already has two players".to_string()),
                    None,
                    None,
                ));
                return;
            }
            self.participants.push(user_id.clone());
        }
        if self.primary_session_id.is_none() {
            self.primary_session_id = Some(session_id.clone());
        }

        self.sessions.insert(
            session_id.clone(),
            Session {
                user_id: user_id.clone(),
                outbound,
            },
        );
        self.session_count
            .store(self.sessions.len(), Ordering::Relaxed);

        self.broadcast(&ServerMsg::PlayerJoined {
            room_id: self.room_id.clone(),
            player_id: user_id.clone(),
            player_ids: self.participants.clone(),
            waiting_for: MAX_PLAYERS.saturating_sub(self.participants.len()),
        });
        let msg = self.joined_msg(&user_id);
        self.send_to(&session_id, &msg);

        info!(
            room_id = %self.room_id,
            user_id = %user_id,
            session_id = %session_id,
            players = self.participants.len(),
            "Player joined room"
        );

        self.maybe_start();
    }

    fn joined_msg(&self, user_id: &str) -> ServerMsg {
        ServerMsg::Joined {
            room_id: self.room_id.clone(),
            player_id: user_id.to_string(),
            player_ids: self.participants.clone(),
            waiting_for: MAX_PLAYERS.saturating_sub(self.participants.len()),
            deploy_region: self.config.deploy_region.clone(),
            sim_hz: self.config.sim_tick_hz,
            net_hz: self.config.network_hz,
        }
    }

    fn maybe_start(&mut self) {
        if self.running || self.participants.len() < MAX_PLAYERS {
            return;
        }
        let seed = seed_from_room_id(&self.room_id);
        self.world = Some(sim::init_world(&self.participants, seed));
        self.running = true;
        self.broadcast(&ServerMsg::GameStart {
            room_id: self.room_id.clone(),
            player_ids: self.participants.clone(),
            deploy_region: self.config.deploy_region.clone(),
            sim_hz: self.config.sim_tick_hz,
            net_hz: self.config.network_hz,
        });
        info!(room_id = %self.room_id, seed, "Match started");
    }

    /// Input admission: monotone seq gate, ack advance, latency smoothing,
    /// then latest-wins replacement of the user's input slot.
    fn enqueue_input(
        &mut self,
        session_id: &str,
        user_id: &str,
        seq: u64,
        payload: InputPayload,
        received_at_ms: u64,
    ) {
        if self.finished {
            self.send_to(
                session_id,
                &input_rejected("MATCH_FINISHED", None),
            );
            return;
        }
        if !self.running {
            self.send_to(
                session_id,
                &input_rejected("ROOM_NOT_RUNNING", None),
            );
            return;
        }
        let last = self.last_seq.get(user_id).copied().unwrap_or(0);
        if seq <= last {
            self.send_to(
                session_id,
                &input_rejected("STALE_INPUT", Some(last)),
            );
            return;
        }
        self.last_seq.insert(user_id.to_string(), seq);
        self.ack_seq.insert(user_id.to_string(), seq);

        let mut smoothed = self.latency_ms.get(user_id).copied();
        if let Some(sent) = payload.client_sent_at_ms {
            let now = received_at_ms as f64;
            if (now - sent).abs() <= LATENCY_SAMPLE_WINDOW_MS {
                let age = (now - sent).max(0.0);
                let prev = smoothed.unwrap_or(0.0);
                let next = (prev * 0.8 + age * 0.2).clamp(0.0, MAX_LAG_COMP_MS);
                self.latency_ms.insert(user_id.to_string(), next);
                smoothed = Some(next);
            }
        }
        let lag_comp_ms = smoothed.unwrap_or_else(|| {
            payload
                .lag_comp_ms
                .unwrap_or(0.0)
                .clamp(0.0, MAX_LAG_COMP_MS)
        });

        self.pending_inputs.insert(
            user_id.to_string(),
            InputState {
                turn: payload.turn,
                thrust: payload.thrust,
                fire: payload.fire,
                fire_pressed: payload.fire_pressed,
                fire_seq: payload.fire_seq,
                lag_comp_ms,
            },
        );
    }

    fn run_tick(&mut self, dt_ms: f64) {
        let Some(world) = self.world.as_mut() else {
            return;
        };
        for (user_id, input) in self.pending_inputs.iter_mut() {
            sim::apply_input(world, user_id, *input);
            // The edge must trigger at most once per press.
            input.fire_pressed = false;
        }

        sim::tick(world, dt_ms);

        if world.tick % self.config.net_tick_interval() == 0 {
            let server_tick = world.tick;
            let frame = self.cadence.next_frame(world);
            let msg = match frame {
                NetFrame::Full(full_state) => ServerMsg::StateSnapshot {
                    room_id: self.room_id.clone(),
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    server_ts: unix_millis(),
                    server_tick,
                    ack_seq_by_player: self.ack_seq.clone(),
                    full_state,
                    deploy_region: self.config.deploy_region.clone(),
                    sim_hz: self.config.sim_tick_hz,
                    net_hz: self.config.network_hz,
                },
                NetFrame::Delta(delta) => ServerMsg::StateDelta {
                    room_id: self.room_id.clone(),
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    server_ts: unix_millis(),
                    server_tick,
                    ack_seq_by_player: self.ack_seq.clone(),
                    changed_entities: delta.changed_entities,
                    removed_entities: delta.removed_entities,
                    deploy_region: self.config.deploy_region.clone(),
                    sim_hz: self.config.sim_tick_hz,
                    net_hz: self.config.network_hz,
                },
            };
            self.broadcast(&msg);
        }

        let Some(status) = self.world.as_ref().map(sim::terminal_status) else {
            return;
        };
        if status.terminal {
            let reason = status.reason.unwrap_or(EndReason::Elimination);
            self.handle_match_end(status.winner_ids, reason);
            self.closed = true;
        }
    }

    /// Broadcast the final frame, hand the signed result to the reporter,
    /// and stop the scheduler.
    fn handle_match_end(&mut self, winner_ids: Vec<String>, reason: EndReason) {
        self.finished = true;
        let (server_tick, final_stats) = match self.world.as_ref() {
            Some(world) => (
                world.tick,
                world
                    .players
                    .iter()
                    .map(|(id, ship)| (id.clone(), ship.stats))
                    .collect::<BTreeMap<String, PlayerStats>>(),
            ),
            None => (0, BTreeMap::new()),
        };

        self.broadcast(&ServerMsg::MatchEnd {
            room_id: self.room_id.clone(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            server_ts: unix_millis(),
            server_tick,
            winner_ids: winner_ids.clone(),
            reason,
            final_stats: final_stats.clone(),
        });

        info!(
            room_id = %self.room_id,
            ?winner_ids,
            ?reason,
            tick = server_tick,
            "Match ended"
        );

        if let Some(reporter) = self.reporter.clone() {
            let result = MatchResult {
                room_id: self.room_id.clone(),
                session_id: self.primary_session_id.clone(),
                winner_ids,
                participants: self.participants.clone(),
                reason,
                final_stats,
                ended_at: Utc::now(),
            };
            let room_id = self.room_id.clone();
            tokio::spawn(async move {
                match reporter.submit(&result).await {
                    Ok(_) => info!(room_id = %room_id, "Match result submitted"),
                    Err(error) => {
                        // The outcome was already communicated to clients.
                        warn!(room_id = %room_id, %error, "Match result webhook failed");
                    }
                }
            });
        }
    }

    fn remove_session(&mut self, session_id: &str) {
        let Some(session) = self.sessions.remove(session_id) else {
            return;
        };
        self.session_count
            .store(self.sessions.len(), Ordering::Relaxed);

        self.broadcast(&ServerMsg::PlayerLeft {
            room_id: self.room_id.clone(),
            player_id: session.user_id.clone(),
        });
        info!(
            room_id = %self.room_id,
            user_id = %session.user_id,
            session_id = %session_id,
            "Session removed"
        );

        if self.running && !self.finished {
            let connected: Vec<String> = self
                .participants
                .iter()
                .filter(|id| self.sessions.values().any(|s| &s.user_id == *id))
                .cloned()
                .collect();
            if connected.len() < MAX_PLAYERS {
                self.handle_match_end(connected, EndReason::PlayerDisconnected);
                for session in self.sessions.values() {
                    let _ = session.outbound.try_send(Message::Close(Some(CloseFrame {
                        code: CLOSE_MATCH_TERMINATED,
                        reason: "match_terminated".into(),
                    })));
                }
                self.closed = true;
                return;
            }
        }

        if self.sessions.is_empty() {
            self.closed = true;
        }
    }

    /// Serialize once, fan out to every open socket. Sockets whose writer
    /// is gone or saturated are skipped silently.
    fn broadcast(&self, msg: &ServerMsg) {
        let Ok(text) = serde_json::to_string(msg) else {
            return;
        };
        for session in self.sessions.values() {
            let _ = session.outbound.try_send(Message::Text(text.clone()));
        }
    }

    fn send_to(&self, session_id: &str, msg: &ServerMsg) {
        let Some(session) = self.sessions.get(session_id) else {
            return;
        };
        let Ok(text) = serde_json::to_string(msg) else {
            return;
        };
        let _ = session.outbound.try_send(Message::Text(text));
    }
}

fn input_rejected(reason: &str, expected_gt: Option<u64>) -> ServerMsg {
    ServerMsg::Error {
        code: ErrorCode::InputRejected,
        message: None,
        reason: Some(reason.to_string()),
        expected_gt,
    }
}

fn error_frame(
    code: ErrorCode,
    message: Option<String>,
    reason: Option<String>,
    expected_gt: Option<u64>,
) -> Message {
    let msg = ServerMsg::Error {
        code,
        message,
        reason,
        expected_gt,
    };
    Message::Text(serde_json::to_string(&msg).unwrap_or_default())
}
