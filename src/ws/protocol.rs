//! WebSocket protocol message definitions.
//!
//! Every frame is one JSON object. Outbound frames are `{type, payload}`;
//! inbound control frames carry `type`, `seq`, `ts`, `session_id`,
//! `protocol_version` at the top level with the action body under `payload`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::game::snapshot::{ChangedEntities, NetState, RemovedEntities};
use crate::game::world::{EndReason, PlayerStats};

pub const PROTOCOL_VERSION: &str = "2";

/// Inbound message types. Anything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMsgKind {
    Join,
    Input,
    Ping,
    Leave,
    #[serde(other)]
    Unknown,
}

/// Inbound frame envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEnvelope {
    #[serde(rename = "type")]
    pub kind: ClientMsgKind,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub ts: Option<u64>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ClientEnvelope {
    /// Action data for `input` frames lives at `payload.action_data`, with
    /// fallback to `payload` itself.
    pub fn action_data(&self) -> &serde_json::Value {
        self.payload.get("action_data").unwrap_or(&self.payload)
    }
}

/// Body of an `input` frame.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct InputPayload {
    #[serde(default)]
    pub turn: f64,
    #[serde(default)]
    pub thrust: f64,
    #[serde(default)]
    pub fire: bool,
    #[serde(default)]
    pub fire_pressed: bool,
    #[serde(default)]
    pub fire_seq: u64,
    #[serde(default)]
    pub lag_comp_ms: Option<f64>,
    #[serde(default)]
    pub client_sent_at_ms: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoToken,
    InvalidToken,
    InputRejected,
    RoomFull,
}

/// Messages sent from server to client, serialized as `{type, payload}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMsg {
    Joined {
        room_id: String,
        player_id: String,
        player_ids: Vec<String>,
        /// Players still needed before the match starts.
        waiting_for: usize,
        deploy_region: String,
        sim_hz: u32,
        net_hz: u32,
    },

    PlayerJoined {
        room_id: String,
        player_id: String,
        player_ids: Vec<String>,
        waiting_for: usize,
    },

    PlayerLeft {
        room_id: String,
        player_id: String,
    },

    GameStart {
        room_id: String,
        player_ids: Vec<String>,
        deploy_region: String,
        sim_hz: u32,
        net_hz: u32,
    },

    StateSnapshot {
        room_id: String,
        protocol_version: String,
        server_ts: u64,
        server_tick: u64,
        ack_seq_by_player: BTreeMap<String, u64>,
        full_state: NetState,
        deploy_region: String,
        sim_hz: u32,
        net_hz: u32,
    },

    StateDelta {
        room_id: String,
        protocol_version: String,
        server_ts: u64,
        server_tick: u64,
        ack_seq_by_player: BTreeMap<String, u64>,
        changed_entities: ChangedEntities,
        removed_entities: RemovedEntities,
        deploy_region: String,
        sim_hz: u32,
        net_hz: u32,
    },

    Pong {
        room_id: String,
        server_tick: u64,
        server_ts: u64,
        deploy_region: String,
        sim_hz: u32,
        net_hz: u32,
    },

    MatchEnd {
        room_id: String,
        protocol_version: String,
        server_ts: u64,
        server_tick: u64,
        winner_ids: Vec<String>,
        reason: EndReason,
        final_stats: BTreeMap<String, PlayerStats>,
    },

    Error {
        code: ErrorCode,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(rename = "expectedGt", skip_serializing_if = "Option::is_none")]
        expected_gt: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_envelope_parses_with_action_data_nesting() {
        let raw = serde_json::json!({
            "type": "input",
            "room_id": "r1",
            "seq": 7,
            "ts": 123,
            "session_id": "s1",
            "protocol_version": "2",
            "payload": {
                "action_data": {"turn": 0.5, "thrust": 1.0, "fire_seq": 7}
            }
        });
        let env: ClientEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(env.kind, ClientMsgKind::Input);
        assert_eq!(env.seq, 7);
        let input: InputPayload = serde_json::from_value(env.action_data().clone()).unwrap();
        assert_eq!(input.turn, 0.5);
        assert_eq!(input.fire_seq, 7);
    }

    #[test]
    fn inbound_payload_falls_back_to_payload_itself() {
        let raw = serde_json::json!({
            "type": "input",
            "seq": 1,
            "payload": {"turn": -1.0, "fire": true}
        });
        let env: ClientEnvelope = serde_json::from_value(raw).unwrap();
        let input: InputPayload = serde_json::from_value(env.action_data().clone()).unwrap();
        assert_eq!(input.turn, -1.0);
        assert!(input.fire);
        assert!(!input.fire_pressed);
    }

    #[test]
    fn unknown_inbound_types_parse_as_unknown() {
        let raw = serde_json::json!({"type": "emote", "seq": 1, "payload": {}});
        let env: ClientEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(env.kind, ClientMsgKind::Unknown);
    }

    #[test]
    fn outbound_frames_use_the_type_payload_envelope() {
        let msg = ServerMsg::PlayerLeft {
            room_id: "r1".to_string(),
            player_id: "u1".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "player_left");
        assert_eq!(value["payload"]["room_id"], "r1");
        assert_eq!(value["payload"]["player_id"], "u1");
    }

    #[test]
    fn error_frames_carry_screaming_codes_and_camel_expected_gt() {
        let msg = ServerMsg::Error {
            code: ErrorCode::InputRejected,
            message: None,
            reason: Some("STALE_INPUT".to_string()),
            expected_gt: Some(5),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["payload"]["code"], "INPUT_REJECTED");
        assert_eq!(value["payload"]["reason"], "STALE_INPUT");
        assert_eq!(value["payload"]["expectedGt"], 5);
        assert!(value["payload"].get("message").is_none());
    }
}
