//! Typed world state owned by a room's simulation.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::constants::{MAX_HP, POSITION_HISTORY_LEN, QUANT_STEP, ROUND_DURATION_MS};

/// Quantize a world float to 1/10000. Applied after every mutation so the
/// simulation stays bit-identical across runs regardless of platform.
pub fn quantize(value: f64) -> f64 {
    (value * QUANT_STEP).round() / QUANT_STEP
}

/// Derive the deterministic world seed from a room id: the first 12 hex
/// digits of SHA-256 over the id, read base-16.
pub fn seed_from_room_id(room_id: &str) -> u64 {
    let digest = hex::encode(Sha256::digest(room_id.as_bytes()));
    u64::from_str_radix(&digest[..12], 16).unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Playing,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Elimination,
    Timeout,
    PlayerDisconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialWeapon {
    None,
    Laser,
    Bomb,
    Nova,
}

/// What a pickup grants when collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickupKind {
    Laser,
    Bomb,
    Nova,
}

impl PickupKind {
    pub fn as_special(self) -> SpecialWeapon {
        match self {
            PickupKind::Laser => SpecialWeapon::Laser,
            PickupKind::Bomb => SpecialWeapon::Bomb,
            PickupKind::Nova => SpecialWeapon::Nova,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectileKind {
    Bullet,
    Bomb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Explosion,
    Nova,
}

/// Latest input applied to a ship. Overwritten, never queued.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputState {
    /// Turn axis in [-1, 1].
    pub turn: f64,
    /// Thrust axis in [-1, 1]; negative is reverse.
    pub thrust: f64,
    /// Trigger held.
    pub fire: bool,
    /// Edge trigger; consumed by the tick that fires.
    pub fire_pressed: bool,
    /// Client-side monotone counter matching predicted projectiles.
    pub fire_seq: u64,
    /// Smoothed client-to-server latency in [0, 120] ms.
    pub lag_comp_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerStats {
    pub kills: u32,
    pub deaths: u32,
    pub damage_dealt: f64,
    pub pickups_collected: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ship {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    /// Facing angle in [0, 2π).
    pub angle: f64,
    pub hp: f64,
    pub alive: bool,
    pub fire_cooldown_ms: f64,
    pub special: SpecialWeapon,
    pub special_uses: u32,
    /// Accumulated beam time toward consuming one laser use.
    pub laser_active_ms: f64,
    pub nova_cooldown_ms: f64,
    /// Ring of (x, y) samples, one per simulation tick, newest last.
    pub history: VecDeque<(f64, f64)>,
    pub input: InputState,
    pub stats: PlayerStats,
}

impl Ship {
    pub fn spawn(x: f64, y: f64, angle: f64) -> Self {
        Self {
            x: quantize(x),
            y: quantize(y),
            vx: 0.0,
            vy: 0.0,
            angle: quantize(angle),
            hp: MAX_HP,
            alive: true,
            fire_cooldown_ms: 0.0,
            special: SpecialWeapon::None,
            special_uses: 0,
            laser_active_ms: 0.0,
            nova_cooldown_ms: 0.0,
            history: VecDeque::with_capacity(POSITION_HISTORY_LEN),
            input: InputState::default(),
            stats: PlayerStats::default(),
        }
    }

    pub fn record_position(&mut self) {
        self.history.push_back((self.x, self.y));
        while self.history.len() > POSITION_HISTORY_LEN {
            self.history.pop_front();
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub id: u64,
    pub owner: String,
    /// Echo of the input sequence that spawned this shot.
    pub fire_seq: u64,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub ttl_ms: f64,
    pub damage: f64,
    pub kind: ProjectileKind,
    /// Lag compensation captured at spawn, used for rewound hit tests.
    pub lag_comp_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pickup {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub kind: PickupKind,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    pub id: u64,
    pub kind: EffectKind,
    pub x: f64,
    pub y: f64,
    pub ttl_ms: f64,
}

/// The authoritative world. Exclusively owned by one room; every entity in
/// it is exclusively owned by the world.
#[derive(Debug, Clone, PartialEq)]
pub struct World {
    pub phase: Phase,
    pub seed: u64,
    pub tick: u64,
    pub remaining_ms: f64,
    /// Join order; drives deterministic iteration.
    pub player_order: Vec<String>,
    pub players: BTreeMap<String, Ship>,
    pub projectiles: Vec<Projectile>,
    pub pickups: Vec<Pickup>,
    pub effects: Vec<Effect>,
    pub winner_ids: Vec<String>,
    pub reason: Option<EndReason>,
    next_projectile_id: u64,
    next_pickup_id: u64,
    next_effect_id: u64,
}

impl World {
    pub fn new(seed: u64) -> Self {
        Self {
            phase: Phase::Playing,
            seed,
            tick: 0,
            remaining_ms: ROUND_DURATION_MS,
            player_order: Vec::new(),
            players: BTreeMap::new(),
            projectiles: Vec::new(),
            pickups: Vec::new(),
            effects: Vec::new(),
            winner_ids: Vec::new(),
            reason: None,
            next_projectile_id: 0,
            next_pickup_id: 0,
            next_effect_id: 0,
        }
    }

    pub fn alloc_projectile_id(&mut self) -> u64 {
        let id = self.next_projectile_id;
        self.next_projectile_id += 1;
        id
    }

    pub fn alloc_pickup_id(&mut self) -> u64 {
        let id = self.next_pickup_id;
        self.next_pickup_id += 1;
        id
    }

    pub fn push_effect(&mut self, kind: EffectKind, x: f64, y: f64, ttl_ms: f64) {
        let id = self.next_effect_id;
        self.next_effect_id += 1;
        self.effects.push(Effect {
            id,
            kind,
            x,
            y,
            ttl_ms,
        });
    }

    pub fn alive_ids(&self) -> Vec<String> {
        self.player_order
            .iter()
            .filter(|id| self.players.get(*id).map(|s| s.alive).unwrap_or(false))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_snaps_to_grid() {
        assert_eq!(quantize(1.00004), 1.0);
        assert_eq!(quantize(1.00006), 1.0001);
        assert_eq!(quantize(-0.33333333), -0.3333);
        assert_eq!(quantize(0.0), 0.0);
    }

    #[test]
    fn seed_is_first_twelve_hex_digits_of_sha256() {
        // sha256("") = e3b0c44298fc1c14...
        assert_eq!(seed_from_room_id(""), 0xe3b0_c442_98fc);
        // sha256("abc") = ba7816bf8f01cfea...
        assert_eq!(seed_from_room_id("abc"), 0xba78_16bf_8f01);
    }

    #[test]
    fn seed_is_stable_per_room_id() {
        let a = seed_from_room_id("room-42");
        let b = seed_from_room_id("room-42");
        assert_eq!(a, b);
        assert_ne!(a, seed_from_room_id("room-43"));
    }

    #[test]
    fn position_history_is_bounded() {
        let mut ship = Ship::spawn(10.0, 10.0, 0.0);
        for i in 0..50 {
            ship.x = i as f64;
            ship.record_position();
        }
        assert_eq!(ship.history.len(), POSITION_HISTORY_LEN);
        // Oldest samples dropped at the tail.
        assert_eq!(ship.history.front().copied(), Some((20.0, 10.0)));
        assert_eq!(ship.history.back().copied(), Some((49.0, 10.0)));
    }
}
