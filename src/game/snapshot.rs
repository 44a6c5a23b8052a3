//! Network-state projection and delta building.
//!
//! The projection strips server-only data (position history, transient input
//! fields) and keys the entity collections by id so that consecutive states
//! diff cleanly. `apply_delta` is the inverse used by clients and by the
//! round-trip tests here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::world::{
    EffectKind, Phase, PickupKind, PlayerStats, ProjectileKind, SpecialWeapon, World,
};

/// A ship as seen on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetShip {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub angle: f64,
    pub hp: f64,
    pub alive: bool,
    pub special_weapon: SpecialWeapon,
    pub special_uses: u32,
    pub fire_cooldown_ms: f64,
    pub stats: PlayerStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetProjectile {
    pub id: String,
    pub owner: String,
    /// Lets predicting clients match their locally spawned shot.
    pub fire_seq: u64,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub ttl_ms: f64,
    pub kind: ProjectileKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetPickup {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub kind: PickupKind,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetEffect {
    pub id: String,
    pub kind: EffectKind,
    pub x: f64,
    pub y: f64,
    pub ttl_ms: f64,
}

/// The projected world state broadcast in `state_snapshot` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetState {
    pub phase: Phase,
    pub tick: u64,
    pub remaining_ms: f64,
    pub players: BTreeMap<String, NetShip>,
    pub projectiles: BTreeMap<String, NetProjectile>,
    pub pickups: BTreeMap<String, NetPickup>,
    pub effects: BTreeMap<String, NetEffect>,
}

/// Project the authoritative world into its network shape.
pub fn project(world: &World) -> NetState {
    let players = world
        .players
        .iter()
        .map(|(id, ship)| {
            (
                id.clone(),
                NetShip {
                    x: ship.x,
                    y: ship.y,
                    vx: ship.vx,
                    vy: ship.vy,
                    angle: ship.angle,
                    hp: ship.hp,
                    alive: ship.alive,
                    special_weapon: ship.special,
                    special_uses: ship.special_uses,
                    fire_cooldown_ms: ship.fire_cooldown_ms,
                    stats: ship.stats,
                },
            )
        })
        .collect();
    let projectiles = world
        .projectiles
        .iter()
        .map(|p| {
            (
                p.id.to_string(),
                NetProjectile {
                    id: p.id.to_string(),
                    owner: p.owner.clone(),
                    fire_seq: p.fire_seq,
                    x: p.x,
                    y: p.y,
                    vx: p.vx,
                    vy: p.vy,
                    ttl_ms: p.ttl_ms,
                    kind: p.kind,
                },
            )
        })
        .collect();
    let pickups = world
        .pickups
        .iter()
        .map(|p| {
            (
                p.id.to_string(),
                NetPickup {
                    id: p.id.to_string(),
                    x: p.x,
                    y: p.y,
                    kind: p.kind,
                    value: p.value,
                },
            )
        })
        .collect();
    let effects = world
        .effects
        .iter()
        .map(|e| {
            (
                e.id.to_string(),
                NetEffect {
                    id: e.id.to_string(),
                    kind: e.kind,
                    x: e.x,
                    y: e.y,
                    ttl_ms: e.ttl_ms,
                },
            )
        })
        .collect();
    NetState {
        phase: world.phase,
        tick: world.tick,
        remaining_ms: world.remaining_ms,
        players,
        projectiles,
        pickups,
        effects,
    }
}

/// Entities that changed between two network states.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangedEntities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub players: BTreeMap<String, NetShip>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub projectiles: BTreeMap<String, NetProjectile>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub pickups: BTreeMap<String, NetPickup>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub effects: BTreeMap<String, NetEffect>,
}

/// Ids present before but gone now.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemovedEntities {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub projectiles: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub pickups: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub effects: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldDelta {
    pub changed_entities: ChangedEntities,
    pub removed_entities: RemovedEntities,
}

fn diff_collection<T: Clone + PartialEq>(
    prev: &BTreeMap<String, T>,
    next: &BTreeMap<String, T>,
) -> (BTreeMap<String, T>, Vec<String>) {
    let changed = next
        .iter()
        .filter(|(id, entity)| prev.get(*id) != Some(entity))
        .map(|(id, entity)| (id.clone(), entity.clone()))
        .collect();
    let removed = prev
        .keys()
        .filter(|id| !next.contains_key(*id))
        .cloned()
        .collect();
    (changed, removed)
}

/// Diff two consecutive network states. With no prior state everything is
/// emitted as changed and nothing as removed.
pub fn build_delta(prev: Option<&NetState>, next: &NetState) -> WorldDelta {
    let Some(prev) = prev else {
        return WorldDelta {
            changed_entities: ChangedEntities {
                phase: Some(next.phase),
                tick: Some(next.tick),
                remaining_ms: Some(next.remaining_ms),
                players: next.players.clone(),
                projectiles: next.projectiles.clone(),
                pickups: next.pickups.clone(),
                effects: next.effects.clone(),
            },
            removed_entities: RemovedEntities::default(),
        };
    };

    let (players, _) = diff_collection(&prev.players, &next.players);
    let (projectiles, removed_projectiles) = diff_collection(&prev.projectiles, &next.projectiles);
    let (pickups, removed_pickups) = diff_collection(&prev.pickups, &next.pickups);
    let (effects, removed_effects) = diff_collection(&prev.effects, &next.effects);

    WorldDelta {
        changed_entities: ChangedEntities {
            phase: (prev.phase != next.phase).then_some(next.phase),
            tick: (prev.tick != next.tick).then_some(next.tick),
            remaining_ms: (prev.remaining_ms != next.remaining_ms).then_some(next.remaining_ms),
            players,
            projectiles,
            pickups,
            effects,
        },
        removed_entities: RemovedEntities {
            projectiles: removed_projectiles,
            pickups: removed_pickups,
            effects: removed_effects,
        },
    }
}

/// Apply a delta onto a prior state, producing the next state.
pub fn apply_delta(prev: &NetState, delta: &WorldDelta) -> NetState {
    let mut next = prev.clone();
    let changed = &delta.changed_entities;
    if let Some(phase) = changed.phase {
        next.phase = phase;
    }
    if let Some(tick) = changed.tick {
        next.tick = tick;
    }
    if let Some(remaining_ms) = changed.remaining_ms {
        next.remaining_ms = remaining_ms;
    }
    next.players
        .extend(changed.players.iter().map(|(k, v)| (k.clone(), v.clone())));
    next.projectiles.extend(
        changed
            .projectiles
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    next.pickups
        .extend(changed.pickups.iter().map(|(k, v)| (k.clone(), v.clone())));
    next.effects
        .extend(changed.effects.iter().map(|(k, v)| (k.clone(), v.clone())));
    for id in &delta.removed_entities.projectiles {
        next.projectiles.remove(id);
    }
    for id in &delta.removed_entities.pickups {
        next.pickups.remove(id);
    }
    for id in &delta.removed_entities.effects {
        next.effects.remove(id);
    }
    next
}

/// Decides, per network tick, whether to emit a full snapshot or a delta,
/// and remembers the previous projected state.
pub struct FrameCadence {
    prev: Option<NetState>,
    net_tick: u64,
    full_every: u64,
}

pub enum NetFrame {
    Full(NetState),
    Delta(WorldDelta),
}

impl FrameCadence {
    pub fn new(full_every: u64) -> Self {
        Self {
            prev: None,
            net_tick: 0,
            full_every,
        }
    }

    pub fn next_frame(&mut self, world: &World) -> NetFrame {
        let next = project(world);
        let full = self.prev.is_none()
            || (self.full_every > 0 && self.net_tick % self.full_every == 0);
        let frame = if full {
            NetFrame::Full(next.clone())
        } else {
            NetFrame::Delta(build_delta(self.prev.as_ref(), &next))
        };
        self.prev = Some(next);
        self.net_tick += 1;
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::sim::{apply_input, init_world, tick};
    use crate::game::world::InputState;

    fn ids() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    #[test]
    fn missing_prev_emits_everything_changed() {
        let world = init_world(&ids(), 3);
        let next = project(&world);
        let delta = build_delta(None, &next);
        assert_eq!(delta.changed_entities.phase, Some(next.phase));
        assert_eq!(delta.changed_entities.tick, Some(next.tick));
        assert_eq!(delta.changed_entities.players.len(), 2);
        assert!(delta.removed_entities.projectiles.is_empty());
    }

    #[test]
    fn unchanged_ships_do_not_appear_in_the_patch() {
        let mut world = init_world(&ids(), 3);
        let prev = project(&world);
        // Only A moves.
        apply_input(
            &mut world,
            "a",
            InputState {
                thrust: 1.0,
                ..InputState::default()
            },
        );
        tick(&mut world, 16.0);
        let next = project(&world);
        let delta = build_delta(Some(&prev), &next);
        assert!(delta.changed_entities.players.contains_key("a"));
        // B gains a history sample but its network shape is identical.
        assert!(!delta.changed_entities.players.contains_key("b"));
        assert_eq!(delta.changed_entities.tick, Some(next.tick));
        assert_eq!(delta.changed_entities.remaining_ms, Some(next.remaining_ms));
    }

    #[test]
    fn removed_projectiles_show_up_as_id_strings() {
        let mut world = init_world(&ids(), 3);
        apply_input(
            &mut world,
            "a",
            InputState {
                fire_pressed: true,
                fire_seq: 1,
                ..InputState::default()
            },
        );
        tick(&mut world, 16.0);
        let with_projectile = project(&world);
        let id = with_projectile.projectiles.keys().next().cloned().unwrap();
        // Let it fly into B and resolve.
        for _ in 0..80 {
            tick(&mut world, 16.0);
        }
        let without = project(&world);
        let delta = build_delta(Some(&with_projectile), &without);
        assert!(delta.removed_entities.projectiles.contains(&id));
        assert!(!delta.changed_entities.projectiles.contains_key(&id));
    }

    #[test]
    fn round_trip_law_holds_over_a_live_match() {
        let mut world = init_world(&ids(), seed());
        let mut prev = project(&world);
        let mut seq = 0;
        for step in 0..600u64 {
            seq += 1;
            apply_input(
                &mut world,
                "a",
                InputState {
                    turn: 0.4,
                    thrust: 1.0,
                    fire: true,
                    fire_pressed: step % 12 == 0,
                    fire_seq: seq,
                    lag_comp_ms: 32.0,
                    ..InputState::default()
                },
            );
            apply_input(
                &mut world,
                "b",
                InputState {
                    turn: -0.2,
                    thrust: 0.7,
                    fire_pressed: step % 9 == 0,
                    fire_seq: seq,
                    ..InputState::default()
                },
            );
            tick(&mut world, 16.0);
            let next = project(&world);
            let delta = build_delta(Some(&prev), &next);
            assert_eq!(apply_delta(&prev, &delta), next);
            prev = next;
        }
    }

    fn seed() -> u64 {
        crate::game::world::seed_from_room_id("delta-room")
    }

    #[test]
    fn cadence_interleaves_fulls_and_deltas() {
        let world = init_world(&ids(), 3);
        let mut cadence = FrameCadence::new(4);
        let kinds: Vec<bool> = (0..9)
            .map(|_| matches!(cadence.next_frame(&world), NetFrame::Full(_)))
            .collect();
        assert_eq!(
            kinds,
            vec![true, false, false, false, true, false, false, false, true]
        );
    }

    #[test]
    fn projection_strips_server_only_fields() {
        let mut world = init_world(&ids(), 3);
        tick(&mut world, 16.0);
        let state = project(&world);
        let json = serde_json::to_value(&state.players["a"]).unwrap();
        assert!(json.get("history").is_none());
        assert!(json.get("input").is_none());
        assert!(json.get("hp").is_some());
    }
}
