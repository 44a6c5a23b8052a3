//! Deterministic simulation entry points driven by the room runtime.

use super::combat;
use super::constants::{HP_TIE_EPSILON, LASER_BURN_MS, MAX_LAG_COMP_MS};
use super::physics;
use super::pickups;
use super::world::{EndReason, InputState, Phase, Ship, SpecialWeapon, World};

/// Spawn points for the two symmetric slots: left facing right, right
/// facing left.
const SPAWNS: [(f64, f64, f64); 2] = [(18.0, 50.0, 0.0), (82.0, 50.0, std::f64::consts::PI)];

/// Build the initial world for a match. The first two player ids take the
/// symmetric spawn slots in order.
pub fn init_world(player_ids: &[String], seed: u64) -> World {
    let mut world = World::new(seed);
    for (id, (x, y, angle)) in player_ids.iter().zip(SPAWNS.iter()) {
        world.player_order.push(id.clone());
        world.players.insert(id.clone(), Ship::spawn(*x, *y, *angle));
    }
    world
}

/// Store a clamped input snapshot on the ship. No-op for absent or dead
/// ships. The edge flag is taken exactly as received; the tick consumes it.
pub fn apply_input(world: &mut World, user_id: &str, input: InputState) {
    let Some(ship) = world.players.get_mut(user_id) else {
        return;
    };
    if !ship.alive {
        return;
    }
    ship.input = InputState {
        turn: input.turn.clamp(-1.0, 1.0),
        thrust: input.thrust.clamp(-1.0, 1.0),
        fire: input.fire,
        fire_pressed: input.fire_pressed,
        fire_seq: input.fire_seq,
        lag_comp_ms: input.lag_comp_ms.clamp(0.0, MAX_LAG_COMP_MS),
    };
}

/// Advance the world by one `dt_ms` step.
pub fn tick(world: &mut World, dt_ms: f64) {
    if world.phase == Phase::Finished {
        return;
    }

    world.remaining_ms = (world.remaining_ms - dt_ms).max(0.0);
    world.tick += 1;

    for effect in &mut world.effects {
        effect.ttl_ms -= dt_ms;
    }
    world.effects.retain(|e| e.ttl_ms > 0.0);

    let order: Vec<String> = world.player_order.clone();
    for id in &order {
        let alive = world.players.get(id).map(|s| s.alive).unwrap_or(false);
        if !alive {
            continue;
        }

        if let Some(ship) = world.players.get_mut(id) {
            physics::step_ship(ship, dt_ms);
        }

        let (pressed, ready) = world
            .players
            .get(id)
            .map(|s| (s.input.fire_pressed, s.fire_cooldown_ms <= 0.0))
            .unwrap_or((false, false));
        if pressed && ready {
            combat::fire(world, id);
        }
        if let Some(ship) = world.players.get_mut(id) {
            ship.input.fire_pressed = false;
        }

        let lasing = world
            .players
            .get(id)
            .map(|s| {
                s.alive
                    && s.special == SpecialWeapon::Laser
                    && s.input.fire
                    && s.special_uses > 0
            })
            .unwrap_or(false);
        if lasing {
            if let Some(ship) = world.players.get_mut(id) {
                ship.laser_active_ms += dt_ms;
            }
            combat::apply_laser(world, id, dt_ms);
            if let Some(ship) = world.players.get_mut(id) {
                if ship.laser_active_ms >= LASER_BURN_MS {
                    ship.laser_active_ms = 0.0;
                    ship.special_uses -= 1;
                    if ship.special_uses == 0 {
                        ship.special = SpecialWeapon::None;
                    }
                }
            }
        }
    }

    combat::step_projectiles(world, dt_ms);
    pickups::spawn(world);
    pickups::collect(world);
    resolve_terminal(world);
}

fn resolve_terminal(world: &mut World) {
    if world.phase == Phase::Finished {
        return;
    }
    let alive = world.alive_ids();
    if alive.len() <= 1 {
        world.phase = Phase::Finished;
        world.winner_ids = alive;
        world.reason = Some(EndReason::Elimination);
        return;
    }
    if world.remaining_ms <= 0.0 {
        let top_hp = world
            .players
            .values()
            .map(|s| s.hp)
            .fold(f64::NEG_INFINITY, f64::max);
        world.winner_ids = world
            .player_order
            .iter()
            .filter(|id| {
                world
                    .players
                    .get(*id)
                    .map(|s| (s.hp - top_hp).abs() <= HP_TIE_EPSILON)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        world.phase = Phase::Finished;
        world.reason = Some(EndReason::Timeout);
    }
}

/// Terminal outcome of the world as of its latest tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalStatus {
    pub terminal: bool,
    pub winner_ids: Vec<String>,
    pub reason: Option<EndReason>,
    pub final_tick: u64,
    pub remaining_ms: f64,
}

pub fn terminal_status(world: &World) -> TerminalStatus {
    TerminalStatus {
        terminal: world.phase == Phase::Finished,
        winner_ids: world.winner_ids.clone(),
        reason: world.reason,
        final_tick: world.tick,
        remaining_ms: world.remaining_ms,
    }
}
