//! Pickup spawning and collection.
//!
//! Placement uses the seeded sin-hash generator so that every run of the
//! same room produces the same pickup sequence. The exact formula is part of
//! the protocol contract with predicting clients; do not swap it for a
//! different PRNG.

use super::constants::{
    ARENA_EXTENT, MAX_PICKUPS, PICKUP_RADIUS, PICKUP_SPAWN_INSET, PICKUP_SPAWN_PERIOD_TICKS,
    PICKUP_USES, PLAYER_RADIUS,
};
use super::world::{quantize, Pickup, PickupKind, World};

const DRAW_SALTS: [u64; 3] = [7919, 1543, 3571];

/// `frac(sin(x · 12.9898) · 43758.5453)` over the seed-and-tick input.
fn seeded_draw(seed: u64, tick: u64, salt: u64) -> f64 {
    let x = (seed.wrapping_add(tick.wrapping_mul(salt))) as f64;
    let v = (x * 12.9898).sin() * 43758.5453;
    v - v.floor()
}

/// Spawn at most one pickup when the gate is open.
pub fn spawn(world: &mut World) {
    if world.tick % PICKUP_SPAWN_PERIOD_TICKS != 0 || world.pickups.len() >= MAX_PICKUPS {
        return;
    }
    let r1 = seeded_draw(world.seed, world.tick, DRAW_SALTS[0]);
    let r2 = seeded_draw(world.seed, world.tick, DRAW_SALTS[1]);
    let r3 = seeded_draw(world.seed, world.tick, DRAW_SALTS[2]);

    let span = ARENA_EXTENT - 2.0 * PICKUP_SPAWN_INSET;
    let x = quantize(PICKUP_SPAWN_INSET + r1 * span);
    let y = quantize(PICKUP_SPAWN_INSET + r2 * span);
    let kind = match (r3 * 3.0) as u32 {
        0 => PickupKind::Laser,
        1 => PickupKind::Bomb,
        _ => PickupKind::Nova,
    };

    let id = world.alloc_pickup_id();
    world.pickups.push(Pickup {
        id,
        x,
        y,
        kind,
        value: PICKUP_USES,
    });
}

/// Hand each pickup to the first alive ship overlapping it.
pub fn collect(world: &mut World) {
    let reach = PLAYER_RADIUS + PICKUP_RADIUS;
    let mut idx = 0;
    while idx < world.pickups.len() {
        let taker = {
            let pickup = &world.pickups[idx];
            world.player_order.iter().find_map(|id| {
                let ship = world.players.get(id)?;
                if !ship.alive {
                    return None;
                }
                let dist = (ship.x - pickup.x).hypot(ship.y - pickup.y);
                (dist <= reach).then(|| id.clone())
            })
        };
        match taker {
            Some(id) => {
                let pickup = world.pickups.remove(idx);
                if let Some(ship) = world.players.get_mut(&id) {
                    ship.special = pickup.kind.as_special();
                    ship.special_uses = pickup.value;
                    ship.laser_active_ms = 0.0;
                    ship.stats.pickups_collected += 1;
                }
            }
            None => idx += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::PICKUP_SPAWN_INSET;
    use crate::game::world::{Ship, SpecialWeapon};

    fn empty_world(seed: u64) -> World {
        let mut world = World::new(seed);
        world.player_order.push("a".to_string());
        world
            .players
            .insert("a".to_string(), Ship::spawn(18.0, 50.0, 0.0));
        world
    }

    #[test]
    fn spawn_gate_fires_on_period_ticks_only() {
        let mut world = empty_world(7);
        world.tick = 119;
        spawn(&mut world);
        assert!(world.pickups.is_empty());
        world.tick = 120;
        spawn(&mut world);
        assert_eq!(world.pickups.len(), 1);
    }

    #[test]
    fn spawned_pickup_is_inside_the_inset_bounds() {
        for seed in [1u64, 99, 12345, 0xe3b0_c442_98fc] {
            let mut world = empty_world(seed);
            world.tick = 120;
            spawn(&mut world);
            let p = &world.pickups[0];
            assert!(p.x >= PICKUP_SPAWN_INSET && p.x <= ARENA_EXTENT - PICKUP_SPAWN_INSET);
            assert!(p.y >= PICKUP_SPAWN_INSET && p.y <= ARENA_EXTENT - PICKUP_SPAWN_INSET);
            assert_eq!(p.value, PICKUP_USES);
        }
    }

    #[test]
    fn spawn_sequence_is_deterministic_per_seed() {
        let run = |seed: u64| {
            let mut world = empty_world(seed);
            let mut spawned: Vec<(u64, f64, f64, PickupKind)> = Vec::new();
            for tick in 1..=600u64 {
                world.tick = tick;
                spawn(&mut world);
                if let Some(p) = world.pickups.last() {
                    if spawned.last().map(|(id, ..)| *id) != Some(p.id) {
                        spawned.push((p.id, p.x, p.y, p.kind));
                    }
                }
            }
            spawned
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn cap_holds_at_three_pickups() {
        let mut world = empty_world(3);
        // Park the ship far from likely spawn points.
        world.players.get_mut("a").map(|s| {
            s.x = 2.5;
            s.y = 2.5;
        });
        for tick in 1..=1200u64 {
            world.tick = tick;
            spawn(&mut world);
            collect(&mut world);
        }
        assert!(world.pickups.len() <= MAX_PICKUPS);
    }

    #[test]
    fn collection_grants_the_special_and_clears_the_pickup() {
        let mut world = empty_world(5);
        world.tick = 120;
        spawn(&mut world);
        let (px, py, kind) = {
            let p = &world.pickups[0];
            (p.x, p.y, p.kind)
        };
        world.players.get_mut("a").map(|s| {
            s.x = px;
            s.y = py;
            s.laser_active_ms = 500.0;
        });
        collect(&mut world);
        assert!(world.pickups.is_empty());
        let ship = &world.players["a"];
        assert_eq!(ship.special, kind.as_special());
        assert_ne!(ship.special, SpecialWeapon::None);
        assert_eq!(ship.special_uses, PICKUP_USES);
        assert_eq!(ship.laser_active_ms, 0.0);
        assert_eq!(ship.stats.pickups_collected, 1);
    }
}
