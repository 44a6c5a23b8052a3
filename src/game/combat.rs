//! Projectiles, lag-compensated hit detection, and special weapons.

use super::constants::{
    ARENA_EXTENT, BOMB_DAMAGE, BOMB_EDGE_FALLOFF, BOMB_RADIUS, BOMB_SELF_DAMAGE_FACTOR,
    BOMB_SPEED, BOMB_TTL_MS, EXPLOSION_EFFECT_TTL_MS, FIRE_COOLDOWN_MS, HIT_MARKER_TTL_MS,
    LASER_DPS, LASER_HALF_WIDTH, LASER_RANGE, MAX_LAG_COMP_MS, NOVA_COOLDOWN_MS, NOVA_DAMAGE,
    NOVA_EDGE_FALLOFF, NOVA_EFFECT_TTL_MS, NOVA_RADIUS, PLAYER_RADIUS, PROJECTILE_DAMAGE,
    PROJECTILE_RADIUS, PROJECTILE_SPEED, PROJECTILE_TTL_MS, REWIND_TICK_MS,
};
use super::world::{
    quantize, EffectKind, Projectile, ProjectileKind, Ship, SpecialWeapon, World,
};

/// Where a ship was `lag_ms` ago, per its position-history ring. Missing
/// samples fall back to the current position; short rings clamp at the
/// oldest sample.
pub fn rewound_position(ship: &Ship, lag_ms: f64) -> (f64, f64) {
    if lag_ms <= 0.0 || ship.history.is_empty() {
        return (ship.x, ship.y);
    }
    let ticks_back = (lag_ms / REWIND_TICK_MS).round() as usize;
    let idx = (ship.history.len() - 1).saturating_sub(ticks_back);
    ship.history[idx]
}

fn clamp_into_arena(value: f64, radius: f64) -> f64 {
    value.clamp(radius, ARENA_EXTENT - radius)
}

fn within(ax: f64, ay: f64, bx: f64, by: f64, radius: f64) -> bool {
    let dx = ax - bx;
    let dy = ay - by;
    dx * dx + dy * dy <= radius * radius
}

/// Apply damage to a target, credit the attacker, and flip the alive flag on
/// a kill. Self-damage never credits stats.
fn apply_damage(world: &mut World, target_id: &str, attacker_id: &str, amount: f64) {
    let killed = match world.players.get_mut(target_id) {
        Some(ship) if ship.alive => {
            ship.hp = quantize((ship.hp - amount).max(0.0));
            if ship.hp <= 0.0 {
                ship.alive = false;
                ship.stats.deaths += 1;
                true
            } else {
                false
            }
        }
        _ => return,
    };
    if attacker_id != target_id {
        if let Some(attacker) = world.players.get_mut(attacker_id) {
            attacker.stats.damage_dealt = quantize(attacker.stats.damage_dealt + amount);
            if killed {
                attacker.stats.kills += 1;
            }
        }
    }
}

/// Dispatch one consumed fire press for `shooter_id`. The caller has already
/// checked the cooldown gate.
pub fn fire(world: &mut World, shooter_id: &str) {
    let Some(ship) = world.players.get(shooter_id) else {
        return;
    };
    match ship.special {
        SpecialWeapon::Bomb if ship.special_uses > 0 => fire_bomb(world, shooter_id),
        SpecialWeapon::Nova if ship.special_uses > 0 => {
            if ship.nova_cooldown_ms <= 0.0 {
                fire_nova(world, shooter_id);
            }
        }
        // The beam is driven by the held trigger, not the press.
        SpecialWeapon::Laser if ship.special_uses > 0 => {}
        _ => spawn_bullet(world, shooter_id),
    }
}

/// Spawn a standard projectile at the ship nose. With lag compensation an
/// instant rewind hit-scan across the lag window may resolve the hit at
/// spawn time, leaving only a short-lived marker for observers.
fn spawn_bullet(world: &mut World, shooter_id: &str) {
    let Some(ship) = world.players.get_mut(shooter_id) else {
        return;
    };
    let nose = PLAYER_RADIUS + 0.5;
    let (cos, sin) = (ship.angle.cos(), ship.angle.sin());
    let sx = clamp_into_arena(ship.x + cos * nose, PROJECTILE_RADIUS);
    let sy = clamp_into_arena(ship.y + sin * nose, PROJECTILE_RADIUS);
    let vx = cos * PROJECTILE_SPEED;
    let vy = sin * PROJECTILE_SPEED;
    let lag_ms = ship.input.lag_comp_ms.clamp(0.0, MAX_LAG_COMP_MS);
    let fire_seq = ship.input.fire_seq;
    ship.fire_cooldown_ms = FIRE_COOLDOWN_MS;

    if lag_ms > 0.0 {
        if let Some((victim, hx, hy)) = rewind_scan(world, shooter_id, sx, sy, vx, vy, lag_ms) {
            apply_damage(world, &victim, shooter_id, PROJECTILE_DAMAGE);
            let id = world.alloc_projectile_id();
            world.projectiles.push(Projectile {
                id,
                owner: shooter_id.to_string(),
                fire_seq,
                x: quantize(hx),
                y: quantize(hy),
                vx: 0.0,
                vy: 0.0,
                ttl_ms: HIT_MARKER_TTL_MS,
                damage: 0.0,
                kind: ProjectileKind::Bullet,
                lag_comp_ms: 0.0,
            });
            return;
        }
        // No rewound hit: the projectile has already "flown" the lag window.
        let advanced_x = clamp_into_arena(sx + vx * lag_ms / 1000.0, PROJECTILE_RADIUS);
        let advanced_y = clamp_into_arena(sy + vy * lag_ms / 1000.0, PROJECTILE_RADIUS);
        let id = world.alloc_projectile_id();
        world.projectiles.push(Projectile {
            id,
            owner: shooter_id.to_string(),
            fire_seq,
            x: quantize(advanced_x),
            y: quantize(advanced_y),
            vx: quantize(vx),
            vy: quantize(vy),
            ttl_ms: PROJECTILE_TTL_MS - lag_ms,
            damage: PROJECTILE_DAMAGE,
            kind: ProjectileKind::Bullet,
            lag_comp_ms: lag_ms,
        });
        return;
    }

    let id = world.alloc_projectile_id();
    world.projectiles.push(Projectile {
        id,
        owner: shooter_id.to_string(),
        fire_seq,
        x: quantize(sx),
        y: quantize(sy),
        vx: quantize(vx),
        vy: quantize(vy),
        ttl_ms: PROJECTILE_TTL_MS,
        damage: PROJECTILE_DAMAGE,
        kind: ProjectileKind::Bullet,
        lag_comp_ms: 0.0,
    });
}

/// Walk the projectile's would-be path across the lag window in 16 ms
/// substeps, testing each against the other ships' rewound positions.
fn rewind_scan(
    world: &World,
    shooter_id: &str,
    sx: f64,
    sy: f64,
    vx: f64,
    vy: f64,
    lag_ms: f64,
) -> Option<(String, f64, f64)> {
    let substeps = (lag_ms / REWIND_TICK_MS).ceil() as usize;
    let hit_radius = PLAYER_RADIUS + PROJECTILE_RADIUS;
    for s in 0..substeps {
        let travelled_ms = ((s as f64 + 1.0) * REWIND_TICK_MS).min(lag_ms);
        let px = sx + vx * travelled_ms / 1000.0;
        let py = sy + vy * travelled_ms / 1000.0;
        let rewind_ms = (lag_ms - (s as f64 + 1.0) * REWIND_TICK_MS).max(0.0);
        for id in &world.player_order {
            if id == shooter_id {
                continue;
            }
            let Some(other) = world.players.get(id) else {
                continue;
            };
            if !other.alive {
                continue;
            }
            let (rx, ry) = rewound_position(other, rewind_ms);
            if within(px, py, rx, ry, hit_radius) {
                return Some((id.clone(), px, py));
            }
        }
    }
    None
}

fn fire_bomb(world: &mut World, shooter_id: &str) {
    let Some(ship) = world.players.get_mut(shooter_id) else {
        return;
    };
    let nose = PLAYER_RADIUS + 0.5;
    let (cos, sin) = (ship.angle.cos(), ship.angle.sin());
    let sx = clamp_into_arena(ship.x + cos * nose, PROJECTILE_RADIUS);
    let sy = clamp_into_arena(ship.y + sin * nose, PROJECTILE_RADIUS);
    let lag_ms = ship.input.lag_comp_ms.clamp(0.0, MAX_LAG_COMP_MS);
    let fire_seq = ship.input.fire_seq;

    ship.special_uses -= 1;
    if ship.special_uses == 0 {
        ship.special = SpecialWeapon::None;
    }
    ship.fire_cooldown_ms = FIRE_COOLDOWN_MS * 2.0;

    let id = world.alloc_projectile_id();
    world.projectiles.push(Projectile {
        id,
        owner: shooter_id.to_string(),
        fire_seq,
        x: quantize(sx),
        y: quantize(sy),
        vx: quantize(cos * BOMB_SPEED),
        vy: quantize(sin * BOMB_SPEED),
        ttl_ms: BOMB_TTL_MS,
        damage: BOMB_DAMAGE,
        kind: ProjectileKind::Bomb,
        lag_comp_ms: lag_ms,
    });
}

fn fire_nova(world: &mut World, shooter_id: &str) {
    let Some(ship) = world.players.get_mut(shooter_id) else {
        return;
    };
    let (cx, cy) = (ship.x, ship.y);
    let lag_ms = ship.input.lag_comp_ms.clamp(0.0, MAX_LAG_COMP_MS);
    ship.special_uses -= 1;
    if ship.special_uses == 0 {
        ship.special = SpecialWeapon::None;
    }
    ship.fire_cooldown_ms = FIRE_COOLDOWN_MS;
    ship.nova_cooldown_ms = NOVA_COOLDOWN_MS;

    world.push_effect(EffectKind::Nova, quantize(cx), quantize(cy), NOVA_EFFECT_TTL_MS);

    let targets: Vec<(String, f64)> = world
        .player_order
        .iter()
        .filter(|id| id.as_str() != shooter_id)
        .filter_map(|id| {
            let other = world.players.get(id)?;
            if !other.alive {
                return None;
            }
            let (rx, ry) = rewound_position(other, lag_ms);
            let dist = (rx - cx).hypot(ry - cy);
            (dist <= NOVA_RADIUS).then(|| (id.clone(), dist))
        })
        .collect();
    for (id, dist) in targets {
        let falloff = 1.0 - NOVA_EDGE_FALLOFF * (dist / NOVA_RADIUS);
        apply_damage(world, &id, shooter_id, NOVA_DAMAGE * falloff);
    }
}

/// Detonate a bomb at (x, y). A direct-hit target takes center damage; every
/// other ship in the blast takes linear falloff, the owner at half rate.
fn detonate_bomb(world: &mut World, owner: &str, x: f64, y: f64, direct_hit: Option<&str>) {
    world.push_effect(EffectKind::Explosion, quantize(x), quantize(y), EXPLOSION_EFFECT_TTL_MS);

    let targets: Vec<(String, f64)> = world
        .player_order
        .iter()
        .filter_map(|id| {
            let ship = world.players.get(id)?;
            if !ship.alive {
                return None;
            }
            let dist = if direct_hit == Some(id.as_str()) {
                0.0
            } else {
                (ship.x - x).hypot(ship.y - y)
            };
            (dist <= BOMB_RADIUS).then(|| (id.clone(), dist))
        })
        .collect();
    for (id, dist) in targets {
        let falloff = 1.0 - (1.0 - BOMB_EDGE_FALLOFF) * (dist / BOMB_RADIUS);
        let mut damage = BOMB_DAMAGE * falloff;
        if id == owner {
            damage *= BOMB_SELF_DAMAGE_FACTOR;
        }
        apply_damage(world, &id, owner, damage);
    }
}

/// Advance every projectile by `dt_ms`: ttl decay, integration, bounds
/// culling, then the dual current/rewound collision test.
pub fn step_projectiles(world: &mut World, dt_ms: f64) {
    let hit_radius = PLAYER_RADIUS + PROJECTILE_RADIUS;
    let mut idx = 0;
    while idx < world.projectiles.len() {
        {
            let p = &mut world.projectiles[idx];
            p.ttl_ms -= dt_ms;
        }
        if world.projectiles[idx].ttl_ms <= 0.0 {
            let p = world.projectiles.remove(idx);
            if p.kind == ProjectileKind::Bomb {
                detonate_bomb(world, &p.owner, p.x, p.y, None);
            }
            continue;
        }

        {
            let p = &mut world.projectiles[idx];
            let dt = dt_ms / 1000.0;
            p.x = quantize(p.x + p.vx * dt);
            p.y = quantize(p.y + p.vy * dt);
        }

        let out_of_bounds = {
            let p = &world.projectiles[idx];
            p.x < PROJECTILE_RADIUS
                || p.x > ARENA_EXTENT - PROJECTILE_RADIUS
                || p.y < PROJECTILE_RADIUS
                || p.y > ARENA_EXTENT - PROJECTILE_RADIUS
        };
        if out_of_bounds {
            let p = world.projectiles.remove(idx);
            if p.kind == ProjectileKind::Bomb {
                detonate_bomb(world, &p.owner, p.x, p.y, None);
            }
            continue;
        }

        let hit = {
            let p = &world.projectiles[idx];
            world.player_order.iter().find_map(|id| {
                if *id == p.owner {
                    return None;
                }
                let other = world.players.get(id)?;
                if !other.alive {
                    return None;
                }
                if within(p.x, p.y, other.x, other.y, hit_radius) {
                    return Some(id.clone());
                }
                if p.lag_comp_ms > 0.0 {
                    let (rx, ry) = rewound_position(other, p.lag_comp_ms);
                    if within(p.x, p.y, rx, ry, hit_radius) {
                        return Some(id.clone());
                    }
                }
                None
            })
        };
        if let Some(target_id) = hit {
            let p = world.projectiles.remove(idx);
            match p.kind {
                ProjectileKind::Bomb => {
                    detonate_bomb(world, &p.owner, p.x, p.y, Some(&target_id));
                }
                ProjectileKind::Bullet => {
                    apply_damage(world, &target_id, &p.owner, p.damage);
                }
            }
            continue;
        }

        idx += 1;
    }
}

/// One sub-step of held laser fire: ray test every other ship's rewound
/// position against the beam and burn `LASER_DPS · dt`.
pub fn apply_laser(world: &mut World, shooter_id: &str, dt_ms: f64) {
    let Some(ship) = world.players.get(shooter_id) else {
        return;
    };
    let (ox, oy) = (ship.x, ship.y);
    let (dir_x, dir_y) = (ship.angle.cos(), ship.angle.sin());
    let lag_ms = ship.input.lag_comp_ms.clamp(0.0, MAX_LAG_COMP_MS);
    let reach = LASER_HALF_WIDTH + PLAYER_RADIUS;

    let targets: Vec<String> = world
        .player_order
        .iter()
        .filter(|id| id.as_str() != shooter_id)
        .filter_map(|id| {
            let other = world.players.get(id)?;
            if !other.alive {
                return None;
            }
            let (rx, ry) = rewound_position(other, lag_ms);
            let dx = rx - ox;
            let dy = ry - oy;
            let along = dx * dir_x + dy * dir_y;
            if !(0.0..=LASER_RANGE).contains(&along) {
                return None;
            }
            let perp = (dx * dir_y - dy * dir_x).abs();
            (perp <= reach).then(|| id.clone())
        })
        .collect();
    for id in targets {
        apply_damage(world, &id, shooter_id, LASER_DPS * dt_ms / 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::MAX_HP;
    use crate::game::world::{Phase, Ship, World};

    fn two_ship_world() -> World {
        let mut world = World::new(1);
        world.phase = Phase::Playing;
        for (id, x, angle) in [("a", 18.0, 0.0), ("b", 82.0, std::f64::consts::PI)] {
            world.player_order.push(id.to_string());
            world.players.insert(id.to_string(), Ship::spawn(x, 50.0, angle));
        }
        world
    }

    #[test]
    fn rewound_position_walks_the_history_ring() {
        let mut ship = Ship::spawn(0.0, 50.0, 0.0);
        for i in 0..10 {
            ship.x = i as f64;
            ship.record_position();
        }
        // 48 ms back rounds to 3 ticks: index 9 - 3 = 6.
        assert_eq!(rewound_position(&ship, 48.0), (6.0, 50.0));
        // Beyond the ring clamps at the oldest sample.
        assert_eq!(rewound_position(&ship, 10_000.0), (0.0, 50.0));
        // No lag means current position.
        assert_eq!(rewound_position(&ship, 0.0), (9.0, 50.0));
    }

    #[test]
    fn bullet_hits_reduce_hp_and_award_stats() {
        let mut world = two_ship_world();
        fire(&mut world, "a");
        assert_eq!(world.projectiles.len(), 1);
        for _ in 0..80 {
            step_projectiles(&mut world, 16.0);
        }
        let b = &world.players["b"];
        assert_eq!(b.hp, MAX_HP - PROJECTILE_DAMAGE);
        assert!(world.projectiles.is_empty());
        let a = &world.players["a"];
        assert_eq!(a.stats.damage_dealt, PROJECTILE_DAMAGE);
        assert_eq!(a.stats.kills, 0);
    }

    #[test]
    fn projectile_expires_on_ttl() {
        let mut world = two_ship_world();
        // Fire away from the opponent so nothing is hit.
        world.players.get_mut("a").map(|s| s.angle = std::f64::consts::FRAC_PI_2);
        fire(&mut world, "a");
        let mut survived = 0;
        while !world.projectiles.is_empty() && survived < 200 {
            step_projectiles(&mut world, 16.0);
            survived += 1;
        }
        // Gone via ttl or the top wall, well before 200 ticks.
        assert!(world.projectiles.is_empty());
    }

    #[test]
    fn instant_rewind_hit_applies_damage_at_spawn() {
        let mut world = two_ship_world();
        // Point-blank: B sits 6 units from A with a warm history ring.
        {
            let b = world.players.get_mut("b").unwrap();
            b.x = 24.0;
            for _ in 0..20 {
                b.record_position();
            }
        }
        {
            let a = world.players.get_mut("a").unwrap();
            a.input.lag_comp_ms = 80.0;
        }
        fire(&mut world, "a");
        let b = &world.players["b"];
        assert_eq!(b.hp, MAX_HP - PROJECTILE_DAMAGE);
        // Only the 50 ms marker remains, dealing no further damage.
        assert_eq!(world.projectiles.len(), 1);
        let marker = &world.projectiles[0];
        assert_eq!(marker.ttl_ms, HIT_MARKER_TTL_MS);
        assert_eq!(marker.damage, 0.0);
        assert_eq!(marker.vx, 0.0);
        step_projectiles(&mut world, 16.0);
        assert_eq!(world.players["b"].hp, MAX_HP - PROJECTILE_DAMAGE);
    }

    #[test]
    fn lagged_miss_spawns_an_advanced_projectile() {
        let mut world = two_ship_world();
        {
            let a = world.players.get_mut("a").unwrap();
            a.input.lag_comp_ms = 80.0;
        }
        fire(&mut world, "a");
        assert_eq!(world.projectiles.len(), 1);
        let p = &world.projectiles[0];
        // Nose at 21.0, advanced by 70 u/s for 80 ms.
        assert_eq!(p.x, 26.6);
        assert_eq!(p.ttl_ms, PROJECTILE_TTL_MS - 80.0);
        assert_eq!(p.lag_comp_ms, 80.0);
    }

    #[test]
    fn bomb_direct_hit_deals_center_damage_and_splashes_owner() {
        let mut world = two_ship_world();
        {
            let a = world.players.get_mut("a").unwrap();
            a.special = SpecialWeapon::Bomb;
            a.special_uses = 3;
            // Close enough that the owner sits inside the blast.
            a.x = 74.0;
        }
        fire(&mut world, "a");
        assert_eq!(world.players["a"].special_uses, 2);
        assert_eq!(
            world.players["a"].fire_cooldown_ms,
            FIRE_COOLDOWN_MS * 2.0
        );
        let mut guard = 0;
        while world.projectiles.iter().any(|p| p.kind == ProjectileKind::Bomb) && guard < 200 {
            step_projectiles(&mut world, 16.0);
            guard += 1;
        }
        let b = &world.players["b"];
        assert_eq!(b.hp, MAX_HP - BOMB_DAMAGE);
        let a = &world.players["a"];
        assert!(a.hp < MAX_HP, "owner in blast radius takes self-damage");
        assert!(a.hp >= MAX_HP - BOMB_DAMAGE * BOMB_SELF_DAMAGE_FACTOR);
        assert!(world
            .effects
            .iter()
            .any(|e| e.kind == EffectKind::Explosion));
    }

    #[test]
    fn bomb_uses_exhaust_back_to_no_special() {
        let mut world = two_ship_world();
        {
            let a = world.players.get_mut("a").unwrap();
            a.special = SpecialWeapon::Bomb;
            a.special_uses = 1;
        }
        fire(&mut world, "a");
        let a = &world.players["a"];
        assert_eq!(a.special_uses, 0);
        assert_eq!(a.special, SpecialWeapon::None);
    }

    #[test]
    fn laser_burns_targets_inside_the_beam_only() {
        let mut world = two_ship_world();
        apply_laser(&mut world, "a", 100.0);
        // B is 64 units away, outside the 55 unit range.
        assert_eq!(world.players["b"].hp, MAX_HP);

        world.players.get_mut("b").map(|s| s.x = 60.0);
        apply_laser(&mut world, "a", 100.0);
        assert_eq!(world.players["b"].hp, MAX_HP - 8.0);

        // Off-axis beyond the half-width is untouched.
        world.players.get_mut("b").map(|s| {
            s.hp = MAX_HP;
            s.y = 58.0;
        });
        apply_laser(&mut world, "a", 100.0);
        assert_eq!(world.players["b"].hp, MAX_HP);
    }

    #[test]
    fn nova_burst_damages_with_falloff_and_sets_cooldown() {
        let mut world = two_ship_world();
        {
            let a = world.players.get_mut("a").unwrap();
            a.special = SpecialWeapon::Nova;
            a.special_uses = 3;
        }
        world.players.get_mut("b").map(|s| s.x = 28.0);
        fire(&mut world, "a");
        let b = &world.players["b"];
        // dist 10, falloff 1 - 0.5 * 10/15 = 2/3.
        assert!((b.hp - (MAX_HP - NOVA_DAMAGE * (1.0 - 10.0 / 15.0 * 0.5))).abs() < 1e-3);
        let a = &world.players["a"];
        assert_eq!(a.nova_cooldown_ms, NOVA_COOLDOWN_MS);
        assert_eq!(a.special_uses, 2);
        assert!(world.effects.iter().any(|e| e.kind == EffectKind::Nova));

        // A second press during the cooldown is swallowed.
        fire(&mut world, "a");
        assert_eq!(world.players["a"].special_uses, 2);
    }
}
