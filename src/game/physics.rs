//! Ship movement integration.

use std::f64::consts::TAU;

use super::constants::{
    ACCEL_FORWARD, ACCEL_REVERSE, ARENA_EXTENT, DRAG, MAX_SPEED, PLAYER_RADIUS, TURN_RATE,
};
use super::world::{quantize, Ship};

/// Normalize an angle to [0, 2π).
pub fn normalize_angle(angle: f64) -> f64 {
    angle.rem_euclid(TAU)
}

/// Advance one ship by `dt_ms`: turn, thrust, drag, speed clamp, integrate,
/// wall clamp, quantize, record history, decay cooldowns.
///
/// Inputs were already clamped at admission; the integration trusts them.
pub fn step_ship(ship: &mut Ship, dt_ms: f64) {
    let dt = dt_ms / 1000.0;
    let input = ship.input;

    ship.angle = normalize_angle(ship.angle + input.turn * TURN_RATE * dt);

    let accel = if input.thrust >= 0.0 {
        ACCEL_FORWARD
    } else {
        ACCEL_REVERSE
    };
    ship.vx += ship.angle.cos() * accel * input.thrust * dt;
    ship.vy += ship.angle.sin() * accel * input.thrust * dt;

    let drag = (-DRAG * dt).exp();
    ship.vx *= drag;
    ship.vy *= drag;

    let speed = ship.vx.hypot(ship.vy);
    if speed > MAX_SPEED {
        let scale = MAX_SPEED / speed;
        ship.vx *= scale;
        ship.vy *= scale;
    }

    ship.x += ship.vx * dt;
    ship.y += ship.vy * dt;

    // Wall clamp; the velocity component pushing into the wall is zeroed.
    let min = PLAYER_RADIUS;
    let max = ARENA_EXTENT - PLAYER_RADIUS;
    if ship.x < min {
        ship.x = min;
        if ship.vx < 0.0 {
            ship.vx = 0.0;
        }
    } else if ship.x > max {
        ship.x = max;
        if ship.vx > 0.0 {
            ship.vx = 0.0;
        }
    }
    if ship.y < min {
        ship.y = min;
        if ship.vy < 0.0 {
            ship.vy = 0.0;
        }
    } else if ship.y > max {
        ship.y = max;
        if ship.vy > 0.0 {
            ship.vy = 0.0;
        }
    }

    ship.x = quantize(ship.x);
    ship.y = quantize(ship.y);
    ship.vx = quantize(ship.vx);
    ship.vy = quantize(ship.vy);
    ship.angle = quantize(ship.angle);

    ship.record_position();

    ship.fire_cooldown_ms = (ship.fire_cooldown_ms - dt_ms).max(0.0);
    ship.nova_cooldown_ms = (ship.nova_cooldown_ms - dt_ms).max(0.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::{ARENA_EXTENT, MAX_SPEED, PLAYER_RADIUS};
    use crate::game::world::Ship;

    const DT_MS: f64 = 16.0;

    #[test]
    fn normalize_wraps_both_directions() {
        assert!((normalize_angle(TAU + 0.5) - 0.5).abs() < 1e-12);
        assert!((normalize_angle(-0.5) - (TAU - 0.5)).abs() < 1e-12);
    }

    #[test]
    fn speed_never_exceeds_max() {
        let mut ship = Ship::spawn(50.0, 50.0, 0.0);
        ship.input.thrust = 1.0;
        for _ in 0..600 {
            step_ship(&mut ship, DT_MS);
            assert!(ship.vx.hypot(ship.vy) <= MAX_SPEED + 1e-6);
        }
    }

    #[test]
    fn wall_clamp_zeroes_incoming_velocity() {
        let mut ship = Ship::spawn(50.0, 50.0, 0.0);
        ship.input.thrust = 1.0;
        for _ in 0..600 {
            step_ship(&mut ship, DT_MS);
        }
        assert_eq!(ship.x, ARENA_EXTENT - PLAYER_RADIUS);
        assert_eq!(ship.vx, 0.0);
        // y axis untouched by a pure +x run.
        assert_eq!(ship.y, 50.0);
    }

    #[test]
    fn reverse_thrust_is_weaker_than_forward() {
        let mut fwd = Ship::spawn(50.0, 50.0, 0.0);
        fwd.input.thrust = 1.0;
        let mut rev = Ship::spawn(50.0, 50.0, 0.0);
        rev.input.thrust = -1.0;
        step_ship(&mut fwd, DT_MS);
        step_ship(&mut rev, DT_MS);
        assert!(fwd.vx.abs() > rev.vx.abs());
        assert!(rev.vx < 0.0);
    }

    #[test]
    fn turning_changes_facing_at_turn_rate() {
        let mut ship = Ship::spawn(50.0, 50.0, 0.0);
        ship.input.turn = 1.0;
        step_ship(&mut ship, 1000.0);
        // One full second of max turn, quantized.
        assert!((ship.angle - 3.8).abs() < 1e-9);
    }

    #[test]
    fn idle_ship_coasts_down_under_drag() {
        let mut ship = Ship::spawn(50.0, 50.0, 0.0);
        ship.vx = 10.0;
        for _ in 0..60 * 30 {
            step_ship(&mut ship, DT_MS);
        }
        // Quantization stalls the decay just above zero; near-rest is the
        // steady state for an idle ship.
        assert!(ship.vx.abs() < 0.02);
        assert_eq!(ship.vy, 0.0);
    }

    #[test]
    fn cooldowns_decay_to_zero() {
        let mut ship = Ship::spawn(50.0, 50.0, 0.0);
        ship.fire_cooldown_ms = 100.0;
        ship.nova_cooldown_ms = 20.0;
        for _ in 0..10 {
            step_ship(&mut ship, DT_MS);
        }
        assert_eq!(ship.fire_cooldown_ms, 0.0);
        assert_eq!(ship.nova_cooldown_ms, 0.0);
    }
}
