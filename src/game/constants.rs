//! Gameplay tuning constants.
//!
//! Both ships are symmetric, so tuning lives here as flat constants rather
//! than per-ship-type stat tables. Distances are arena units, times are
//! milliseconds unless a name says otherwise.

/// Arena is a square, `ARENA_EXTENT` on each axis.
pub const ARENA_EXTENT: f64 = 100.0;

pub const PLAYER_RADIUS: f64 = 2.5;
pub const PROJECTILE_RADIUS: f64 = 0.8;
pub const PICKUP_RADIUS: f64 = 2.8;

/// Turn rate in radians per second.
pub const TURN_RATE: f64 = 3.8;
/// Forward acceleration in units per second squared.
pub const ACCEL_FORWARD: f64 = 55.0;
/// Reverse acceleration in units per second squared.
pub const ACCEL_REVERSE: f64 = 28.0;
/// Drag is applied as `exp(-DRAG * dt)` per second.
pub const DRAG: f64 = 0.18;
pub const MAX_SPEED: f64 = 32.0;

pub const MAX_HP: f64 = 100.0;

pub const PROJECTILE_SPEED: f64 = 70.0;
pub const PROJECTILE_TTL_MS: f64 = 1200.0;
pub const PROJECTILE_DAMAGE: f64 = 30.0;
pub const FIRE_COOLDOWN_MS: f64 = 160.0;

/// Upper bound on lag compensation used for hit rewind.
pub const MAX_LAG_COMP_MS: f64 = 120.0;
/// Position history samples kept per ship, one per simulation tick.
pub const POSITION_HISTORY_LEN: usize = 30;
/// One simulation tick in milliseconds, used to discretize rewind lookups.
pub const REWIND_TICK_MS: f64 = 16.0;

pub const PICKUP_SPAWN_PERIOD_TICKS: u64 = 120;
pub const MAX_PICKUPS: usize = 3;
/// Uses granted by every pickup.
pub const PICKUP_USES: u32 = 3;
/// Pickups spawn at least this far inside the arena edge.
pub const PICKUP_SPAWN_INSET: f64 = PICKUP_RADIUS + 5.0;

pub const LASER_DPS: f64 = 80.0;
pub const LASER_RANGE: f64 = 55.0;
pub const LASER_HALF_WIDTH: f64 = 0.6;
/// Burn time that consumes one laser use.
pub const LASER_BURN_MS: f64 = 2000.0;

pub const BOMB_SPEED: f64 = 50.0;
pub const BOMB_DAMAGE: f64 = 60.0;
pub const BOMB_RADIUS: f64 = 8.0;
pub const BOMB_TTL_MS: f64 = 1600.0;
/// Splash damage falls off linearly to this fraction at the blast edge.
pub const BOMB_EDGE_FALLOFF: f64 = 0.4;
/// The owner takes this fraction of the splash damage at their distance.
pub const BOMB_SELF_DAMAGE_FACTOR: f64 = 0.5;

pub const NOVA_DAMAGE: f64 = 50.0;
pub const NOVA_RADIUS: f64 = 15.0;
/// Burst damage falls off linearly to this fraction at the edge.
pub const NOVA_EDGE_FALLOFF: f64 = 0.5;
pub const NOVA_COOLDOWN_MS: f64 = 3.0 * FIRE_COOLDOWN_MS;

pub const EXPLOSION_EFFECT_TTL_MS: f64 = 500.0;
pub const NOVA_EFFECT_TTL_MS: f64 = 400.0;
/// Lifetime of the marker projectile left behind by an instant rewind hit.
pub const HIT_MARKER_TTL_MS: f64 = 50.0;

pub const ROUND_DURATION_MS: f64 = 180_000.0;

/// Hp comparison tolerance when ranking ships at timeout.
pub const HP_TIE_EPSILON: f64 = 1e-4;

/// All world floats are quantized to this grid after mutation.
pub const QUANT_STEP: f64 = 10_000.0;
