//! Inbound input-frame throttling.
//!
//! Clients stream input at sub-tick cadence, but the room keeps a
//! latest-wins slot per user, so anything beyond a few frames per
//! simulation tick cannot change a tick's outcome. The budget therefore
//! scales with the configured tick rate instead of a fixed wire number.

use std::num::NonZeroU32;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

/// Frames accepted per simulation tick before throttling kicks in.
const FRAMES_PER_TICK: u32 = 4;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-connection inbound throttle, sized from the simulation tick rate.
/// Dropped frames are counted so the gateway can report abusive or
/// misconfigured clients when the connection closes.
pub struct InputRateLimiter {
    limiter: Limiter,
    dropped: u64,
}

impl InputRateLimiter {
    pub fn for_tick_rate(sim_tick_hz: u32) -> Self {
        let per_second = sim_tick_hz.saturating_mul(FRAMES_PER_TICK).max(1);
        let quota = Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: RateLimiter::direct(quota),
            dropped: 0,
        }
    }

    /// Admit or drop one inbound frame.
    pub fn admit(&mut self) -> bool {
        let admitted = self.limiter.check().is_ok();
        if !admitted {
            self.dropped += 1;
        }
        admitted
    }

    /// Frames dropped over the connection's lifetime.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_scales_with_tick_rate_and_counts_drops() {
        let mut limiter = InputRateLimiter::for_tick_rate(60);
        let mut admitted = 0u64;
        for _ in 0..1000 {
            if limiter.admit() {
                admitted += 1;
            }
        }
        // The initial burst allowance is one second of frames: 60 Hz ticks
        // at 4 frames per tick. A tight loop replenishes almost nothing.
        assert!(admitted >= 240 && admitted < 300, "admitted {admitted}");
        assert_eq!(limiter.dropped() + admitted, 1000);
    }

    #[test]
    fn degenerate_tick_rate_still_admits() {
        let mut limiter = InputRateLimiter::for_tick_rate(0);
        assert!(limiter.admit());
    }
}
