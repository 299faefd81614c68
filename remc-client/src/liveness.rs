//! # Liveness and Backoff Policy
//!
//! Purpose: Decide, from the time since the last received byte, whether a
//! connection is healthy, needs a probe, or is dead; and pick the delay
//! before the next reconnect attempt.
//!
//! ## Design Principles
//! 1. **Two Thresholds**: Probing starts at `keepalive_interval` of silence;
//!    the connection is closed at `receive_timeout`. Traffic of any kind
//!    resets the clock, so busy connections are never probed.
//! 2. **Clock Injected**: Every decision takes `now`, keeping the policy
//!    free of timers and testable without a runtime.
//! 3. **Jittered Reconnect**: A uniform random extra delay spreads out
//!    clients that lost the same server at the same moment.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Outcome of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Traffic seen recently.
    Alive,
    /// Quiet long enough to provoke the server with a NOOP.
    Probe,
    /// Quiet for the full receive timeout; close the connection.
    Expired,
}

/// Tracks the last receive time of one connection.
#[derive(Debug, Clone)]
pub struct LivenessClock {
    last_receive: Instant,
    keepalive_interval: Duration,
    receive_timeout: Duration,
}

impl LivenessClock {
    pub fn new(now: Instant, keepalive_interval: Duration, receive_timeout: Duration) -> Self {
        LivenessClock {
            last_receive: now,
            keepalive_interval,
            receive_timeout,
        }
    }

    /// Records that bytes arrived at `now`.
    pub fn touch(&mut self, now: Instant) {
        self.last_receive = now;
    }

    pub fn last_receive(&self) -> Instant {
        self.last_receive
    }

    pub fn check(&self, now: Instant) -> Liveness {
        let idle = now.saturating_duration_since(self.last_receive);
        if idle >= self.receive_timeout {
            Liveness::Expired
        } else if idle >= self.keepalive_interval {
            Liveness::Probe
        } else {
            Liveness::Alive
        }
    }
}

/// Delay before a reconnect attempt: `base` plus uniform `[0, jitter)`.
pub fn reconnect_delay<R: Rng + ?Sized>(base: Duration, jitter: Duration, rng: &mut R) -> Duration {
    let jitter_ms = jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return base;
    }
    base + Duration::from_millis(rng.gen_range(0..jitter_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn clock(now: Instant) -> LivenessClock {
        LivenessClock::new(now, Duration::from_secs(5), Duration::from_secs(15))
    }

    #[test]
    fn thresholds() {
        let start = Instant::now();
        let clock = clock(start);
        assert_eq!(clock.check(start), Liveness::Alive);
        assert_eq!(clock.check(start + Duration::from_millis(4_999)), Liveness::Alive);
        assert_eq!(clock.check(start + Duration::from_secs(5)), Liveness::Probe);
        assert_eq!(clock.check(start + Duration::from_millis(14_999)), Liveness::Probe);
        assert_eq!(clock.check(start + Duration::from_secs(15)), Liveness::Expired);
    }

    #[test]
    fn every_check_in_the_probe_window_probes() {
        let start = Instant::now();
        let clock = clock(start);
        let probes = (0..15u64)
            .map(|sec| clock.check(start + Duration::from_secs(sec)))
            .filter(|state| *state == Liveness::Probe)
            .count();
        assert_eq!(probes, 10);
    }

    #[test]
    fn touch_resets_idle_time() {
        let start = Instant::now();
        let mut clock = clock(start);
        clock.touch(start + Duration::from_secs(12));
        assert_eq!(clock.check(start + Duration::from_secs(14)), Liveness::Alive);
        assert_eq!(clock.last_receive(), start + Duration::from_secs(12));
    }

    #[test]
    fn reconnect_delay_stays_in_window() {
        let mut rng = StdRng::seed_from_u64(7);
        let base = Duration::from_secs(10);
        let jitter = Duration::from_secs(5);
        let mut min = Duration::MAX;
        let mut max = Duration::ZERO;
        for _ in 0..10_000 {
            let delay = reconnect_delay(base, jitter, &mut rng);
            assert!(delay >= base && delay < base + jitter, "{:?}", delay);
            min = min.min(delay);
            max = max.max(delay);
        }
        // Uniform spread covers most of the window.
        assert!(min < Duration::from_millis(10_100));
        assert!(max > Duration::from_millis(14_900));
    }

    #[test]
    fn zero_jitter_is_exact() {
        let mut rng = StdRng::seed_from_u64(1);
        let delay = reconnect_delay(Duration::from_secs(10), Duration::ZERO, &mut rng);
        assert_eq!(delay, Duration::from_secs(10));
    }
}
