//! Reconnect delay policy.
//!
//! Injected into the connection manager as a strategy so tests can pin
//! the jitter source and assert exact delays.

use std::time::Duration;

use rand::Rng;

use charasync_shared::constants::{
    RECONNECT_DELAY_CEILING_SECS, RECONNECT_DELAY_FIRST_SECS, RECONNECT_DELAY_FLOOR_SECS,
    RECONNECT_DELAY_SECOND_SECS,
};

/// Maps a failed-attempt count to the delay before the next attempt.
pub trait RetryPolicy: Send + Sync {
    fn next_delay(&self, attempt: u32) -> Duration;
}

type JitterSource = Box<dyn Fn(u64, u64) -> u64 + Send + Sync>;

/// Default policy: 3s, 5s, 10s, then uniform random in [10s, 20s).
///
/// The flat early delays recover quickly from blips; the jittered tail
/// spreads clients out so a relay restart does not get a thundering herd.
pub struct ReconnectPolicy {
    jitter_millis: JitterSource,
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self {
            jitter_millis: Box::new(|floor, ceiling| rand::thread_rng().gen_range(floor..ceiling)),
        }
    }

    /// Substitute the randomness source. `source` receives the inclusive
    /// floor and exclusive ceiling in milliseconds.
    pub fn with_jitter(source: impl Fn(u64, u64) -> u64 + Send + Sync + 'static) -> Self {
        Self {
            jitter_millis: Box::new(source),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicy for ReconnectPolicy {
    fn next_delay(&self, attempt: u32) -> Duration {
        match attempt {
            0 => Duration::from_secs(RECONNECT_DELAY_FIRST_SECS),
            1 => Duration::from_secs(RECONNECT_DELAY_SECOND_SECS),
            2 => Duration::from_secs(RECONNECT_DELAY_FLOOR_SECS),
            _ => Duration::from_millis((self.jitter_millis)(
                RECONNECT_DELAY_FLOOR_SECS * 1000,
                RECONNECT_DELAY_CEILING_SECS * 1000,
            )),
        }
    }
}
