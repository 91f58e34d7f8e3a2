//! Fixed-interval tick loop.

use std::time::{Duration, Instant};

use shared::{Listener, Millis, Relay, SerialDevice};
use tokio::time::{self, MissedTickBehavior};

/// Millisecond clock relative to process start.
///
/// Truncation to `Millis` wraps after ~49 days, which the relay tolerates.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> Millis {
        self.start.elapsed().as_millis() as Millis
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Tick `relay` every `interval` until Ctrl-C, then shut clients down
pub async fn run<S, L>(relay: &mut Relay<S, L>, interval: Duration)
where
    S: SerialDevice,
    L: Listener,
{
    let clock = Clock::new();
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => relay.tick(clock.now()),
            result = &mut shutdown => {
                match result {
                    Ok(()) => log::info!("Ctrl-C received, stopping"),
                    Err(e) => log::error!("Failed to listen for Ctrl-C: {}", e),
                }
                break;
            }
        }
    }

    relay.shutdown();
}
