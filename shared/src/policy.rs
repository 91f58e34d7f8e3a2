//! Keepalive and stale-partial policies.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::traits::Millis;

/// Rewrites a stale partial before it is forwarded.
///
/// An empty result means "discard it".
pub type TimeoutTransform = Box<dyn Fn(&[u8]) -> Vec<u8>>;

/// Periodic serial message sent while no client is connected
#[derive(Debug, Clone)]
pub struct KeepalivePolicy {
    interval_ms: Millis,
    /// Message with the network terminator already appended
    payload: Vec<u8>,
    last_sent: Millis,
}

impl KeepalivePolicy {
    pub fn new(interval_ms: Millis, message: &[u8], terminator: &[u8]) -> Self {
        let mut payload = Vec::new();
        if !message.is_empty() {
            payload.extend_from_slice(message);
            payload.extend_from_slice(terminator);
        }
        Self {
            interval_ms,
            payload,
            last_sent: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval_ms > 0 && !self.payload.is_empty()
    }

    /// The keepalive payload if one is due at `now` with `clients` connected
    pub fn due(&self, now: Millis, clients: usize) -> Option<&[u8]> {
        if clients > 0 || !self.is_enabled() {
            return None;
        }
        if now.wrapping_sub(self.last_sent) < self.interval_ms {
            return None;
        }
        Some(&self.payload)
    }

    /// Restart the interval at `now`.
    ///
    /// Called after each send, and on every tick with clients attached so a
    /// keepalive never fires the moment the last client leaves.
    pub fn restart(&mut self, now: Millis) {
        self.last_sent = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_without_message_or_interval() {
        assert!(!KeepalivePolicy::new(0, b"PING", b"\r").is_enabled());
        assert!(!KeepalivePolicy::new(1_000, b"", b"\r").is_enabled());
        assert_eq!(KeepalivePolicy::new(1_000, b"", b"\r").due(5_000, 0), None);
    }

    #[test]
    fn test_due_only_without_clients() {
        let mut policy = KeepalivePolicy::new(1_000, b"PING", b"\r");
        assert_eq!(policy.due(1_000, 0), Some(&b"PING\r"[..]));
        assert_eq!(policy.due(1_000, 1), None);

        policy.restart(1_000);
        assert_eq!(policy.due(1_999, 0), None);
        assert_eq!(policy.due(2_000, 0), Some(&b"PING\r"[..]));
    }

    #[test]
    fn test_restart_pushes_next_send_out() {
        let mut policy = KeepalivePolicy::new(500, b"KA", b"\n");
        policy.restart(1_200);
        assert_eq!(policy.due(1_600, 0), None);
        assert!(policy.due(1_700, 0).is_some());
    }
}
