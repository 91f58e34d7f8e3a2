//! Presence reporting.
//!
//! Pushes "any client connected" and "client count" to optional observers,
//! e.g. a connectivity binary sensor and a diagnostic counter.

use alloc::boxed::Box;

/// Observer for the connected flag
pub type ConnectedSink = Box<dyn FnMut(bool)>;

/// Observer for the client count
pub type CountSink = Box<dyn FnMut(usize)>;

/// Derives presence from the client count and forwards it
#[derive(Default)]
pub struct PresenceReporter {
    connected: Option<ConnectedSink>,
    count: Option<CountSink>,
    last_count: Option<usize>,
}

impl PresenceReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected_sink(&mut self, sink: ConnectedSink) {
        self.connected = Some(sink);
    }

    pub fn set_count_sink(&mut self, sink: CountSink) {
        self.count = Some(sink);
    }

    /// Publish `count` unconditionally
    pub fn publish(&mut self, count: usize) {
        self.last_count = Some(count);
        if let Some(sink) = self.connected.as_mut() {
            sink(count > 0);
        }
        if let Some(sink) = self.count.as_mut() {
            sink(count);
        }
    }

    /// Publish `count` only if it differs from the last published value
    pub fn update(&mut self, count: usize) -> bool {
        if self.last_count == Some(count) {
            return false;
        }
        self.publish(count);
        true
    }

    pub fn last_count(&self) -> Option<usize> {
        self.last_count
    }
}

impl core::fmt::Debug for PresenceReporter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PresenceReporter")
            .field("connected_sink", &self.connected.is_some())
            .field("count_sink", &self.count.is_some())
            .field("last_count", &self.last_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    #[test]
    fn test_publish_reaches_both_sinks() {
        let seen: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
        let mut reporter = PresenceReporter::new();

        let flags = Rc::clone(&seen);
        reporter.set_connected_sink(Box::new(move |c: bool| flags.borrow_mut().push(c as usize + 100)));
        let counts = Rc::clone(&seen);
        reporter.set_count_sink(Box::new(move |n: usize| counts.borrow_mut().push(n)));

        reporter.publish(0);
        reporter.publish(2);
        assert_eq!(*seen.borrow(), vec![100, 0, 101, 2]);
    }

    #[test]
    fn test_update_skips_unchanged_count() {
        let calls = Rc::new(RefCell::new(0usize));
        let mut reporter = PresenceReporter::new();
        let c = Rc::clone(&calls);
        reporter.set_count_sink(Box::new(move |_: usize| *c.borrow_mut() += 1));

        assert!(reporter.update(1));
        assert!(!reporter.update(1));
        assert!(reporter.update(0));
        assert_eq!(*calls.borrow(), 2);
        assert_eq!(reporter.last_count(), Some(0));
    }

    #[test]
    fn test_works_without_sinks() {
        let mut reporter = PresenceReporter::new();
        reporter.publish(3);
        assert!(!reporter.update(3));
    }
}
