//! Per-command debounce gate.
//!
//! Retained-message replay and flaky links can deliver the same toggle
//! several times in quick succession; without a gate the relay would chatter.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

/// Minimum spacing between two accepted invocations of the same command.
pub const DEBOUNCE_TIME: Duration = Duration::from_millis(500);

/// Last-accepted timestamps keyed by command.  The table only ever holds one
/// entry per distinct key.
pub struct DebounceGate<K> {
    window: Duration,
    last: HashMap<K, Instant>,
}

impl<K: Eq + Hash> DebounceGate<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    /// Accept `key` if it has never run or its last accepted run is at least
    /// one window old.  A rejection leaves the table untouched.
    pub fn can_execute(&mut self, key: K, now: Instant) -> bool {
        match self.last.get(&key) {
            Some(&prev) if now.saturating_duration_since(prev) < self.window => false,
            _ => {
                self.last.insert(key, now);
                true
            }
        }
    }

    pub fn last_accepted(&self, key: &K) -> Option<Instant> {
        self.last.get(key).copied()
    }
}

impl<K: Eq + Hash> Default for DebounceGate<K> {
    fn default() -> Self {
        Self::new(DEBOUNCE_TIME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn first_invocation_accepted() {
        let mut gate = DebounceGate::default();
        let t0 = Instant::now();
        assert!(gate.can_execute("pump", t0));
        assert_eq!(gate.last_accepted(&"pump"), Some(t0));
    }

    #[test]
    fn repeat_inside_window_rejected() {
        let mut gate = DebounceGate::default();
        let t0 = Instant::now();
        assert!(gate.can_execute("pump", t0));
        assert!(!gate.can_execute("pump", t0 + ms(1)));
        assert!(!gate.can_execute("pump", t0 + ms(499)));
    }

    #[test]
    fn repeat_at_window_boundary_accepted() {
        let mut gate = DebounceGate::default();
        let t0 = Instant::now();
        assert!(gate.can_execute("pump", t0));
        assert!(gate.can_execute("pump", t0 + DEBOUNCE_TIME));
    }

    #[test]
    fn rejection_does_not_extend_window() {
        let mut gate = DebounceGate::default();
        let t0 = Instant::now();
        assert!(gate.can_execute("siren", t0));
        assert!(!gate.can_execute("siren", t0 + ms(400)));
        assert_eq!(gate.last_accepted(&"siren"), Some(t0));
        // Still measured from t0, not from the rejected call.
        assert!(gate.can_execute("siren", t0 + ms(500)));
    }

    #[test]
    fn commands_are_debounced_independently() {
        let mut gate = DebounceGate::default();
        let t0 = Instant::now();
        assert!(gate.can_execute("pump", t0));
        assert!(gate.can_execute("siren", t0 + ms(10)));
        assert!(!gate.can_execute("pump", t0 + ms(20)));
    }

    #[test]
    fn custom_window() {
        let mut gate = DebounceGate::new(ms(100));
        let t0 = Instant::now();
        assert!(gate.can_execute(1u8, t0));
        assert!(!gate.can_execute(1u8, t0 + ms(99)));
        assert!(gate.can_execute(1u8, t0 + ms(100)));
    }

    #[test]
    fn accepted_sequence_spacing_property() {
        // For any gap below the window the second call rejects; at or above
        // it, it accepts.
        for gap in (0..1000).step_by(50) {
            let mut gate = DebounceGate::default();
            let t0 = Instant::now();
            assert!(gate.can_execute("pump", t0));
            let accepted = gate.can_execute("pump", t0 + ms(gap));
            assert_eq!(accepted, gap >= 500, "gap={gap}ms");
        }
    }
}
