use std::time::Duration;

use tokio::time::Instant;

use crate::debounce::DebounceGate;
use crate::relay::Line;

/// How long a single status request keeps reports flowing.
pub const STATUS_WINDOW: Duration = Duration::from_secs(60);

/// Spacing between status reports while the window is open.
pub const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Spacing between application-level liveness pings.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// The two remotely switchable actuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actuator {
    Pump,
    Siren,
}

impl Actuator {
    pub fn relay(self) -> Line {
        match self {
            Self::Pump => Line::PumpRelay,
            Self::Siren => Line::SirenRelay,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pump => "pump",
            Self::Siren => "siren",
        }
    }
}

/// Open/closed window during which status reports are published.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusWindow {
    requested: bool,
    end: Option<Instant>,
}

impl StatusWindow {
    /// Open the window, or push its end out if already open.
    pub fn open(&mut self, now: Instant) {
        self.requested = true;
        self.end = Some(now + STATUS_WINDOW);
    }

    pub fn is_requested(&self) -> bool {
        self.requested
    }

    pub fn end_time(&self) -> Option<Instant> {
        self.end
    }

    /// Close the window if its end has passed.  Returns whether it is still
    /// open.
    fn refresh(&mut self, now: Instant) -> bool {
        if self.requested && self.end.is_some_and(|end| now >= end) {
            self.requested = false;
        }
        self.requested
    }
}

/// All mutable control state.  Owned by the control loop and only touched
/// from its call chain, so no locking.
pub struct ControllerState {
    pub debounce: DebounceGate<Actuator>,
    pub status: StatusWindow,
    last_status_sent: Instant,
    last_keepalive: Instant,
}

// ---------------------------------------------------------------------------
// Construction & scheduling
// ---------------------------------------------------------------------------

impl ControllerState {
    /// Both timers start at `now`, so the first report or ping is at least
    /// one interval away.
    pub fn new(now: Instant) -> Self {
        Self {
            debounce: DebounceGate::default(),
            status: StatusWindow::default(),
            last_status_sent: now,
            last_keepalive: now,
        }
    }

    /// Whether a status report should go out on this tick.  Closes an
    /// expired window first, so nothing is emitted at or after its end.
    pub fn status_due(&mut self, now: Instant) -> bool {
        if !self.status.refresh(now) {
            return false;
        }
        if now.saturating_duration_since(self.last_status_sent) >= STATUS_INTERVAL {
            self.last_status_sent = now;
            true
        } else {
            false
        }
    }

    pub fn keepalive_due(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_keepalive) >= KEEPALIVE_INTERVAL {
            self.last_keepalive = now;
            true
        } else {
            false
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
