//! One-way availability state for stores that can fail statically
//!
//! Environment failures (bad paths, permissions) are not recoverable per
//! call, so the first one switches the store off for the rest of the
//! process. The transition is `Enabled -> Disabled(reason)` and never back.

use parking_lot::RwLock;
use tracing::error;

/// Current state of a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityState {
    Enabled,
    Disabled(String),
}

/// Shared, one-way enabled/disabled switch
#[derive(Debug)]
pub struct Availability {
    subsystem: &'static str,
    state: RwLock<AvailabilityState>,
}

impl Availability {
    /// Start enabled
    pub fn enabled(subsystem: &'static str) -> Self {
        Self {
            subsystem,
            state: RwLock::new(AvailabilityState::Enabled),
        }
    }

    /// Start disabled with the given reason
    pub fn disabled(subsystem: &'static str, reason: impl Into<String>) -> Self {
        Self {
            subsystem,
            state: RwLock::new(AvailabilityState::Disabled(reason.into())),
        }
    }

    /// Name used in logs and errors
    pub fn subsystem(&self) -> &'static str {
        self.subsystem
    }

    pub fn is_enabled(&self) -> bool {
        matches!(*self.state.read(), AvailabilityState::Enabled)
    }

    /// Reason the store was disabled, if it was
    pub fn reason(&self) -> Option<String> {
        match &*self.state.read() {
            AvailabilityState::Enabled => None,
            AvailabilityState::Disabled(reason) => Some(reason.clone()),
        }
    }

    pub fn state(&self) -> AvailabilityState {
        self.state.read().clone()
    }

    /// Switch off; the first reason wins and later calls are ignored
    pub fn disable(&self, reason: impl Into<String>) {
        let mut state = self.state.write();
        if let AvailabilityState::Enabled = *state {
            let reason = reason.into();
            error!(
                subsystem = self.subsystem,
                %reason,
                "disabling for the remainder of the process"
            );
            *state = AvailabilityState::Disabled(reason);
        }
    }
}
