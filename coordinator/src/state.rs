//! Service state definitions.

/// Operational state of the settlement service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Seeding and loading; not yet serving.
    Starting,
    /// Replaying pending settlement intents.
    Recovering,
    /// Accepting instructions and queries.
    Running,
    /// No longer accepting instructions.
    Stopped,
}

impl CoordinatorState {
    /// Check if the service is accepting new requests.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, CoordinatorState::Running)
    }

    /// Check if the service is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CoordinatorState::Stopped)
    }
}
