//! Session lifecycle state machine.

/// Lifecycle state of a capture session.
///
/// Transitions are validated so that racing stop triggers cannot tear a
/// recording down twice and nothing revives a terminated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No capture authorization has been installed yet.
    Uninitialized,

    /// A valid capture authorization is held; no recording in flight.
    Authorized,

    /// A recording is in flight on the encode pipeline.
    Recording,

    /// Teardown has been claimed; waiting for the pipeline's terminal event.
    Stopping,

    /// The session has been destroyed and cannot be reused.
    Terminated,
}

impl SessionState {
    /// Check if this state transition is valid.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;

        match (self, target) {
            // Terminated is absorbing
            (Terminated, _) => false,

            // Destroy is allowed from every live state
            (_, Terminated) => true,

            // From Uninitialized
            (Uninitialized, Authorized) => true,

            // From Authorized
            (Authorized, Recording) => true,
            // Re-granting authorization replaces the held token
            (Authorized, Authorized) => true,

            // From Recording: the single teardown claim
            (Recording, Stopping) => true,

            // From Stopping: terminal pipeline event returns us to Authorized
            (Stopping, Authorized) => true,

            // All other transitions invalid
            _ => false,
        }
    }

    /// Get a human-readable description of this state.
    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "Uninitialized",
            SessionState::Authorized => "Authorized",
            SessionState::Recording => "Recording",
            SessionState::Stopping => "Stopping",
            SessionState::Terminated => "Terminated",
        }
    }

    /// Check if a recording is in flight or being torn down.
    pub fn is_capturing(&self) -> bool {
        matches!(self, SessionState::Recording | SessionState::Stopping)
    }

    /// Check if a recording is actively in flight.
    pub fn is_recording(&self) -> bool {
        matches!(self, SessionState::Recording)
    }

    /// Check if the session has been destroyed.
    pub fn is_terminated(&self) -> bool {
        matches!(self, SessionState::Terminated)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
