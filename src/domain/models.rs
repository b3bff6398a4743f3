use std::fmt;

/// Where a controller session currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Waiting for the console to enable vibration and assign a player light
    Handshaking,
    /// Paired; fixed-rate polling with keepalives
    Steady,
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Handshaking => write!(f, "Handshaking"),
            SessionPhase::Steady => write!(f, "Connected"),
            SessionPhase::Closed => write!(f, "Closed"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Status(SessionPhase),
}
