use std::fmt;

/// Lifecycle of a transport.
///
/// Plain connections move `Unconnected -> Connected -> Closed`, secure ones
/// `Created -> Connecting -> Open -> Closed`. `Closed` is terminal and reachable from
/// every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    Created,
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    /// Whether application data flows in this state.
    pub fn is_established(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Created => "created",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
