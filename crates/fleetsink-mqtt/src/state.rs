/// Lifecycle of the broker connection.
///
/// Owned by the subscriber task; mutated only through the
/// [`ReconnectSupervisor`](crate::ReconnectSupervisor) state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Interrupted,
    ShuttingDown,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Interrupted => "interrupted",
            ConnectionState::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}
