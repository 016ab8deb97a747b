//! Connection state of a monitoring session.

use std::fmt;

/// Where a session is in the signaling handshake.
///
/// ```text
/// idle -> fetching-url -> socket-connecting -> socket-open -> peer-connected
///                                                             \-> closed | error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    FetchingUrl,
    SocketConnecting,
    /// Socket is open and the offer has been sent; waiting for the answer.
    SocketOpen,
    PeerConnected,
    Closed,
    Error,
}

impl ConnectionState {
    /// `closed` and `error` end a session; both allow a fresh `start()`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Error)
    }

    /// States in which a handshake is in flight or established.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::FetchingUrl
                | ConnectionState::SocketConnecting
                | ConnectionState::SocketOpen
                | ConnectionState::PeerConnected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::FetchingUrl => "fetching-url",
            ConnectionState::SocketConnecting => "socket-connecting",
            ConnectionState::SocketOpen => "socket-open",
            ConnectionState::PeerConnected => "peer-connected",
            ConnectionState::Closed => "closed",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
