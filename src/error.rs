//! Error taxonomy for the signaling session.

use thiserror::Error;

/// Errors that can occur while establishing or running a monitoring session.
///
/// Every variant renders as a human-readable line; the session keeps that line
/// as its status string so an operator can see why the handshake stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// `start()` was called without an acquired camera stream.
    #[error("camera unavailable: acquire a camera stream before starting")]
    CameraUnavailable,

    /// An answer arrived before a peer connection was built. The session logs
    /// it and drops the answer; it never moves the session to `error`.
    #[error("no peer connection to apply the answer to")]
    NoPeerConnection,

    /// `start()` was called while a handshake is already in flight.
    #[error("session is busy ({0})")]
    Busy(String),

    /// The signaling endpoint address is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Camera access was denied or the capture source could not be opened.
    #[error("media permission error: {0}")]
    MediaPermission(String),

    /// The signaling socket failed or closed before the handshake completed.
    #[error("transport error: {0}")]
    Transport(String),

    /// An offer or answer could not be built or applied.
    #[error("negotiation error: {0}")]
    Negotiation(String),
}

impl SessionError {
    /// Whether the operator can simply call `start()` again.
    ///
    /// Configuration errors need the environment fixed first.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SessionError::Configuration(_))
    }
}
