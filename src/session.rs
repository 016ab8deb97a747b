//! Signaling session
//!
//! [`Session`] owns everything one monitoring run needs: the camera stream, the
//! signaling socket and the peer connection. It does no IO itself. The driver
//! performs the slow steps (fetching the endpoint, opening the socket, reading
//! frames) and reports their outcome as [`SessionEvent`]s to
//! [`Session::handle`]. Peer and socket are reached through the
//! [`PeerConnection`] and [`SignalSink`] traits so the handshake can be
//! exercised without a network.

use rand::rng;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::model::media::{MediaStream, MediaTrack};
use crate::model::message::{
    IceCandidate, MessageError, SdpKind, SessionDescription, SignalingMessage, KIND_ANSWER,
};
use crate::model::metrics::MetricsSnapshot;
use crate::model::state::ConnectionState;

/// Outbound half of the signaling socket.
pub trait SignalSink: Send {
    fn is_open(&self) -> bool;

    /// Queue one text frame. Fails when the socket has gone away.
    fn send_text(&mut self, text: String) -> Result<(), SessionError>;

    fn close(&mut self);
}

/// The subset of `RTCPeerConnection` the handshake uses.
pub trait PeerConnection {
    fn add_track(&mut self, track: &MediaTrack, stream_id: &str) -> Result<(), SessionError>;

    /// Build an offer and commit it as the local description.
    fn create_offer(&mut self) -> Result<SessionDescription, SessionError>;

    fn set_remote_description(&mut self, answer: &SessionDescription) -> Result<(), SessionError>;

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> Result<(), SessionError>;

    /// Local candidates discovered since the last call.
    fn take_local_candidates(&mut self) -> Vec<IceCandidate>;

    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

pub trait PeerFactory {
    type Peer: PeerConnection;

    fn create(&mut self, config: &PeerConfig) -> Result<Self::Peer, SessionError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// STUN/TURN urls handed to the peer connection. Never empty.
    pub ice_servers: Vec<String>,
}

/// Something that happened outside the session.
pub enum SessionEvent {
    /// The configuration collaborator returned the signaling address.
    EndpointResolved(String),
    EndpointFailed(SessionError),
    SocketOpened(Box<dyn SignalSink>),
    /// One text frame arrived on the socket.
    SocketMessage(String),
    SocketClosed,
    SocketError(String),
    /// The peer connection discovered a local candidate after the offer went out.
    LocalCandidate(IceCandidate),
}

pub struct Session<F: PeerFactory> {
    state: ConnectionState,
    status: String,
    last_error: Option<SessionError>,
    endpoint: Option<String>,
    factory: F,
    peer_config: PeerConfig,
    media: Option<MediaStream>,
    socket: Option<Box<dyn SignalSink>>,
    peer: Option<F::Peer>,
    metrics: MetricsSnapshot,
}

impl<F: PeerFactory> Session<F> {
    pub fn new(factory: F, peer_config: PeerConfig) -> Self {
        Self {
            state: ConnectionState::Idle,
            status: ConnectionState::Idle.to_string(),
            last_error: None,
            endpoint: None,
            factory,
            peer_config,
            media: None,
            socket: None,
            peer: None,
            metrics: MetricsSnapshot::mock(&mut rng()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Human-readable status line, e.g. `socket-open` or `error: transport error: ...`.
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn metrics(&self) -> &MetricsSnapshot {
        &self.metrics
    }

    pub fn media(&self) -> Option<&MediaStream> {
        self.media.as_ref()
    }

    pub fn peer(&self) -> Option<&F::Peer> {
        self.peer.as_ref()
    }

    pub fn peer_mut(&mut self) -> Option<&mut F::Peer> {
        self.peer.as_mut()
    }

    pub fn is_socket_open(&self) -> bool {
        self.socket.as_ref().is_some_and(|s| s.is_open())
    }

    /// Hand the session a camera stream. A previously attached stream is released.
    pub fn attach_media(&mut self, stream: MediaStream) {
        if let Some(old) = self.media.replace(stream) {
            old.stop_all();
        }
    }

    /// Begin the handshake.
    ///
    /// Requires a live camera stream. On success the session waits in
    /// `fetching-url` for [`SessionEvent::EndpointResolved`]. A session in
    /// `closed` or `error` is reset to `idle` first.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            self.reset();
        }

        if self.state != ConnectionState::Idle {
            return Err(SessionError::Busy(self.state.to_string()));
        }

        if !self.media.as_ref().is_some_and(MediaStream::is_live) {
            let err = SessionError::CameraUnavailable;
            self.status = format!("error: {err}");
            self.last_error = Some(err.clone());
            return Err(err);
        }

        self.last_error = None;
        self.transition(ConnectionState::FetchingUrl);
        Ok(())
    }

    /// Dispatch one event. Failures move the session to `error`; nothing here panics.
    pub fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::EndpointResolved(url) => {
                if self.state != ConnectionState::FetchingUrl {
                    debug!("Ignoring endpoint in state {}", self.state);
                    return;
                }
                info!("Signaling endpoint: {}", url);
                self.endpoint = Some(url);
                self.transition(ConnectionState::SocketConnecting);
            }
            SessionEvent::EndpointFailed(err) => {
                if self.state == ConnectionState::FetchingUrl {
                    self.fail(err);
                }
            }
            SessionEvent::SocketOpened(mut sink) => {
                if self.state != ConnectionState::SocketConnecting {
                    debug!("Socket opened in state {}, closing it", self.state);
                    sink.close();
                    return;
                }
                self.socket = Some(sink);
                self.transition(ConnectionState::SocketOpen);
                if let Err(e) = self.negotiate() {
                    self.fail(e);
                }
            }
            SessionEvent::SocketMessage(text) => self.on_text(&text),
            SessionEvent::SocketClosed => self.on_socket_closed(),
            SessionEvent::SocketError(reason) => {
                if self.state.is_active() {
                    self.fail(SessionError::Transport(reason));
                }
            }
            SessionEvent::LocalCandidate(candidate) => self.send_candidate(candidate),
        }
    }

    /// React to one decoded signaling message.
    pub fn on_message(&mut self, message: SignalingMessage) {
        match message {
            SignalingMessage::Answer(answer) => match self.apply_answer(answer) {
                Ok(()) => {}
                Err(e @ SessionError::NoPeerConnection) => warn!("Ignoring answer: {}", e),
                Err(e) => self.fail(e),
            },
            SignalingMessage::Candidate(candidate) => {
                let Some(peer) = self.peer.as_mut() else {
                    debug!("Dropping remote candidate, no peer connection");
                    return;
                };
                if let Err(e) = peer.add_remote_candidate(&candidate) {
                    warn!("Remote candidate rejected: {}", e);
                }
            }
            SignalingMessage::Log { subtype, message } => {
                info!("agent [{}]: {}", subtype, message.as_deref().unwrap_or(""));
            }
            SignalingMessage::MlData(update) => {
                self.metrics.apply(&update);
                debug!("Metrics: {}", self.metrics);
            }
            SignalingMessage::Error { reason } => {
                if self.state == ConnectionState::SocketOpen {
                    self.fail(SessionError::Negotiation(format!("agent refused offer: {reason}")));
                } else {
                    warn!("Agent reported an error: {}", reason);
                }
            }
            other => debug!("Ignoring {} message", other.kind()),
        }
    }

    /// Tear everything down and return to `idle`. Safe to call at any time.
    pub fn stop(&mut self) {
        self.close_connections();
        if let Some(media) = self.media.take() {
            media.stop_all();
        }
        self.endpoint = None;
        self.last_error = None;
        if self.state != ConnectionState::Idle {
            info!("Session stopped in state {}", self.state);
        }
        self.state = ConnectionState::Idle;
        self.status = ConnectionState::Idle.to_string();
    }

    fn negotiate(&mut self) -> Result<(), SessionError> {
        let media = self.media.as_ref().ok_or(SessionError::CameraUnavailable)?;

        let mut peer = self.factory.create(&self.peer_config)?;
        for track in media.tracks() {
            peer.add_track(track, media.id())?;
        }

        let offer = peer.create_offer()?;
        let candidates = peer.take_local_candidates();
        self.peer = Some(peer);

        self.send(&SignalingMessage::Offer(offer));
        info!("📤 Sent offer");
        self.send(&SignalingMessage::ControlStart);
        info!("📤 Requested agent start");

        for candidate in candidates {
            self.send_candidate(candidate);
        }

        Ok(())
    }

    fn apply_answer(&mut self, answer: SessionDescription) -> Result<(), SessionError> {
        let peer = self.peer.as_mut().ok_or(SessionError::NoPeerConnection)?;

        if self.state != ConnectionState::SocketOpen {
            debug!("Ignoring answer in state {}", self.state);
            return Ok(());
        }

        if answer.kind != SdpKind::Answer {
            return Err(SessionError::Negotiation(format!(
                "expected an answer, got {:?}",
                answer.kind
            )));
        }

        peer.set_remote_description(&answer)?;
        info!("📥 Answer accepted");
        self.transition(ConnectionState::PeerConnected);
        Ok(())
    }

    fn on_text(&mut self, text: &str) {
        match SignalingMessage::parse(text) {
            Ok(message) => self.on_message(message),
            Err(MessageError::Payload { kind, reason })
                if kind == KIND_ANSWER && self.state == ConnectionState::SocketOpen =>
            {
                self.fail(SessionError::Negotiation(format!("malformed answer: {reason}")));
            }
            Err(e) => warn!("Dropping signaling frame: {}", e),
        }
    }

    fn on_socket_closed(&mut self) {
        if !self.state.is_active() {
            self.socket = None;
            return;
        }

        if self.state != ConnectionState::PeerConnected {
            self.last_error = Some(SessionError::Transport(
                "socket closed before the handshake completed".to_string(),
            ));
        }

        self.close_connections();
        self.transition(ConnectionState::Closed);
    }

    fn send_candidate(&mut self, candidate: IceCandidate) {
        if !self.is_socket_open() {
            debug!("Dropping local candidate, socket is not open");
            return;
        }
        self.send(&SignalingMessage::Candidate(candidate));
    }

    fn send(&mut self, message: &SignalingMessage) -> bool {
        let Some(socket) = self.socket.as_mut().filter(|s| s.is_open()) else {
            debug!("Not sending {}, socket is not open", message.kind());
            return false;
        };

        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode {}: {}", message.kind(), e);
                return false;
            }
        };

        match socket.send_text(text) {
            Ok(()) => true,
            Err(e) => {
                debug!("Send of {} failed: {}", message.kind(), e);
                false
            }
        }
    }

    fn fail(&mut self, err: SessionError) {
        warn!("Session failed in state {}: {}", self.state, err);
        self.close_connections();
        self.state = ConnectionState::Error;
        self.status = format!("error: {err}");
        self.last_error = Some(err);
    }

    // Terminal -> idle, keeping the camera so the operator can start again.
    fn reset(&mut self) {
        self.close_connections();
        self.endpoint = None;
        self.last_error = None;
        self.transition(ConnectionState::Idle);
    }

    fn close_connections(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
        if let Some(mut peer) = self.peer.take() {
            peer.close();
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!("Session state {} -> {}", self.state, next);
        self.state = next;
        self.status = next.to_string();
    }
}
