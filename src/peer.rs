//! str0m-backed peer connection
//!
//! [`Str0mPeer`] implements [`PeerConnection`] on top of a sans-IO
//! [`str0m::Rtc`]. The session uses it for the offer/answer exchange; the
//! driver feeds it UDP datagrams and timeouts, and writes camera frames into it
//! once ICE has connected.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use str0m::{
    change::{SdpAnswer, SdpPendingOffer},
    format::Codec,
    media::{Direction, Frequency, MediaKind, MediaTime},
    net::{Protocol, Receive},
    Candidate, Event, IceConnectionState, Input, Output, Rtc,
};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::camera::EncodedFrame;
use crate::error::SessionError;
use crate::model::media::{MediaTrack, TrackKind, VideoCodec};
use crate::model::message::{IceCandidate, SessionDescription};
use crate::model::tracks::{TrackOut, TrackOutState};
use crate::session::{PeerConfig, PeerConnection, PeerFactory};
use crate::util::{host_candidate, select_host_address};

/// How long to wait before polling a peer that has stopped producing timeouts.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Builds [`Str0mPeer`]s sharing one UDP socket bound to the host address.
pub struct Str0mPeerFactory {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl Str0mPeerFactory {
    /// Bind a UDP port on the first routable interface.
    pub async fn bind() -> anyhow::Result<Self> {
        let host_addr = select_host_address();
        let socket = UdpSocket::bind(SocketAddr::new(host_addr, 0)).await?;
        let local_addr = socket.local_addr()?;
        info!("Bound UDP port: {}", local_addr);

        Ok(Self { socket: Arc::new(socket), local_addr })
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }
}

impl PeerFactory for Str0mPeerFactory {
    type Peer = Str0mPeer;

    fn create(&mut self, config: &PeerConfig) -> Result<Str0mPeer, SessionError> {
        if config.ice_servers.is_empty() {
            return Err(SessionError::Configuration("no ICE server configured".to_string()));
        }
        // str0m gathers host candidates only, the hints are just logged.
        info!("Peer ICE servers: {}", config.ice_servers.join(", "));

        let mut rtc = Rtc::builder().build();
        let candidate = host_candidate(self.local_addr)
            .map_err(|e| SessionError::Negotiation(format!("no usable host candidate: {e}")))?;
        rtc.add_local_candidate(candidate.clone());

        Ok(Str0mPeer {
            rtc,
            socket: self.socket.clone(),
            local_addr: self.local_addr,
            stream_id: None,
            tracks: vec![],
            pending: None,
            gathered: vec![candidate],
            unsent: vec![],
            connected: false,
            closed: false,
        })
    }
}

pub struct Str0mPeer {
    rtc: Rtc,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    stream_id: Option<String>,
    tracks: Vec<TrackOut>,
    pending: Option<SdpPendingOffer>,
    /// Local candidates known before the offer, trickled once it is sent.
    gathered: Vec<Candidate>,
    unsent: Vec<IceCandidate>,
    connected: bool,
    closed: bool,
}

impl Str0mPeer {
    /// ICE and DTLS are up; media can flow.
    pub fn is_connected(&self) -> bool {
        self.connected && !self.is_closed()
    }

    /// Feed one datagram received on the shared socket.
    pub fn handle_receive(&mut self, source: SocketAddr, data: &[u8]) {
        let Ok(contents) = data.try_into() else {
            debug!("Dropping unparseable datagram from {}", source);
            return;
        };

        let input = Input::Receive(
            Instant::now(),
            Receive {
                proto: Protocol::Udp,
                source,
                destination: self.local_addr,
                contents,
            },
        );

        if !self.rtc.accepts(&input) {
            debug!("Peer does not accept datagram from {}", source);
            return;
        }

        self.handle_input(input);
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        self.handle_input(Input::Timeout(now));
    }

    fn handle_input(&mut self, input: Input) {
        if self.is_closed() {
            return;
        }

        if let Err(e) = self.rtc.handle_input(input) {
            warn!("Peer disconnected: {:?}", e);
            self.rtc.disconnect();
        }
    }

    /// Poll all the output from the peer until it returns a timeout.
    /// Transmits go straight out on the socket.
    pub fn poll_until_timeout(&mut self) -> Instant {
        loop {
            if self.is_closed() {
                return Instant::now() + IDLE_POLL;
            }

            match self.rtc.poll_output() {
                Ok(Output::Timeout(t)) => return t,
                Ok(Output::Transmit(transmit)) => {
                    if let Err(e) = self.socket.try_send_to(&transmit.contents, transmit.destination) {
                        debug!("UDP send to {} failed: {}", transmit.destination, e);
                    }
                }
                Ok(Output::Event(event)) => self.handle_event(event),
                Err(e) => {
                    warn!("Peer poll_output failed: {:?}", e);
                    self.rtc.disconnect();
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::IceConnectionStateChange(state) => {
                info!("🔌 ICE Connection State: {:?}", state);
                if state == IceConnectionState::Disconnected {
                    // No ICE restart here, the agent has gone.
                    self.rtc.disconnect();
                }
            }
            Event::Connected => {
                info!("✅ Peer connected, camera media can flow");
                self.connected = true;
            }
            other => debug!("Peer event: {:?}", other),
        }
    }

    /// Write one encoded camera frame to every open outgoing track.
    pub fn write_frame(&mut self, codec: VideoCodec, frame: &EncodedFrame) {
        if !self.is_connected() {
            return;
        }

        let wanted = match codec {
            VideoCodec::Vp8 => Codec::Vp8,
            VideoCodec::Vp9 => Codec::Vp9,
        };

        let mids: Vec<_> = self
            .tracks
            .iter()
            .filter(|t| t.is_sending())
            .filter_map(TrackOut::mid)
            .collect();

        for mid in mids {
            let Some(writer) = self.rtc.writer(mid) else {
                continue;
            };

            let Some(pt) = writer
                .payload_params()
                .find(|p| p.spec().codec == wanted)
                .map(|p| p.pt())
            else {
                debug!("Agent did not accept {:?} on {:?}", wanted, mid);
                continue;
            };

            let rtp_time = MediaTime::new(frame.rtp_time, Frequency::NINETY_KHZ);
            if let Err(e) = writer.write(pt, Instant::now(), rtp_time, frame.data.clone()) {
                warn!("Peer media write failed: {:?}", e);
                self.rtc.disconnect();
                return;
            }
        }
    }

    fn first_mid(&self) -> Option<String> {
        self.tracks.iter().find_map(TrackOut::mid).map(|m| m.to_string())
    }
}

impl PeerConnection for Str0mPeer {
    fn add_track(&mut self, track: &MediaTrack, stream_id: &str) -> Result<(), SessionError> {
        if track.kind() != TrackKind::Video {
            debug!("Skipping non-video track {}", track.id());
            return Ok(());
        }
        debug!("Adding track {} ({})", track.id(), track.label());
        self.stream_id = Some(stream_id.to_string());
        self.tracks.push(TrackOut::new(track.clone()));
        Ok(())
    }

    fn create_offer(&mut self) -> Result<SessionDescription, SessionError> {
        let mut change = self.rtc.sdp_api();

        for track in &mut self.tracks {
            if let TrackOutState::ToOpen = track.state {
                let mid = change.add_media(
                    MediaKind::Video,
                    Direction::SendOnly,
                    self.stream_id.clone(),
                    Some(track.track.id().to_string()),
                    None,
                );
                track.state = TrackOutState::Negotiating(mid);
            }
        }

        let (offer, pending) = change
            .apply()
            .ok_or_else(|| SessionError::Negotiation("no media to offer".to_string()))?;
        self.pending = Some(pending);

        let sdp_mid = self.first_mid();
        self.unsent.extend(self.gathered.drain(..).map(|c| IceCandidate {
            candidate: c.to_sdp_string(),
            sdp_mid: sdp_mid.clone(),
            sdp_mline_index: Some(0),
        }));

        Ok(SessionDescription::offer(offer.to_sdp_string()))
    }

    fn set_remote_description(&mut self, answer: &SessionDescription) -> Result<(), SessionError> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| SessionError::Negotiation("no offer awaiting an answer".to_string()))?;

        let answer = SdpAnswer::from_sdp_string(&answer.sdp)
            .map_err(|e| SessionError::Negotiation(format!("unparseable answer: {e}")))?;

        self.rtc
            .sdp_api()
            .accept_answer(pending, answer)
            .map_err(|e| SessionError::Negotiation(format!("answer rejected: {e}")))?;

        for track in &mut self.tracks {
            if let TrackOutState::Negotiating(m) = track.state {
                track.state = TrackOutState::Open(m);
            }
        }

        Ok(())
    }

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> Result<(), SessionError> {
        if candidate.candidate.trim().is_empty() {
            debug!("End of remote candidates");
            return Ok(());
        }

        let parsed = Candidate::from_sdp_string(&candidate.candidate)
            .map_err(|e| SessionError::Negotiation(format!("bad remote candidate: {e}")))?;
        self.rtc.add_remote_candidate(parsed);
        Ok(())
    }

    fn take_local_candidates(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.unsent)
    }

    fn close(&mut self) {
        if !self.closed {
            info!("Closing peer connection");
            self.rtc.disconnect();
            self.closed = true;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed || !self.rtc.is_alive()
    }
}
