//! Outgoing media tracks
//!
//! Each local capture track attached to the peer connection becomes a
//! [`TrackOut`], which follows the SDP negotiation of its media section.

use str0m::media::Mid;

use crate::model::media::MediaTrack;

/// A local track being sent to the agent.
#[derive(Debug)]
pub struct TrackOut {
    /// The capture track feeding this media section
    pub(crate) track: MediaTrack,
    /// Current negotiation state
    pub(crate) state: TrackOutState,
}

/// The negotiation state of an outgoing track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutState {
    /// Track needs a media section in the next offer
    ToOpen,
    /// Offer sent with the given Mid, waiting for the answer
    Negotiating(Mid),
    /// Answer accepted, media can flow
    Open(Mid),
}

impl TrackOut {
    pub fn new(track: MediaTrack) -> Self {
        Self { track, state: TrackOutState::ToOpen }
    }

    /// Section the camera track was offered in, once there is one.
    pub fn mid(&self) -> Option<Mid> {
        match self.state {
            TrackOutState::ToOpen => None,
            TrackOutState::Negotiating(m) | TrackOutState::Open(m) => Some(m),
        }
    }

    /// Whether frames for this track may be written.
    pub fn is_sending(&self) -> bool {
        matches!(self.state, TrackOutState::Open(_)) && self.track.is_live()
    }
}
