//! Local capture streams
//!
//! A [`MediaStream`] is what a camera device hands out: a set of tracks that
//! stay `live` until someone stops them. Track handles are cheap clones sharing
//! one ready-state flag, so a stopped track reads `ended` through every clone.

use std::fmt;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Mirrors `MediaStreamTrack.readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Live,
    Ended,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReadyState::Live => "live",
            ReadyState::Ended => "ended",
        })
    }
}

/// Codec of the encoded frames a track produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Vp8,
    Vp9,
}

/// Capture constraints passed to a camera device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub width: u32,
    pub height: u32,
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self { width: 1280, height: 720, audio: false }
    }
}

#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    label: String,
    live: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn video(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Video,
            label: label.into(),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn ready_state(&self) -> ReadyState {
        if self.live.load(Ordering::SeqCst) {
            ReadyState::Live
        } else {
            ReadyState::Ended
        }
    }

    pub fn is_live(&self) -> bool {
        self.ready_state() == ReadyState::Live
    }

    /// Release the capture device behind this track. Ending is permanent.
    pub fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        static STREAM_COUNTER: AtomicU64 = AtomicU64::new(0);
        let next = STREAM_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self { id: format!("stream-{next}"), tracks }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }

    pub fn is_live(&self) -> bool {
        self.live_tracks() > 0
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}
