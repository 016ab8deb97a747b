//! Camera devices
//!
//! A [`CameraDevice`] turns capture constraints into a [`Capture`]: the
//! [`MediaStream`] the session owns, plus the encoded frame source the driver
//! pumps into the peer connection.
//!
//! The shipped device, [`IvfCamera`], replays a pre-encoded VP8/VP9 clip in the
//! IVF container at the clip's own frame rate, looping at the end.

use std::{
    fs,
    path::PathBuf,
    time::Duration,
};

use tracing::{debug, info};

use crate::error::SessionError;
use crate::model::media::{MediaConstraints, MediaStream, MediaTrack, VideoCodec};

const IVF_SIGNATURE: &[u8; 4] = b"DKIF";
const IVF_HEADER_LEN: usize = 32;
const IVF_FRAME_HEADER_LEN: usize = 12;

/// RTP clock rate for video.
pub const VIDEO_CLOCK_RATE: u64 = 90_000;

/// Shortest frame interval a source may report, i.e. at most 1000 fps.
pub const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);

/// One encoded video frame and its RTP timestamp in [`VIDEO_CLOCK_RATE`] units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub rtp_time: u64,
}

pub trait FrameSource: Send {
    fn codec(&self) -> VideoCodec;

    /// Time between two frames.
    fn frame_interval(&self) -> Duration;

    /// Next frame, or `None` when the source has nothing to give.
    fn next_frame(&mut self) -> Option<EncodedFrame>;
}

pub struct Capture {
    pub stream: MediaStream,
    pub frames: Box<dyn FrameSource>,
}

pub trait CameraDevice {
    fn acquire(&mut self, constraints: &MediaConstraints) -> Result<Capture, SessionError>;
}

/// Replays an IVF file as a camera.
#[derive(Debug, Clone)]
pub struct IvfCamera {
    path: PathBuf,
}

impl IvfCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CameraDevice for IvfCamera {
    fn acquire(&mut self, constraints: &MediaConstraints) -> Result<Capture, SessionError> {
        let bytes = fs::read(&self.path).map_err(|e| {
            SessionError::MediaPermission(format!("cannot open {}: {e}", self.path.display()))
        })?;
        let clip = IvfClip::parse(bytes).map_err(SessionError::MediaPermission)?;

        if constraints.audio {
            debug!("Audio requested but camera {} is video only", self.path.display());
        }
        if (clip.width, clip.height) != (constraints.width, constraints.height) {
            debug!(
                "Camera clip is {}x{}, constraint hint was {}x{}",
                clip.width, clip.height, constraints.width, constraints.height
            );
        }

        info!(
            "📷 Camera {} acquired: {:?} {}x{}, {} frames every {:?}",
            self.path.display(),
            clip.codec,
            clip.width,
            clip.height,
            clip.frames.len(),
            clip.interval
        );

        let label = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ivf camera".to_string());
        let stream = MediaStream::new(vec![MediaTrack::video("camera-0", label)]);

        Ok(Capture { stream, frames: Box::new(clip) })
    }
}

/// A parsed IVF file held in memory.
#[derive(Debug)]
pub struct IvfClip {
    codec: VideoCodec,
    width: u32,
    height: u32,
    interval: Duration,
    frames: Vec<Vec<u8>>,
    next: usize,
    sent: u64,
}

impl IvfClip {
    pub fn parse(bytes: Vec<u8>) -> Result<Self, String> {
        if bytes.len() < IVF_HEADER_LEN || &bytes[0..4] != IVF_SIGNATURE {
            return Err("not an IVF file".to_string());
        }

        let header_len = usize::from(read_u16(&bytes, 6));
        let codec = match &bytes[8..12] {
            b"VP80" => VideoCodec::Vp8,
            b"VP90" => VideoCodec::Vp9,
            other => {
                return Err(format!(
                    "unsupported IVF codec {}",
                    String::from_utf8_lossy(other)
                ))
            }
        };
        let width = u32::from(read_u16(&bytes, 12));
        let height = u32::from(read_u16(&bytes, 14));
        let rate = read_u32(&bytes, 16);
        let scale = read_u32(&bytes, 20);
        if rate == 0 || scale == 0 {
            return Err("IVF header has a zero frame rate".to_string());
        }
        let interval = Duration::from_nanos(u64::from(scale) * 1_000_000_000 / u64::from(rate));
        if interval < MIN_FRAME_INTERVAL {
            return Err(format!("IVF frame rate {rate}/{scale} is above 1000 fps"));
        }

        let mut frames = vec![];
        let mut pos = header_len.max(IVF_HEADER_LEN);
        while pos + IVF_FRAME_HEADER_LEN <= bytes.len() {
            let size = read_u32(&bytes, pos) as usize;
            let start = pos + IVF_FRAME_HEADER_LEN;
            let end = start + size;
            if end > bytes.len() {
                return Err(format!("IVF frame {} is truncated", frames.len()));
            }
            frames.push(bytes[start..end].to_vec());
            pos = end;
        }

        if frames.is_empty() {
            return Err("IVF file contains no frames".to_string());
        }

        Ok(Self { codec, width, height, interval, frames, next: 0, sent: 0 })
    }
}

impl FrameSource for IvfClip {
    fn codec(&self) -> VideoCodec {
        self.codec
    }

    fn frame_interval(&self) -> Duration {
        self.interval
    }

    fn next_frame(&mut self) -> Option<EncodedFrame> {
        let data = self.frames.get(self.next)?.clone();
        self.next = (self.next + 1) % self.frames.len();

        // Timestamps keep increasing across loops of the clip.
        let step = (self.interval.as_secs_f64() * VIDEO_CLOCK_RATE as f64).round() as u64;
        let rtp_time = self.sent * step;
        self.sent += 1;

        Some(EncodedFrame { data, rtp_time })
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Build an IVF file in memory. Used by tests that need a camera.
#[cfg(test)]
pub(crate) fn ivf_bytes(fourcc: &[u8; 4], rate: u32, frames: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(IVF_SIGNATURE);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(IVF_HEADER_LEN as u16).to_le_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(&1280u16.to_le_bytes());
    out.extend_from_slice(&720u16.to_le_bytes());
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&(frames.len() as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    for (i, frame) in frames.iter().enumerate() {
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&(i as u64).to_le_bytes());
        out.extend_from_slice(frame);
    }
    out
}
