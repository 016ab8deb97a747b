//! Data models for the monitoring session
//!
//! Connection states, the signaling wire format, metrics, and the local
//! camera stream with its outbound track bookkeeping.

pub mod media;
pub mod message;
pub mod metrics;
pub mod state;
pub mod tracks;
