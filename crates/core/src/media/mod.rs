//! Elementary stream types and encoders.
//!
//! Access units arrive already depacketized from RTP: a video unit is the
//! list of H.264 NAL units that make up one picture, an audio unit batch is
//! one or more raw AAC frames. This module turns them into the byte layouts
//! that an MPEG-TS PES payload expects.
//!
//! ## Supported codecs
//!
//! | Codec | Module | Payload framing | Stream type |
//! |-------|--------|-----------------|-------------|
//! | H.264 | [`h264`] | Annex B (ITU-T H.264 §B.1) | `0x1B` |
//! | AAC | [`aac`] | ADTS (ISO/IEC 13818-7 §6.2) | `0x0F` |
//!
//! Both encoders are pure: they hold no state between calls and fail with
//! [`MuxError::Encode`](crate::MuxError::Encode) on malformed input.
//! Decode timestamps for reordered H.264 pictures come from [`dts`].

pub mod aac;
pub mod dts;
pub mod h264;

use std::time::Duration;

pub use aac::AudioTrack;
pub use dts::DtsEstimator;

/// One timestamped unit of elementary stream data.
///
/// Arrival order is presentation order. For video, decode order may differ
/// when the encoder uses B-frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessUnit {
    /// One H.264 picture as a list of NAL units (without start codes).
    Video { pts: Duration, nalus: Vec<Vec<u8>> },
    /// One or more raw AAC frames sharing a presentation timestamp.
    Audio { pts: Duration, aus: Vec<Vec<u8>> },
}

impl AccessUnit {
    pub fn pts(&self) -> Duration {
        match self {
            Self::Video { pts, .. } | Self::Audio { pts, .. } => *pts,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video { .. })
    }

    /// Total elementary payload bytes, excluding any framing.
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Video { nalus: units, .. } | Self::Audio { aus: units, .. } => {
                units.iter().map(Vec::len).sum()
            }
        }
    }
}

/// Static parameters of the H.264 track.
///
/// SPS/PPS are optional: most RTSP sources repeat them in-band before
/// every IDR, in which case they travel inside the access units themselves.
#[derive(Debug, Clone, Default)]
pub struct VideoTrack {
    pub sps: Option<Vec<u8>>,
    pub pps: Option<Vec<u8>>,
}

impl VideoTrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameter_sets(sps: Vec<u8>, pps: Vec<u8>) -> Self {
        Self {
            sps: Some(sps),
            pps: Some(pps),
        }
    }
}
