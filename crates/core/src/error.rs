//! Error types for the segmenting multiplexer.

use std::fmt;

/// Errors that can occur while muxing access units into segments.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Encoding**: [`Encode`](Self::Encode): the Annex B or ADTS encoder
///   rejected a malformed access unit.
/// - **Segment**: [`SegmentFull`](Self::SegmentFull): a write would grow the
///   open segment past its configured maximum size.
/// - **Setup**: [`TrackNotConfigured`](Self::TrackNotConfigured),
///   [`InvalidConfig`](Self::InvalidConfig).
/// - **Output**: [`Io`](Self::Io): writing a playlist window to disk.
///
/// `Encode` and `SegmentFull` are the two kinds that trigger the
/// multiplexer's fail-and-reset path; both are still returned to the caller.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The elementary stream encoder rejected its input.
    #[error("encode error: {kind}")]
    Encode { kind: EncodeErrorKind },

    /// Writing would exceed the maximum segment size.
    #[error("segment full: write would reach {size} bytes (max {max})")]
    SegmentFull { size: usize, max: usize },

    /// An access unit arrived for a track the multiplexer was not built with.
    #[error("{0} track not configured")]
    TrackNotConfigured(&'static str),

    /// [`MuxerConfig`](crate::MuxerConfig) or the track set failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MuxError {
    pub(crate) fn encode(kind: EncodeErrorKind) -> Self {
        Self::Encode { kind }
    }
}

/// Specific kind of encoder rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeErrorKind {
    /// The access unit carried no NALUs or no AAC units.
    EmptyAccessUnit,
    /// A NALU inside the access unit had zero length.
    EmptyNalu,
    /// An AAC unit does not fit in the 13-bit ADTS frame length field.
    AudioUnitTooLarge(usize),
    /// Sample rate has no ADTS sampling frequency index.
    UnsupportedSampleRate(u32),
    /// Channel count outside the ADTS channel configurations 1–7.
    UnsupportedChannelCount(u8),
    /// Audio object type that ADTS cannot signal (only types 1–4).
    UnsupportedObjectType(u8),
}

impl fmt::Display for EncodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyAccessUnit => write!(f, "empty access unit"),
            Self::EmptyNalu => write!(f, "empty NAL unit"),
            Self::AudioUnitTooLarge(len) => write!(f, "AAC unit too large ({len} bytes)"),
            Self::UnsupportedSampleRate(rate) => write!(f, "unsupported sample rate {rate}"),
            Self::UnsupportedChannelCount(n) => write!(f, "unsupported channel count {n}"),
            Self::UnsupportedObjectType(t) => write!(f, "unsupported audio object type {t}"),
        }
    }
}

/// Convenience alias for `Result<T, MuxError>`.
pub type Result<T> = std::result::Result<T, MuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_error_display() {
        let err = MuxError::encode(EncodeErrorKind::UnsupportedSampleRate(12345));
        assert_eq!(err.to_string(), "encode error: unsupported sample rate 12345");
    }

    #[test]
    fn segment_full_display() {
        let err = MuxError::SegmentFull { size: 400, max: 376 };
        assert_eq!(
            err.to_string(),
            "segment full: write would reach 400 bytes (max 376)"
        );
    }
}
