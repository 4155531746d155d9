use std::time::Duration;

use crate::error::{MuxError, Result};
use crate::mpegts::TS_PACKET_SIZE;

/// Segmenting parameters of one HLS muxer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxerConfig {
    /// Number of segments kept in the playlist window.
    pub segment_count: usize,
    /// Target segment duration. Segments are cut at the first IDR (or, for
    /// audio-only streams, the first batch) after this much media.
    pub segment_duration: Duration,
    /// Hard upper bound on the bytes of a single segment.
    pub segment_max_size: usize,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            segment_count: 3,
            segment_duration: Duration::from_secs(1),
            segment_max_size: 50 * 1024 * 1024,
        }
    }
}

impl MuxerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.segment_count == 0 {
            return Err(MuxError::InvalidConfig(
                "segment count must be at least 1".to_string(),
            ));
        }
        if self.segment_duration.is_zero() {
            return Err(MuxError::InvalidConfig(
                "segment duration must be positive".to_string(),
            ));
        }
        if self.segment_max_size < TS_PACKET_SIZE {
            return Err(MuxError::InvalidConfig(format!(
                "segment max size {} cannot hold a single TS packet",
                self.segment_max_size
            )));
        }
        Ok(())
    }
}
