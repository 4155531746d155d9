//! Decode timestamp estimation for H.264 streams with B-frames.
//!
//! RTP only carries presentation timestamps. MPEG-TS needs a DTS for every
//! picture whose decode order differs from its display order, and players
//! reject DTS values that go backwards. With shallow reordering (one or two
//! B-frames between references) the decode schedule can be reconstructed
//! from the two most recent PTS values:
//!
//! ```text
//! display order   I0  B1  B2  P3
//! arrival order   I0  P3  B1  B2        (arrival = decode order)
//! PTS             0   3   1   2
//! DTS             0   0+  1   1+
//! ```
//!
//! (`n+` is `n` plus the minimum DTS step.)
//!
//! - A picture whose PTS moves forward is a reference picture; it is decoded
//!   when the previous picture is shown, i.e. DTS = previous PTS.
//! - A picture whose PTS does not move forward is a B-frame; it is decoded
//!   right when it is shown, i.e. DTS = its own PTS.
//!
//! The estimate is then clamped so DTS strictly increases and never exceeds
//! the PTS it belongs to.

use std::time::Duration;

/// Smallest step between two consecutive decode timestamps.
const MIN_DTS_STEP: Duration = Duration::from_micros(1);

/// Converts arrival-ordered PTS values of one video track into DTS values.
///
/// One instance covers one segment; the multiplexer creates a fresh
/// estimator every time it opens a segment.
#[derive(Debug, Default)]
pub struct DtsEstimator {
    prev_pts: Option<Duration>,
    prev_dts: Option<Duration>,
}

impl DtsEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next PTS in arrival order and get its DTS.
    pub fn feed(&mut self, pts: Duration) -> Duration {
        let estimate = match self.prev_pts {
            Some(prev_pts) if pts > prev_pts => prev_pts,
            _ => pts,
        };

        let dts = match self.prev_dts {
            Some(prev_dts) => {
                let floor = prev_dts + MIN_DTS_STEP;
                // Monotonicity wins over DTS <= PTS for pathological input.
                estimate.min(pts).max(floor)
            }
            None => estimate,
        };

        tracing::trace!(
            pts_us = pts.as_micros() as u64,
            dts_us = dts.as_micros() as u64,
            "estimated DTS"
        );

        self.prev_pts = Some(pts);
        self.prev_dts = Some(dts);
        dts
    }
}
