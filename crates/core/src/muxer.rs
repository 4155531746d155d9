//! Segmenting MPEG-TS multiplexer.
//!
//! Turns a live sequence of H.264 and AAC access units into a series of
//! self-contained MPEG-TS segments on one shared timeline.
//!
//! ## Lifecycle
//!
//! ```text
//!            video unit with IDR / any audio unit (audio-only)
//!   Idle  ─────────────────────────────────────────────────────▶  Open
//!    ▲                                                              │
//!    │  encode or write failure: seal partial segment, push it      │
//!    └──────────────────────────────────────────────────────────────┘
//!
//!   Open + IDR after ≥ target duration            → rotate
//!   Open + audio (audio-only), ≥ 100 units and
//!          ≥ target duration                      → rotate
//! ```
//!
//! ## Timeline
//!
//! The first unit that opens a segment fixes the timeline origin. Every
//! timestamp is rebased as `pts - origin + PCR_OFFSET`; the offset keeps
//! PTS ahead of the PCR, which starts at zero. The origin outlives failure
//! resets so that segments produced after a reset stay on the same clock.

use std::time::{Duration, Instant};

use crate::config::MuxerConfig;
use crate::error::{MuxError, Result};
use crate::media::h264::{self, ACCESS_UNIT_DELIMITER, NALU_TYPE_SPS};
use crate::media::{AccessUnit, AudioTrack, DtsEstimator, VideoTrack, aac};
use crate::mpegts::TsWriter;
use crate::playlist::StreamPlaylist;
use crate::segment::Segment;

/// Distance between PCR and PTS/DTS at the timeline origin.
pub const PCR_OFFSET: Duration = Duration::from_millis(500);

/// Minimum AAC units in an audio-only segment before it may be rotated.
pub const SEGMENT_MIN_AU_COUNT: usize = 100;

#[derive(Debug, Clone, Copy)]
struct Timeline {
    /// Wall clock at the origin; PCR values count from here.
    start: Instant,
    origin_pts: Duration,
}

impl Timeline {
    fn rebase(&self, pts: Duration) -> Option<Duration> {
        (pts + PCR_OFFSET).checked_sub(self.origin_pts)
    }
}

#[derive(Debug)]
struct OpenSegment {
    segment: Segment,
    dts: DtsEstimator,
    start: Instant,
}

impl OpenSegment {
    fn target_reached(&self, pts: Duration, target: Duration) -> bool {
        self.segment
            .start_pts()
            .and_then(|start| pts.checked_sub(start))
            .is_some_and(|elapsed| elapsed >= target)
    }
}

/// Per-stream segmenting multiplexer.
///
/// Single-writer: the owner calls [`write_h264`](Self::write_h264) and
/// [`write_aac`](Self::write_aac) from one thread. Sealed segments go to the
/// [`StreamPlaylist`], which can be read from anywhere.
#[derive(Debug)]
pub struct SegmentingMuxer {
    config: MuxerConfig,
    video: Option<VideoTrack>,
    audio: Option<AudioTrack>,
    playlist: StreamPlaylist,
    writer: TsWriter,
    timeline: Option<Timeline>,
    current: Option<OpenSegment>,
    next_sequence: u64,
}

impl SegmentingMuxer {
    pub fn new(
        config: MuxerConfig,
        video: Option<VideoTrack>,
        audio: Option<AudioTrack>,
        playlist: StreamPlaylist,
    ) -> Result<Self> {
        config.validate()?;
        if video.is_none() && audio.is_none() {
            return Err(MuxError::InvalidConfig(
                "at least one of the video and audio tracks is required".to_string(),
            ));
        }
        // The playlist window is the configured segment count.
        if playlist.capacity() != config.segment_count {
            return Err(MuxError::InvalidConfig(format!(
                "playlist holds {} segments but segment count is {}",
                playlist.capacity(),
                config.segment_count
            )));
        }
        if let Some(track) = &audio {
            track
                .validate()
                .map_err(|err| MuxError::InvalidConfig(err.to_string()))?;
        }

        let writer = TsWriter::new(video.is_some(), audio.is_some());
        tracing::debug!(
            video = video.is_some(),
            audio = audio.is_some(),
            segment_duration_ms = config.segment_duration.as_millis() as u64,
            segment_count = config.segment_count,
            "muxer created"
        );

        Ok(Self {
            config,
            video,
            audio,
            playlist,
            writer,
            timeline: None,
            current: None,
            next_sequence: 0,
        })
    }

    pub fn config(&self) -> &MuxerConfig {
        &self.config
    }

    pub fn playlist(&self) -> &StreamPlaylist {
        &self.playlist
    }

    /// Whether a segment is currently being written.
    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Number of segments handed to the playlist so far.
    pub fn segments_published(&self) -> u64 {
        self.next_sequence
    }

    pub fn write(&mut self, unit: &AccessUnit) -> Result<()> {
        match unit {
            AccessUnit::Video { pts, nalus } => self.write_h264(*pts, nalus),
            AccessUnit::Audio { pts, aus } => self.write_aac(*pts, aus),
        }
    }

    /// Write one H.264 access unit (NAL units without start codes).
    pub fn write_h264(&mut self, pts: Duration, nalus: &[Vec<u8>]) -> Result<()> {
        if self.video.is_none() {
            return Err(MuxError::TrackNotConfigured("video"));
        }
        let idr = h264::contains_idr(nalus);

        let pts = if self.current.is_none() {
            if !idr {
                tracing::trace!("waiting for IDR, dropping picture");
                return Ok(());
            }
            let Some(rebased) = self.rebase(pts) else {
                return Ok(());
            };
            self.open_segment();
            rebased
        } else {
            let Some(rebased) = self.rebase(pts) else {
                return Ok(());
            };
            let target = self.config.segment_duration;
            if idr && self.current.as_ref().is_some_and(|o| o.target_reached(rebased, target)) {
                self.rotate(rebased);
            }
            rebased
        };

        let dts = match self.current.as_mut() {
            Some(open) => open.dts.feed(pts),
            None => return Ok(()),
        };

        let encoded = {
            let mut units: Vec<&[u8]> = Vec::with_capacity(nalus.len() + 3);
            units.push(&ACCESS_UNIT_DELIMITER);
            if idr {
                // Out-of-band parameter sets go in front of IDRs that lack them.
                let in_band = nalus.iter().any(|n| h264::nalu_type(n) == Some(NALU_TYPE_SPS));
                if let Some(VideoTrack {
                    sps: Some(sps),
                    pps: Some(pps),
                }) = &self.video
                    && !in_band
                {
                    units.push(sps);
                    units.push(pps);
                }
            }
            units.extend(nalus.iter().map(Vec::as_slice));
            h264::encode_annexb(&units)
        };
        let data = encoded.map_err(|err| self.fail_and_reset(err))?;

        let written = match self.current.as_mut() {
            Some(open) => {
                open.segment
                    .write_h264(&mut self.writer, open.start, dts, pts, idr, &data)
            }
            None => return Ok(()),
        };
        written.map_err(|err| self.fail_and_reset(err))
    }

    /// Write a batch of raw AAC units that share one PTS.
    pub fn write_aac(&mut self, pts: Duration, aus: &[Vec<u8>]) -> Result<()> {
        if self.audio.is_none() {
            return Err(MuxError::TrackNotConfigured("audio"));
        }

        let pts = if self.video.is_some() {
            if self.current.is_none() {
                tracing::trace!("no video segment yet, dropping audio");
                return Ok(());
            }
            let Some(rebased) = self.rebase(pts) else {
                return Ok(());
            };
            rebased
        } else {
            let Some(rebased) = self.rebase(pts) else {
                return Ok(());
            };
            let target = self.config.segment_duration;
            let rotate = self.current.as_ref().map(|open| {
                open.segment.audio_unit_count() >= SEGMENT_MIN_AU_COUNT
                    && open.target_reached(rebased, target)
            });
            match rotate {
                None => self.open_segment(),
                Some(true) => self.rotate(rebased),
                Some(false) => {}
            }
            rebased
        };

        let encoded = match &self.audio {
            Some(track) => aac::encode_adts(track, aus),
            None => return Err(MuxError::TrackNotConfigured("audio")),
        };
        let data = encoded.map_err(|err| self.fail_and_reset(err))?;

        let written = match self.current.as_mut() {
            Some(open) => {
                open.segment
                    .write_aac(&mut self.writer, open.start, pts, &data, aus.len())
            }
            None => return Ok(()),
        };
        written.map_err(|err| self.fail_and_reset(err))
    }

    /// Seal and publish the open segment at end of stream.
    ///
    /// `end_pts` is the source PTS at which the last unit stops being shown,
    /// typically the PTS the next frame would have had. Without it the
    /// segment ends at the highest PTS written, so its duration leaves out
    /// the display time of the last frame. Returns whether a segment was
    /// published.
    pub fn flush(&mut self, end_pts: Option<Duration>) -> bool {
        let end_pts = end_pts.and_then(|pts| self.timeline.and_then(|t| t.rebase(pts)));
        match self.current.take() {
            Some(open) => self.publish(open.segment, end_pts),
            None => false,
        }
    }

    /// Map a source PTS onto the timeline, fixing the origin on first use.
    fn rebase(&mut self, pts: Duration) -> Option<Duration> {
        let timeline = *self.timeline.get_or_insert_with(|| {
            tracing::debug!(origin_pts_us = pts.as_micros() as u64, "timeline origin set");
            Timeline {
                start: Instant::now(),
                origin_pts: pts,
            }
        });

        let rebased = timeline.rebase(pts);
        if rebased.is_none() {
            tracing::debug!(
                pts_us = pts.as_micros() as u64,
                origin_pts_us = timeline.origin_pts.as_micros() as u64,
                "unit precedes the timeline origin, dropping"
            );
        }
        rebased
    }

    fn open_segment(&mut self) {
        let Some(timeline) = self.timeline else {
            return;
        };
        self.current = Some(OpenSegment {
            segment: Segment::new(self.config.segment_max_size),
            dts: DtsEstimator::new(),
            start: timeline.start,
        });
        tracing::debug!(sequence = self.next_sequence, "segment opened");
    }

    fn rotate(&mut self, pts: Duration) {
        if let Some(open) = self.current.take() {
            self.publish(open.segment, Some(pts));
        }
        self.open_segment();
    }

    /// Seal and push a segment; empty segments are dropped.
    fn publish(&mut self, segment: Segment, end_pts: Option<Duration>) -> bool {
        match segment.seal(self.next_sequence, end_pts) {
            Some(sealed) => {
                tracing::debug!(
                    sequence = sealed.sequence(),
                    start_pts_us = sealed.start_pts().as_micros() as u64,
                    end_pts_us = sealed.end_pts().as_micros() as u64,
                    "segment sealed"
                );
                self.next_sequence += 1;
                self.playlist.push(sealed);
                true
            }
            None => false,
        }
    }

    /// Publish whatever the open segment holds and go back to waiting for a
    /// sync point. The origin is kept.
    fn fail_and_reset(&mut self, err: MuxError) -> MuxError {
        if let Some(open) = self.current.take() {
            let partial_bytes = open.segment.len();
            let published = self.publish(open.segment, None);
            tracing::warn!(
                error = %err,
                partial_bytes,
                published,
                "muxing failed, waiting for next sync point"
            );
        }
        err
    }
}
