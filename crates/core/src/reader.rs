//! Stream consumers.
//!
//! A [`Stream`](crate::Stream) fans every access unit out to its readers.
//! The set of reader kinds is closed, so readers are an enum and dispatch
//! is a `match` rather than a trait object.

use crate::media::AccessUnit;
use crate::muxer::SegmentingMuxer;
use crate::playlist::StreamPlaylist;

/// A consumer attached to a stream.
#[derive(Debug)]
pub enum Reader {
    /// Muxes the stream into HLS segments.
    Hls(HlsReader),
    /// Counts what passes through.
    Stats(StatsReader),
}

/// Snapshot returned by [`Reader::describe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderDescription {
    Hls {
        segments_published: u64,
        media_sequence: u64,
        write_errors: u64,
    },
    Stats(Stats),
}

impl Reader {
    pub fn on_accepted(&mut self) {
        match self {
            Self::Hls(r) => r.on_accepted(),
            Self::Stats(r) => r.on_accepted(),
        }
    }

    pub fn on_access_unit(&mut self, unit: &AccessUnit) {
        match self {
            Self::Hls(r) => r.on_access_unit(unit),
            Self::Stats(r) => r.on_access_unit(unit),
        }
    }

    pub fn on_rtcp(&mut self, track_id: usize, packet: &[u8]) {
        match self {
            Self::Hls(_) => {
                tracing::trace!(track_id, len = packet.len(), "HLS reader ignores RTCP");
            }
            Self::Stats(r) => r.on_rtcp(track_id, packet),
        }
    }

    pub fn describe(&self) -> ReaderDescription {
        match self {
            Self::Hls(r) => r.describe(),
            Self::Stats(r) => ReaderDescription::Stats(r.stats()),
        }
    }

    pub fn close(&mut self) {
        match self {
            Self::Hls(r) => r.close(),
            Self::Stats(r) => r.close(),
        }
    }
}

impl From<HlsReader> for Reader {
    fn from(reader: HlsReader) -> Self {
        Self::Hls(reader)
    }
}

impl From<StatsReader> for Reader {
    fn from(reader: StatsReader) -> Self {
        Self::Stats(reader)
    }
}

/// Reader that feeds a [`SegmentingMuxer`].
///
/// Write errors never reach the stream: they are logged, counted, and the
/// muxer resynchronizes on the next IDR by itself.
#[derive(Debug)]
pub struct HlsReader {
    muxer: SegmentingMuxer,
    accepted: bool,
    closed: bool,
    write_errors: u64,
}

impl HlsReader {
    pub fn new(muxer: SegmentingMuxer) -> Self {
        Self {
            muxer,
            accepted: false,
            closed: false,
            write_errors: 0,
        }
    }

    pub fn playlist(&self) -> &StreamPlaylist {
        self.muxer.playlist()
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors
    }

    fn on_accepted(&mut self) {
        self.accepted = true;
        tracing::debug!("HLS reader attached");
    }

    fn on_access_unit(&mut self, unit: &AccessUnit) {
        if !self.accepted || self.closed {
            return;
        }
        if let Err(err) = self.muxer.write(unit) {
            self.write_errors += 1;
            tracing::warn!(
                error = %err,
                video = unit.is_video(),
                pts_us = unit.pts().as_micros() as u64,
                "HLS muxer error"
            );
        }
    }

    fn describe(&self) -> ReaderDescription {
        ReaderDescription::Hls {
            segments_published: self.muxer.segments_published(),
            media_sequence: self.muxer.playlist().media_sequence(),
            write_errors: self.write_errors,
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.muxer.flush(None);
            tracing::debug!(
                segments = self.muxer.segments_published(),
                write_errors = self.write_errors,
                "HLS reader closed"
            );
        }
    }
}

/// Counters collected by a [`StatsReader`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub video_units: u64,
    pub audio_units: u64,
    pub payload_bytes: u64,
    pub rtcp_packets: u64,
}

#[derive(Debug, Default)]
pub struct StatsReader {
    stats: Stats,
    closed: bool,
}

impl StatsReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    fn on_accepted(&mut self) {
        tracing::debug!("stats reader attached");
    }

    fn on_access_unit(&mut self, unit: &AccessUnit) {
        if self.closed {
            return;
        }
        match unit {
            AccessUnit::Video { .. } => self.stats.video_units += 1,
            AccessUnit::Audio { aus, .. } => self.stats.audio_units += aus.len() as u64,
        }
        self.stats.payload_bytes += unit.payload_len() as u64;
    }

    fn on_rtcp(&mut self, _track_id: usize, _packet: &[u8]) {
        if !self.closed {
            self.stats.rtcp_packets += 1;
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
