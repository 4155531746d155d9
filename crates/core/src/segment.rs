//! HLS media segments.
//!
//! A [`Segment`] is the open, growing MPEG-TS buffer the multiplexer writes
//! into. Sealing consumes it and yields an immutable [`SealedSegment`] that
//! the playlist shares with readers behind an `Arc`.

use std::time::{Duration, Instant};

use crate::error::{MuxError, Result};
use crate::mpegts::{ElementaryStream, Pes, TsWriter};

/// A PCR goes out on every `PCR_INTERVAL`-th PES of the PCR stream.
const PCR_INTERVAL: usize = 3;

/// Open segment, owned and mutated only by the multiplexer.
#[derive(Debug)]
pub struct Segment {
    max_size: usize,
    data: Vec<u8>,
    start_pts: Option<Duration>,
    /// Highest PTS written so far.
    last_pts: Option<Duration>,
    audio_unit_count: usize,
    /// PES packets of the PCR stream until the next PCR.
    pcr_countdown: usize,
}

impl Segment {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            data: Vec::new(),
            start_pts: None,
            last_pts: None,
            audio_unit_count: 0,
            pcr_countdown: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// PTS of the first unit written, on the rebased timeline.
    pub fn start_pts(&self) -> Option<Duration> {
        self.start_pts
    }

    pub fn audio_unit_count(&self) -> usize {
        self.audio_unit_count
    }

    /// Write one Annex B encoded H.264 picture.
    pub fn write_h264(
        &mut self,
        writer: &mut TsWriter,
        start: Instant,
        dts: Duration,
        pts: Duration,
        idr: bool,
        data: &[u8],
    ) -> Result<()> {
        let pes = Pes {
            stream: ElementaryStream::Video,
            pts,
            dts: Some(dts),
            random_access: idr,
            pcr: None,
            data,
        };
        self.write(writer, start, pes)?;
        tracing::trace!(
            pts_us = pts.as_micros() as u64,
            dts_us = dts.as_micros() as u64,
            idr,
            bytes = data.len(),
            "wrote H.264 access unit"
        );
        Ok(())
    }

    /// Write a batch of ADTS frames that shares one PTS.
    pub fn write_aac(
        &mut self,
        writer: &mut TsWriter,
        start: Instant,
        pts: Duration,
        data: &[u8],
        unit_count: usize,
    ) -> Result<()> {
        let pes = Pes {
            stream: ElementaryStream::Audio,
            pts,
            dts: None,
            random_access: true,
            pcr: None,
            data,
        };
        self.write(writer, start, pes)?;
        self.audio_unit_count += unit_count;
        tracing::trace!(
            pts_us = pts.as_micros() as u64,
            units = unit_count,
            bytes = data.len(),
            "wrote AAC access units"
        );
        Ok(())
    }

    /// Encode into a scratch buffer and append only if the result fits.
    ///
    /// On rejection the segment and the writer's continuity counters are
    /// left exactly as they were.
    fn write(&mut self, writer: &mut TsWriter, start: Instant, mut pes: Pes<'_>) -> Result<()> {
        let on_pcr_stream = pes.stream == writer.pcr_stream();
        if on_pcr_stream && self.pcr_countdown == 0 {
            pes.pcr = Some(start.elapsed());
        }

        let saved = writer.checkpoint();
        let mut scratch = Vec::new();
        if self.data.is_empty() || (on_pcr_stream && pes.random_access) {
            writer.write_tables(&mut scratch);
        }
        writer.write_pes(&mut scratch, &pes);

        let size = self.data.len() + scratch.len();
        if size > self.max_size {
            writer.restore(saved);
            return Err(MuxError::SegmentFull {
                size,
                max: self.max_size,
            });
        }

        self.data.extend_from_slice(&scratch);
        if on_pcr_stream {
            self.pcr_countdown = match self.pcr_countdown {
                0 => PCR_INTERVAL - 1,
                n => n - 1,
            };
        }
        if self.start_pts.is_none() {
            self.start_pts = Some(pes.pts);
        }
        self.last_pts = Some(self.last_pts.map_or(pes.pts, |last| last.max(pes.pts)));
        Ok(())
    }

    /// Close the segment for writing.
    ///
    /// `end_pts` is the PTS of the unit that opens the next segment; without
    /// it (a partial segment sealed after a failure) the highest PTS written
    /// is used. Returns `None` for a segment that never received a byte.
    pub fn seal(self, sequence: u64, end_pts: Option<Duration>) -> Option<SealedSegment> {
        if self.data.is_empty() {
            return None;
        }
        let start_pts = self.start_pts.unwrap_or_default();
        let end_pts = end_pts
            .or(self.last_pts)
            .unwrap_or(start_pts)
            .max(start_pts);

        Some(SealedSegment {
            sequence,
            start_pts,
            end_pts,
            data: self.data,
            audio_unit_count: self.audio_unit_count,
        })
    }
}

/// Immutable, finished segment as published in the playlist window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSegment {
    sequence: u64,
    start_pts: Duration,
    end_pts: Duration,
    data: Vec<u8>,
    audio_unit_count: usize,
}

impl SealedSegment {
    /// Position in the multiplexer's output; consecutive across pushes.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn start_pts(&self) -> Duration {
        self.start_pts
    }

    pub fn end_pts(&self) -> Duration {
        self.end_pts
    }

    pub fn duration(&self) -> Duration {
        self.end_pts - self.start_pts
    }

    /// MPEG-TS bytes of the segment.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn audio_unit_count(&self) -> usize {
        self.audio_unit_count
    }

    /// URI of the segment inside the playlist, e.g. `12.ts`.
    pub fn name(&self) -> String {
        format!("{}.ts", self.sequence)
    }
}
