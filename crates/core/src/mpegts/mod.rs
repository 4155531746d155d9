//! MPEG transport stream writer (ISO/IEC 13818-1).
//!
//! Segments are plain MPEG-TS byte buffers. Every segment has to be
//! decodable on its own, so the writer emits the program tables at the start
//! of each segment and again before every random access point of the PCR
//! stream.
//!
//! ## Packet layout (§2.4.3.2)
//!
//! ```text
//! +------+-----+------+-----+-----+----+-----------------+-----------+
//! | 0x47 | TEI | PUSI | PRI | PID | SC | adaptation ctrl | CC (4bit) |
//! +------+-----+------+-----+-----+----+-----------------+-----------+
//! | adaptation field (optional): RAI, PCR, stuffing                   |
//! | payload: PSI section or PES packet fragment                       |
//! +-------------------------------------------------------------------+
//! ```
//!
//! ## Program layout
//!
//! | PID | Content | Stream type | PES stream id |
//! |-----|---------|-------------|---------------|
//! | `0x0000` | PAT | | |
//! | `0x1000` | PMT (program 1) | | |
//! | `0x0100` | H.264 video | `0x1B` | `0xE0` |
//! | `0x0101` | AAC/ADTS audio | `0x0F` | `0xC0` |
//!
//! The PCR travels on the video PID, or on the audio PID when the program
//! has no video.

pub mod pes;
pub mod psi;

use std::time::Duration;

pub use pes::Pes;

/// Size of a single MPEG-TS packet.
pub const TS_PACKET_SIZE: usize = 188;

/// Sync byte for TS packets.
pub const SYNC_BYTE: u8 = 0x47;

pub const PAT_PID: u16 = 0x0000;
pub const PMT_PID: u16 = 0x1000;
pub const VIDEO_PID: u16 = 0x0100;
pub const AUDIO_PID: u16 = 0x0101;

const PROGRAM_NUMBER: u16 = 1;
const TRANSPORT_STREAM_ID: u16 = 1;

/// 90 kHz clock for PTS/DTS.
const CLOCK_90KHZ: u128 = 90_000;

/// 27 MHz clock for PCR.
const CLOCK_27MHZ: u128 = 27_000_000;

/// PTS, DTS and PCR base are 33-bit counters.
const MASK_33_BITS: u64 = (1 << 33) - 1;

/// One of the two elementary streams of the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementaryStream {
    Video,
    Audio,
}

impl ElementaryStream {
    pub fn pid(self) -> u16 {
        match self {
            Self::Video => VIDEO_PID,
            Self::Audio => AUDIO_PID,
        }
    }

    /// Stream type code for the PMT (Table 2-34).
    pub fn stream_type(self) -> u8 {
        match self {
            Self::Video => 0x1B,
            Self::Audio => 0x0F,
        }
    }

    /// PES `stream_id` (Table 2-22).
    pub fn stream_id(self) -> u8 {
        match self {
            Self::Video => 0xE0,
            Self::Audio => 0xC0,
        }
    }
}

/// Per-PID 4-bit continuity counters.
///
/// `Copy` so a write can be rolled back: a segment that rejects a write
/// restores the counters it saw before encoding it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContinuityCounters {
    pat: u8,
    pmt: u8,
    video: u8,
    audio: u8,
}

impl ContinuityCounters {
    fn next(&mut self, pid: u16) -> u8 {
        let cc = match pid {
            PAT_PID => &mut self.pat,
            PMT_PID => &mut self.pmt,
            VIDEO_PID => &mut self.video,
            _ => &mut self.audio,
        };
        let current = *cc;
        *cc = (*cc + 1) & 0x0F;
        current
    }
}

/// Stateful MPEG-TS packetizer for a single-program stream.
///
/// One writer lives as long as its multiplexer and is shared by all of the
/// segments it produces, so continuity counters run on across segment
/// boundaries.
#[derive(Debug)]
pub struct TsWriter {
    streams: Vec<ElementaryStream>,
    counters: ContinuityCounters,
}

impl TsWriter {
    pub fn new(has_video: bool, has_audio: bool) -> Self {
        let mut streams = Vec::with_capacity(2);
        if has_video {
            streams.push(ElementaryStream::Video);
        }
        if has_audio {
            streams.push(ElementaryStream::Audio);
        }
        Self {
            streams,
            counters: ContinuityCounters::default(),
        }
    }

    pub fn streams(&self) -> &[ElementaryStream] {
        &self.streams
    }

    /// Stream that carries the program clock reference.
    pub fn pcr_stream(&self) -> ElementaryStream {
        if self.streams.contains(&ElementaryStream::Video) {
            ElementaryStream::Video
        } else {
            ElementaryStream::Audio
        }
    }

    pub fn checkpoint(&self) -> ContinuityCounters {
        self.counters
    }

    pub fn restore(&mut self, counters: ContinuityCounters) {
        self.counters = counters;
    }

    /// Append a PAT and a PMT packet.
    pub fn write_tables(&mut self, out: &mut Vec<u8>) {
        let pat = psi::pat_section(TRANSPORT_STREAM_ID, PROGRAM_NUMBER, PMT_PID);
        let cc = self.counters.next(PAT_PID);
        psi::write_section_packet(out, PAT_PID, cc, &pat);

        let pmt = psi::pmt_section(PROGRAM_NUMBER, self.pcr_stream().pid(), &self.streams);
        let cc = self.counters.next(PMT_PID);
        psi::write_section_packet(out, PMT_PID, cc, &pmt);
    }

    /// Append one PES packet split across as many TS packets as it needs.
    /// Returns the number of TS packets written.
    pub fn write_pes(&mut self, out: &mut Vec<u8>, pes: &Pes<'_>) -> usize {
        let pid = pes.stream.pid();
        let header = pes.header();
        let mut payload = Vec::with_capacity(header.len() + pes.data.len());
        payload.extend_from_slice(&header);
        payload.extend_from_slice(pes.data);

        let mut offset = 0;
        let mut packets = 0;
        while offset < payload.len() {
            let first = offset == 0;
            let adaptation = if first { pes.adaptation_field() } else { None };
            let cc = self.counters.next(pid);
            offset += pes::write_ts_packet(out, pid, first, cc, adaptation, &payload[offset..]);
            packets += 1;
        }

        tracing::trace!(
            pid,
            packets,
            pes_bytes = payload.len(),
            random_access = pes.random_access,
            pcr = pes.pcr.is_some(),
            "PES packetized"
        );
        packets
    }
}

/// Convert to the 33-bit 90 kHz clock used by PTS and DTS.
pub fn to_90khz(d: Duration) -> u64 {
    (d.as_nanos() * CLOCK_90KHZ / 1_000_000_000) as u64 & MASK_33_BITS
}

/// Convert to the 27 MHz clock used by the PCR, split into (base, extension).
pub fn to_pcr(d: Duration) -> (u64, u16) {
    let ticks = d.as_nanos() * CLOCK_27MHZ / 1_000_000_000;
    let base = (ticks / 300) as u64 & MASK_33_BITS;
    let ext = (ticks % 300) as u16;
    (base, ext)
}
