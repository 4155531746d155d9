//! PES packet construction and TS packetization (§2.4.3.6, §2.4.3.7).

use std::time::Duration;

use super::{ElementaryStream, SYNC_BYTE, TS_PACKET_SIZE, to_90khz, to_pcr};

/// Payload bytes in a TS packet without adaptation field.
const MAX_PAYLOAD_SIZE: usize = TS_PACKET_SIZE - 4;

const FLAG_RANDOM_ACCESS: u8 = 0x40;
const FLAG_PCR: u8 = 0x10;

/// One PES packet to be written by [`TsWriter::write_pes`](super::TsWriter::write_pes).
#[derive(Debug, Clone)]
pub struct Pes<'a> {
    pub stream: ElementaryStream,
    pub pts: Duration,
    /// Omitted from the header when `None` or equal to `pts`.
    pub dts: Option<Duration>,
    /// Sets `random_access_indicator` in the first TS packet.
    pub random_access: bool,
    /// Program clock reference carried in the first TS packet.
    pub pcr: Option<Duration>,
    pub data: &'a [u8],
}

impl Pes<'_> {
    /// PES header: start code, stream id, length, flags and timestamps.
    pub(super) fn header(&self) -> Vec<u8> {
        let dts = self.dts.filter(|dts| *dts != self.pts);
        let header_data_length: usize = if dts.is_some() { 10 } else { 5 };

        // Video PES may exceed 64 KiB; 0 means unbounded.
        let packet_length = match self.stream {
            ElementaryStream::Video => 0,
            ElementaryStream::Audio => {
                let len = 3 + header_data_length + self.data.len();
                if len > u16::MAX as usize { 0 } else { len as u16 }
            }
        };

        let mut header = Vec::with_capacity(9 + header_data_length);
        header.extend_from_slice(&[0x00, 0x00, 0x01, self.stream.stream_id()]);
        header.extend_from_slice(&packet_length.to_be_bytes());
        header.push(0x80); // '10' marker, no scrambling
        header.push(if dts.is_some() { 0xC0 } else { 0x80 });
        header.push(header_data_length as u8);

        match dts {
            Some(dts) => {
                header.extend(encode_timestamp(to_90khz(self.pts), 0x03));
                header.extend(encode_timestamp(to_90khz(dts), 0x01));
            }
            None => header.extend(encode_timestamp(to_90khz(self.pts), 0x02)),
        }
        header
    }

    /// Adaptation field body (flags byte onward) for the first TS packet.
    pub(super) fn adaptation_field(&self) -> Option<Vec<u8>> {
        if !self.random_access && self.pcr.is_none() {
            return None;
        }

        let mut field = Vec::with_capacity(7);
        let mut flags = 0;
        if self.random_access {
            flags |= FLAG_RANDOM_ACCESS;
        }
        if self.pcr.is_some() {
            flags |= FLAG_PCR;
        }
        field.push(flags);
        if let Some(pcr) = self.pcr {
            field.extend(encode_pcr(pcr));
        }
        Some(field)
    }
}

/// Encode a 33-bit timestamp for the PES header.
///
/// Format: `prefix(4) ts[32:30](3) 1 ts[29:15](15) 1 ts[14:0](15) 1`.
fn encode_timestamp(ts: u64, prefix: u8) -> [u8; 5] {
    [
        (prefix << 4) | ((((ts >> 30) & 0x07) as u8) << 1) | 0x01,
        ((ts >> 22) & 0xFF) as u8,
        ((((ts >> 15) & 0x7F) as u8) << 1) | 0x01,
        ((ts >> 7) & 0xFF) as u8,
        (((ts & 0x7F) as u8) << 1) | 0x01,
    ]
}

/// Encode a PCR: 33-bit base, 6 reserved bits, 9-bit extension.
fn encode_pcr(pcr: Duration) -> [u8; 6] {
    let (base, ext) = to_pcr(pcr);
    [
        (base >> 25) as u8,
        (base >> 17) as u8,
        (base >> 9) as u8,
        (base >> 1) as u8,
        (((base & 0x01) as u8) << 7) | 0x7E | ((ext >> 8) as u8 & 0x01),
        (ext & 0xFF) as u8,
    ]
}

/// Write one TS packet carrying the head of `payload`; returns the number of
/// payload bytes consumed.
///
/// The adaptation field is grown with stuffing when the remaining payload
/// does not fill the packet.
pub(super) fn write_ts_packet(
    out: &mut Vec<u8>,
    pid: u16,
    unit_start: bool,
    cc: u8,
    adaptation: Option<Vec<u8>>,
    payload: &[u8],
) -> usize {
    let mut has_adaptation = adaptation.is_some();
    let mut field = adaptation.unwrap_or_default();

    let field_size = |present: bool, len: usize| if present { 1 + len } else { 0 };
    let available = MAX_PAYLOAD_SIZE - field_size(has_adaptation, field.len());

    if payload.len() < available {
        let stuffing = available - payload.len();
        if has_adaptation {
            field.resize(field.len() + stuffing, 0xFF);
        } else {
            has_adaptation = true;
            // A lone length byte of 0 covers a single stuffing byte.
            if stuffing > 1 {
                field.push(0x00);
                field.resize(stuffing - 1, 0xFF);
            }
        }
    }

    let mut packet = [0xFFu8; TS_PACKET_SIZE];
    packet[0] = SYNC_BYTE;
    packet[1] = (if unit_start { 0x40 } else { 0x00 }) | ((pid >> 8) as u8 & 0x1F);
    packet[2] = (pid & 0xFF) as u8;
    packet[3] = (if has_adaptation { 0x30 } else { 0x10 }) | (cc & 0x0F);

    let mut pos = 4;
    if has_adaptation {
        packet[4] = field.len() as u8;
        packet[5..5 + field.len()].copy_from_slice(&field);
        pos = 5 + field.len();
    }

    let n = payload.len().min(TS_PACKET_SIZE - pos);
    packet[pos..pos + n].copy_from_slice(&payload[..n]);
    out.extend_from_slice(&packet);
    n
}
