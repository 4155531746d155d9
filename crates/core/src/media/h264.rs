//! H.264 NAL unit helpers and Annex B encoding.
//!
//! ## NAL unit header (ITU-T H.264 §7.3.1)
//!
//! ```text
//! +---------------+
//! |0|1|2|3|4|5|6|7|
//! +-+-+-+-+-+-+-+-+
//! |F|NRI|  Type   |
//! +---------------+
//! ```
//!
//! Only the 5-bit type matters here: type 5 marks an IDR slice, the
//! synchronization point a segment has to start on.
//!
//! ## Annex B byte stream
//!
//! Inside MPEG-TS, H.264 travels as an Annex B byte stream: every NAL unit
//! is preceded by a start code. [`encode_annexb`] always writes the 4-byte
//! form `00 00 00 01`; [`extract_nal_units`] accepts both the 4-byte and the
//! 3-byte `00 00 01` form.

use crate::error::{EncodeErrorKind, MuxError, Result};

/// Non-IDR coded slice.
pub const NALU_TYPE_NON_IDR: u8 = 1;
/// Coded slice of an IDR picture.
pub const NALU_TYPE_IDR: u8 = 5;
/// Supplemental enhancement information.
pub const NALU_TYPE_SEI: u8 = 6;
/// Sequence parameter set.
pub const NALU_TYPE_SPS: u8 = 7;
/// Picture parameter set.
pub const NALU_TYPE_PPS: u8 = 8;
/// Access unit delimiter.
pub const NALU_TYPE_AUD: u8 = 9;

/// Access unit delimiter with `primary_pic_type = 7` (any slice type).
///
/// Prepended to every access unit written to a segment; video.js and iOS
/// players refuse streams without it.
pub const ACCESS_UNIT_DELIMITER: [u8; 2] = [NALU_TYPE_AUD, 0xF0];

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// NAL unit type from the first header byte. Empty units have no type.
pub fn nalu_type(nalu: &[u8]) -> Option<u8> {
    nalu.first().map(|b| b & 0x1F)
}

/// Whether any NAL unit in the access unit is an IDR slice.
pub fn contains_idr<T: AsRef<[u8]>>(nalus: &[T]) -> bool {
    nalus
        .iter()
        .any(|nalu| nalu_type(nalu.as_ref()) == Some(NALU_TYPE_IDR))
}

/// Encode a list of NAL units into an Annex B byte stream.
///
/// Fails on an empty list or on any zero-length NAL unit; both indicate a
/// broken depacketizer upstream and would produce an undecodable PES.
pub fn encode_annexb<T: AsRef<[u8]>>(nalus: &[T]) -> Result<Vec<u8>> {
    if nalus.is_empty() {
        return Err(MuxError::encode(EncodeErrorKind::EmptyAccessUnit));
    }

    let mut size = 0;
    for nalu in nalus {
        let nalu = nalu.as_ref();
        if nalu.is_empty() {
            return Err(MuxError::encode(EncodeErrorKind::EmptyNalu));
        }
        size += START_CODE.len() + nalu.len();
    }

    let mut out = Vec::with_capacity(size);
    for nalu in nalus {
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(nalu.as_ref());
    }
    Ok(out)
}

/// Extract NAL units from an H.264 Annex B bitstream.
///
/// Scans for start codes (both 4-byte `00 00 00 01` and 3-byte
/// `00 00 01`) and returns the NAL data between them, excluding
/// the start codes themselves.
///
/// The start code length is tracked per-NAL to ensure boundaries
/// between adjacent NALs are computed correctly when mixed 3-byte
/// and 4-byte start codes appear.
pub fn extract_nal_units(data: &[u8]) -> Vec<Vec<u8>> {
    let mut nal_units = Vec::new();
    let mut i = 0usize;

    // (nal_data_start_index, start_code_length)
    let mut start_entries: Vec<(usize, usize)> = Vec::new();

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == START_CODE {
            start_entries.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            start_entries.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    for (idx, &(start, _)) in start_entries.iter().enumerate() {
        let end = if idx + 1 < start_entries.len() {
            let (next_start, next_sc_len) = start_entries[idx + 1];
            next_start - next_sc_len
        } else {
            data.len()
        };

        if start < end {
            nal_units.push(data[start..end].to_vec());
        }
    }

    nal_units
}

/// Group a flat NAL unit sequence into access units (ITU-T H.264 §7.4.1.2.3).
///
/// A new access unit starts at an AUD, SPS, PPS or SEI that follows a coded
/// slice, or at a coded slice whose `first_mb_in_slice` is zero (the first
/// bit of the slice header is set) when the current unit already holds a
/// slice. Delimiters are dropped; the multiplexer inserts its own.
pub fn group_access_units(nalus: Vec<Vec<u8>>) -> Vec<Vec<Vec<u8>>> {
    let mut units = Vec::new();
    let mut current: Vec<Vec<u8>> = Vec::new();
    let mut has_slice = false;

    for nalu in nalus {
        let Some(typ) = nalu_type(&nalu) else {
            continue;
        };

        let is_slice = typ == NALU_TYPE_NON_IDR || typ == NALU_TYPE_IDR;
        let starts_unit = match typ {
            NALU_TYPE_AUD | NALU_TYPE_SPS | NALU_TYPE_PPS | NALU_TYPE_SEI => has_slice,
            _ if is_slice => has_slice && nalu.get(1).is_some_and(|b| b & 0x80 != 0),
            _ => false,
        };

        if starts_unit {
            units.push(std::mem::take(&mut current));
            has_slice = false;
        }

        if typ == NALU_TYPE_AUD {
            continue;
        }
        has_slice |= is_slice;
        current.push(nalu);
    }

    if has_slice {
        units.push(current);
    }

    tracing::trace!(access_units = units.len(), "grouped NAL units");
    units
}
