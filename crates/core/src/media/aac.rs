//! AAC track parameters and ADTS framing.
//!
//! ## ADTS header (ISO/IEC 13818-7 §6.2, 7 bytes, no CRC)
//!
//! ```text
//! AAAAAAAA AAAABCCD EEFFFFGH HHIJKLMM MMMMMMMM MMMOOOOO OOOOOOPP
//! ```
//!
//! | Field | Bits | Value written |
//! |-------|------|---------------|
//! | A syncword | 12 | `0xFFF` |
//! | B MPEG version | 1 | 0 (MPEG-4) |
//! | C layer | 2 | 0 |
//! | D protection absent | 1 | 1 |
//! | E profile | 2 | object type − 1 |
//! | F sampling frequency index | 4 | see [`sample_rate_index`] |
//! | G private bit | 1 | 0 |
//! | H channel configuration | 3 | channel count |
//! | I–L originality/home/copyright | 4 | 0 |
//! | M frame length | 13 | header + payload bytes |
//! | O buffer fullness | 11 | `0x7FF` (VBR) |
//! | P raw data blocks − 1 | 2 | 0 |

use crate::error::{EncodeErrorKind, MuxError, Result};

/// ADTS header length without CRC.
pub const ADTS_HEADER_LEN: usize = 7;

/// Largest value of the 13-bit frame length field.
const MAX_FRAME_LEN: usize = (1 << 13) - 1;

/// AAC Low Complexity audio object type.
pub const OBJECT_TYPE_AAC_LC: u8 = 2;

/// Static AAC parameters of the audio track, taken from the SDP
/// `config=` AudioSpecificConfig by the RTSP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    /// MPEG-4 audio object type (2 = AAC LC).
    pub object_type: u8,
    /// Sample rate in Hz; also the RTP clock rate of the track.
    pub sample_rate: u32,
    pub channel_count: u8,
}

impl AudioTrack {
    pub fn new(object_type: u8, sample_rate: u32, channel_count: u8) -> Self {
        Self {
            object_type,
            sample_rate,
            channel_count,
        }
    }

    /// AAC LC track, the profile nearly every RTSP camera sends.
    pub fn aac_lc(sample_rate: u32, channel_count: u8) -> Self {
        Self::new(OBJECT_TYPE_AAC_LC, sample_rate, channel_count)
    }

    /// Check that ADTS can signal these parameters.
    pub fn validate(&self) -> Result<()> {
        sample_rate_index(self.sample_rate)?;
        if !(1..=4).contains(&self.object_type) {
            return Err(MuxError::encode(EncodeErrorKind::UnsupportedObjectType(
                self.object_type,
            )));
        }
        if !(1..=7).contains(&self.channel_count) {
            return Err(MuxError::encode(EncodeErrorKind::UnsupportedChannelCount(
                self.channel_count,
            )));
        }
        Ok(())
    }
}

/// ADTS sampling frequency index (ISO/IEC 14496-3 §1.6.3.4).
pub fn sample_rate_index(rate: u32) -> Result<u8> {
    let idx = match rate {
        96000 => 0,
        88200 => 1,
        64000 => 2,
        48000 => 3,
        44100 => 4,
        32000 => 5,
        24000 => 6,
        22050 => 7,
        16000 => 8,
        12000 => 9,
        11025 => 10,
        8000 => 11,
        7350 => 12,
        _ => return Err(MuxError::encode(EncodeErrorKind::UnsupportedSampleRate(rate))),
    };
    Ok(idx)
}

fn adts_header(track: &AudioTrack, rate_idx: u8, payload_len: usize) -> [u8; ADTS_HEADER_LEN] {
    let frame_len = ADTS_HEADER_LEN + payload_len;
    let profile = track.object_type - 1;
    let channels = track.channel_count;
    let buffer_fullness = 0x7FFusize;

    [
        0xFF,
        0xF1, // MPEG-4, layer 0, no CRC
        (profile << 6) | (rate_idx << 2) | ((channels >> 2) & 0x01),
        ((channels & 0x03) << 6) | ((frame_len >> 11) as u8 & 0x03),
        (frame_len >> 3) as u8,
        (((frame_len & 0x07) as u8) << 5) | ((buffer_fullness >> 6) as u8 & 0x1F),
        ((buffer_fullness & 0x3F) as u8) << 2,
    ]
}

/// Frame every AAC unit with its own ADTS header and concatenate them.
pub fn encode_adts<T: AsRef<[u8]>>(track: &AudioTrack, aus: &[T]) -> Result<Vec<u8>> {
    if aus.is_empty() {
        return Err(MuxError::encode(EncodeErrorKind::EmptyAccessUnit));
    }
    track.validate()?;
    let rate_idx = sample_rate_index(track.sample_rate)?;

    let mut size = 0;
    for au in aus {
        let len = au.as_ref().len();
        if len == 0 {
            return Err(MuxError::encode(EncodeErrorKind::EmptyAccessUnit));
        }
        if ADTS_HEADER_LEN + len > MAX_FRAME_LEN {
            return Err(MuxError::encode(EncodeErrorKind::AudioUnitTooLarge(len)));
        }
        size += ADTS_HEADER_LEN + len;
    }

    let mut out = Vec::with_capacity(size);
    for au in aus {
        let au = au.as_ref();
        out.extend_from_slice(&adts_header(track, rate_idx, au.len()));
        out.extend_from_slice(au);
    }
    Ok(out)
}
