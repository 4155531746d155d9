//! Program-specific information: PAT and PMT sections (§2.4.4).

use super::{ElementaryStream, SYNC_BYTE, TS_PACKET_SIZE};

const TABLE_ID_PAT: u8 = 0x00;
const TABLE_ID_PMT: u8 = 0x02;

/// `reserved(2) | version_number(5) = 0 | current_next_indicator = 1`
const VERSION_CURRENT: u8 = 0xC1;

/// Write a section header with a placeholder length, returning the index of
/// the length field.
fn begin_section(section: &mut Vec<u8>, table_id: u8, id: u16) -> usize {
    section.push(table_id);
    let length_pos = section.len();
    section.extend_from_slice(&[0x00, 0x00]);
    section.extend_from_slice(&id.to_be_bytes());
    section.push(VERSION_CURRENT);
    section.push(0x00); // section_number
    section.push(0x00); // last_section_number
    length_pos
}

/// Fill in `section_length` and append the CRC-32/MPEG-2.
fn finish_section(mut section: Vec<u8>, length_pos: usize) -> Vec<u8> {
    // Counted from after the length field, including the CRC.
    let section_length = section.len() - (length_pos + 2) + 4;
    section[length_pos] = 0xB0 | ((section_length >> 8) as u8 & 0x0F);
    section[length_pos + 1] = (section_length & 0xFF) as u8;

    let crc = crczoo::crc32_mpeg2(&section);
    section.extend(crc.to_be_bytes());
    section
}

/// Program association table with a single program.
pub fn pat_section(transport_stream_id: u16, program_number: u16, pmt_pid: u16) -> Vec<u8> {
    let mut section = Vec::with_capacity(16);
    let length_pos = begin_section(&mut section, TABLE_ID_PAT, transport_stream_id);

    section.extend_from_slice(&program_number.to_be_bytes());
    section.push(0xE0 | ((pmt_pid >> 8) as u8 & 0x1F));
    section.push((pmt_pid & 0xFF) as u8);

    finish_section(section, length_pos)
}

/// Program map table listing the elementary streams of the program.
pub fn pmt_section(program_number: u16, pcr_pid: u16, streams: &[ElementaryStream]) -> Vec<u8> {
    let mut section = Vec::with_capacity(16 + 5 * streams.len());
    let length_pos = begin_section(&mut section, TABLE_ID_PMT, program_number);

    section.push(0xE0 | ((pcr_pid >> 8) as u8 & 0x1F));
    section.push((pcr_pid & 0xFF) as u8);
    // program_info_length = 0
    section.extend_from_slice(&[0xF0, 0x00]);

    for stream in streams {
        let pid = stream.pid();
        section.push(stream.stream_type());
        section.push(0xE0 | ((pid >> 8) as u8 & 0x1F));
        section.push((pid & 0xFF) as u8);
        // ES_info_length = 0
        section.extend_from_slice(&[0xF0, 0x00]);
    }

    finish_section(section, length_pos)
}

/// Wrap one section into a single TS packet: pointer field, section, 0xFF fill.
pub fn write_section_packet(out: &mut Vec<u8>, pid: u16, cc: u8, section: &[u8]) {
    let mut packet = [0xFFu8; TS_PACKET_SIZE];
    packet[0] = SYNC_BYTE;
    packet[1] = 0x40 | ((pid >> 8) as u8 & 0x1F); // PUSI
    packet[2] = (pid & 0xFF) as u8;
    packet[3] = 0x10 | (cc & 0x0F); // payload only
    packet[4] = 0x00; // pointer_field

    let len = section.len().min(TS_PACKET_SIZE - 5);
    packet[5..5 + len].copy_from_slice(&section[..len]);
    out.extend_from_slice(&packet);
}
