//! End-to-end segmenting: access units in, sealed MPEG-TS segments out.
//!
//! Segments are inspected at the TS level with a small PES header parser
//! so timestamps are checked the way a player would see them.

use std::time::Duration;

use hlsmux::{
    AccessUnit, AudioTrack, HlsReader, MuxError, MuxerConfig, ReaderDescription, SealedSegment,
    SegmentingMuxer, Stats, StatsReader, Stream, StreamPlaylist, VideoTrack,
};

const PCR_OFFSET: Duration = Duration::from_millis(500);
const VIDEO_PID: u16 = 0x100;
const AUDIO_PID: u16 = 0x101;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn idr() -> Vec<Vec<u8>> {
    vec![
        vec![0x67, 0x42, 0xC0, 0x1F, 0xDA],
        vec![0x68, 0xCE, 0x3C, 0x80],
        vec![0x65, 0x88, 0x84, 0x00, 0x33],
    ]
}

fn non_idr() -> Vec<Vec<u8>> {
    vec![vec![0x41, 0x9A, 0x02, 0x04]]
}

fn video_muxer(config: MuxerConfig) -> (SegmentingMuxer, StreamPlaylist) {
    let playlist = StreamPlaylist::new(config.segment_count);
    let muxer =
        SegmentingMuxer::new(config, Some(VideoTrack::new()), None, playlist.clone()).unwrap();
    (muxer, playlist)
}

fn with_target(target: Duration) -> MuxerConfig {
    MuxerConfig {
        segment_count: 10,
        segment_duration: target,
        ..Default::default()
    }
}

#[derive(Debug)]
struct PesInfo {
    pid: u16,
    pts: u64,
    dts: u64,
    random_access: bool,
}

fn read_timestamp(b: &[u8]) -> u64 {
    (((b[0] >> 1) & 0x07) as u64) << 30
        | (b[1] as u64) << 22
        | (((b[2] >> 1) & 0x7F) as u64) << 15
        | (b[3] as u64) << 7
        | ((b[4] >> 1) & 0x7F) as u64
}

/// Headers of every PES that starts in `ts`, in order.
fn pes_headers(ts: &[u8]) -> Vec<PesInfo> {
    assert_eq!(ts.len() % 188, 0, "segment is not packet aligned");
    let mut out = Vec::new();
    for packet in ts.chunks(188) {
        assert_eq!(packet[0], 0x47);
        let pid = ((packet[1] as u16 & 0x1F) << 8) | packet[2] as u16;
        let unit_start = packet[1] & 0x40 != 0;
        if !unit_start || pid == 0x0000 || pid == 0x1000 {
            continue;
        }

        let (random_access, start) = if packet[3] & 0x20 != 0 {
            let len = packet[4] as usize;
            (len > 0 && packet[5] & 0x40 != 0, 5 + len)
        } else {
            (false, 4)
        };
        let pes = &packet[start..];
        assert_eq!(&pes[..3], &[0x00, 0x00, 0x01]);

        let pts = read_timestamp(&pes[9..14]);
        let dts = if pes[7] & 0x40 != 0 {
            read_timestamp(&pes[14..19])
        } else {
            pts
        };
        out.push(PesInfo {
            pid,
            pts,
            dts,
            random_access,
        });
    }
    out
}

fn to_90khz(d: Duration) -> u64 {
    (d.as_nanos() * 90_000 / 1_000_000_000) as u64
}

fn durations(playlist: &StreamPlaylist) -> Vec<Duration> {
    playlist.segments().iter().map(|s| s.duration()).collect()
}

#[test]
fn leading_non_idr_pictures_are_discarded() {
    let (mut muxer, playlist) = video_muxer(with_target(ms(1000)));
    muxer.write_h264(ms(0), &non_idr()).unwrap();
    muxer.write_h264(ms(40), &non_idr()).unwrap();
    assert!(!muxer.is_open());

    for i in 0..25u64 {
        let nalus = if i == 0 { idr() } else { non_idr() };
        muxer.write_h264(ms(80 + i * 40), &nalus).unwrap();
    }
    muxer.write_h264(ms(1080), &idr()).unwrap();

    let first = playlist.segment(0).unwrap();
    assert_eq!(first.start_pts(), PCR_OFFSET);
    let pes = pes_headers(first.data());
    assert_eq!(pes.len(), 25);
    assert!(pes[0].random_access);
    assert_eq!(pes[0].pts, to_90khz(PCR_OFFSET));
}

#[test]
fn segments_partition_the_timeline() {
    let (mut muxer, playlist) = video_muxer(with_target(ms(1000)));
    let idrs = [0u64, 1100, 2150, 3300, 4400];
    for t in (0..=4400).step_by(50) {
        let nalus = if idrs.contains(&t) { idr() } else { non_idr() };
        muxer.write_h264(ms(t), &nalus).unwrap();
    }

    let segments = playlist.segments();
    assert_eq!(segments.len(), 4);
    for pair in segments.windows(2) {
        assert!(pair[0].end_pts() <= pair[1].start_pts());
        assert_eq!(pair[0].sequence() + 1, pair[1].sequence());
    }
    assert_eq!(
        durations(&playlist),
        vec![ms(1100), ms(1050), ms(1150), ms(1100)]
    );
}

#[test]
fn rotation_waits_for_full_target_since_segment_start() {
    // IDRs at 0, 2.1 s, 4.0 s and 6.3 s with a 2 s target: 4.0 s is only
    // 1.9 s into the second segment, so it does not cut.
    let (mut muxer, playlist) = video_muxer(with_target(ms(2000)));
    let idrs = [0u64, 2100, 4000, 6300, 8400];
    for t in (0..=8400).step_by(100) {
        let nalus = if idrs.contains(&t) { idr() } else { non_idr() };
        muxer.write_h264(ms(t), &nalus).unwrap();
    }

    let starts: Vec<Duration> = playlist.segments().iter().map(|s| s.start_pts()).collect();
    assert_eq!(
        starts,
        vec![PCR_OFFSET, PCR_OFFSET + ms(2100), PCR_OFFSET + ms(6300)]
    );
    assert_eq!(durations(&playlist), vec![ms(2100), ms(4200), ms(2100)]);
}

#[test]
fn decode_timestamps_never_pass_presentation() {
    let (mut muxer, playlist) = video_muxer(with_target(ms(1000)));
    // I P B B P B B P B B at 40 ms per picture, arrival = decode order
    let pts = [0u64, 120, 40, 80, 240, 160, 200, 360, 280, 320];
    for (i, t) in pts.iter().enumerate() {
        let nalus = if i == 0 { idr() } else { non_idr() };
        muxer.write_h264(ms(*t), &nalus).unwrap();
    }
    muxer.write_h264(ms(1000), &idr()).unwrap();

    let pes = pes_headers(playlist.segment(0).unwrap().data());
    assert_eq!(pes.len(), pts.len());
    for p in &pes {
        assert!(p.dts <= p.pts, "DTS {} > PTS {}", p.dts, p.pts);
    }
    for pair in pes.windows(2) {
        assert!(pair[1].dts >= pair[0].dts, "DTS went backwards: {pes:?}");
    }
}

#[test]
fn exact_cadence_produces_exact_segments() {
    let (mut muxer, playlist) = video_muxer(with_target(ms(1000)));
    for frame in 0..=100u64 {
        let nalus = if frame % 25 == 0 { idr() } else { non_idr() };
        muxer.write_h264(ms(frame * 40), &nalus).unwrap();
    }

    assert_eq!(muxer.segments_published(), 4);
    assert_eq!(durations(&playlist), vec![ms(1000); 4]);
    let last = playlist.segment(3).unwrap();
    assert_eq!(last.end_pts(), PCR_OFFSET + ms(4000));
}

#[test]
fn encode_failure_pushes_partial_and_resyncs_on_same_origin() {
    let (mut muxer, playlist) = video_muxer(with_target(ms(1000)));
    muxer.write_h264(ms(0), &idr()).unwrap();
    muxer.write_h264(ms(40), &non_idr()).unwrap();

    let err = muxer
        .write_h264(ms(80), &[vec![0x41, 0x9A], Vec::new()])
        .unwrap_err();
    assert!(matches!(err, MuxError::Encode { .. }));
    assert!(!muxer.is_open());
    assert_eq!(playlist.len(), 1);
    let partial = playlist.segment(0).unwrap();
    assert_eq!(partial.end_pts(), PCR_OFFSET + ms(40));

    // still idle until the next IDR
    muxer.write_h264(ms(120), &non_idr()).unwrap();
    assert_eq!(playlist.len(), 1);

    muxer.write_h264(ms(400), &idr()).unwrap();
    muxer.write_h264(ms(1400), &idr()).unwrap();
    let resumed = playlist.segment(1).unwrap();
    assert_eq!(resumed.start_pts(), PCR_OFFSET + ms(400));
    assert_eq!(resumed.duration(), ms(1000));
}

#[test]
fn oversized_write_fails_with_segment_full() {
    let (mut muxer, playlist) = video_muxer(MuxerConfig {
        segment_max_size: 8 * 188,
        ..with_target(ms(1000))
    });
    muxer.write_h264(ms(0), &idr()).unwrap();

    let huge = vec![vec![0x41; 4000]];
    let err = muxer.write_h264(ms(40), &huge).unwrap_err();
    assert!(matches!(err, MuxError::SegmentFull { max, .. } if max == 8 * 188));
    assert!(!muxer.is_open());

    let partial = playlist.segment(0).unwrap();
    assert_eq!(partial.len(), 3 * 188, "rejected write left no bytes behind");
    assert_eq!(pes_headers(partial.data()).len(), 1);
}

#[test]
fn playlist_window_keeps_newest_three() {
    let (mut muxer, playlist) = video_muxer(MuxerConfig {
        segment_count: 3,
        ..with_target(ms(1000))
    });
    for second in 0..=4u64 {
        muxer.write_h264(ms(second * 1000), &idr()).unwrap();
    }

    let seqs: Vec<u64> = playlist.segments().iter().map(|s| s.sequence()).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(playlist.media_sequence(), 1);

    let m3u8 = playlist.render();
    assert!(m3u8.contains("#EXT-X-MEDIA-SEQUENCE:1\n"));
    assert!(!m3u8.contains("\n0.ts\n"));
    assert!(m3u8.ends_with("3.ts\n"));
}

fn audio_only_muxer() -> (SegmentingMuxer, StreamPlaylist) {
    let config = with_target(ms(1000));
    let playlist = StreamPlaylist::new(config.segment_count);
    let muxer = SegmentingMuxer::new(
        config,
        None,
        Some(AudioTrack::aac_lc(48000, 2)),
        playlist.clone(),
    )
    .unwrap();
    (muxer, playlist)
}

#[test]
fn audio_only_needs_unit_count_before_rotating() {
    let (mut muxer, playlist) = audio_only_muxer();
    // 10 units per second: duration is met long before the count is.
    for i in 0..30u64 {
        muxer.write_aac(ms(i * 100), &[vec![0x21; 16]]).unwrap();
    }
    assert!(playlist.is_empty());
}

#[test]
fn audio_only_rotates_once_both_thresholds_are_met() {
    let (mut muxer, playlist) = audio_only_muxer();
    for i in 0..=100u64 {
        muxer.write_aac(ms(i * 20), &[vec![0x21; 16]]).unwrap();
    }

    let segments = playlist.segments();
    assert_eq!(segments.len(), 1);
    let first: &SealedSegment = &segments[0];
    assert_eq!(first.audio_unit_count(), 100);
    assert_eq!(first.duration(), ms(2000));

    let pes = pes_headers(first.data());
    assert!(pes.iter().all(|p| p.pid == AUDIO_PID && p.random_access));
}

#[test]
fn stream_feeds_hls_and_stats_readers() {
    let config = with_target(ms(1000));
    let playlist = StreamPlaylist::new(config.segment_count);
    let muxer = SegmentingMuxer::new(
        config,
        Some(VideoTrack::new()),
        Some(AudioTrack::aac_lc(44100, 2)),
        playlist.clone(),
    )
    .unwrap();

    let stream = Stream::new("camera1");
    let hls = stream.add_reader(HlsReader::new(muxer));
    let stats = stream.add_reader(StatsReader::new());

    // audio ahead of the first IDR is dropped by the muxer
    stream.write(&AccessUnit::Audio {
        pts: ms(0),
        aus: vec![vec![0x21; 32]],
    });
    for frame in 0..=25u64 {
        let nalus = if frame % 25 == 0 { idr() } else { non_idr() };
        stream.write(&AccessUnit::Video {
            pts: ms(10 + frame * 40),
            nalus,
        });
        stream.write(&AccessUnit::Audio {
            pts: ms(20 + frame * 40),
            aus: vec![vec![0x21; 32]],
        });
    }

    let described = stream.describe();
    assert_eq!(
        described[0],
        (
            hls,
            ReaderDescription::Hls {
                segments_published: 1,
                media_sequence: 0,
                write_errors: 0,
            }
        )
    );
    // 2 IDRs of 14 bytes, 24 pictures of 4 bytes, 27 AAC units of 32 bytes
    assert_eq!(
        described[1],
        (
            stats,
            ReaderDescription::Stats(Stats {
                video_units: 26,
                audio_units: 27,
                payload_bytes: 2 * 14 + 24 * 4 + 27 * 32,
                rtcp_packets: 0,
            })
        )
    );

    let segment = playlist.segment(0).unwrap();
    let pes = pes_headers(segment.data());
    let audio = pes.iter().filter(|p| p.pid == AUDIO_PID).count();
    let video = pes.iter().filter(|p| p.pid == VIDEO_PID).count();
    assert_eq!(video, 25);
    assert_eq!(audio, 25);
}

fn av_muxer() -> (SegmentingMuxer, StreamPlaylist) {
    let config = with_target(ms(1000));
    let playlist = StreamPlaylist::new(config.segment_count);
    let muxer = SegmentingMuxer::new(
        config,
        Some(VideoTrack::new()),
        Some(AudioTrack::aac_lc(48000, 2)),
        playlist.clone(),
    )
    .unwrap();
    (muxer, playlist)
}

#[test]
fn audio_encode_failure_resets_like_video() {
    let (mut muxer, playlist) = av_muxer();
    muxer.write_h264(ms(0), &idr()).unwrap();
    muxer.write_aac(ms(20), &[vec![0x21; 16]]).unwrap();
    muxer.write_h264(ms(40), &non_idr()).unwrap();

    // 9000 bytes do not fit the 13-bit ADTS frame length
    let err = muxer.write_aac(ms(60), &[vec![0; 9000]]).unwrap_err();
    assert!(matches!(err, MuxError::Encode { .. }));
    assert!(!muxer.is_open());
    assert_eq!(playlist.len(), 1);
    let partial = playlist.segment(0).unwrap();
    assert_eq!(partial.audio_unit_count(), 1);
    assert_eq!(partial.end_pts(), PCR_OFFSET + ms(40));

    // audio stays dropped until the next IDR
    muxer.write_aac(ms(80), &[vec![0x21; 16]]).unwrap();
    assert!(!muxer.is_open());

    muxer.write_h264(ms(400), &idr()).unwrap();
    muxer.write_h264(ms(1400), &idr()).unwrap();
    assert_eq!(playlist.len(), 2);
    let resumed = playlist.segment(1).unwrap();
    assert_eq!(resumed.start_pts(), PCR_OFFSET + ms(400));
}

#[test]
fn audio_only_encode_failure_reopens_on_same_origin() {
    let (mut muxer, playlist) = audio_only_muxer();
    muxer.write_aac(ms(100), &[vec![0x21; 16]]).unwrap();
    muxer.write_aac(ms(120), &[vec![0x21; 16]]).unwrap();

    let err = muxer.write_aac(ms(140), &[vec![0; 9000]]).unwrap_err();
    assert!(matches!(err, MuxError::Encode { .. }));
    assert!(!muxer.is_open());
    assert_eq!(playlist.len(), 1);
    assert_eq!(playlist.segment(0).unwrap().audio_unit_count(), 2);

    // any audio unit reopens in audio-only mode
    muxer.write_aac(ms(160), &[vec![0x21; 16]]).unwrap();
    assert!(muxer.is_open());
    muxer.flush(None);
    let resumed = playlist.segment(1).unwrap();
    assert_eq!(resumed.start_pts(), PCR_OFFSET + ms(60));
}

#[test]
fn audio_only_oversized_write_fails_with_segment_full() {
    let config = MuxerConfig {
        segment_max_size: 5 * 188,
        ..with_target(ms(1000))
    };
    let playlist = StreamPlaylist::new(config.segment_count);
    let mut muxer = SegmentingMuxer::new(
        config,
        None,
        Some(AudioTrack::aac_lc(48000, 2)),
        playlist.clone(),
    )
    .unwrap();

    // tables plus one audio PES: 3 packets
    muxer.write_aac(ms(0), &[vec![0x21; 16]]).unwrap();
    let err = muxer.write_aac(ms(20), &[vec![0x21; 16]]).unwrap_err();
    assert!(matches!(err, MuxError::SegmentFull { max, .. } if max == 5 * 188));
    assert!(!muxer.is_open());

    assert_eq!(playlist.len(), 1);
    let partial = playlist.segment(0).unwrap();
    assert_eq!(partial.len(), 3 * 188);
    assert_eq!(partial.audio_unit_count(), 1);
}
