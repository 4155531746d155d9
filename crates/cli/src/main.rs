use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use hlsmux::media::h264;
use hlsmux::{
    AccessUnit, HlsReader, MuxerConfig, ReaderDescription, SegmentingMuxer, StatsReader, Stream,
    StreamPlaylist, VideoTrack,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "hlsmux",
    about = "Segment an H.264 Annex B elementary stream into an HLS playlist window"
)]
struct Args {
    /// Annex B H.264 input file
    input: PathBuf,

    /// Directory receiving `<seq>.ts` segments and `index.m3u8`
    #[arg(long, short, default_value = "hls")]
    output: PathBuf,

    /// Frame rate used to timestamp the pictures
    #[arg(long, default_value_t = 25.0)]
    fps: f64,

    /// Segments kept in the playlist window
    #[arg(long, default_value_t = 3)]
    segment_count: usize,

    /// Target segment duration in seconds
    #[arg(long, default_value_t = 1.0)]
    segment_duration: f64,

    /// Maximum size of one segment in bytes
    #[arg(long, default_value_t = 50 * 1024 * 1024)]
    segment_max_size: usize,
}

impl Args {
    fn config(&self) -> Result<MuxerConfig, String> {
        let segment_duration = Duration::try_from_secs_f64(self.segment_duration)
            .map_err(|e| format!("invalid segment duration: {e}"))?;
        Ok(MuxerConfig {
            segment_count: self.segment_count,
            segment_duration,
            segment_max_size: self.segment_max_size,
        })
    }
}

/// Mirrors the playlist window into a directory.
struct OutputDir {
    path: PathBuf,
    on_disk: BTreeSet<u64>,
}

impl OutputDir {
    fn create(path: &Path) -> hlsmux::Result<Self> {
        fs::create_dir_all(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            on_disk: BTreeSet::new(),
        })
    }

    fn sync(&mut self, playlist: &StreamPlaylist) -> hlsmux::Result<()> {
        let segments = playlist.segments();
        let mut changed = false;

        for segment in &segments {
            if self.on_disk.insert(segment.sequence()) {
                fs::write(self.path.join(segment.name()), segment.data())?;
                tracing::info!(
                    segment = %segment.name(),
                    duration_ms = segment.duration().as_millis() as u64,
                    bytes = segment.len(),
                    "segment written"
                );
                changed = true;
            }
        }

        let oldest = playlist.media_sequence();
        let stale: Vec<u64> = self.on_disk.range(..oldest).copied().collect();
        for sequence in stale {
            self.on_disk.remove(&sequence);
            let file = self.path.join(format!("{sequence}.ts"));
            if let Err(e) = fs::remove_file(&file) {
                tracing::warn!(file = %file.display(), error = %e, "failed to remove segment");
            }
            changed = true;
        }

        if changed {
            fs::write(self.path.join("index.m3u8"), playlist.render())?;
        }
        Ok(())
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if !(args.fps.is_finite() && args.fps > 0.0) {
        return Err(format!("invalid frame rate {}", args.fps).into());
    }
    let config = args.config()?;

    let data = fs::read(&args.input)?;
    let units = h264::group_access_units(h264::extract_nal_units(&data));
    tracing::info!(
        input = %args.input.display(),
        bytes = data.len(),
        access_units = units.len(),
        "input parsed"
    );

    let playlist = StreamPlaylist::new(config.segment_count);
    let muxer = SegmentingMuxer::new(config, Some(VideoTrack::new()), None, playlist.clone())?;

    let stream = Stream::new(&args.input.display().to_string());
    let hls = stream.add_reader(HlsReader::new(muxer));
    stream.add_reader(StatsReader::new());

    let mut output = OutputDir::create(&args.output)?;

    for (index, nalus) in units.into_iter().enumerate() {
        let pts = Duration::from_secs_f64(index as f64 / args.fps);
        stream.write(&AccessUnit::Video { pts, nalus });
        output.sync(&playlist)?;
    }

    // Closing the HLS reader seals the last segment.
    stream.remove_reader(hls);
    output.sync(&playlist)?;

    for (id, description) in stream.describe() {
        if let ReaderDescription::Stats(stats) = description {
            tracing::info!(
                reader = id,
                video_units = stats.video_units,
                payload_bytes = stats.payload_bytes,
                "stream statistics"
            );
        }
    }
    stream.close();

    tracing::info!(
        output = %args.output.display(),
        segments = playlist.len(),
        media_sequence = playlist.media_sequence(),
        "playlist written"
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "segmenting failed");
            ExitCode::FAILURE
        }
    }
}
