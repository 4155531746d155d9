pub mod config;
pub mod error;
pub mod media;
pub mod mpegts;
pub mod muxer;
pub mod playlist;
pub mod reader;
pub mod segment;
pub mod stream;

pub use config::MuxerConfig;
pub use error::{EncodeErrorKind, MuxError, Result};
pub use media::{AccessUnit, AudioTrack, VideoTrack};
pub use muxer::SegmentingMuxer;
pub use playlist::StreamPlaylist;
pub use reader::{HlsReader, Reader, ReaderDescription, Stats, StatsReader};
pub use segment::SealedSegment;
pub use stream::{ReaderId, Stream};
