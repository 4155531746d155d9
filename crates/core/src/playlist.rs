//! Sliding window of published segments and its HLS media playlist.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::segment::SealedSegment;

#[derive(Debug)]
struct Window {
    capacity: usize,
    segments: VecDeque<Arc<SealedSegment>>,
}

/// Bounded, ordered window of the most recent sealed segments.
///
/// Cheap to clone; all clones share the same window. The muxer pushes,
/// any number of HTTP handlers read concurrently.
#[derive(Debug, Clone)]
pub struct StreamPlaylist {
    inner: Arc<RwLock<Window>>,
}

impl StreamPlaylist {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Window {
                capacity,
                segments: VecDeque::with_capacity(capacity + 1),
            })),
        }
    }

    /// Append a segment, evicting the oldest ones beyond capacity.
    ///
    /// Returns the evicted segments so that callers mirroring the window on
    /// disk can remove them.
    pub fn push(&self, segment: SealedSegment) -> Vec<Arc<SealedSegment>> {
        let mut window = self.inner.write();
        tracing::debug!(
            sequence = segment.sequence(),
            duration_ms = segment.duration().as_millis() as u64,
            bytes = segment.len(),
            "segment published"
        );
        window.segments.push_back(Arc::new(segment));

        let mut evicted = Vec::new();
        while window.segments.len() > window.capacity {
            if let Some(old) = window.segments.pop_front() {
                tracing::trace!(sequence = old.sequence(), "segment evicted");
                evicted.push(old);
            }
        }
        evicted
    }

    /// Snapshot of the window, oldest first.
    pub fn segments(&self) -> Vec<Arc<SealedSegment>> {
        self.inner.read().segments.iter().cloned().collect()
    }

    pub fn segment(&self, sequence: u64) -> Option<Arc<SealedSegment>> {
        self.inner
            .read()
            .segments
            .iter()
            .find(|s| s.sequence() == sequence)
            .cloned()
    }

    /// Sequence number of the oldest segment in the window.
    pub fn media_sequence(&self) -> u64 {
        self.inner
            .read()
            .segments
            .front()
            .map_or(0, |s| s.sequence())
    }

    pub fn len(&self) -> usize {
        self.inner.read().segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().segments.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().capacity
    }

    /// Render the window as an HLS media playlist (version 3).
    pub fn render(&self) -> String {
        let segments = self.segments();

        let target_duration = segments
            .iter()
            .map(|s| s.duration().as_secs_f64().ceil() as u64)
            .max()
            .unwrap_or(0)
            .max(1);
        let media_sequence = segments.first().map_or(0, |s| s.sequence());

        let mut m3u8 = String::new();
        m3u8.push_str("#EXTM3U\n");
        m3u8.push_str("#EXT-X-VERSION:3\n");
        m3u8.push_str("#EXT-X-ALLOW-CACHE:NO\n");
        let _ = writeln!(m3u8, "#EXT-X-TARGETDURATION:{target_duration}");
        let _ = writeln!(m3u8, "#EXT-X-MEDIA-SEQUENCE:{media_sequence}");
        m3u8.push('\n');

        for segment in &segments {
            let _ = writeln!(m3u8, "#EXTINF:{:.3},", segment.duration().as_secs_f64());
            let _ = writeln!(m3u8, "{}", segment.name());
        }
        m3u8
    }
}
