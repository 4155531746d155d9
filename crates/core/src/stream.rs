//! Stream fan-out to attached readers.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::media::AccessUnit;
use crate::reader::{Reader, ReaderDescription};

/// Identifier handed out by [`Stream::add_reader`].
pub type ReaderId = u64;

#[derive(Debug, Default)]
struct Readers {
    next_id: ReaderId,
    entries: BTreeMap<ReaderId, Reader>,
}

/// A published media stream and the readers attached to it.
///
/// Clones share the reader set. Writes take the lock for the whole fan-out,
/// so every reader sees units in the same order and one at a time.
#[derive(Debug, Clone)]
pub struct Stream {
    name: Arc<str>,
    readers: Arc<Mutex<Readers>>,
}

impl Stream {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            readers: Arc::new(Mutex::new(Readers::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_reader(&self, reader: impl Into<Reader>) -> ReaderId {
        let mut reader = reader.into();
        reader.on_accepted();

        let mut readers = self.readers.lock();
        let id = readers.next_id;
        readers.next_id += 1;
        readers.entries.insert(id, reader);
        tracing::debug!(stream = %self.name, reader = id, "reader added");
        id
    }

    /// Detach and close a reader, handing it back to the caller.
    pub fn remove_reader(&self, id: ReaderId) -> Option<Reader> {
        let mut reader = self.readers.lock().entries.remove(&id)?;
        reader.close();
        tracing::debug!(stream = %self.name, reader = id, "reader removed");
        Some(reader)
    }

    pub fn reader_count(&self) -> usize {
        self.readers.lock().entries.len()
    }

    pub fn write(&self, unit: &AccessUnit) {
        let mut readers = self.readers.lock();
        for reader in readers.entries.values_mut() {
            reader.on_access_unit(unit);
        }
    }

    pub fn write_rtcp(&self, track_id: usize, packet: &[u8]) {
        let mut readers = self.readers.lock();
        for reader in readers.entries.values_mut() {
            reader.on_rtcp(track_id, packet);
        }
    }

    pub fn describe(&self) -> Vec<(ReaderId, ReaderDescription)> {
        self.readers
            .lock()
            .entries
            .iter()
            .map(|(id, reader)| (*id, reader.describe()))
            .collect()
    }

    /// Close and drop every reader.
    pub fn close(&self) {
        let entries = std::mem::take(&mut self.readers.lock().entries);
        for (_, mut reader) in entries {
            reader.close();
        }
        tracing::debug!(stream = %self.name, "stream closed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::reader::{Stats, StatsReader};

    fn video(pts_ms: u64) -> AccessUnit {
        AccessUnit::Video {
            pts: Duration::from_millis(pts_ms),
            nalus: vec![vec![0x41, 0x00]],
        }
    }

    #[test]
    fn fans_out_to_every_reader() {
        let stream = Stream::new("cam");
        let a = stream.add_reader(StatsReader::new());
        let b = stream.add_reader(StatsReader::new());
        assert_ne!(a, b);

        stream.write(&video(0));
        stream.write(&video(40));
        stream.write_rtcp(0, &[0x80]);

        for (_, desc) in stream.describe() {
            assert_eq!(
                desc,
                ReaderDescription::Stats(Stats {
                    video_units: 2,
                    audio_units: 0,
                    payload_bytes: 4,
                    rtcp_packets: 1,
                })
            );
        }
    }

    #[test]
    fn removed_reader_stops_receiving() {
        let stream = Stream::new("cam");
        let id = stream.add_reader(StatsReader::new());
        stream.write(&video(0));
        let removed = stream.remove_reader(id).unwrap();
        stream.write(&video(40));

        assert_eq!(stream.reader_count(), 0);
        assert!(matches!(
            removed.describe(),
            ReaderDescription::Stats(Stats { video_units: 1, .. })
        ));
        assert!(stream.remove_reader(id).is_none());
    }
}
