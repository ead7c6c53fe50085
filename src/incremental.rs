//! Incremental, pull-based decoding for diagnosing malformed files.
//!
//! [`IncrementalReader`] reads the file header up front and then hands out one
//! [`TrackCursor`] at a time. Each cursor is an iterator over that track's
//! events and reads nothing beyond the event being returned, so everything
//! before the point of failure in a broken file can still be inspected. Every
//! event comes with its byte address and encoded length, and with the running
//! status that was in effect before it was decoded.
//!
//! The reader owns the byte source. It is dropped (for a file: closed) as soon
//! as the last track is drained or any fault stops iteration, and in any case
//! when the reader itself goes out of scope.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use tracing::debug;

use crate::bytes::{CountingReader, Tell};
use crate::error::{Address, MidiError, Notice};
use crate::events::Event;
use crate::parser::EventParser;
use crate::reader::{Header, read_file_header, read_track_header, truncated_at};

/// Where a track chunk sits in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackInfo {
    pub index: u16,
    /// Address of the `MTrk` tag.
    pub address: Address,
    /// Declared body length.
    pub length: u32,
}

/// An event plus the position metadata the eager decoder throws away.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub address: Address,
    pub length: u64,
    /// Last channel status byte retained before this event was read.
    pub running_status: Option<u8>,
    pub event: Event,
}

pub struct IncrementalReader<R: Read = BufReader<File>> {
    src: Option<CountingReader<R>>,
    header: Header,
    parser: EventParser,
    next_track: u16,
    track_end: Address,
}

impl IncrementalReader<BufReader<File>> {
    /// The file is buffered, so the OS may be read ahead of the cursor.
    /// Addresses and the decoding position still advance one event at a time.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MidiError> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file))
    }
}

impl<R: Read> IncrementalReader<R> {
    /// Reads the file header only.
    pub fn from_reader(input: R) -> Result<Self, MidiError> {
        let mut src = CountingReader::new(input);
        let header = read_file_header(&mut src)?;
        let track_end = src.tell();
        Ok(Self {
            src: Some(src),
            header,
            parser: EventParser::new(),
            next_track: 0,
            track_end,
        })
    }

    pub fn header(&self) -> Header {
        self.header
    }

    /// Whether the byte source is still held.
    pub fn is_open(&self) -> bool {
        self.src.is_some()
    }

    /// Release the byte source. Further calls yield nothing.
    pub fn close(&mut self) {
        if self.src.take().is_some() {
            debug!("released midi byte source");
        }
    }

    pub fn notices(&self) -> &[Notice] {
        self.parser.notices()
    }

    pub fn has_running_status_errors(&self) -> bool {
        self.parser.has_running_status_errors()
    }

    /// Advance to the next track. Whatever is left of the previous track is
    /// skipped. `Ok(None)` once all declared tracks have been handed out.
    pub fn next_track(&mut self) -> Result<Option<TrackCursor<'_, R>>, MidiError> {
        let Some(src) = self.src.as_mut() else {
            return Ok(None);
        };
        let position = src.tell();
        if position < self.track_end {
            if let Err(err) = src.skip(self.track_end - position) {
                self.close();
                return Err(truncated_at(position)(err));
            }
        }
        if self.next_track >= self.header.n_tracks {
            self.close();
            return Ok(None);
        }
        let (address, length) = match read_track_header(src) {
            Ok(found) => found,
            Err(err) => {
                self.close();
                return Err(err);
            }
        };
        self.track_end = src.tell() + u64::from(length);
        self.parser.start_track();
        let info = TrackInfo { index: self.next_track, address, length };
        self.next_track += 1;
        Ok(Some(TrackCursor { reader: self, info, finished: false }))
    }
}

/// Lazy sequence of one track's events.
pub struct TrackCursor<'a, R: Read> {
    reader: &'a mut IncrementalReader<R>,
    info: TrackInfo,
    finished: bool,
}

impl<R: Read> TrackCursor<'_, R> {
    pub fn info(&self) -> TrackInfo {
        self.info
    }

    /// Running status currently retained by the decoder.
    pub fn running_status(&self) -> Option<u8> {
        self.reader.parser.running_status()
    }

    pub fn has_running_status_errors(&self) -> bool {
        self.reader.has_running_status_errors()
    }
}

impl<R: Read> Iterator for TrackCursor<'_, R> {
    type Item = Result<DecodedEvent, MidiError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let reader = &mut *self.reader;
        let Some(src) = reader.src.as_mut() else {
            self.finished = true;
            return None;
        };
        let address = src.tell();
        if address >= reader.track_end {
            // Body consumed exactly: ordinary end of track.
            self.finished = true;
            if reader.next_track >= reader.header.n_tracks {
                reader.close();
            }
            return None;
        }

        let running_status = reader.parser.running_status();
        let mut body = src.take(reader.track_end - address);
        match reader.parser.parse_event(&mut body) {
            Ok(event) => Some(Ok(DecodedEvent {
                address,
                length: body.tell() - address,
                running_status,
                event,
            })),
            Err(err) => {
                let position = body.tell();
                self.finished = true;
                reader.close();
                Some(Err(match err {
                    MidiError::TruncatedStream { address } => MidiError::RanOutOfData {
                        position,
                        last_event: address,
                    },
                    other => other,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelMessage, MetaEvent};
    use crate::track::{Pattern, Track};
    use crate::writer::write_midi_bytes;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample() -> Vec<u8> {
        let t0 = Track::new(vec![
            Event::new(0, MetaEvent::time_signature(4, 4)),
            Event::new(0, MetaEvent::tempo(120.0)),
            Event::new(0, MetaEvent::end_of_track()),
        ]);
        let t1 = Track::new(vec![
            Event::on_channel(0, 2, ChannelMessage::NoteOn { pitch: 60, velocity: 90 }),
            Event::on_channel(480, 2, ChannelMessage::NoteOn { pitch: 60, velocity: 0 }),
            Event::new(0, MetaEvent::end_of_track()),
        ]);
        write_midi_bytes(&Pattern::new(1, 480, vec![t0, t1])).unwrap()
    }

    struct BrokenDevice;

    impl Read for BrokenDevice {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("device error"))
        }
    }

    #[test]
    fn device_error_while_skipping_is_reported_as_io() {
        let bytes = sample();
        let mut reader = IncrementalReader::from_reader((&bytes[..30]).chain(BrokenDevice)).unwrap();
        let track = reader.next_track().unwrap().unwrap();
        assert_eq!(track.info().address, 14);
        drop(track);
        let err = reader.next_track().map(|_| ()).unwrap_err();
        assert!(matches!(err, MidiError::Io(_)), "{err:?}");
        assert!(!reader.is_open());
    }

    #[test]
    fn walks_tracks_with_positions() {
        let bytes = sample();
        let mut reader = IncrementalReader::from_reader(&bytes[..]).unwrap();
        assert_eq!(reader.header().n_tracks, 2);

        let mut seen = Vec::new();
        while let Some(track) = reader.next_track().unwrap() {
            let info = track.info();
            let events: Vec<_> = track.map(Result::unwrap).collect();
            seen.push((info, events));
        }
        assert!(!reader.is_open());

        let (info0, ev0) = &seen[0];
        assert_eq!(info0.address, 14);
        assert_eq!(ev0[0].address, 22);
        assert_eq!(ev0[0].length, 8);
        let (info1, ev1) = &seen[1];
        assert_eq!(info1.index, 1);
        assert_eq!(ev1[0].running_status, None);
        assert_eq!(ev1[0].length, 4);
        // Second note reuses running status: delta (2 bytes) + 2 data bytes.
        assert_eq!(ev1[1].running_status, Some(0x92));
        assert_eq!(ev1[1].length, 4);
        assert_eq!(ev1[1].address, ev1[0].address + 4);
        assert_eq!(ev1[1].event.channel(), Some(2));
    }

    #[test]
    fn abandoned_track_is_skipped() {
        let bytes = sample();
        let mut reader = IncrementalReader::from_reader(&bytes[..]).unwrap();
        {
            let mut t0 = reader.next_track().unwrap().unwrap();
            t0.next().unwrap().unwrap();
        }
        let t1 = reader.next_track().unwrap().unwrap();
        assert_eq!(t1.info().index, 1);
        assert_eq!(t1.count(), 3);
        assert!(reader.next_track().unwrap().is_none());
        assert!(!reader.is_open());
    }

    #[test]
    fn premature_end_is_distinct_and_closes() {
        let mut bytes = sample();
        bytes.truncate(bytes.len() - 2);
        let mut reader = IncrementalReader::from_reader(&bytes[..]).unwrap();
        reader.next_track().unwrap().unwrap().for_each(|ev| {
            ev.unwrap();
        });
        let mut t1 = reader.next_track().unwrap().unwrap();
        let good: Vec<_> = t1.by_ref().take(2).map(Result::unwrap).collect();
        let last_good_end = good[1].address + good[1].length;
        match t1.next() {
            Some(Err(MidiError::RanOutOfData { last_event, position })) => {
                assert_eq!(last_event, last_good_end);
                assert_eq!(position, bytes.len() as u64);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(t1.next().is_none());
        drop(t1);
        assert!(!reader.is_open());
        assert!(reader.next_track().unwrap().is_none());
    }

    #[test]
    fn opens_from_path() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(&sample()).unwrap();
        f.flush().unwrap();
        let mut reader = IncrementalReader::open(f.path()).unwrap();
        assert!(reader.is_open());
        let mut total = 0;
        while let Some(track) = reader.next_track().unwrap() {
            total += track.count();
        }
        assert_eq!(total, 6);
        assert!(!reader.is_open());
    }
}
