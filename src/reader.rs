use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::debug;

use crate::bytes::{CountingReader, Tell};
use crate::error::{Address, MidiError, Notice};
use crate::parser::EventParser;
use crate::track::{Pattern, Track};

pub const HEADER_MAGIC: &[u8; 4] = b"MThd";
pub const TRACK_MAGIC: &[u8; 4] = b"MTrk";
/// Length field of a standard header chunk. Anything beyond it is skipped.
pub const HEADER_SIZE: u32 = 6;

/// File header fields: `MThd`, length, format, track count, resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub format: u16,
    pub n_tracks: u16,
    pub resolution: u16,
}

/// End of input at `address` is truncation; any other I/O failure passes through.
pub(crate) fn truncated_at(address: Address) -> impl Fn(io::Error) -> MidiError + Copy {
    move |err| match err.kind() {
        io::ErrorKind::UnexpectedEof => MidiError::TruncatedStream { address },
        _ => MidiError::Io(err),
    }
}

pub(crate) fn read_magic<R: Read>(
    src: &mut CountingReader<R>,
    expected: &'static [u8; 4],
) -> Result<(), MidiError> {
    let address = src.tell();
    let mut found = [0u8; 4];
    src.read_exact(&mut found).map_err(truncated_at(address))?;
    if &found != expected {
        return Err(MidiError::BadMagic {
            expected: if expected == HEADER_MAGIC { "header" } else { "track" },
            found,
            address,
        });
    }
    Ok(())
}

pub(crate) fn read_file_header<R: Read>(src: &mut CountingReader<R>) -> Result<Header, MidiError> {
    let address = src.tell();
    read_magic(src, HEADER_MAGIC)?;
    let truncated = truncated_at(address);
    let size = src.read_u32::<BigEndian>().map_err(truncated)?;
    let format = src.read_u16::<BigEndian>().map_err(truncated)?;
    let n_tracks = src.read_u16::<BigEndian>().map_err(truncated)?;
    let resolution = src.read_u16::<BigEndian>().map_err(truncated)?;
    if size > HEADER_SIZE {
        src.skip(u64::from(size - HEADER_SIZE)).map_err(truncated)?;
    }
    let header = Header { format, n_tracks, resolution };
    debug!(?header, "read file header");
    Ok(header)
}

/// Returns the track's address (start of `MTrk`) and its declared body length.
pub(crate) fn read_track_header<R: Read>(
    src: &mut CountingReader<R>,
) -> Result<(Address, u32), MidiError> {
    let address = src.tell();
    read_magic(src, TRACK_MAGIC)?;
    let len = src.read_u32::<BigEndian>().map_err(truncated_at(address))?;
    debug!(address, len, "read track header");
    Ok((address, len))
}

/// Whole-file decoder producing a [`Pattern`] with relative ticks.
#[derive(Debug, Default)]
pub struct MidiReader {
    parser: EventParser,
}

impl MidiReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<R: Read>(&mut self, input: R) -> Result<Pattern, MidiError> {
        let mut src = CountingReader::new(input);
        let header = read_file_header(&mut src)?;
        let mut tracks = Vec::with_capacity(usize::from(header.n_tracks));
        for _ in 0..header.n_tracks {
            tracks.push(self.read_track(&mut src)?);
        }
        Ok(Pattern::new(header.format, header.resolution, tracks))
    }

    fn read_track<R: Read>(&mut self, src: &mut CountingReader<R>) -> Result<Track, MidiError> {
        let (_, len) = read_track_header(src)?;
        self.parser.start_track();
        let mut body = src.take(u64::from(len));
        let mut events = Vec::new();
        while body.limit() > 0 {
            events.push(self.parser.parse_event(&mut body)?);
        }
        let mut track = Track::new(events);
        track.declared_len = len;
        Ok(track)
    }

    /// Conditions recovered from so far.
    pub fn notices(&self) -> &[Notice] {
        self.parser.notices()
    }

    /// True if some channel message relied on running status across a Meta or Sysex.
    pub fn has_running_status_errors(&self) -> bool {
        self.parser.has_running_status_errors()
    }
}

/// Decode a whole file from disk.
pub fn read_midifile(path: impl AsRef<Path>) -> Result<Pattern, MidiError> {
    let file = File::open(path.as_ref())?;
    MidiReader::new().read(BufReader::new(file))
}

/// Decode a whole file held in memory.
pub fn read_midi_bytes(bytes: &[u8]) -> Result<Pattern, MidiError> {
    MidiReader::new().read(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelMessage, Message, MetaKind};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn header(format: u16, n_tracks: u16, resolution: u16) -> Vec<u8> {
        let mut out = b"MThd".to_vec();
        out.extend_from_slice(&6u32.to_be_bytes());
        out.extend_from_slice(&format.to_be_bytes());
        out.extend_from_slice(&n_tracks.to_be_bytes());
        out.extend_from_slice(&resolution.to_be_bytes());
        out
    }

    fn track(body: &[u8]) -> Vec<u8> {
        let mut out = b"MTrk".to_vec();
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    const BODY: &[u8] = &[
        0x00, 0xFF, 0x58, 0x04, 0x03, 0x02, 0x18, 0x08, // 3/4
        0x00, 0x90, 0x3C, 0x40, //
        0x83, 0x60, 0x3C, 0x00, // running status, delta 480
        0x00, 0xFF, 0x2F, 0x00,
    ];

    #[test]
    fn reads_header_and_tracks() {
        let mut bytes = header(1, 2, 480);
        bytes.extend(track(BODY));
        bytes.extend(track(&[0x00, 0xFF, 0x2F, 0x00]));
        let pattern = read_midi_bytes(&bytes).unwrap();
        assert_eq!((pattern.format, pattern.resolution), (1, 480));
        assert_eq!(pattern.tracks.len(), 2);
        let t0 = &pattern.tracks[0];
        assert_eq!(t0.len(), 4);
        assert_eq!(t0.declared_len as usize, BODY.len());
        assert_eq!(t0.events[2].tick, 480);
        assert_eq!(
            t0.events[2].message,
            Message::Channel {
                channel: 0,
                message: ChannelMessage::NoteOn { pitch: 0x3C, velocity: 0 }
            }
        );
        assert_eq!(t0.events[3].as_meta().unwrap().kind, MetaKind::EndOfTrack);
    }

    #[test]
    fn surplus_header_bytes_are_skipped() {
        let mut bytes = b"MThd".to_vec();
        bytes.extend_from_slice(&8u32.to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 1, 0x01, 0xE0, 0xAB, 0xCD]);
        bytes.extend(track(&[0x00, 0xFF, 0x2F, 0x00]));
        let pattern = read_midi_bytes(&bytes).unwrap();
        assert_eq!(pattern.resolution, 480);
        assert_eq!(pattern.tracks[0].len(), 1);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let err = read_midi_bytes(b"RIFF\0\0\0\x06\0\0\0\x01\0\x60").unwrap_err();
        assert!(matches!(err, MidiError::BadMagic { expected: "header", address: 0, .. }));

        let mut bytes = header(0, 1, 96);
        bytes.extend_from_slice(b"MTrx\0\0\0\0");
        let err = read_midi_bytes(&bytes).unwrap_err();
        assert!(matches!(err, MidiError::BadMagic { expected: "track", address: 14, .. }));
        assert!(err.to_string().contains("track chunk tag at byte 14"));
    }

    /// Hands out `data`, then fails with a device error.
    struct FailingReader<'a> {
        data: &'a [u8],
    }

    impl Read for FailingReader<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.is_empty() {
                return Err(io::Error::other("device error"));
            }
            self.data.read(buf)
        }
    }

    #[test]
    fn device_errors_are_not_truncation() {
        let err = MidiReader::new().read(FailingReader { data: b"MTh" }).unwrap_err();
        assert!(matches!(err, MidiError::Io(ref io) if io.kind() == io::ErrorKind::Other));

        let bytes = header(0, 1, 480);
        let err = MidiReader::new().read(FailingReader { data: &bytes }).unwrap_err();
        assert!(matches!(err, MidiError::Io(_)), "{err:?}");

        // Plain end of input is still truncation.
        let err = read_midi_bytes(&bytes).unwrap_err();
        assert!(matches!(err, MidiError::TruncatedStream { address: 14 }));
    }

    #[test]
    fn track_one_byte_short_reports_incomplete_event() {
        let mut bytes = header(0, 1, 480);
        let mut chunk = track(BODY);
        chunk.pop();
        bytes.extend(chunk);
        // Declared length still says BODY.len(): the last event starts at 14 + 8 + 16.
        let err = read_midi_bytes(&bytes).unwrap_err();
        assert!(matches!(err, MidiError::TruncatedStream { address: 38 }), "{err:?}");
    }

    #[test]
    fn event_overrunning_declared_length_is_truncated() {
        let mut bytes = header(0, 1, 480);
        let mut chunk = track(&BODY[..BODY.len() - 1]);
        chunk.push(0x00);
        bytes.extend(chunk);
        let err = read_midi_bytes(&bytes).unwrap_err();
        assert!(matches!(err, MidiError::TruncatedStream { address: 38 }), "{err:?}");
    }

    #[test]
    fn missing_tracks_are_truncation() {
        let bytes = header(1, 2, 480);
        let err = read_midi_bytes(&bytes).unwrap_err();
        assert!(matches!(err, MidiError::TruncatedStream { address: 14 }));
    }

    #[test]
    fn reads_from_path_and_reports_compat_notice() {
        let mut bytes = header(0, 1, 96);
        bytes.extend(track(&[
            0x00, 0x90, 0x3C, 0x40, //
            0x00, 0xF0, 0x01, 0xF7, //
            0x10, 0x3C, 0x00, //
        ]));
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(&bytes).unwrap();
        f.flush().unwrap();

        let mut reader = MidiReader::new();
        let pattern = reader.read(File::open(f.path()).unwrap()).unwrap();
        assert_eq!(pattern.tracks[0].len(), 3);
        assert!(reader.has_running_status_errors());
        assert_eq!(reader.notices().len(), 1);

        let again = read_midifile(f.path()).unwrap();
        assert_eq!(again, pattern);
    }
}
