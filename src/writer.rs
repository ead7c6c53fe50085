//! Encoder: [`Pattern`] to Standard MIDI File bytes.
//!
//! Writing is strict where reading is lenient: Meta and Sysex events always
//! cancel running status, so the first channel message after one of them
//! carries an explicit status byte again.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use byteorder::{BigEndian, WriteBytesExt};
use tracing::debug;

use crate::bytes::write_varlen;
use crate::error::MidiError;
use crate::events::{ChannelMessage, Event, META_STATUS, Message, MetaEvent, SYSEX_END, SYSEX_STATUS};
use crate::reader::{HEADER_MAGIC, HEADER_SIZE, TRACK_MAGIC};
use crate::track::{Pattern, TickMode, Track};

#[derive(Debug, Default)]
pub struct MidiWriter {
    running_status: Option<u8>,
}

impl MidiWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a whole pattern into `out`.
    pub fn write<W: Write>(&mut self, out: &mut W, pattern: &Pattern) -> Result<(), MidiError> {
        let n_tracks = u16::try_from(pattern.tracks.len()).map_err(|_| MidiError::InvalidPayload {
            kind: "header",
            reason: format!("{} tracks do not fit the track count field", pattern.tracks.len()),
        })?;
        out.write_all(HEADER_MAGIC)?;
        out.write_u32::<BigEndian>(HEADER_SIZE)?;
        out.write_u16::<BigEndian>(pattern.format)?;
        out.write_u16::<BigEndian>(n_tracks)?;
        out.write_u16::<BigEndian>(pattern.resolution)?;
        for track in &pattern.tracks {
            let body = self.encode_track(track)?;
            let len = u32::try_from(body.len()).map_err(|_| MidiError::InvalidPayload {
                kind: "track",
                reason: format!("{} byte body does not fit the chunk length field", body.len()),
            })?;
            out.write_all(TRACK_MAGIC)?;
            out.write_u32::<BigEndian>(len)?;
            out.write_all(&body)?;
            debug!(len, events = track.len(), "wrote track");
        }
        Ok(())
    }

    /// Encode one track body (no `MTrk` framing). Absolute tracks are
    /// converted on a copy.
    pub fn encode_track(&mut self, track: &Track) -> Result<Vec<u8>, MidiError> {
        self.running_status = None;
        let mut out = Vec::new();
        if track.mode() == TickMode::Absolute {
            let mut relative = track.clone();
            relative.make_ticks_rel();
            for event in &relative {
                self.encode_event(event, &mut out)?;
            }
        } else {
            for event in track {
                self.encode_event(event, &mut out)?;
            }
        }
        Ok(out)
    }

    pub fn encode_event(&mut self, event: &Event, out: &mut Vec<u8>) -> Result<(), MidiError> {
        write_varlen(event.tick, out)?;
        match &event.message {
            Message::Meta(meta) => {
                self.encode_meta(meta, out)?;
                self.running_status = None;
            }
            Message::Sysex(data) => {
                if data.contains(&SYSEX_END) {
                    return Err(MidiError::InvalidPayload {
                        kind: "SysEx",
                        reason: "payload contains the 0xF7 terminator".into(),
                    });
                }
                out.push(SYSEX_STATUS);
                out.extend_from_slice(data);
                out.push(SYSEX_END);
                self.running_status = None;
            }
            Message::Channel { channel, message } => {
                self.encode_channel(*channel, message, out)?;
            }
        }
        Ok(())
    }

    fn encode_meta(&self, meta: &MetaEvent, out: &mut Vec<u8>) -> Result<(), MidiError> {
        out.push(META_STATUS);
        out.push(meta.metacommand());
        write_varlen(meta.data.len() as u64, out)?;
        out.extend_from_slice(&meta.data);
        Ok(())
    }

    fn encode_channel(
        &mut self,
        channel: u8,
        message: &ChannelMessage,
        out: &mut Vec<u8>,
    ) -> Result<(), MidiError> {
        if channel > 0x0F {
            return Err(MidiError::InvalidChannel(channel));
        }
        if message.leading_byte() >= 0x80 {
            return Err(MidiError::InvalidPayload {
                kind: message.kind().name(),
                reason: format!(
                    "leading data byte 0x{:02X} would read back as a status byte",
                    message.leading_byte()
                ),
            });
        }
        let status = message.kind().status() | channel;
        if self.running_status != Some(status) {
            out.push(status);
            self.running_status = Some(status);
        }
        message.write_data(out);
        Ok(())
    }
}

pub fn write_midi_bytes(pattern: &Pattern) -> Result<Vec<u8>, MidiError> {
    let mut out = Vec::new();
    MidiWriter::new().write(&mut out, pattern)?;
    Ok(out)
}

pub fn write_midifile(path: impl AsRef<Path>, pattern: &Pattern) -> Result<(), MidiError> {
    let mut out = BufWriter::new(File::create(path.as_ref())?);
    MidiWriter::new().write(&mut out, pattern)?;
    out.flush()?;
    Ok(())
}

/// Expected encoded size of [`running_status_fixture`].
pub const RUNNING_STATUS_FIXTURE_LEN: usize = 34;

/// Note on, Sysex, note off by velocity on the same channel, in one track.
/// A conforming encoder re-emits the status byte after the Sysex.
pub fn running_status_fixture() -> Pattern {
    let track = Track::new(vec![
        Event::on_channel(0, 5, ChannelMessage::NoteOn { pitch: 66, velocity: 64 }),
        Event::sysex(1, vec![1]),
        Event::on_channel(2, 5, ChannelMessage::NoteOn { pitch: 66, velocity: 0 }),
    ]);
    Pattern::new(1, 480, vec![track])
}

/// Self-test for the encoder's Meta/Sysex running-status cancellation.
pub fn running_status_cancellation_ok() -> bool {
    match write_midi_bytes(&running_status_fixture()) {
        Ok(bytes) => {
            debug!(len = bytes.len(), "running status self-test");
            bytes.len() == RUNNING_STATUS_FIXTURE_LEN
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MetaKind;
    use crate::reader::{read_midi_bytes, read_midifile};
    use tempfile::NamedTempFile;

    fn song() -> Pattern {
        let conductor = Track::new(vec![
            Event::new(0, MetaEvent::text(MetaKind::TrackName, "Conductor")),
            Event::new(0, MetaEvent::time_signature(3, 4)),
            Event::new(0, MetaEvent::tempo(100.0)),
            Event::new(1440, MetaEvent::end_of_track()),
        ]);
        let piano = Track::new(vec![
            Event::on_channel(0, 1, ChannelMessage::ProgramChange { value: 0 }),
            Event::on_channel(0, 1, ChannelMessage::NoteOn { pitch: 60, velocity: 100 }),
            Event::on_channel(0, 1, ChannelMessage::NoteOn { pitch: 64, velocity: 100 }),
            Event::on_channel(480, 1, ChannelMessage::NoteOn { pitch: 60, velocity: 0 }),
            Event::on_channel(0, 1, ChannelMessage::NoteOn { pitch: 64, velocity: 0 }),
            Event::on_channel(0, 1, ChannelMessage::pitch_bend(-100)),
            Event::on_channel(960, 1, ChannelMessage::ControlChange { control: 64, value: 0 }),
            Event::new(0, MetaEvent::end_of_track()),
        ]);
        Pattern::new(1, 480, vec![conductor, piano])
    }

    #[test]
    fn self_test_passes() {
        let bytes = write_midi_bytes(&running_status_fixture()).unwrap();
        assert_eq!(&bytes[22..], &[
            0x00, 0x95, 0x42, 0x40, //
            0x01, 0xF0, 0x01, 0xF7, //
            0x02, 0x95, 0x42, 0x00,
        ]);
        assert!(running_status_cancellation_ok());
    }

    #[test]
    fn decode_encode_is_byte_identical() {
        let first = write_midi_bytes(&song()).unwrap();
        let decoded = read_midi_bytes(&first).unwrap();
        let second = write_midi_bytes(&decoded).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn redundant_status_bytes_are_dropped() {
        let mut bytes = b"MThd\0\0\0\x06\0\0\0\x01\x00\x60".to_vec();
        let body = [
            0x00, 0x90, 0x3C, 0x40, //
            0x00, 0x90, 0x40, 0x40, // explicit but redundant
            0x60, 0x90, 0x3C, 0x00, //
            0x00, 0xFF, 0x2F, 0x00,
        ];
        bytes.extend_from_slice(b"MTrk");
        bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&body);

        let decoded = read_midi_bytes(&bytes).unwrap();
        let rewritten = write_midi_bytes(&decoded).unwrap();
        assert_eq!(rewritten.len(), bytes.len() - 2);
        let reread = read_midi_bytes(&rewritten).unwrap();
        assert_eq!(reread.tracks[0].events, decoded.tracks[0].events);
        assert_eq!(reread.tracks[0].declared_len, 14);
    }

    #[test]
    fn absolute_tracks_are_written_relative() {
        let mut pattern = song();
        let expected = write_midi_bytes(&pattern).unwrap();
        pattern.tracks[1].make_ticks_abs();
        assert_eq!(write_midi_bytes(&pattern).unwrap(), expected);
        assert_eq!(pattern.tracks[1].mode(), TickMode::Absolute);
    }

    #[test]
    fn rejects_unencodable_events() {
        let mut writer = MidiWriter::new();
        let mut out = Vec::new();
        let high = Event::new(0, ChannelMessage::NoteOn { pitch: 0x80, velocity: 1 });
        assert!(matches!(
            writer.encode_event(&high, &mut out),
            Err(MidiError::InvalidPayload { kind: "Note On", .. })
        ));
        let bad_channel = Event::on_channel(0, 16, ChannelMessage::ProgramChange { value: 1 });
        assert!(matches!(
            writer.encode_event(&bad_channel, &mut out),
            Err(MidiError::InvalidChannel(16))
        ));
        let terminated = Event::sysex(0, vec![0x43, SYSEX_END]);
        assert!(writer.encode_event(&terminated, &mut out).is_err());
    }

    #[test]
    fn writes_to_path() {
        let f = NamedTempFile::new().unwrap();
        write_midifile(f.path(), &song()).unwrap();
        let decoded = read_midifile(f.path()).unwrap();
        for (read, written) in decoded.tracks.iter().zip(&song().tracks) {
            assert_eq!(read.events, written.events);
        }
    }

    #[test]
    fn reference_decoder_agrees() {
        use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind, num::u15};

        let bytes = write_midi_bytes(&song()).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.header.timing, Timing::Metrical(u15::new(480)));
        assert_eq!(smf.tracks.len(), 2);

        let tempo = smf.tracks[0].iter().find_map(|ev| match ev.kind {
            TrackEventKind::Meta(MetaMessage::Tempo(t)) => Some(t.as_int()),
            _ => None,
        });
        assert_eq!(tempo, Some(600_000));

        let notes: Vec<(u32, u8, u8, u8)> = smf.tracks[1]
            .iter()
            .filter_map(|ev| match ev.kind {
                TrackEventKind::Midi { channel, message: MidiMessage::NoteOn { key, vel } } => {
                    Some((ev.delta.as_int(), channel.as_int(), key.as_int(), vel.as_int()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(notes, vec![
            (0, 1, 60, 100),
            (0, 1, 64, 100),
            (480, 1, 60, 0),
            (0, 1, 64, 0),
        ]);
    }
}
