//! One-event-at-a-time grammar shared by the eager and incremental decoders.
//!
//! The parser owns the running-status state machine. Meta and Sysex events
//! cancel running status as far as the protocol is concerned, but the last
//! channel status byte is kept: files written by older, non-compliant
//! encoders reuse it right after a Meta or Sysex, and those files still have
//! to load. That reuse is reported once per file as a [`Notice`].

use std::io::{self, Read};

use byteorder::ReadBytesExt;
use tracing::{trace, warn};

use crate::bytes::{Tell, read_varlen};
use crate::error::{Address, MidiError, Notice};
use crate::events::{ChannelKind, ChannelMessage, Event, META_STATUS, MetaEvent, Message, SYSEX_END, SYSEX_STATUS};

#[derive(Debug, Default)]
pub(crate) struct EventParser {
    /// Last explicit channel-voice status byte (kind nibble + channel).
    running_status: Option<u8>,
    /// The previous event in this track was Meta or Sysex.
    after_cancel: bool,
    /// Per file, not per track.
    compat_reported: bool,
    notices: Vec<Notice>,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Running status never carries over from one track to the next.
    pub fn start_track(&mut self) {
        self.running_status = None;
        self.after_cancel = false;
    }

    pub fn running_status(&self) -> Option<u8> {
        self.running_status
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn has_running_status_errors(&self) -> bool {
        self.compat_reported
    }

    /// Decode the next event from `src`.
    ///
    /// Running out of bytes anywhere inside the event fails with
    /// `TruncatedStream` carrying the address where the event started.
    pub fn parse_event<S: Read + Tell>(&mut self, src: &mut S) -> Result<Event, MidiError> {
        let address = src.tell();
        let event = self.parse_event_at(src, address).map_err(|err| match err {
            MidiError::Io(ref io) if io.kind() == io::ErrorKind::UnexpectedEof => {
                MidiError::TruncatedStream { address }
            }
            other => other,
        })?;
        trace!(address, length = src.tell() - address, %event, "decoded event");
        Ok(event)
    }

    fn parse_event_at<S: Read + Tell>(
        &mut self,
        src: &mut S,
        address: Address,
    ) -> Result<Event, MidiError> {
        let tick = read_varlen(src)?;
        let status_address = src.tell();
        let status = src.read_u8()?;

        if status == META_STATUS {
            let metacommand = src.read_u8()?;
            let len = read_varlen(src)?;
            let data = read_exactly(src, len)?;
            let meta = MetaEvent::from_raw(metacommand, data);
            if !meta.kind.is_known() {
                self.notify(Notice::UnknownMetaEvent { metacommand, address });
            }
            self.after_cancel = true;
            return Ok(Event::new(tick, meta));
        }

        if status == SYSEX_STATUS {
            let mut data = Vec::new();
            loop {
                let b = src.read_u8()?;
                if b == SYSEX_END {
                    break;
                }
                data.push(b);
            }
            self.after_cancel = true;
            return Ok(Event::sysex(tick, data));
        }

        let (kind, channel, mut data, have) = match ChannelKind::from_status(status) {
            Some(kind) => {
                self.running_status = Some(status);
                (kind, status & 0x0F, [0u8; 2], 0)
            }
            None if status & 0x80 == 0 => {
                // A data byte: reuse running status.
                let Some(running) = self.running_status else {
                    return Err(MidiError::MissingStatusByte {
                        data: status,
                        address: status_address,
                    });
                };
                if self.after_cancel && !self.compat_reported {
                    self.compat_reported = true;
                    self.notify(Notice::RunningStatusAfterCancel { address: status_address });
                }
                let kind = ChannelKind::from_status(running).ok_or(MidiError::InvalidStatusByte {
                    status: running,
                    address: status_address,
                })?;
                (kind, running & 0x0F, [status, 0], 1)
            }
            // 0xF1..=0xFE: system messages have no place in a file, and a
            // Sysex status cannot carry channel bits.
            None => {
                return Err(MidiError::InvalidStatusByte {
                    status,
                    address: status_address,
                });
            }
        };

        src.read_exact(&mut data[have..kind.data_len()])?;
        self.after_cancel = false;
        Ok(Event {
            tick,
            message: Message::Channel {
                channel,
                message: ChannelMessage::from_data(kind, data),
            },
        })
    }

    fn notify(&mut self, notice: Notice) {
        warn!("{notice}");
        self.notices.push(notice);
    }
}

/// Read exactly `len` bytes without trusting `len` for the allocation.
fn read_exactly<R: Read>(src: &mut R, len: u64) -> Result<Vec<u8>, MidiError> {
    let mut data = Vec::new();
    src.by_ref().take(len).read_to_end(&mut data)?;
    if (data.len() as u64) < len {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::CountingReader;
    use crate::events::MetaKind;

    fn parse_all(bytes: &[u8]) -> (Vec<Event>, EventParser) {
        let mut parser = EventParser::new();
        let mut src = CountingReader::new(bytes);
        let mut events = Vec::new();
        while src.tell() < bytes.len() as u64 {
            events.push(parser.parse_event(&mut src).unwrap());
        }
        (events, parser)
    }

    #[test]
    fn explicit_then_running_status() {
        let (events, parser) = parse_all(&[0x00, 0x95, 0x42, 0x40, 0x10, 0x42, 0x00]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].tick, 0x10);
        assert_eq!(events[1].channel(), Some(5));
        assert_eq!(
            events[1].as_channel(),
            Some(&ChannelMessage::NoteOn { pitch: 0x42, velocity: 0 })
        );
        assert_eq!(parser.running_status(), Some(0x95));
        assert!(parser.notices().is_empty());
    }

    #[test]
    fn one_byte_kind_under_running_status() {
        let (events, _) = parse_all(&[0x00, 0xC3, 0x13, 0x00, 0x14]);
        assert_eq!(events[1].as_channel(), Some(&ChannelMessage::ProgramChange { value: 0x14 }));
        assert_eq!(events[1].channel(), Some(3));
    }

    #[test]
    fn meta_and_sysex_framing() {
        let (events, _) = parse_all(&[
            0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20, // tempo
            0x05, 0xF0, 0x43, 0x12, 0xF7, // sysex
        ]);
        assert_eq!(events[0].as_meta().and_then(MetaEvent::tempo_mpqn), Some(500_000));
        assert_eq!(events[1].message, Message::Sysex(vec![0x43, 0x12]));
        assert_eq!(events[1].tick, 5);
    }

    #[test]
    fn data_byte_without_status_fails() {
        let mut parser = EventParser::new();
        let mut src = CountingReader::new(&[0x00, 0x40, 0x40][..]);
        assert!(matches!(
            parser.parse_event(&mut src),
            Err(MidiError::MissingStatusByte { data: 0x40, address: 1 })
        ));
    }

    #[test]
    fn sysex_with_channel_bits_is_invalid() {
        let mut parser = EventParser::new();
        let mut src = CountingReader::new(&[0x00, 0xF3, 0x01][..]);
        assert!(matches!(
            parser.parse_event(&mut src),
            Err(MidiError::InvalidStatusByte { status: 0xF3, address: 1 })
        ));
    }

    #[test]
    fn running_status_after_meta_is_tolerated_once() {
        let (events, parser) = parse_all(&[
            0x00, 0x91, 0x3C, 0x40, // note on ch1
            0x00, 0xFF, 0x01, 0x00, // empty text
            0x00, 0x3C, 0x00, // reuses 0x91 across the meta
            0x00, 0xF0, 0xF7, // empty sysex
            0x00, 0x3E, 0x00, // and again: no second notice
        ]);
        assert_eq!(events.len(), 5);
        assert_eq!(events[2].channel(), Some(1));
        assert_eq!(events[4].channel(), Some(1));
        assert_eq!(parser.notices(), &[Notice::RunningStatusAfterCancel { address: 9 }]);
        assert!(parser.has_running_status_errors());
    }

    #[test]
    fn unknown_meta_is_kept_and_noted() {
        let (events, parser) = parse_all(&[0x00, 0xFF, 0x60, 0x02, 0xAA, 0xBB]);
        let meta = events[0].as_meta().unwrap();
        assert_eq!(meta.kind, MetaKind::Unknown(0x60));
        assert_eq!(meta.data, vec![0xAA, 0xBB]);
        assert_eq!(
            parser.notices(),
            &[Notice::UnknownMetaEvent { metacommand: 0x60, address: 0 }]
        );
    }

    #[test]
    fn truncation_reports_event_start() {
        let mut parser = EventParser::new();
        let bytes = [0x00, 0x90, 0x3C, 0x40, 0x81, 0x00, 0x90, 0x3C];
        let mut src = CountingReader::new(&bytes[..]);
        parser.parse_event(&mut src).unwrap();
        assert!(matches!(
            parser.parse_event(&mut src),
            Err(MidiError::TruncatedStream { address: 4 })
        ));
    }

    #[test]
    fn huge_meta_length_does_not_allocate_up_front() {
        let mut parser = EventParser::new();
        let mut src = CountingReader::new(&[0x00, 0xFF, 0x01, 0xFF, 0xFF, 0xFF, 0x7F, 0x41][..]);
        assert!(matches!(
            parser.parse_event(&mut src),
            Err(MidiError::TruncatedStream { address: 0 })
        ));
    }
}
