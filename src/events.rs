//! The catalogue of MIDI file event kinds.
//!
//! An [`Event`] is a tick plus a [`Message`]. Messages are a closed set:
//! channel-voice messages (with a channel and named data bytes), meta events
//! (a [`MetaKind`] selected by the meta-command byte, plus raw payload bytes),
//! and system-exclusive blobs.
//!
//! Both lookup tables below (status nibble to [`ChannelKind`], meta-command to
//! [`MetaKind`]) are `static` and computed at compile time, so they are shared
//! read-only by every decoder.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

/// Tick count, relative or absolute depending on the owning track's mode.
pub type Tick = u64;

/// Status byte introducing a meta event.
pub const META_STATUS: u8 = 0xFF;
/// Status byte introducing a system-exclusive event.
pub const SYSEX_STATUS: u8 = 0xF0;
/// Terminator of a system-exclusive payload.
pub const SYSEX_END: u8 = 0xF7;

/// How many payload bytes a kind carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadLen {
    Fixed(usize),
    /// Length-prefixed (meta) or terminator-framed (sysex).
    Variable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    NoteOff,
    NoteOn,
    PolyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
}

static CHANNEL_KINDS: [ChannelKind; 7] = [
    ChannelKind::NoteOff,
    ChannelKind::NoteOn,
    ChannelKind::PolyPressure,
    ChannelKind::ControlChange,
    ChannelKind::ProgramChange,
    ChannelKind::ChannelPressure,
    ChannelKind::PitchBend,
];

impl ChannelKind {
    /// Upper nibble of the status byte, channel bits clear.
    pub const fn status(self) -> u8 {
        match self {
            ChannelKind::NoteOff => 0x80,
            ChannelKind::NoteOn => 0x90,
            ChannelKind::PolyPressure => 0xA0,
            ChannelKind::ControlChange => 0xB0,
            ChannelKind::ProgramChange => 0xC0,
            ChannelKind::ChannelPressure => 0xD0,
            ChannelKind::PitchBend => 0xE0,
        }
    }

    pub const fn data_len(self) -> usize {
        match self {
            ChannelKind::ProgramChange | ChannelKind::ChannelPressure => 1,
            _ => 2,
        }
    }

    pub const fn payload_len(self) -> PayloadLen {
        PayloadLen::Fixed(self.data_len())
    }

    pub const fn name(self) -> &'static str {
        match self {
            ChannelKind::NoteOff => "Note Off",
            ChannelKind::NoteOn => "Note On",
            ChannelKind::PolyPressure => "After Touch",
            ChannelKind::ControlChange => "Control Change",
            ChannelKind::ProgramChange => "Program Change",
            ChannelKind::ChannelPressure => "Channel After Touch",
            ChannelKind::PitchBend => "Pitch Wheel",
        }
    }

    /// Look up the kind selected by a status byte's upper nibble.
    /// `None` for data bytes (< 0x80) and for the 0xF0..=0xFF system range.
    pub fn from_status(status: u8) -> Option<Self> {
        match status >> 4 {
            nibble @ 0x8..=0xE => Some(CHANNEL_KINDS[usize::from(nibble - 0x8)]),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKind {
    SequenceNumber,
    Text,
    Copyright,
    TrackName,
    InstrumentName,
    Lyrics,
    Marker,
    CuePoint,
    ProgramName,
    DeviceName,
    ChannelPrefix,
    Port,
    TrackLoop,
    EndOfTrack,
    SetTempo,
    SmpteOffset,
    TimeSignature,
    KeySignature,
    SequencerSpecific,
    /// Meta-command outside the catalogue, kept verbatim.
    Unknown(u8),
}

const KNOWN_META_KINDS: [MetaKind; 19] = [
    MetaKind::SequenceNumber,
    MetaKind::Text,
    MetaKind::Copyright,
    MetaKind::TrackName,
    MetaKind::InstrumentName,
    MetaKind::Lyrics,
    MetaKind::Marker,
    MetaKind::CuePoint,
    MetaKind::ProgramName,
    MetaKind::DeviceName,
    MetaKind::ChannelPrefix,
    MetaKind::Port,
    MetaKind::TrackLoop,
    MetaKind::EndOfTrack,
    MetaKind::SetTempo,
    MetaKind::SmpteOffset,
    MetaKind::TimeSignature,
    MetaKind::KeySignature,
    MetaKind::SequencerSpecific,
];

static META_KINDS: [Option<MetaKind>; 128] = build_meta_table();

const fn build_meta_table() -> [Option<MetaKind>; 128] {
    let mut table = [None; 128];
    let mut i = 0;
    while i < KNOWN_META_KINDS.len() {
        let kind = KNOWN_META_KINDS[i];
        table[kind.metacommand() as usize] = Some(kind);
        i += 1;
    }
    table
}

impl MetaKind {
    pub const fn metacommand(self) -> u8 {
        match self {
            MetaKind::SequenceNumber => 0x00,
            MetaKind::Text => 0x01,
            MetaKind::Copyright => 0x02,
            MetaKind::TrackName => 0x03,
            MetaKind::InstrumentName => 0x04,
            MetaKind::Lyrics => 0x05,
            MetaKind::Marker => 0x06,
            MetaKind::CuePoint => 0x07,
            MetaKind::ProgramName => 0x08,
            MetaKind::DeviceName => 0x09,
            MetaKind::ChannelPrefix => 0x20,
            MetaKind::Port => 0x21,
            MetaKind::TrackLoop => 0x2E,
            MetaKind::EndOfTrack => 0x2F,
            MetaKind::SetTempo => 0x51,
            MetaKind::SmpteOffset => 0x54,
            MetaKind::TimeSignature => 0x58,
            MetaKind::KeySignature => 0x59,
            MetaKind::SequencerSpecific => 0x7F,
            MetaKind::Unknown(cmd) => cmd,
        }
    }

    /// Catalogue lookup; anything not listed becomes `Unknown(cmd)`.
    pub fn from_metacommand(cmd: u8) -> Self {
        META_KINDS
            .get(usize::from(cmd))
            .copied()
            .flatten()
            .unwrap_or(MetaKind::Unknown(cmd))
    }

    pub fn is_known(self) -> bool {
        !matches!(self, MetaKind::Unknown(_))
    }

    /// Text-bearing kinds 0x01..=0x09.
    pub fn is_text(self) -> bool {
        matches!(
            self,
            MetaKind::Text
                | MetaKind::Copyright
                | MetaKind::TrackName
                | MetaKind::InstrumentName
                | MetaKind::Lyrics
                | MetaKind::Marker
                | MetaKind::CuePoint
                | MetaKind::ProgramName
                | MetaKind::DeviceName
        )
    }

    pub const fn payload_len(self) -> PayloadLen {
        match self {
            MetaKind::SequenceNumber => PayloadLen::Fixed(2),
            MetaKind::ChannelPrefix | MetaKind::Port => PayloadLen::Fixed(1),
            MetaKind::EndOfTrack => PayloadLen::Fixed(0),
            MetaKind::SetTempo => PayloadLen::Fixed(3),
            MetaKind::SmpteOffset => PayloadLen::Fixed(5),
            MetaKind::TimeSignature => PayloadLen::Fixed(4),
            MetaKind::KeySignature => PayloadLen::Fixed(2),
            _ => PayloadLen::Variable,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            MetaKind::SequenceNumber => "Sequence Number",
            MetaKind::Text => "Text",
            MetaKind::Copyright => "Copyright",
            MetaKind::TrackName => "Track Name",
            MetaKind::InstrumentName => "Instrument Name",
            MetaKind::Lyrics => "Lyrics",
            MetaKind::Marker => "Marker",
            MetaKind::CuePoint => "Cue Point",
            MetaKind::ProgramName => "Program Name",
            MetaKind::DeviceName => "Device Name",
            MetaKind::ChannelPrefix => "Channel Prefix",
            MetaKind::Port => "MIDI Port/Cable",
            MetaKind::TrackLoop => "Track Loop",
            MetaKind::EndOfTrack => "End of Track",
            MetaKind::SetTempo => "Set Tempo",
            MetaKind::SmpteOffset => "SMPTE Offset",
            MetaKind::TimeSignature => "Time Signature",
            MetaKind::KeySignature => "Key Signature",
            MetaKind::SequencerSpecific => "Sequencer Specific",
            MetaKind::Unknown(_) => "Unknown",
        }
    }
}

/// Channel-voice message body. Field values are stored as read; only the
/// encoder checks the leading byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelMessage {
    NoteOff { pitch: u8, velocity: u8 },
    NoteOn { pitch: u8, velocity: u8 },
    PolyPressure { pitch: u8, value: u8 },
    ControlChange { control: u8, value: u8 },
    ProgramChange { value: u8 },
    ChannelPressure { value: u8 },
    /// 14-bit value, least significant 7 bits first on the wire.
    PitchBend { lsb: u8, msb: u8 },
}

impl ChannelMessage {
    /// Build from payload bytes. `data[1]` is ignored by one-byte kinds.
    pub fn from_data(kind: ChannelKind, data: [u8; 2]) -> Self {
        let [a, b] = data;
        match kind {
            ChannelKind::NoteOff => ChannelMessage::NoteOff { pitch: a, velocity: b },
            ChannelKind::NoteOn => ChannelMessage::NoteOn { pitch: a, velocity: b },
            ChannelKind::PolyPressure => ChannelMessage::PolyPressure { pitch: a, value: b },
            ChannelKind::ControlChange => ChannelMessage::ControlChange { control: a, value: b },
            ChannelKind::ProgramChange => ChannelMessage::ProgramChange { value: a },
            ChannelKind::ChannelPressure => ChannelMessage::ChannelPressure { value: a },
            ChannelKind::PitchBend => ChannelMessage::PitchBend { lsb: a, msb: b },
        }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            ChannelMessage::NoteOff { .. } => ChannelKind::NoteOff,
            ChannelMessage::NoteOn { .. } => ChannelKind::NoteOn,
            ChannelMessage::PolyPressure { .. } => ChannelKind::PolyPressure,
            ChannelMessage::ControlChange { .. } => ChannelKind::ControlChange,
            ChannelMessage::ProgramChange { .. } => ChannelKind::ProgramChange,
            ChannelMessage::ChannelPressure { .. } => ChannelKind::ChannelPressure,
            ChannelMessage::PitchBend { .. } => ChannelKind::PitchBend,
        }
    }

    /// Payload bytes in wire order.
    pub fn data(&self) -> ([u8; 2], usize) {
        match *self {
            ChannelMessage::NoteOff { pitch, velocity }
            | ChannelMessage::NoteOn { pitch, velocity } => ([pitch, velocity], 2),
            ChannelMessage::PolyPressure { pitch, value } => ([pitch, value], 2),
            ChannelMessage::ControlChange { control, value } => ([control, value], 2),
            ChannelMessage::ProgramChange { value } | ChannelMessage::ChannelPressure { value } => {
                ([value, 0], 1)
            }
            ChannelMessage::PitchBend { lsb, msb } => ([lsb, msb], 2),
        }
    }

    /// First payload byte; must stay below 0x80 to be told apart from a status byte.
    pub fn leading_byte(&self) -> u8 {
        self.data().0[0]
    }

    pub fn write_data(&self, out: &mut Vec<u8>) {
        let (bytes, len) = self.data();
        out.extend_from_slice(&bytes[..len]);
    }

    /// Signed pitch-bend amount, 0 at centre (0x2000).
    pub fn bend(&self) -> Option<i16> {
        match *self {
            ChannelMessage::PitchBend { lsb, msb } => {
                Some((((u16::from(msb) << 7) | u16::from(lsb)) as i16) - 0x2000)
            }
            _ => None,
        }
    }

    pub fn pitch_bend(bend: i16) -> Self {
        let value = (i32::from(bend) + 0x2000).clamp(0, 0x3FFF) as u16;
        ChannelMessage::PitchBend {
            lsb: (value & 0x7F) as u8,
            msb: ((value >> 7) & 0x7F) as u8,
        }
    }
}

/// Decoded fields of a Time Signature meta event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u8,
    /// Actual denominator (2 to the power of the stored exponent).
    pub denominator: u32,
    pub metronome: u8,
    pub thirty_seconds: u8,
}

/// A meta event: its kind plus the raw, length-prefixed payload.
///
/// The payload is kept verbatim so any meta event, known or not, re-encodes to
/// the bytes it was read from. Typed views are provided by the accessors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetaEvent {
    pub kind: MetaKind,
    pub data: Vec<u8>,
}

impl MetaEvent {
    /// A meta event of `kind` with a zeroed payload of its declared length.
    pub fn new(kind: MetaKind) -> Self {
        let len = match kind.payload_len() {
            PayloadLen::Fixed(n) => n,
            PayloadLen::Variable => 0,
        };
        Self { kind, data: vec![0; len] }
    }

    pub fn with_data(kind: MetaKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    /// Build from a raw meta-command byte as found in a file.
    pub fn from_raw(metacommand: u8, data: Vec<u8>) -> Self {
        Self::with_data(MetaKind::from_metacommand(metacommand), data)
    }

    pub fn metacommand(&self) -> u8 {
        self.kind.metacommand()
    }

    pub fn end_of_track() -> Self {
        Self::new(MetaKind::EndOfTrack)
    }

    /// Set Tempo from quarter notes per minute.
    pub fn tempo(quarters_per_minute: f64) -> Self {
        let mpqn = (60_000_000.0 / quarters_per_minute).clamp(0.0, f64::from(0xFF_FFFFu32)) as u32;
        Self::tempo_mpqn_event(mpqn)
    }

    /// Set Tempo from microseconds per quarter note (only the low 24 bits are kept).
    pub fn tempo_mpqn_event(mpqn: u32) -> Self {
        let mut data = vec![0; 3];
        BigEndian::write_u24(&mut data, mpqn & 0xFF_FFFF);
        Self::with_data(MetaKind::SetTempo, data)
    }

    /// Time Signature; `denominator` must be a power of two.
    pub fn time_signature(numerator: u8, denominator: u32) -> Self {
        let exponent = denominator.max(1).trailing_zeros() as u8;
        Self::with_data(MetaKind::TimeSignature, vec![numerator, exponent, 24, 8])
    }

    pub fn key_signature(alternatives: i8, minor: bool) -> Self {
        Self::with_data(MetaKind::KeySignature, vec![alternatives as u8, u8::from(minor)])
    }

    /// Text-family event; characters outside Latin-1 become `?`.
    pub fn text(kind: MetaKind, text: &str) -> Self {
        let data = text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect();
        Self::with_data(kind, data)
    }

    pub fn tempo_mpqn(&self) -> Option<u32> {
        (self.kind == MetaKind::SetTempo && self.data.len() == 3)
            .then(|| BigEndian::read_u24(&self.data))
    }

    /// Tempo as quarter notes per minute. `None` for a zero tempo field.
    pub fn tempo_qpm(&self) -> Option<f64> {
        self.tempo_mpqn()
            .filter(|&mpqn| mpqn > 0)
            .map(|mpqn| 60_000_000.0 / f64::from(mpqn))
    }

    pub fn signature(&self) -> Option<TimeSignature> {
        if self.kind != MetaKind::TimeSignature || self.data.len() < 4 {
            return None;
        }
        Some(TimeSignature {
            numerator: self.data[0],
            denominator: 1u32.checked_shl(u32::from(self.data[1]))?,
            metronome: self.data[2],
            thirty_seconds: self.data[3],
        })
    }

    /// Sharps (positive) or flats (negative), and the minor-mode flag.
    pub fn key(&self) -> Option<(i8, bool)> {
        (self.kind == MetaKind::KeySignature && self.data.len() >= 2)
            .then(|| (self.data[0] as i8, self.data[1] != 0))
    }

    /// Payload as Latin-1 text, for the text family only.
    pub fn as_text(&self) -> Option<String> {
        self.kind
            .is_text()
            .then(|| self.data.iter().map(|&b| char::from(b)).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Message {
    Channel { channel: u8, message: ChannelMessage },
    Meta(MetaEvent),
    Sysex(Vec<u8>),
}

impl From<ChannelMessage> for Message {
    /// Channel-voice messages land on channel 0 unless placed explicitly.
    fn from(message: ChannelMessage) -> Self {
        Message::Channel { channel: 0, message }
    }
}

impl From<MetaEvent> for Message {
    fn from(meta: MetaEvent) -> Self {
        Message::Meta(meta)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    pub tick: Tick,
    pub message: Message,
}

impl Event {
    pub fn new(tick: Tick, message: impl Into<Message>) -> Self {
        Self { tick, message: message.into() }
    }

    pub fn on_channel(tick: Tick, channel: u8, message: ChannelMessage) -> Self {
        Self { tick, message: Message::Channel { channel, message } }
    }

    pub fn sysex(tick: Tick, data: Vec<u8>) -> Self {
        Self { tick, message: Message::Sysex(data) }
    }

    pub fn channel(&self) -> Option<u8> {
        match self.message {
            Message::Channel { channel, .. } => Some(channel),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<&ChannelMessage> {
        match &self.message {
            Message::Channel { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn as_meta(&self) -> Option<&MetaEvent> {
        match &self.message {
            Message::Meta(meta) => Some(meta),
            _ => None,
        }
    }

    /// Meta and Sysex events cancel running status.
    pub fn cancels_running_status(&self) -> bool {
        matches!(self.message, Message::Meta(_) | Message::Sysex(_))
    }

    pub fn name(&self) -> &'static str {
        match &self.message {
            Message::Channel { message, .. } => message.kind().name(),
            Message::Meta(meta) => meta.kind.name(),
            Message::Sysex(_) => "SysEx",
        }
    }

    /// Payload bytes as they appear after the status (and meta-command/length).
    pub fn payload(&self) -> Vec<u8> {
        match &self.message {
            Message::Channel { message, .. } => {
                let mut out = Vec::with_capacity(2);
                message.write_data(&mut out);
                out
            }
            Message::Meta(meta) => meta.data.clone(),
            Message::Sysex(data) => data.clone(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(tick={}", self.name(), self.tick)?;
        match &self.message {
            Message::Channel { channel, .. } => write!(f, ", channel={channel}")?,
            Message::Meta(MetaEvent { kind: MetaKind::Unknown(cmd), .. }) => {
                write!(f, ", metacommand=0x{cmd:02X}")?
            }
            _ => {}
        }
        write!(f, ", data={:?})", self.payload())
    }
}
