//! Error and notice types shared by the codec and the time model.
//!
//! Faults are split in two families: [`MidiError`] for anything that goes wrong
//! while reading or writing bytes, and [`TimeModelError`] for queries and
//! mutations of the tick/measure/seconds model. Conditions the decoder can
//! recover from are not errors at all; they surface as [`Notice`] values.

use std::fmt;

use crate::time_model::MeasureBeat;

/// Byte offset from the start of a file (or of a byte slice being decoded).
pub type Address = u64;

#[derive(thiserror::Error, Debug)]
pub enum MidiError {
    #[error("bad {expected} chunk tag at byte {address}: found {found:02X?}")]
    BadMagic {
        expected: &'static str,
        found: [u8; 4],
        address: Address,
    },
    #[error("byte stream truncated in item starting at byte {address}")]
    TruncatedStream { address: Address },
    #[error("track ran out of data prematurely at byte {position}, last event at byte {last_event}")]
    RanOutOfData {
        position: Address,
        last_event: Address,
    },
    #[error("invalid status byte 0x{status:02X} at byte {address}")]
    InvalidStatusByte { status: u8, address: Address },
    #[error("data byte 0x{data:02X} at byte {address} with no pending status byte")]
    MissingStatusByte { data: u8, address: Address },
    #[error("variable-length quantity {value:#X} exceeds 0x0FFFFFFF")]
    VarlenOverflow { value: u64 },
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
    #[error("channel {0} out of range 0..=15")]
    InvalidChannel(u8),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TimeModelError {
    #[error("measure length {numerator}/{denominator} does not divide by beat {beat_numerator}/{beat_denominator}")]
    NonDivisibleSignature {
        numerator: u32,
        denominator: u32,
        beat_numerator: u32,
        beat_denominator: u32,
    },
    #[error("invalid time signature {numerator}/{denominator}")]
    InvalidSignature { numerator: u32, denominator: u32 },
    #[error("resolution must be a positive tick count per quarter note")]
    InvalidResolution,
    #[error("invalid tempo {0} quarter notes per minute")]
    InvalidTempo(f64),
    #[error("change at tick {tick} precedes current region starting at tick {begin}")]
    OutOfOrder { tick: u64, begin: u64 },
    #[error("cannot resolve tick {0} to a modelled region")]
    UnresolvableTick(u64),
    #[error("cannot resolve {0} to a tick")]
    UnresolvableMeasureBeat(MeasureBeat),
    #[error("invalid duration {0} beats")]
    InvalidDuration(f64),
}

/// A condition the decoder recovered from. Still reported, never silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Meta-command not in the catalogue; the event was kept as `MetaKind::Unknown`.
    UnknownMetaEvent { metacommand: u8, address: Address },
    /// A data byte reused running status right after a Meta or Sysex event.
    /// Reported once per file.
    RunningStatusAfterCancel { address: Address },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::UnknownMetaEvent {
                metacommand,
                address,
            } => write!(
                f,
                "unknown meta event 0x{metacommand:02X} at byte {address}, kept as raw data"
            ),
            Notice::RunningStatusAfterCancel { address } => write!(
                f,
                "missing status byte at byte {address}: a channel message follows a Sysex or \
                 Meta event without its own status byte. Earlier encoders produced such files, \
                 so it is read anyway, but other applications may reject it; rewriting the \
                 file repairs it. Not reported again for this file."
            ),
        }
    }
}
