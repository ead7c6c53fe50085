//! Standard MIDI File codec with a musical time model.
//!
//! - [`reader`] decodes a whole file into a [`Pattern`] of [`Track`]s.
//! - [`incremental`] decodes one event at a time with byte addresses, for
//!   diagnosing broken files.
//! - [`writer`] encodes a [`Pattern`] back to bytes, with running status.
//! - [`time_model`] and [`tempo_model`] map ticks to measure+beat and seconds.

pub mod bytes;
pub mod dump;
pub mod error;
pub mod events;
pub mod incremental;
mod parser;
pub mod reader;
pub mod tempo_model;
pub mod time_model;
pub mod track;
pub mod writer;

pub use error::{Address, MidiError, Notice, TimeModelError};
pub use events::{ChannelKind, ChannelMessage, Event, Message, MetaEvent, MetaKind, Tick};
pub use incremental::{DecodedEvent, IncrementalReader, TrackCursor, TrackInfo};
pub use reader::{Header, MidiReader, read_midi_bytes, read_midifile};
pub use tempo_model::TempoModel;
pub use time_model::{MeasureBeat, TimeModel};
pub use track::{Pattern, TickMode, Track};
pub use writer::{MidiWriter, write_midi_bytes, write_midifile};
