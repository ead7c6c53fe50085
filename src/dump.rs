//! Human-readable rendering of events and tracks for `dumpmidi`.

use std::{borrow::Cow, collections::BTreeMap, fmt};

use crate::events::{ChannelMessage, Event, Message, MetaKind, Tick};
use crate::time_model::MeasureBeat;
use crate::track::Track;

const CHROMATIC_SCALE: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Velocity the note-on column leaves implicit.
pub const DEFAULT_VELOCITY: u8 = 80;

/// Standard pitch name, octave below middle C is 3: `decode_note(60) == "C 4"`.
pub fn decode_note(pitch: u8) -> String {
    let octave = i32::from(pitch / 12) - 1;
    format!("{:<2}{}", CHROMATIC_SCALE[usize::from(pitch % 12)], octave)
}

pub fn controller_name(control: u8) -> Option<Cow<'static, str>> {
    let name = match control {
        0 => "Bank Select",
        1 => "Modulation",
        2 => "Breath Controller",
        4 => "Foot Controller",
        5 => "Portamento Time",
        6 => "Data Entry MSB",
        7 => "Volume",
        8 => "Balance",
        10 => "Pan",
        11 => "Expression",
        32..=63 => return Some(Cow::Owned(format!("Controller {} LSB", control - 32))),
        64 => "Sustain",
        91 => "EFF1(Reverb)",
        92 => "EFF2(Tremolo)",
        93 => "EFF3(Chorus)",
        94 => "EFF4(Detune)",
        95 => "EFF5(Phaser)",
        98 => "NRParm LSB",
        99 => "NRParm MSB",
        120 => "All Sound Off",
        121 => "Reset All Controllers",
        122 => "Local On/Off",
        123 => "All Notes Off",
        126 => "Mono Mode",
        127 => "Poly Mode",
        _ => return None,
    };
    Some(Cow::Borrowed(name))
}

/// Tonic for `alternatives` sharps (positive) or flats (negative) on the
/// circle of fifths starting from F.
fn key_letter(alternatives: i32) -> String {
    let (q, r) = ((alternatives + 1).div_euclid(7), (alternatives + 1).rem_euclid(7));
    let letter = char::from(b'A' + ((5 + 4 * r) % 7) as u8);
    match q {
        q if q < 0 => format!("{letter}{}", "b".repeat(q.unsigned_abs() as usize)),
        q if q > 0 => format!("{letter}{}", "#".repeat(q as usize)),
        _ => letter.to_string(),
    }
}

/// Both readings of a key signature: `interpret_key(-3) == "Eb major/C minor"`.
pub fn interpret_key(alternatives: i8) -> String {
    let n = i32::from(alternatives);
    format!("{} major/{} minor", key_letter(n), key_letter(n + 3))
}

fn describe_tempo(qpm: f64, data: &[u8]) -> String {
    if (qpm - qpm.round()).abs() < 1e-3 {
        format!("{} q/min, data {data:?}", qpm.round() as i64)
    } else {
        format!("{qpm:7.3} q/min, data {data:?}")
    }
}

/// Event-specific detail, prefixed by the kind name.
pub fn describe_event(event: &Event) -> String {
    let detail = match &event.message {
        Message::Meta(meta) => match meta.kind {
            MetaKind::SetTempo => match meta.tempo_qpm() {
                Some(qpm) => describe_tempo(qpm, &meta.data),
                None => format!("data={:?}", meta.data),
            },
            MetaKind::TimeSignature => match meta.signature() {
                Some(sig) => format!("{} / {}", sig.numerator, sig.denominator),
                None => format!("data={:?}", meta.data),
            },
            MetaKind::KeySignature => match meta.key() {
                Some((alternatives, minor)) => format!(
                    "{}{}",
                    interpret_key(alternatives),
                    if minor { " (minor)" } else { "" }
                ),
                None => format!("data={:?}", meta.data),
            },
            MetaKind::Unknown(cmd) => format!("meta event code {cmd} data={:?}", meta.data),
            kind if kind.is_text() => format!("{:?}", meta.as_text().unwrap_or_default()),
            _ => format!("data={:?}", meta.data),
        },
        Message::Channel { message, .. } => match *message {
            ChannelMessage::ProgramChange { value } => format!("program {value}"),
            ChannelMessage::ControlChange { control, value } => {
                let name = controller_name(control).unwrap_or(Cow::Borrowed("Control"));
                format!("{name} ({control}) to {value}")
            }
            ChannelMessage::PitchBend { .. } => {
                format!("bend {}", message.bend().unwrap_or_default())
            }
            _ => format!("data={:?}", event.payload()),
        },
        Message::Sysex(data) => format!("data={data:?}"),
    };
    format!("{}: {detail}", event.name())
}

/// One dump line for an event. Notes get a compact form.
pub fn render_event(track: usize, abs_tick: Tick, event: &Event, at: MeasureBeat) -> String {
    let channel = event
        .channel()
        .map(|ch| ch.to_string())
        .unwrap_or_else(|| " ".into());
    match event.as_channel() {
        Some(&ChannelMessage::NoteOff { pitch, velocity }) => {
            let v = if velocity != 0 { format!(" v {velocity}") } else { String::new() };
            format!(
                "{track} {channel}   {:4} {abs_tick:7}  Off  {} {at}{v}",
                event.tick,
                decode_note(pitch)
            )
        }
        Some(&ChannelMessage::NoteOn { pitch, velocity }) => {
            let (command, v) = match velocity {
                0 => ("Off0", String::new()),
                DEFAULT_VELOCITY => ("On  ", String::new()),
                v => ("On  ", format!(" v {v}")),
            };
            format!(
                "{track} {channel}   {:4} {abs_tick:7}  {command} {} {at}{v}",
                event.tick,
                decode_note(pitch)
            )
        }
        _ => format!(
            "{track} {channel}   {:4}   {abs_tick:5}  {:<8} {}",
            event.tick,
            at.to_string(),
            describe_event(event)
        ),
    }
}

/// Space-separated upper-case hex.
pub fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `MM:SS.mmm` for a running time in seconds.
pub fn format_seconds(seconds: f64) -> String {
    let millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let total_secs = millis / 1000;
    format!("{:02}:{:02}.{:03}", total_secs / 60, total_secs % 60, millis % 1000)
}

/// Per-track event counts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackSummary {
    pub index: usize,
    pub sysex: usize,
    pub meta: usize,
    /// Non-note channel messages, by channel.
    pub control: BTreeMap<u8, usize>,
    pub notes: BTreeMap<u8, usize>,
}

impl TrackSummary {
    pub fn of(index: usize, track: &Track) -> Self {
        let mut summary = Self { index, ..Self::default() };
        for event in track {
            match &event.message {
                Message::Meta(_) => summary.meta += 1,
                Message::Sysex(_) => summary.sysex += 1,
                Message::Channel {
                    channel,
                    message: ChannelMessage::NoteOn { .. } | ChannelMessage::NoteOff { .. },
                } => *summary.notes.entry(*channel).or_default() += 1,
                Message::Channel { channel, .. } => *summary.control.entry(*channel).or_default() += 1,
            }
        }
        summary
    }
}

impl fmt::Display for TrackSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.sysex > 0 {
            parts.push(format!("Sysex {}", self.sysex));
        }
        if self.meta > 0 {
            parts.push(format!("Meta {}", self.meta));
        }
        for (name, counts) in [("Control/ch", &self.control), ("Notes/ch", &self.notes)] {
            if !counts.is_empty() {
                let per_channel: Vec<_> = counts.iter().map(|(ch, n)| format!("{ch}:{n}")).collect();
                parts.push(format!("{name}: {}", per_channel.join(", ")));
            }
        }
        write!(f, "Track {:2}: {}", self.index, parts.join(", "))
    }
}
