//! Tracks and whole files ("patterns").

use crate::events::{Event, Tick};

/// How the ticks of every event in a track are to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickMode {
    /// Delta since the previous event of the same track, as stored on disk.
    #[default]
    Relative,
    /// Since the start of the track.
    Absolute,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Track {
    pub events: Vec<Event>,
    mode: TickMode,
    /// Body length from the `MTrk` header when decoded. Framing only.
    pub declared_len: u32,
}

impl Track {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events, mode: TickMode::Relative, declared_len: 0 }
    }

    pub fn with_mode(events: Vec<Event>, mode: TickMode) -> Self {
        Self { events, mode, declared_len: 0 }
    }

    pub fn mode(&self) -> TickMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    /// Convert every tick to absolute. No-op if already absolute.
    pub fn make_ticks_abs(&mut self) {
        if self.mode == TickMode::Absolute {
            return;
        }
        let mut running: Tick = 0;
        for ev in &mut self.events {
            running += ev.tick;
            ev.tick = running;
        }
        self.mode = TickMode::Absolute;
    }

    /// Convert every tick to relative. Events are first stable-sorted by
    /// absolute tick, so simultaneous events keep their existing order.
    pub fn make_ticks_rel(&mut self) {
        if self.mode == TickMode::Relative {
            return;
        }
        self.events.sort_by_key(|ev| ev.tick);
        let mut previous: Tick = 0;
        for ev in &mut self.events {
            let absolute = ev.tick;
            ev.tick = absolute - previous;
            previous = absolute;
        }
        self.mode = TickMode::Relative;
    }

    /// Events paired with their absolute tick, whatever the current mode.
    pub fn absolute_events(&self) -> impl Iterator<Item = (Tick, &Event)> + '_ {
        let mode = self.mode;
        self.events.iter().scan(0, move |running: &mut Tick, ev| {
            *running = match mode {
                TickMode::Relative => *running + ev.tick,
                TickMode::Absolute => ev.tick,
            };
            Some((*running, ev))
        })
    }

    /// Absolute tick of the last event.
    pub fn end_tick(&self) -> Tick {
        match self.mode {
            TickMode::Relative => self.events.iter().map(|ev| ev.tick).sum(),
            TickMode::Absolute => self.events.iter().map(|ev| ev.tick).max().unwrap_or(0),
        }
    }
}

impl<'a> IntoIterator for &'a Track {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// A whole MIDI file.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// 0, 1 or 2.
    pub format: u16,
    /// Ticks per quarter note.
    pub resolution: u16,
    pub tracks: Vec<Track>,
}

impl Pattern {
    pub fn new(format: u16, resolution: u16, tracks: Vec<Track>) -> Self {
        Self { format, resolution, tracks }
    }

    /// Highest absolute tick reached by any track.
    pub fn end_tick(&self) -> Tick {
        self.tracks.iter().map(Track::end_tick).max().unwrap_or(0)
    }

    /// Every event as `(track index, event)`, track by track in file order.
    pub fn events(&self) -> impl Iterator<Item = (usize, &Event)> + '_ {
        self.tracks
            .iter()
            .enumerate()
            .flat_map(|(index, track)| track.iter().map(move |ev| (index, ev)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelMessage, MetaEvent};

    fn note(tick: Tick, pitch: u8) -> Event {
        Event::new(tick, ChannelMessage::NoteOn { pitch, velocity: 64 })
    }

    #[test]
    fn abs_then_rel_restores_deltas() {
        let mut track = Track::new(vec![note(0, 60), note(10, 61), note(0, 62), note(5, 63)]);
        track.make_ticks_abs();
        assert_eq!(track.mode(), TickMode::Absolute);
        let ticks: Vec<_> = track.iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![0, 10, 10, 15]);
        track.make_ticks_rel();
        let ticks: Vec<_> = track.iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![0, 10, 0, 5]);
    }

    #[test]
    fn rel_conversion_sorts_stably() {
        let mut track = Track::with_mode(
            vec![note(20, 1), note(10, 2), note(20, 3), note(10, 4)],
            TickMode::Absolute,
        );
        track.make_ticks_rel();
        let order: Vec<_> = track
            .iter()
            .map(|e| match e.as_channel() {
                Some(ChannelMessage::NoteOn { pitch, .. }) => *pitch,
                _ => 0,
            })
            .collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
        let ticks: Vec<_> = track.iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![10, 0, 10, 0]);
    }

    #[test]
    fn absolute_view_and_end_tick() {
        let track = Track::new(vec![note(3, 60), note(4, 61), Event::new(2, MetaEvent::end_of_track())]);
        let abs: Vec<_> = track.absolute_events().map(|(t, _)| t).collect();
        assert_eq!(abs, vec![3, 7, 9]);
        assert_eq!(track.end_tick(), 9);

        let pattern = Pattern::new(1, 96, vec![track, Track::new(vec![note(20, 1)])]);
        assert_eq!(pattern.end_tick(), 20);
        let indices: Vec<_> = pattern.events().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 0, 0, 1]);
    }
}
