//! Musical time: ticks to measure+beat and back, plus real time.
//!
//! A [`TimeModel`] is an ordered run of [`SignatureRegion`]s covering the
//! timeline from tick 0. Each region has one time signature and knows the
//! measure number it starts at. The last region stays open-ended until
//! [`TimeModel::finish`] is called with the piece's true length.
//!
//! A signature change that lands in the middle of a measure cuts that measure
//! short; the new signature starts with the next measure number. That keeps
//! every tick mapped to exactly one measure+beat and back.
//!
//! The model also owns the [`TempoModel`] for the same timeline, so one value
//! answers measure, beat and seconds queries.

use std::{fmt, fmt::Write, str::FromStr};

use tracing::{debug, warn};

use crate::error::TimeModelError;
use crate::events::{Event, MetaKind, Tick};
use crate::tempo_model::TempoModel;
use crate::track::Pattern;

/// Signature in effect before the first Time Signature event.
pub const DEFAULT_TIME_SIGNATURE: (u32, u32) = (4, 4);

/// Signatures whose beat is not simply `1/denominator`.
/// 6/4 and 9/4 keep quarter-note beats.
pub const EXCEPTIONAL_TIME_SIGNATURES: [((u32, u32), (u32, u32)); 4] = [
    ((6, 8), (3, 8)),
    ((9, 8), (3, 8)),
    ((12, 8), (3, 8)),
    ((2, 2), (1, 4)),
];

/// Beat unit of a signature, as a fraction of a whole note.
pub fn beat_unit(signature: (u32, u32)) -> (u32, u32) {
    EXCEPTIONAL_TIME_SIGNATURES
        .iter()
        .find(|(sig, _)| *sig == signature)
        .map(|&(_, beat)| beat)
        .unwrap_or((1, signature.1))
}

/// A measure number and a 0-based, possibly fractional, beat within it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasureBeat {
    pub measure: i64,
    pub beat: f64,
}

impl MeasureBeat {
    pub fn new(measure: i64, beat: f64) -> Self {
        Self { measure, beat }
    }
}

impl fmt::Display for MeasureBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+", self.measure)?;
        let beat = self.beat;
        if beat.fract() == 0.0 {
            return write!(f, "{}", beat as i64);
        }
        if beat.abs() < 0.001 {
            return write!(f, "0");
        }
        for den in 2..=128u32 {
            let num = (beat * f64::from(den)).round();
            if (num / f64::from(den) - beat).abs() < 1e-9 {
                // Binary fractions read fine as decimals; 1/3 and friends do not.
                return if den.is_power_of_two() {
                    write!(f, "{beat}")
                } else {
                    write!(f, "{}/{den}", num as i64)
                };
            }
        }
        write!(f, "{beat:.3}")
    }
}

impl FromStr for MeasureBeat {
    type Err = String;

    /// `"12+1.5"` or `"12"` (beat 0).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid measure+beat {s:?}");
        match s.split_once('+') {
            Some((measure, beat)) => {
                let measure = measure.trim().parse().map_err(|_| invalid())?;
                let beat: f64 = beat.trim().parse().map_err(|_| invalid())?;
                if !beat.is_finite() || beat < 0.0 {
                    return Err(invalid());
                }
                Ok(Self::new(measure, beat))
            }
            None => Ok(Self::new(s.trim().parse().map_err(|_| invalid())?, 0.0)),
        }
    }
}

/// A stretch of timeline with one time signature.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureRegion {
    pub begin: Tick,
    /// `None` while this is the open-ended last region.
    pub end: Option<Tick>,
    pub signature: (u32, u32),
    pub beat: (u32, u32),
    pub ticks_per_beat: u64,
    pub beats_per_measure: u64,
    pub base_measure: i64,
}

impl SignatureRegion {
    fn new(
        begin: Tick,
        signature: (u32, u32),
        resolution: u16,
        base_measure: i64,
    ) -> Result<Self, TimeModelError> {
        Self::with_beat(begin, signature, beat_unit(signature), resolution, base_measure)
    }

    fn with_beat(
        begin: Tick,
        signature: (u32, u32),
        beat: (u32, u32),
        resolution: u16,
        base_measure: i64,
    ) -> Result<Self, TimeModelError> {
        let (numerator, denominator) = signature;
        if numerator == 0 || denominator == 0 || beat.0 == 0 || beat.1 == 0 {
            return Err(TimeModelError::InvalidSignature { numerator, denominator });
        }
        let (beat_num, beat_den) = (u64::from(beat.0), u64::from(beat.1));
        // resolution ticks per 1/4, so resolution * 4 per whole note.
        let ticks_per_beat = u64::from(resolution) * 4 * beat_num / beat_den;
        if ticks_per_beat == 0 {
            return Err(TimeModelError::InvalidResolution);
        }
        // (num / den) / (beat_num / beat_den)
        let measure_num = u64::from(numerator) * beat_den;
        let measure_den = u64::from(denominator) * beat_num;
        if measure_num % measure_den != 0 {
            return Err(TimeModelError::NonDivisibleSignature {
                numerator,
                denominator,
                beat_numerator: beat.0,
                beat_denominator: beat.1,
            });
        }
        Ok(Self {
            begin,
            end: None,
            signature,
            beat,
            ticks_per_beat,
            beats_per_measure: measure_num / measure_den,
            base_measure,
        })
    }

    pub fn ticks_per_measure(&self) -> u64 {
        self.ticks_per_beat * self.beats_per_measure
    }

    pub fn len_ticks(&self) -> Option<u64> {
        self.end.map(|end| end - self.begin)
    }

    pub fn len_beats(&self) -> Option<u64> {
        self.len_ticks().map(|len| len / self.ticks_per_beat)
    }

    /// Counts a trailing partial measure.
    pub fn len_measures(&self) -> Option<u64> {
        self.len_ticks().map(|len| len.div_ceil(self.ticks_per_measure()))
    }

    /// Half-open: the end tick belongs to the next region.
    fn contains(&self, tick: Tick) -> bool {
        tick >= self.begin && self.end.is_none_or(|end| tick < end)
    }

    fn measure_beat(&self, tick: Tick) -> MeasureBeat {
        let offset = tick - self.begin;
        let tpm = self.ticks_per_measure();
        MeasureBeat {
            measure: self.base_measure + (offset / tpm) as i64,
            beat: (offset % tpm) as f64 / self.ticks_per_beat as f64,
        }
    }

    /// Measure number following a position at `tick` within this region.
    fn next_measure_at(&self, tick: Tick) -> i64 {
        self.base_measure + (tick - self.begin).div_ceil(self.ticks_per_measure()) as i64
    }
}

#[derive(Debug, Clone)]
pub struct TimeModel {
    resolution: u16,
    regions: Vec<SignatureRegion>,
    tempo: TempoModel,
}

impl TimeModel {
    /// An empty timeline at the default signature and tempo. The first measure
    /// is numbered `starting_measure`.
    pub fn new(resolution: u16, starting_measure: i64) -> Result<Self, TimeModelError> {
        let tempo = TempoModel::new(resolution)?;
        let first = SignatureRegion::new(0, DEFAULT_TIME_SIGNATURE, resolution, starting_measure)?;
        Ok(Self { resolution, regions: vec![first], tempo })
    }

    /// Build from the signature and tempo events of track 0, finished at the
    /// pattern's last tick.
    pub fn from_pattern(pattern: &Pattern, starting_measure: i64) -> Result<Self, TimeModelError> {
        let mut model = Self::new(pattern.resolution, starting_measure)?;
        if let Some(track) = pattern.tracks.first() {
            let mut changes: Vec<_> = track.absolute_events().collect();
            changes.sort_by_key(|(tick, _)| *tick);
            for (tick, event) in changes {
                model.process_event(tick, event)?;
            }
        }
        model.finish(pattern.end_tick())?;
        Ok(model)
    }

    pub fn resolution(&self) -> u16 {
        self.resolution
    }

    pub fn regions(&self) -> &[SignatureRegion] {
        &self.regions
    }

    pub fn tempo(&self) -> &TempoModel {
        &self.tempo
    }

    fn last(&self) -> &SignatureRegion {
        &self.regions[self.regions.len() - 1]
    }

    /// Feed one event at absolute `tick`. Anything but Time Signature and Set
    /// Tempo is ignored.
    pub fn process_event(&mut self, tick: Tick, event: &Event) -> Result<(), TimeModelError> {
        let Some(meta) = event.as_meta() else {
            return Ok(());
        };
        if let Some(sig) = meta.signature() {
            self.add_signature(tick, (u32::from(sig.numerator), sig.denominator))?;
        } else if meta.kind == MetaKind::TimeSignature {
            warn!(tick, data = ?meta.data, "ignoring unreadable time signature");
        } else if meta.tempo_mpqn().is_some() {
            match meta.tempo_qpm() {
                Some(qpm) => self.add_tempo(tick, qpm)?,
                None => warn!(tick, "ignoring zero tempo"),
            }
        }
        Ok(())
    }

    pub fn add_signature(&mut self, tick: Tick, signature: (u32, u32)) -> Result<(), TimeModelError> {
        let last = self.last();
        if tick < last.begin {
            return Err(TimeModelError::OutOfOrder { tick, begin: last.begin });
        }
        if last.end.is_some_and(|end| tick > end) {
            return Err(TimeModelError::UnresolvableTick(tick));
        }
        let measure = last.next_measure_at(tick);
        let mut region = SignatureRegion::new(tick, signature, self.resolution, measure)?;
        // A finished timeline stays finished.
        region.end = last.end;
        if last.begin == tick {
            self.regions.pop();
        } else if let Some(last) = self.regions.last_mut() {
            last.end = Some(tick);
        }
        debug!(
            tick,
            measure,
            numerator = signature.0,
            denominator = signature.1,
            "time signature change"
        );
        self.regions.push(region);
        Ok(())
    }

    pub fn add_tempo(&mut self, tick: Tick, qpm: f64) -> Result<(), TimeModelError> {
        self.tempo.add_tempo(tick, qpm)
    }

    /// Close both the signature and tempo timelines at `end_tick`.
    pub fn finish(&mut self, end_tick: Tick) -> Result<(), TimeModelError> {
        let begin = self.last().begin;
        if end_tick < begin {
            return Err(TimeModelError::OutOfOrder { tick: end_tick, begin });
        }
        self.tempo.finish(end_tick)?;
        if let Some(last) = self.regions.last_mut() {
            last.end = Some(end_tick);
        }
        Ok(())
    }

    /// Last tick of a finished timeline.
    pub fn final_tick(&self) -> Option<Tick> {
        self.last().end
    }

    /// Measure number just past a finished timeline.
    pub fn final_measure(&self) -> Option<i64> {
        let last = self.last();
        last.end.map(|end| last.next_measure_at(end))
    }

    fn region_for(&self, tick: Tick) -> Result<&SignatureRegion, TimeModelError> {
        let index = self
            .regions
            .partition_point(|r| r.end.is_some_and(|end| end <= tick));
        match self.regions.get(index) {
            Some(region) if region.contains(tick) => Ok(region),
            // The very end of the piece resolves against the last region.
            None if self.final_tick() == Some(tick) => Ok(self.last()),
            _ => Err(TimeModelError::UnresolvableTick(tick)),
        }
    }

    pub fn ticks_to_measure_beat(&self, tick: Tick) -> Result<MeasureBeat, TimeModelError> {
        Ok(self.region_for(tick)?.measure_beat(tick))
    }

    pub fn measure_beat_to_ticks(&self, mb: MeasureBeat) -> Result<Tick, TimeModelError> {
        let unresolvable = TimeModelError::UnresolvableMeasureBeat(mb);
        let last_index = self.regions.len() - 1;
        for (i, region) in self.regions.iter().enumerate() {
            let Some(into) = mb.measure.checked_sub(region.base_measure) else {
                return Err(unresolvable);
            };
            let Ok(into) = u64::try_from(into) else {
                continue;
            };
            let beat_ticks = (mb.beat * region.ticks_per_beat as f64).round();
            let in_span = match region.len_measures() {
                None => true,
                Some(len) => {
                    into < len
                        // Exact end of a finished piece that ends on a barline.
                        || (i == last_index && into == len && beat_ticks == 0.0)
                }
            };
            if !in_span {
                continue;
            }
            let Some(barline) = into
                .checked_mul(region.ticks_per_measure())
                .and_then(|ticks| ticks.checked_add(region.begin))
            else {
                return Err(unresolvable);
            };
            let tick = barline as f64 + beat_ticks;
            if !tick.is_finite() || tick < 0.0 || tick >= Tick::MAX as f64 {
                return Err(unresolvable);
            }
            return Ok(tick as Tick);
        }
        Err(unresolvable)
    }

    pub fn ticks_to_seconds(&self, tick: Tick) -> Result<f64, TimeModelError> {
        self.tempo.ticks_to_seconds(tick)
    }

    /// Length in ticks of `beats` local beats at `near_tick`, truncated.
    pub fn duration_to_ticks(&self, near_tick: Tick, beats: f64) -> Result<Tick, TimeModelError> {
        if !beats.is_finite() || beats < 0.0 {
            return Err(TimeModelError::InvalidDuration(beats));
        }
        let region = self.region_for(near_tick)?;
        Ok((beats * region.ticks_per_beat as f64) as Tick)
    }

    pub fn end_seconds(&self) -> Option<f64> {
        self.tempo.end_seconds()
    }

    pub fn signature_report(&self) -> String {
        let mut out = String::new();
        for (i, r) in self.regions.iter().enumerate() {
            let _ = write!(
                out,
                "TME {i}: @ticks {:5} m {:2}, sig {}/{} beat {}/{} tpb {} bpm {}",
                r.begin, r.base_measure, r.signature.0, r.signature.1, r.beat.0, r.beat.1,
                r.ticks_per_beat, r.beats_per_measure,
            );
            match (r.len_ticks(), r.len_beats(), r.len_measures()) {
                (Some(t), Some(b), Some(m)) => {
                    let _ = writeln!(out, " len T/B/M ({t} {b} {m})");
                }
                _ => out.push_str(" open\n"),
            }
        }
        if let (Some(tick), Some(measure)) = (self.final_tick(), self.final_measure()) {
            let _ = writeln!(out, "END at tick {tick} = m. {measure}");
        }
        out
    }

    pub fn tempo_report(&self) -> String {
        self.tempo.report(self)
    }
}
