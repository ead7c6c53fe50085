//! Tick to real-time conversion.
//!
//! The timeline is split into contiguous [`TempoRegion`]s, each with a constant
//! seconds-per-tick rate and the seconds elapsed before it began. Lookups
//! remember the last region they hit, so a sequential scan over a track costs
//! one range check per query instead of a search.

use std::cell::Cell;
use std::fmt::Write;

use tracing::debug;

use crate::error::TimeModelError;
use crate::events::Tick;
use crate::time_model::TimeModel;

/// Tempo in effect before the first Set Tempo event.
pub const DEFAULT_TEMPO_QPM: f64 = 120.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TempoRegion {
    pub begin: Tick,
    /// `None` while this is the open-ended last region.
    pub end: Option<Tick>,
    pub qpm: f64,
    pub seconds_per_tick: f64,
    pub base_seconds: f64,
}

impl TempoRegion {
    fn new(begin: Tick, resolution: u16, qpm: f64, base_seconds: f64) -> Self {
        Self {
            begin,
            end: None,
            qpm,
            seconds_per_tick: 60.0 / (f64::from(resolution) * qpm),
            base_seconds,
        }
    }

    /// Closed on both ends: a region's end tick is also the next one's begin,
    /// and both give the same answer there.
    pub fn includes(&self, tick: Tick) -> bool {
        tick >= self.begin && self.end.is_none_or(|end| tick <= end)
    }

    pub fn len_ticks(&self) -> Option<Tick> {
        self.end.map(|end| end - self.begin)
    }

    pub fn len_seconds(&self) -> Option<f64> {
        self.len_ticks().map(|len| len as f64 * self.seconds_per_tick)
    }

    fn seconds_at(&self, tick: Tick) -> f64 {
        self.base_seconds + (tick - self.begin) as f64 * self.seconds_per_tick
    }
}

#[derive(Debug, Clone)]
pub struct TempoModel {
    resolution: u16,
    regions: Vec<TempoRegion>,
    cache: Cell<usize>,
}

impl TempoModel {
    pub fn new(resolution: u16) -> Result<Self, TimeModelError> {
        if resolution == 0 {
            return Err(TimeModelError::InvalidResolution);
        }
        Ok(Self {
            resolution,
            regions: vec![TempoRegion::new(0, resolution, DEFAULT_TEMPO_QPM, 0.0)],
            cache: Cell::new(0),
        })
    }

    pub fn regions(&self) -> &[TempoRegion] {
        &self.regions
    }

    fn last(&self) -> &TempoRegion {
        // Never empty: the default region is only ever replaced.
        &self.regions[self.regions.len() - 1]
    }

    pub fn add_tempo(&mut self, tick: Tick, qpm: f64) -> Result<(), TimeModelError> {
        if !qpm.is_finite() || qpm <= 0.0 {
            return Err(TimeModelError::InvalidTempo(qpm));
        }
        let last = self.last();
        if tick < last.begin {
            return Err(TimeModelError::OutOfOrder { tick, begin: last.begin });
        }
        if last.end.is_some_and(|end| tick > end) {
            return Err(TimeModelError::UnresolvableTick(tick));
        }
        // A finished timeline stays finished.
        let end = last.end;
        let seconds_so_far = last.seconds_at(tick);
        if last.begin == tick {
            // Two changes at the same tick: the later one wins.
            self.regions.pop();
        } else if let Some(last) = self.regions.last_mut() {
            last.end = Some(tick);
        }
        let mut region = TempoRegion::new(tick, self.resolution, qpm, seconds_so_far);
        region.end = end;
        self.regions.push(region);
        self.cache.set(0);
        debug!(tick, qpm, seconds_so_far, "tempo change");
        Ok(())
    }

    /// Close the last region at `end_tick`.
    pub fn finish(&mut self, end_tick: Tick) -> Result<(), TimeModelError> {
        let begin = self.last().begin;
        if end_tick < begin {
            return Err(TimeModelError::OutOfOrder { tick: end_tick, begin });
        }
        if let Some(last) = self.regions.last_mut() {
            last.end = Some(end_tick);
        }
        Ok(())
    }

    pub fn ticks_to_seconds(&self, tick: Tick) -> Result<f64, TimeModelError> {
        let cached = self.cache.get();
        if let Some(region) = self.regions.get(cached).filter(|r| r.includes(tick)) {
            return Ok(region.seconds_at(tick));
        }
        let index = self
            .regions
            .partition_point(|r| r.end.is_some_and(|end| end < tick));
        let region = self
            .regions
            .get(index)
            .filter(|r| r.includes(tick))
            .ok_or(TimeModelError::UnresolvableTick(tick))?;
        self.cache.set(index);
        Ok(region.seconds_at(tick))
    }

    /// Seconds at the end of the timeline, once finished.
    pub fn end_seconds(&self) -> Option<f64> {
        let last = self.last();
        last.end.map(|end| last.seconds_at(end))
    }

    /// One line per region, annotated with measure+beat from `time`.
    pub fn report(&self, time: &TimeModel) -> String {
        let mut out = String::from("Tempo model:\n");
        for (i, region) in self.regions.iter().enumerate() {
            let mb = time
                .ticks_to_measure_beat(region.begin)
                .map(|mb| mb.to_string())
                .unwrap_or_else(|_| "?".into());
            let _ = write!(
                out,
                "TmpE {i:2} mb {mb:<8} tick {:5} sec {:6.2}: {:5.1} qt/m, {:4.0} ticks/sec.",
                region.begin,
                region.base_seconds,
                region.qpm,
                1.0 / region.seconds_per_tick,
            );
            match (region.len_ticks(), region.len_seconds()) {
                (Some(ticks), Some(seconds)) => {
                    let _ = writeln!(out, " Len {ticks:5} ticks = {seconds:7.3} sec");
                }
                _ => out.push_str(" Open\n"),
            }
        }
        if let Some(seconds) = self.end_seconds() {
            let _ = writeln!(out, "END at {seconds:8.4} seconds.");
        }
        out
    }
}
