//! Tempo map: piecewise-linear conversion between beats and seconds.

use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

/// Tempo used when no tempo change has been registered yet.
pub const DEFAULT_TEMPO: f64 = 120.0;

/// A tempo breakpoint. From `beat` onwards the song runs at `bpm` until the
/// next breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoChange {
    pub beat: f64,
    pub bpm: f64,
}

impl TempoChange {
    pub fn new(beat: f64, bpm: f64) -> Result<Self> {
        let change = Self { beat, bpm };
        change.validate()?;
        Ok(change)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.beat.is_finite() || self.beat < 0.0 {
            return Err(EngineError::invalid(format!(
                "tempo change beat must be >= 0, got {}",
                self.beat
            )));
        }
        if !self.bpm.is_finite() || self.bpm <= 0.0 {
            return Err(EngineError::invalid(format!(
                "tempo must be a positive number of beats per minute, got {}",
                self.bpm
            )));
        }
        Ok(())
    }

    /// Seconds elapsed per beat at this tempo.
    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.bpm
    }
}

#[derive(Debug, Default, Clone)]
pub struct TempoMap {
    changes: Vec<TempoChange>,
    /// Seconds at which each change takes effect, parallel to `changes`.
    starts: Vec<f64>,
}

impl TempoMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for a constant-tempo song.
    pub fn constant(bpm: f64) -> Result<Self> {
        let mut map = Self::new();
        map.add_tempo_change(TempoChange::new(0.0, bpm)?)?;
        Ok(map)
    }

    /// Inserts a breakpoint. A breakpoint already present at the same beat is
    /// replaced.
    pub fn add_tempo_change(&mut self, change: TempoChange) -> Result<()> {
        change.validate()?;
        match self
            .changes
            .binary_search_by(|existing| existing.beat.total_cmp(&change.beat))
        {
            Ok(index) => self.changes[index] = change,
            Err(index) => self.changes.insert(index, change),
        }
        tracing::debug!(beat = change.beat, bpm = change.bpm, "tempo change registered");
        self.rebuild();
        Ok(())
    }

    /// Removes the breakpoint at exactly `beat`, returning it if present.
    pub fn remove_tempo_change(&mut self, beat: f64) -> Option<TempoChange> {
        let index = self
            .changes
            .binary_search_by(|existing| existing.beat.total_cmp(&beat))
            .ok()?;
        let removed = self.changes.remove(index);
        self.rebuild();
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.changes.clear();
        self.starts.clear();
    }

    pub fn changes(&self) -> &[TempoChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn tempo_at_beat(&self, beat: f64) -> f64 {
        match self.segment_for_beat(beat) {
            Some(index) => self.changes[index].bpm,
            None => self.first_tempo(),
        }
    }

    pub fn tempo_at_seconds(&self, seconds: f64) -> f64 {
        match self.segment_for_seconds(seconds) {
            Some(index) => self.changes[index].bpm,
            None => self.first_tempo(),
        }
    }

    pub fn beat_to_seconds(&self, beat: f64) -> f64 {
        match self.segment_for_beat(beat) {
            Some(index) => {
                let change = &self.changes[index];
                self.starts[index] + (beat - change.beat) * change.seconds_per_beat()
            }
            None => beat * 60.0 / self.first_tempo(),
        }
    }

    pub fn seconds_to_beat(&self, seconds: f64) -> f64 {
        match self.segment_for_seconds(seconds) {
            Some(index) => {
                let change = &self.changes[index];
                change.beat + (seconds - self.starts[index]) / change.seconds_per_beat()
            }
            None => seconds * self.first_tempo() / 60.0,
        }
    }

    fn first_tempo(&self) -> f64 {
        self.changes.first().map(|c| c.bpm).unwrap_or(DEFAULT_TEMPO)
    }

    /// Index of the last breakpoint at or before `beat`.
    fn segment_for_beat(&self, beat: f64) -> Option<usize> {
        self.changes
            .partition_point(|c| c.beat <= beat)
            .checked_sub(1)
    }

    fn segment_for_seconds(&self, seconds: f64) -> Option<usize> {
        self.starts.partition_point(|s| *s <= seconds).checked_sub(1)
    }

    fn rebuild(&mut self) {
        self.starts.clear();
        let mut previous: Option<(TempoChange, f64)> = None;
        for change in &self.changes {
            let start = match previous {
                // Anything before the first breakpoint runs at the first tempo.
                None => change.beat * change.seconds_per_beat(),
                Some((prev, prev_start)) => {
                    prev_start + (change.beat - prev.beat) * prev.seconds_per_beat()
                }
            };
            self.starts.push(start);
            previous = Some((*change, start));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn map(changes: &[(f64, f64)]) -> TempoMap {
        let mut map = TempoMap::new();
        for (beat, bpm) in changes {
            map.add_tempo_change(TempoChange::new(*beat, *bpm).unwrap())
                .unwrap();
        }
        map
    }

    #[test]
    fn constant_tempo_converts_beats() {
        let map = map(&[(0.0, 129.0)]);
        let seconds = map.beat_to_seconds(4.0);
        assert!((seconds - 4.0 * 60.0 / 129.0).abs() < EPS);
        assert!((seconds - 1.8605).abs() < 1e-4);
    }

    #[test]
    fn round_trips_across_breakpoints() {
        let map = map(&[(0.0, 129.0), (8.0, 90.0), (16.5, 200.0), (40.0, 60.0)]);
        for i in 0..200 {
            let beat = i as f64 * 0.37;
            let back = map.seconds_to_beat(map.beat_to_seconds(beat));
            assert!((back - beat).abs() < 1e-9, "beat {beat} came back as {back}");
        }
    }

    #[test]
    fn segments_accumulate_previous_tempo() {
        let map = map(&[(0.0, 120.0), (4.0, 60.0)]);
        // 4 beats at 0.5s, then 2 beats at 1s.
        assert!((map.beat_to_seconds(6.0) - 4.0).abs() < EPS);
        assert!((map.seconds_to_beat(4.0) - 6.0).abs() < EPS);
        assert_eq!(map.tempo_at_beat(3.99), 120.0);
        assert_eq!(map.tempo_at_seconds(2.0), 60.0);
    }

    #[test]
    fn extrapolates_past_last_breakpoint() {
        let map = map(&[(0.0, 60.0), (2.0, 120.0)]);
        assert!((map.beat_to_seconds(1002.0) - (2.0 + 500.0)).abs() < EPS);
    }

    #[test]
    fn replaces_change_at_same_beat() {
        let mut map = map(&[(0.0, 100.0)]);
        map.add_tempo_change(TempoChange::new(0.0, 150.0).unwrap())
            .unwrap();
        assert_eq!(map.changes().len(), 1);
        assert_eq!(map.tempo_at_beat(0.0), 150.0);
    }

    #[test]
    fn insertion_order_is_irrelevant() {
        let a = map(&[(8.0, 90.0), (0.0, 129.0)]);
        let b = map(&[(0.0, 129.0), (8.0, 90.0)]);
        assert!((a.beat_to_seconds(12.0) - b.beat_to_seconds(12.0)).abs() < EPS);
    }

    #[test]
    fn rejects_negative_beat_and_bad_tempo() {
        assert!(matches!(
            TempoChange::new(-1.0, 120.0),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(TempoChange::new(0.0, 0.0).is_err());
        assert!(TempoChange::new(0.0, f64::NAN).is_err());
        let mut map = TempoMap::new();
        assert!(map
            .add_tempo_change(TempoChange {
                beat: -0.5,
                bpm: 120.0
            })
            .is_err());
        assert!(map.is_empty());
    }

    #[test]
    fn empty_map_uses_default_tempo() {
        let map = TempoMap::new();
        assert!((map.beat_to_seconds(2.0) - 1.0).abs() < EPS);
        assert!((map.seconds_to_beat(1.0) - 2.0).abs() < EPS);
    }

    #[test]
    fn removing_a_change_rebuilds_segments() {
        let mut map = map(&[(0.0, 120.0), (4.0, 60.0)]);
        assert!(map.remove_tempo_change(4.0).is_some());
        assert!((map.beat_to_seconds(6.0) - 3.0).abs() < EPS);
        assert!(map.remove_tempo_change(4.0).is_none());
    }
}
